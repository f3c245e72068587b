//! End-to-end scenarios for the three roles wired together over the
//! in-process bus, exercising §8 of the design doc.
extern crate paxos_core;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use paxos_core::bus::{Bus, InProcessBus, Schedule};
use paxos_core::message::PromiseResponse;
use paxos_core::server::Server;
use paxos_core::PaxosError;

fn cluster(
    group_id: i128,
    cluster_size: usize,
) -> (
    InProcessBus<&'static str, &'static str>,
    Vec<Server<&'static str, &'static str, InProcessBus<&'static str, &'static str>>>,
) {
    let bus: InProcessBus<&'static str, &'static str> = InProcessBus::new();
    let mut servers = Vec::new();
    for _ in 0..cluster_size {
        let server = Server::new(group_id, cluster_size, bus.fork(), true, true, true).unwrap();
        server.start();
        servers.push(server);
    }
    (bus, servers)
}

#[test]
fn happy_path_three_nodes_all_roles() {
    let (_bus, servers) = cluster(1, 3);

    let result = servers[0]
        .propose("x", "forty-two", false, Some(Duration::from_secs(2)))
        .unwrap();
    assert!(result);

    for server in &servers {
        assert_eq!(server.learned(&"x"), Some("forty-two"));
    }
}

#[test]
fn value_preserved_under_overwrite_false() {
    let (_bus, servers) = cluster(1, 3);

    // First round commits "old" to every acceptor at N=1 (cluster_size 3
    // requires unanimity under the strict quorum threshold, so this also
    // leaves all three acceptors holding the same accepted value).
    assert!(servers[0]
        .propose("x", "old", false, Some(Duration::from_secs(2)))
        .unwrap());

    // servers[1] is a fresh Proposer instance, so its first attempt also
    // allocates N=1 — which every acceptor has already promised, so it's
    // rejected outright and bumps servers[1]'s number to 2. The retry at
    // N=2 is the one that actually runs the overwrite=false substitution:
    // every promise response now carries (1, "old"), so the proposer
    // substitutes "old" for the caller's value before the accept phase.
    assert!(!servers[1]
        .propose("x", "new", false, Some(Duration::from_secs(2)))
        .unwrap());
    let result = servers[1]
        .propose("x", "new", false, Some(Duration::from_secs(2)))
        .unwrap();

    assert!(result);
    for server in &servers {
        assert_eq!(server.learned(&"x"), Some("old"));
    }
}

#[test]
fn overwrite_true_replaces_prior_value() {
    let (_bus, servers) = cluster(1, 3);

    assert!(servers[0]
        .propose("x", "old", false, Some(Duration::from_secs(2)))
        .unwrap());

    // Same first-attempt-rejected-then-retry shape as the overwrite=false
    // scenario above: servers[1]'s own number allocation starts over at 1.
    assert!(!servers[1]
        .propose("x", "new", true, Some(Duration::from_secs(2)))
        .unwrap());
    let result = servers[1]
        .propose("x", "new", true, Some(Duration::from_secs(2)))
        .unwrap();

    assert!(result);
    for server in &servers {
        assert_eq!(server.learned(&"x"), Some("new"));
    }
}

#[test]
fn quorum_unavailable_when_too_few_acceptors_reachable() {
    let bus: InProcessBus<&'static str, &'static str> = InProcessBus::new();
    // Only two acceptors online out of a notional cluster of 5.
    for _ in 0..2 {
        Server::new(1, 5, bus.fork(), false, true, false).unwrap().start();
    }
    let proposer = Server::new(1, 5, bus, true, false, false).unwrap();
    proposer.start();

    let result = proposer.propose("x", "v", false, Some(Duration::from_millis(100)));
    assert!(matches!(result, Err(PaxosError::QuorumUnavailable)));
}

#[test]
fn timeout_when_a_reachable_acceptor_never_replies() {
    // cluster_size 3: quorum(3) == 2, and two real acceptors clear that
    // floor on their own, but the strict threshold (§4.1) needs a third
    // vote to ever strictly exceed it. The third registered endpoint is
    // reachable (counted in target_count) but its handler blocks past the
    // deadline, so the proposer can only time out, never succeed or fail
    // the promise phase outright.
    let bus: InProcessBus<&'static str, &'static str> = InProcessBus::new();
    Server::new(1, 3, bus.fork(), false, true, false).unwrap().start();
    Server::new(1, 3, bus.fork(), false, true, false).unwrap().start();

    bus.register_acceptor(
        1,
        Arc::new(|_key, _n| {
            thread::sleep(Duration::from_secs(5));
            PromiseResponse {
                success: true,
                promised: None,
                value: None,
                node: bus_nil_node(),
            }
        }),
        Schedule::Worker,
        Arc::new(|_key, _n, _v| true),
        Schedule::Worker,
    );

    let proposer = Server::new(1, 3, bus, true, false, false).unwrap();
    proposer.start();

    let result = proposer.propose("x", "v", false, Some(Duration::from_millis(100)));
    assert!(matches!(result, Err(PaxosError::OperationTimedOut)));
}

fn bus_nil_node() -> paxos_core::NodeIdent {
    paxos_core::NodeIdent::nil()
}

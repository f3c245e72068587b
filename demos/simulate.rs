//! An example which simulates a Paxos cluster locally (in one process).
//!
//! Run this example as follows
//!     RUST_LOG=paxos_core=info cargo run --example simulate

extern crate env_logger;
#[macro_use]
extern crate log;
extern crate paxos_core;

use std::sync::{Arc, Barrier};
use std::thread;

use paxos_core::bus::InProcessBus;
use paxos_core::config::NodeConfig;
use paxos_core::server::Server;

fn main() {
    env_logger::init();

    let config = NodeConfig::load("Config").expect("could not load Config.toml");
    info!("Configuration = {:?}\n", config);

    simulate(config, 7usize);
}

fn simulate(config: NodeConfig, value: usize) {
    let bus: InProcessBus<String, usize> = InProcessBus::new();

    // One Acceptor and one Learner per replica in the cluster, plus a
    // single Proposer driving one `propose` call once every node is up.
    let num_acceptors = config.cluster_size;
    let num_learners = config.cluster_size;

    let barrier = Arc::new(Barrier::new(num_acceptors + num_learners + 1));
    let mut all_threads = Vec::new();

    for uid in 0..num_acceptors {
        let c = Arc::clone(&barrier);
        let server = Server::new(config.group_id, config.cluster_size, bus.fork(), false, true, false)
            .expect("invalid group_id in Config.toml");
        let acceptor_thread = thread::spawn(move || {
            server.start();
            c.wait();
            info!("acceptor {} ready", uid);
        });
        all_threads.push(acceptor_thread);
    }

    for uid in 0..num_learners {
        let c = Arc::clone(&barrier);
        let server = Server::new(config.group_id, config.cluster_size, bus.fork(), false, false, true)
            .expect("invalid group_id in Config.toml");
        let learner_thread = thread::spawn(move || {
            server.start();
            c.wait();
            info!("learner {} ready", uid);
        });
        all_threads.push(learner_thread);
    }

    let c = Arc::clone(&barrier);
    let proposer_bus = bus.fork();
    let group_id = config.group_id;
    let cluster_size = config.cluster_size;
    let timeout = config.propose_timeout();
    let proposer_thread = thread::spawn(move || {
        let server = Server::new(group_id, cluster_size, proposer_bus, true, false, false)
            .expect("invalid group_id in Config.toml");
        server.start();
        c.wait();

        match server.propose("x".to_string(), value, false, Some(timeout)) {
            Ok(true) => info!("propose(x, {}) committed", value),
            Ok(false) => info!("propose(x, {}) did not reach quorum", value),
            Err(e) => info!("propose(x, {}) failed: {}", value, e),
        }
    });
    all_threads.push(proposer_thread);

    info!("Number of threads created = {}\n", all_threads.len());

    for thread_handle in all_threads {
        thread_handle.join().expect("failed to join child thread");
    }
}

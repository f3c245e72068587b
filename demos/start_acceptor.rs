//! A script used to start one acceptor against a local, in-process bus.
//!
//! The bus in this crate has no cross-process transport, so this binary
//! seeds the rest of the cluster's acceptors locally and drives one
//! `propose` call itself, to give the named acceptor something to answer.
//!
//! You can run this example as follows
//!     RUST_LOG=paxos_core=info cargo run --example start_acceptor -- <acceptor_uid> Config
//! where <acceptor_uid> is a non-negative number, used only for logging.

extern crate env_logger;
#[macro_use]
extern crate log;
extern crate paxos_core;

use std::env;

use paxos_core::bus::InProcessBus;
use paxos_core::config::NodeConfig;
use paxos_core::server::Server;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    info!("{:?}", args);

    match args.len() {
        3 => {
            let uid = &args[1];
            let uid: usize = match uid.parse() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!("Error: second argument not an usize");
                    return;
                }
            };

            let config_file_name = &args[2];
            let config = NodeConfig::load(config_file_name).expect("could not load config file");

            let bus: InProcessBus<String, usize> = InProcessBus::new();

            let named = Server::new(config.group_id, config.cluster_size, bus.fork(), false, true, false)
                .expect("invalid group_id in config file");
            named.start();
            info!("acceptor {} listening", uid);

            for _ in 1..config.cluster_size {
                Server::new(config.group_id, config.cluster_size, bus.fork(), false, true, false)
                    .expect("invalid group_id in config file")
                    .start();
            }

            let proposer = Server::new(config.group_id, config.cluster_size, bus, true, false, false)
                .expect("invalid group_id in config file");
            proposer.start();
            match proposer.propose("x".to_string(), 42, false, Some(config.propose_timeout())) {
                Ok(accepted) => info!("acceptor {} saw propose(x, 42) -> {}", uid, accepted),
                Err(e) => info!("acceptor {} saw propose(x, 42) fail: {}", uid, e),
            }
        }
        _ => {
            panic!("Expected 2 arguments (excluding file name)");
        }
    }
}

//! A script used to start one client, which either infinitely reads
//! proposal values from standard input, or, if more than two command-line
//! arguments are passed, treats the 3rd, 4th, etc. arguments as the
//! proposal values to submit.
//!
//! The bus in this crate has no cross-process transport, so this binary
//! seeds a full local cluster (acceptors and a learner) and submits each
//! proposal through an embedded proposer.
//!
//! You can run this example as follows
//!     RUST_LOG=paxos_core=info cargo run --example start_client -- <client_uid> Config
//! If you want to run this client interactively (i.e. provide one proposal at a time), or
//!     RUST_LOG=paxos_core=info cargo run --example start_client -- <client_uid> Config p1 p2 ...
//! where p1, p2, etc., are the proposal values.

extern crate env_logger;
#[macro_use]
extern crate log;
extern crate paxos_core;
#[macro_use]
extern crate text_io;

use std::env;
use std::io;
use std::io::prelude::*;

use paxos_core::bus::InProcessBus;
use paxos_core::config::NodeConfig;
use paxos_core::server::Server;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    info!("{:?}", args);

    match args.len() {
        len if len >= 3 => {
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

            for _ in 0..config.cluster_size {
                Server::new(config.group_id, config.cluster_size, bus.fork(), false, true, false)
                    .expect("invalid group_id in config file")
                    .start();
            }
            Server::new(config.group_id, config.cluster_size, bus.fork(), false, false, true)
                .expect("invalid group_id in config file")
                .start();

            let client = Server::new(config.group_id, config.cluster_size, bus, true, false, false)
                .expect("invalid group_id in config file");
            client.start();

            let timeout = Some(config.propose_timeout());

            if len == 3 {
                loop {
                    print!("Enter the proposal: ");
                    io::stdout().flush().expect("could not flush stdout");
                    let value: usize = read!();
                    submit(&client, uid, value, timeout);
                }
            } else {
                for proposal in args.iter().skip(3) {
                    let value: usize = match proposal.parse() {
                        Ok(n) => n,
                        Err(_) => {
                            eprintln!("Only proposals of type usize are for now supported.");
                            return;
                        }
                    };
                    submit(&client, uid, value, timeout);
                }
            }
        }
        _ => {
            panic!("Expected 2 arguments (excluding file name)");
        }
    }
}

fn submit(client: &Server<String, usize, InProcessBus<String, usize>>, uid: usize, value: usize, timeout: Option<std::time::Duration>) {
    match client.propose("x".to_string(), value, false, timeout) {
        Ok(accepted) => info!("client {} propose(x, {}) -> {}", uid, value, accepted),
        Err(e) => info!("client {} propose(x, {}) failed: {}", uid, value, e),
    }
}

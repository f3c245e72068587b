//! A single-decree Paxos consensus library built on top of a pluggable,
//! message-oriented RPC/publish bus.
//!
//! [`Server`] composes the three protocol roles ([`Proposer`], [`Acceptor`],
//! [`Learner`]) behind one handle; [`InProcessBus`] is the bus implementation
//! used by the demo binaries and the test suite, good enough for a single
//! process simulating a cluster. Production deployments bring their own
//! [`Bus`] impl over whatever transport they already run.

pub mod acceptor;
pub mod bus;
pub mod config;
pub mod error;
pub mod learner;
pub mod message;
pub mod proposer;
pub mod quorum;
pub mod server;

pub use acceptor::Acceptor;
pub use bus::{Bus, InProcessBus};
pub use config::NodeConfig;
pub use error::PaxosError;
pub use learner::Learner;
pub use message::{GroupId, NodeIdent, ProposalNumber};
pub use proposer::Proposer;
pub use server::Server;

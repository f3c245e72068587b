//! Wire-level payload shapes exchanged between the three Paxos roles.
//!
//! These mirror the positional payloads of the `promise`/`accept` RPC
//! request/response pairs and the `learn`/`unlearn` publish events. They
//! derive `Serialize`/`Deserialize` so a networked `Bus` implementation can
//! put them on the wire unchanged; the in-process bus in [`crate::bus`] just
//! clones them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A proposal number: strictly increasing per (Proposer, Key).
pub type ProposalNumber = u64;

/// Unsigned 64-bit id carving the bus into independent consensus clusters.
pub type GroupId = u64;

/// Identifies the node that produced a response or notification.
pub type NodeIdent = Uuid;

/// Response to a `promise(key, N)` RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromiseResponse<V> {
    pub success: bool,

    /// Set only when `success` is false: the acceptor's current `promised[key]`.
    pub promised: Option<ProposalNumber>,

    /// Set only when `success` is true and the acceptor had previously accepted a value.
    pub value: Option<(ProposalNumber, V)>,

    pub node: NodeIdent,
}

/// Broadcast on the `learn` topic after an Acceptor's `accept` succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnEvent<K, V> {
    pub key: K,
    pub n: ProposalNumber,
    pub value: V,
    pub from: NodeIdent,
}

/// Broadcast on the `unlearn` topic when an Acceptor rejects an `accept`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlearnEvent<K> {
    pub key: K,
    pub n: ProposalNumber,
    pub from: NodeIdent,
}

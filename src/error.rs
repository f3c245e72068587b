//! Error kinds surfaced by this crate's public API.
use std::error::Error as StdError;

/// Errors that `propose` (and the Server constructor) can return.
///
/// `QuorumUnavailable` and `OperationTimedOut` are stable identifiers: callers
/// may match on them across versions of this crate.
#[derive(Debug, thiserror::Error)]
pub enum PaxosError {
    /// Fewer than `(cluster_size / 2) + 1` acceptors were reachable when the
    /// request was dispatched. Raised synchronously, before any wait.
    #[error("fewer than (cluster_size / 2) + 1 acceptors are reachable")]
    QuorumUnavailable,

    /// The caller-supplied deadline elapsed before a quorum of votes tipped
    /// either way. Safe to retry with a fresh proposal number.
    #[error("deadline elapsed before a quorum was reached")]
    OperationTimedOut,

    /// `Server::new` was given a group id that does not fit in an unsigned
    /// 64-bit integer.
    #[error("group_id must be an unsigned 64-bit integer")]
    InvalidGroupId,

    /// A transport-level failure bubbled up from the bus. The core does not
    /// interpret these; they are passed through as-is.
    #[error("bus transport error: {0}")]
    Bus(#[source] Box<dyn StdError + Send + Sync>),
}

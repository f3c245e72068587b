//! The quorum-waiting primitive that drives a Proposer forward as soon as a
//! majority of partial responses has tipped the outcome, rather than
//! waiting for the in-flight RPC to complete.
use std::time::Duration;

use crate::bus::{Deadline, RpcHandle};
use crate::error::PaxosError;

/// The smallest majority of a cluster of `cluster_size` nodes.
pub fn quorum(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// Waits on `rpc` until a quorum of `cluster_size` votes tips good or bad,
/// classifying each response with `passfail`.
///
/// Matches the reference's threshold exactly: a side wins only once its
/// vote count *strictly exceeds* `quorum` (i.e. `quorum + 1` votes), which
/// is one vote more conservative than the textbook majority rule. See
/// DESIGN.md for why this implementation preserves that instead of fixing it.
pub fn await_quorum<R, H, F>(
    rpc: &H,
    passfail: F,
    cluster_size: usize,
    timeout: Option<Duration>,
) -> Result<(bool, Vec<R>), PaxosError>
where
    H: RpcHandle<R>,
    R: Clone,
    F: Fn(&R) -> bool,
{
    let q = quorum(cluster_size);

    if rpc.target_count() < q {
        return Err(PaxosError::QuorumUnavailable);
    }

    let deadline = Deadline::from_timeout(timeout);

    loop {
        let results = rpc.partial_results();
        let good = results.iter().filter(|r| passfail(r)).count();
        let bad = results.len() - good;

        if good > q {
            return Ok((true, results));
        }
        if rpc.is_complete() || bad > q {
            return Ok((false, results));
        }

        if rpc.wait(deadline.remaining()) {
            return Err(PaxosError::OperationTimedOut);
        }
    }
}

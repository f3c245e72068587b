//! `Server` composes the three roles behind one handle, matching the
//! reference's pattern of running any subset of proposer/acceptor/learner
//! in a single process against a shared bus.
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::acceptor::Acceptor;
use crate::bus::Bus;
use crate::error::PaxosError;
use crate::learner::Learner;
use crate::message::GroupId;
use crate::proposer::Proposer;

/// A node participating in one consensus group, running whichever
/// combination of roles it was constructed with. All three are optional
/// independently: a pure client runs only a Proposer, a storage node might
/// run only an Acceptor and a Learner.
pub struct Server<K, V, B>
where
    K: Eq + Hash + Clone + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + Debug + 'static,
    B: Bus<K, V> + Clone,
{
    group_id: GroupId,
    proposer: Option<Arc<Proposer<K, V, B>>>,
    acceptor: Option<Arc<Acceptor<K, V, B>>>,
    learner: Option<Arc<Learner<K, V, B>>>,
}

impl<K, V, B> Server<K, V, B>
where
    K: Eq + Hash + Clone + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + Debug + 'static,
    B: Bus<K, V> + Clone,
{
    /// `group_id` arrives as a caller-facing signed/wide integer the way the
    /// reference's configuration loader hands it over; this constructor is
    /// where it gets validated down to the `u64` the rest of the crate uses.
    pub fn new(
        group_id: i128,
        cluster_size: usize,
        bus: B,
        run_proposer: bool,
        run_acceptor: bool,
        run_learner: bool,
    ) -> Result<Self, PaxosError> {
        if group_id < 0 || group_id > u64::MAX as i128 {
            return Err(PaxosError::InvalidGroupId);
        }
        let group_id = group_id as GroupId;

        let proposer = run_proposer.then(|| Proposer::new(group_id, cluster_size, bus.clone()));
        let acceptor = run_acceptor.then(|| Acceptor::new(group_id, bus.clone()));
        let learner = run_learner.then(|| Learner::new(group_id, cluster_size, bus));

        Ok(Server { group_id, proposer, acceptor, learner })
    }

    /// Starts every role this server was constructed with. Idempotent,
    /// since each role's own `start` is idempotent.
    pub fn start(&self) {
        if let Some(acceptor) = &self.acceptor {
            acceptor.start();
        }
        if let Some(learner) = &self.learner {
            learner.start();
        }
        if let Some(proposer) = &self.proposer {
            proposer.start();
        }
        info!("server started for group {}", self.group_id);
    }

    /// Drives a `propose` round. Returns `PaxosError::QuorumUnavailable`-ish
    /// errors verbatim from the underlying Proposer; panics if this server
    /// wasn't constructed with `run_proposer`, matching the reference's
    /// "calling the wrong role is a programmer error" stance on its
    /// equivalent methods.
    pub fn propose(&self, key: K, value: V, overwrite: bool, timeout: Option<Duration>) -> Result<bool, PaxosError> {
        self.proposer
            .as_ref()
            .expect("propose() called on a server with no Proposer role")
            .propose(key, value, overwrite, timeout)
    }

    /// The value this server's Learner has settled on for `key`, if any.
    /// Panics if this server wasn't constructed with `run_learner`.
    pub fn learned(&self, key: &K) -> Option<V> {
        self.learner
            .as_ref()
            .expect("learned() called on a server with no Learner role")
            .learned_for(key)
    }

    pub fn proposer(&self) -> Option<&Arc<Proposer<K, V, B>>> {
        self.proposer.as_ref()
    }

    pub fn acceptor(&self) -> Option<&Arc<Acceptor<K, V, B>>> {
        self.acceptor.as_ref()
    }

    pub fn learner(&self) -> Option<&Arc<Learner<K, V, B>>> {
        self.learner.as_ref()
    }
}

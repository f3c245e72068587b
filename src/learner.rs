//! The Learner role: watches `learn`/`unlearn` publishes and decides, per
//! key, once a quorum of acceptors agrees on a value.
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::bus::{Bus, EndpointToken, Schedule};
use crate::message::{GroupId, LearnEvent, NodeIdent, ProposalNumber, UnlearnEvent};
use crate::quorum::quorum;

/// One key's tally for the proposal number it is currently tracking.
/// `good`/`bad` are sets of node identities rather than raw counters: the
/// bus only promises at-least-once delivery, so a retransmitted `learn`
/// must not be counted twice. This is a deliberate departure from the
/// reference, which counts messages; see DESIGN.md.
struct Tally {
    n: ProposalNumber,
    good: HashSet<NodeIdent>,
    bad: HashSet<NodeIdent>,
}

/// Per-key state: a key is either still being tallied at some `N`, or has
/// already settled on a value. Once `Learned`, a key never re-enters
/// `Learning` — §8's round-trip law requires `learned[key]`, once set, is
/// never modified, so a `learn`/`unlearn` for any `N` (stale or not) that
/// arrives after commit is simply ignored rather than restarting a tally.
enum KeyState<V> {
    Learning(Tally),
    Learned { n: ProposalNumber, value: V },
}

/// Observer half of the protocol: never answers RPCs, only reacts to
/// `learn`/`unlearn` publishes and exposes the values it has settled on.
pub struct Learner<K, V, B> {
    group_id: GroupId,
    cluster_size: usize,
    bus: B,
    keys: Mutex<HashMap<K, KeyState<V>>>,
    token: Mutex<Option<EndpointToken>>,
}

impl<K, V, B> Learner<K, V, B>
where
    K: Eq + Hash + Clone + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + Debug + 'static,
    B: Bus<K, V>,
{
    pub fn new(group_id: GroupId, cluster_size: usize, bus: B) -> Arc<Self> {
        Arc::new(Learner {
            group_id,
            cluster_size,
            bus,
            keys: Mutex::new(HashMap::new()),
            token: Mutex::new(None),
        })
    }

    /// Registers the `learn`/`unlearn` publish handlers. Calling this more
    /// than once is a no-op.
    ///
    /// A newly started Learner does not catch up on decisions made before it
    /// subscribed; see the catch-up note in the design doc.
    pub fn start(self: &Arc<Self>) {
        let mut token = self.token.lock().expect("learner token lock poisoned");
        if token.is_some() {
            return;
        }

        let learn_self = Arc::clone(self);
        let unlearn_self = Arc::clone(self);

        // Inline, not Worker: handle_learn/handle_unlearn only touch an
        // in-memory map, and running them synchronously means the publish
        // that an Acceptor fires off has visibly landed by the time its
        // `accept` RPC response reaches the Proposer's quorum wait.
        *token = Some(self.bus.register_learner(
            self.group_id,
            Arc::new(move |event| learn_self.handle_learn(event)),
            Schedule::Inline,
            Arc::new(move |event| unlearn_self.handle_unlearn(event)),
            Schedule::Inline,
        ));

        info!("learner started for group {}", self.group_id);
    }

    /// The value this Learner has settled on for `key`, if a quorum has
    /// agreed on one yet.
    pub fn learned_for(&self, key: &K) -> Option<V> {
        match self.keys.lock().expect("learner keys lock poisoned").get(key) {
            Some(KeyState::Learned { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    fn handle_learn(&self, event: LearnEvent<K, V>) {
        let q = quorum(self.cluster_size);
        let mut keys = self.keys.lock().expect("learner keys lock poisoned");

        match keys.get(&event.key) {
            Some(KeyState::Learned { n, .. }) => {
                debug!(
                    "learn({:?}, {}) ignored: key already learned at n={}",
                    event.key, event.n, n
                );
                return;
            }
            Some(KeyState::Learning(tally)) if tally.n > event.n => {
                debug!(
                    "learn({:?}, {}) ignored: stale, tracking n={}",
                    event.key, event.n, tally.n
                );
                return;
            }
            _ => {}
        }

        let mut tally = match keys.remove(&event.key) {
            Some(KeyState::Learning(tally)) if tally.n == event.n => tally,
            _ => Tally {
                n: event.n,
                good: HashSet::new(),
                bad: HashSet::new(),
            },
        };
        tally.good.insert(event.from);
        let good = tally.good.len();

        debug!("learn({:?}, {}) from {} ({}/{})", event.key, event.n, event.from, good, q);

        if good > q {
            keys.insert(
                event.key.clone(),
                KeyState::Learned { n: event.n, value: event.value.clone() },
            );
            info!("learned({:?}) = {:?} at n={}", event.key, event.value, event.n);
        } else {
            keys.insert(event.key, KeyState::Learning(tally));
        }
    }

    fn handle_unlearn(&self, event: UnlearnEvent<K>) {
        let q = quorum(self.cluster_size);
        let mut keys = self.keys.lock().expect("learner keys lock poisoned");

        match keys.get(&event.key) {
            Some(KeyState::Learned { n, .. }) => {
                debug!(
                    "unlearn({:?}, {}) ignored: key already learned at n={}",
                    event.key, event.n, n
                );
                return;
            }
            Some(KeyState::Learning(tally)) if tally.n > event.n => {
                debug!(
                    "unlearn({:?}, {}) ignored: stale, tracking n={}",
                    event.key, event.n, tally.n
                );
                return;
            }
            _ => {}
        }

        let mut tally = match keys.remove(&event.key) {
            Some(KeyState::Learning(tally)) if tally.n == event.n => tally,
            _ => Tally {
                n: event.n,
                good: HashSet::new(),
                bad: HashSet::new(),
            },
        };
        tally.bad.insert(event.from);
        let bad = tally.bad.len();

        debug!("unlearn({:?}, {}) from {} ({}/{})", event.key, event.n, event.from, bad, q);

        if bad > q {
            debug!("learn({:?}) abandoned at n={}: bad quorum", event.key, event.n);
            // Entry removed: no commit, matching §4.4's "remove the entry
            // from learning without committing".
        } else {
            keys.insert(event.key, KeyState::Learning(tally));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use uuid::Uuid;

    fn learner(cluster_size: usize) -> Arc<Learner<&'static str, &'static str, InProcessBus<&'static str, &'static str>>> {
        let bus = InProcessBus::new();
        let l = Learner::new(1, cluster_size, bus);
        l.start();
        l
    }

    #[test]
    fn second_start_call_does_not_double_register() {
        let l = learner(3);
        l.start();
        l.start();
        l.handle_learn(LearnEvent { key: "x", n: 1, value: "a", from: Uuid::new_v4() });
        assert!(l.learned_for(&"x").is_none());
    }

    #[test]
    fn settles_only_once_strict_quorum_of_distinct_nodes_agree() {
        let l = learner(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        l.handle_learn(LearnEvent { key: "x", n: 1, value: "v", from: a });
        assert!(l.learned_for(&"x").is_none());

        l.handle_learn(LearnEvent { key: "x", n: 1, value: "v", from: b });
        assert!(l.learned_for(&"x").is_none(), "quorum(3) == 2, need strictly more than 2");

        l.handle_learn(LearnEvent { key: "x", n: 1, value: "v", from: c });
        assert_eq!(l.learned_for(&"x"), Some("v"));
    }

    #[test]
    fn duplicate_learn_from_the_same_node_does_not_double_count() {
        let l = learner(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        l.handle_learn(LearnEvent { key: "x", n: 1, value: "v", from: a });
        l.handle_learn(LearnEvent { key: "x", n: 1, value: "v", from: a });
        l.handle_learn(LearnEvent { key: "x", n: 1, value: "v", from: a });
        l.handle_learn(LearnEvent { key: "x", n: 1, value: "v", from: b });

        assert!(l.learned_for(&"x").is_none());
    }

    #[test]
    fn stale_learn_arriving_after_commit_does_not_overwrite_learned_value() {
        let l = learner(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        // Key commits at n=2 first (e.g. a retried proposer's round won the
        // race), then a `learn` for the superseded n=1 round arrives late.
        l.handle_learn(LearnEvent { key: "x", n: 2, value: "new", from: a });
        l.handle_learn(LearnEvent { key: "x", n: 2, value: "new", from: b });
        l.handle_learn(LearnEvent { key: "x", n: 2, value: "new", from: c });
        assert_eq!(l.learned_for(&"x"), Some("new"));

        l.handle_learn(LearnEvent { key: "x", n: 1, value: "old", from: a });
        l.handle_learn(LearnEvent { key: "x", n: 1, value: "old", from: b });
        l.handle_learn(LearnEvent { key: "x", n: 1, value: "old", from: c });

        assert_eq!(l.learned_for(&"x"), Some("new"), "learned value must never be modified once set");
    }

    #[test]
    fn higher_n_resets_tally_and_does_not_inherit_prior_votes() {
        let l = learner(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        l.handle_learn(LearnEvent { key: "x", n: 1, value: "old", from: a });
        l.handle_learn(LearnEvent { key: "x", n: 1, value: "old", from: b });

        // n=2 supersedes the n=1 tally; the two n=1 votes must not count
        // towards n=2's quorum.
        l.handle_learn(LearnEvent { key: "x", n: 2, value: "new", from: a });
        assert!(l.learned_for(&"x").is_none());

        l.handle_learn(LearnEvent { key: "x", n: 2, value: "new", from: c });
        assert_eq!(l.learned_for(&"x"), Some("new"));
    }

    #[test]
    fn bad_quorum_removes_entry_without_committing() {
        let l = learner(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        l.handle_unlearn(UnlearnEvent { key: "x", n: 1, from: a });
        l.handle_unlearn(UnlearnEvent { key: "x", n: 1, from: b });
        l.handle_unlearn(UnlearnEvent { key: "x", n: 1, from: c });

        assert!(l.learned_for(&"x").is_none());
    }
}

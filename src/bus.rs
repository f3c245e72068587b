//! The message-oriented RPC/publish bus that the Paxos core runs on top of.
//!
//! The bus itself is an external collaborator: the real production topology
//! (service discovery, framed TCP, retries) lives in an adapter crate that
//! isn't part of this one. What lives here is the *contract* the core
//! depends on ([`Bus`] and [`RpcHandle`]), plus exactly one concrete
//! implementation, [`InProcessBus`], good enough to back the demo binaries
//! and the integration tests.
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::PaxosError;
use crate::message::{GroupId, LearnEvent, NodeIdent, PromiseResponse, ProposalNumber, UnlearnEvent};

/// Whether a handler may block the bus's delivery context or must be run on
/// a separate worker. Mirrors the reference's `schedule=True/False` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run in the bus's own delivery context. Must not block.
    Inline,
    /// Run on a dedicated worker; may perform additional I/O.
    Worker,
}

/// A handle to an in-flight, multi-destination RPC.
///
/// Responses arrive piecewise; callers poll [`RpcHandle::partial_results`]
/// and block for the next arrival with [`RpcHandle::wait`] rather than
/// waiting for the whole call to finish.
pub trait RpcHandle<R>: Send {
    /// How many destinations the request was dispatched to.
    fn target_count(&self) -> usize;

    /// A snapshot of the responses received so far.
    fn partial_results(&self) -> Vec<R>;

    /// Whether every destination has replied or given up.
    fn is_complete(&self) -> bool;

    /// Block until at least one new response arrives or `timeout` elapses.
    /// Returns `true` if the wait timed out.
    fn wait(&self, timeout: Option<Duration>) -> bool;
}

pub type PromiseHandler<K, V> = Arc<dyn Fn(K, ProposalNumber) -> PromiseResponse<V> + Send + Sync>;
pub type AcceptHandler<K, V> = Arc<dyn Fn(K, ProposalNumber, V) -> bool + Send + Sync>;
pub type LearnHandler<K, V> = Arc<dyn Fn(LearnEvent<K, V>) + Send + Sync>;
pub type UnlearnHandler<K> = Arc<dyn Fn(UnlearnEvent<K>) + Send + Sync>;
pub type ProposeHandler<K, V> =
    Arc<dyn Fn(K, V, bool, Option<Duration>) -> Result<bool, PaxosError> + Send + Sync>;

/// The capability set this crate's core requires of a bus: unicast RPC to a
/// dynamic set of handlers, and topic-based publish/subscribe, both scoped
/// by group id. Each `register_*` call is conceptually two `accept_rpc` (or
/// `accept_publish`) registrations under one node identity, since an
/// Acceptor always offers `promise` and `accept` together, and a Learner
/// always subscribes to `learn` and `unlearn` together.
pub trait Bus<K, V>: Send + Sync + 'static
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + Debug + 'static,
{
    type PromiseRpc: RpcHandle<PromiseResponse<V>>;
    type AcceptRpc: RpcHandle<bool>;

    /// This bus instance's own node identity, reported in responses it produces.
    fn node_ident(&self) -> NodeIdent;

    /// Register this node's `propose` RPC endpoint for `group_id`. Nothing
    /// in this workspace dials it remotely — a Proposer is always invoked as
    /// a direct method call here — but it is still a real wire-level
    /// endpoint per the spec, so a networked `Bus` adapter has something to
    /// route `paxos.propose/propose` requests to.
    fn register_proposer(
        &self,
        group_id: GroupId,
        propose: ProposeHandler<K, V>,
        schedule: Schedule,
    ) -> EndpointToken;

    /// Register this node's Acceptor endpoints (`promise`, `accept`) for `group_id`.
    /// Returns a token tests can use to mark the node unreachable; production
    /// adapters may ignore it.
    fn register_acceptor(
        &self,
        group_id: GroupId,
        promise: PromiseHandler<K, V>,
        promise_schedule: Schedule,
        accept: AcceptHandler<K, V>,
        accept_schedule: Schedule,
    ) -> EndpointToken;

    /// Register this node's Learner subscriptions (`learn`, `unlearn`) for `group_id`.
    fn register_learner(
        &self,
        group_id: GroupId,
        learn: LearnHandler<K, V>,
        learn_schedule: Schedule,
        unlearn: UnlearnHandler<K>,
        unlearn_schedule: Schedule,
    ) -> EndpointToken;

    /// Send `promise(key, N)` to every reachable registered Acceptor in `group_id`.
    fn send_promise(&self, group_id: GroupId, key: K, n: ProposalNumber) -> Self::PromiseRpc;

    /// Send `accept(key, N, value)` to every reachable registered Acceptor in `group_id`.
    fn send_accept(&self, group_id: GroupId, key: K, n: ProposalNumber, value: V) -> Self::AcceptRpc;

    /// Best-effort broadcast of a `learn` event to all subscribers in `group_id`.
    fn publish_learn(&self, group_id: GroupId, event: LearnEvent<K, V>);

    /// Best-effort broadcast of an `unlearn` event to all subscribers in `group_id`.
    fn publish_unlearn(&self, group_id: GroupId, event: UnlearnEvent<K>);
}

/// Opaque handle returned by the `register_*` calls. Used by tests to flip a
/// registered endpoint's reachability; production adapters are free to
/// ignore it.
#[derive(Clone)]
pub struct EndpointToken {
    reachable: Arc<AtomicBool>,
}

impl EndpointToken {
    fn new() -> Self {
        EndpointToken {
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the endpoint going offline: future `send_*` calls will not
    /// dispatch to it or count it towards `target_count`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

struct Inbox<R> {
    results: Mutex<Vec<R>>,
    remaining: Mutex<usize>,
    arrival: Condvar,
}

impl<R> Inbox<R> {
    fn new(target_count: usize) -> Self {
        Inbox {
            results: Mutex::new(Vec::new()),
            remaining: Mutex::new(target_count),
            arrival: Condvar::new(),
        }
    }

    fn push(&self, r: R) {
        self.results.lock().expect("inbox results lock poisoned").push(r);
        *self.remaining.lock().expect("inbox remaining lock poisoned") -= 1;
        self.arrival.notify_all();
    }
}

/// A shared [`RpcHandle`] backed by an in-process [`Inbox`].
pub struct InProcessRpc<R> {
    target_count: usize,
    inbox: Arc<Inbox<R>>,
}

impl<R: Clone> RpcHandle<R> for InProcessRpc<R> {
    fn target_count(&self) -> usize {
        self.target_count
    }

    fn partial_results(&self) -> Vec<R> {
        self.inbox
            .results
            .lock()
            .expect("inbox results lock poisoned")
            .clone()
    }

    fn is_complete(&self) -> bool {
        *self.inbox.remaining.lock().expect("inbox remaining lock poisoned") == 0
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        if self.is_complete() {
            return false;
        }
        let guard = self.inbox.results.lock().expect("inbox results lock poisoned");
        let before = guard.len();
        match timeout {
            None => {
                let _guard = self
                    .inbox
                    .arrival
                    .wait_while(guard, |results| {
                        results.len() == before && !self.is_complete()
                    })
                    .expect("inbox condvar poisoned");
                false
            }
            Some(d) => {
                let (_guard, result) = self
                    .inbox
                    .arrival
                    .wait_timeout_while(guard, d, |results| {
                        results.len() == before && !self.is_complete()
                    })
                    .expect("inbox condvar poisoned");
                result.timed_out()
            }
        }
    }
}

struct AcceptorEndpoint<K, V> {
    promise: (PromiseHandler<K, V>, Schedule),
    accept: (AcceptHandler<K, V>, Schedule),
    reachable: Arc<AtomicBool>,
}

struct LearnerEndpoint<K, V> {
    learn: (LearnHandler<K, V>, Schedule),
    unlearn: (UnlearnHandler<K>, Schedule),
}

// Registered but never dispatched through: no collaborator in this
// workspace calls `propose` over the bus, only directly as a Rust method.
// A networked `Bus` adapter would read `propose` out of this to route
// `paxos.propose/propose` requests.
#[allow(dead_code)]
struct ProposerEndpoint<K, V> {
    propose: (ProposeHandler<K, V>, Schedule),
}

struct GroupState<K, V> {
    acceptors: Vec<AcceptorEndpoint<K, V>>,
    learners: Vec<LearnerEndpoint<K, V>>,
    proposers: Vec<ProposerEndpoint<K, V>>,
}

impl<K, V> Default for GroupState<K, V> {
    fn default() -> Self {
        GroupState {
            acceptors: Vec::new(),
            learners: Vec::new(),
            proposers: Vec::new(),
        }
    }
}

/// An in-process bus: every node sharing one `InProcessBus` handle (via
/// `clone()`) is one cluster. RPCs fan out to every reachable registered
/// Acceptor on a fresh thread each, so responses really do arrive piecewise.
pub struct InProcessBus<K, V> {
    ident: NodeIdent,
    groups: Arc<Mutex<HashMap<GroupId, GroupState<K, V>>>>,
}

impl<K, V> Clone for InProcessBus<K, V> {
    fn clone(&self) -> Self {
        InProcessBus {
            ident: self.ident,
            groups: Arc::clone(&self.groups),
        }
    }
}

impl<K, V> Default for InProcessBus<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InProcessBus<K, V> {
    pub fn new() -> Self {
        InProcessBus {
            ident: Uuid::new_v4(),
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Hands out a handle to the same underlying bus (same groups, same
    /// registrations) but stamped with a fresh node identity. `clone()`
    /// preserves identity, as clones usually should; `fork()` is what a test
    /// or demo reaches for to put a second logical node on one in-process
    /// bus, the way separate OS processes would each dial in with their own
    /// identity against a real broker.
    pub fn fork(&self) -> Self {
        InProcessBus {
            ident: Uuid::new_v4(),
            groups: Arc::clone(&self.groups),
        }
    }

    fn with_group<T>(&self, group_id: GroupId, f: impl FnOnce(&mut GroupState<K, V>) -> T) -> T {
        let mut groups = self.groups.lock().expect("bus groups lock poisoned");
        f(groups.entry(group_id).or_default())
    }

    /// How many `propose` endpoints are registered for `group_id`. Exists so
    /// tests can check a Proposer's `start` registered exactly one endpoint
    /// and stayed idempotent on repeat calls; nothing dispatches through it.
    pub fn proposer_endpoint_count(&self, group_id: GroupId) -> usize {
        self.with_group(group_id, |g| g.proposers.len())
    }
}

fn run_handler<F: FnOnce() + Send + 'static>(schedule: Schedule, f: F) {
    match schedule {
        Schedule::Inline => f(),
        Schedule::Worker => {
            thread::spawn(f);
        }
    }
}

fn dispatch<R: Send + 'static>(
    targets: Vec<(impl FnOnce() -> R + Send + 'static, Schedule)>,
) -> InProcessRpc<R> {
    let inbox = Arc::new(Inbox::new(targets.len()));
    let target_count = targets.len();
    for (call, schedule) in targets {
        let inbox = Arc::clone(&inbox);
        run_handler(schedule, move || inbox.push(call()));
    }
    InProcessRpc { target_count, inbox }
}

impl<K, V> Bus<K, V> for InProcessBus<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + Debug + 'static,
{
    type PromiseRpc = InProcessRpc<PromiseResponse<V>>;
    type AcceptRpc = InProcessRpc<bool>;

    fn node_ident(&self) -> NodeIdent {
        self.ident
    }

    fn register_proposer(
        &self,
        group_id: GroupId,
        propose: ProposeHandler<K, V>,
        schedule: Schedule,
    ) -> EndpointToken {
        let token = EndpointToken::new();
        self.with_group(group_id, |g| {
            g.proposers.push(ProposerEndpoint { propose: (propose, schedule) })
        });
        token
    }

    fn register_acceptor(
        &self,
        group_id: GroupId,
        promise: PromiseHandler<K, V>,
        promise_schedule: Schedule,
        accept: AcceptHandler<K, V>,
        accept_schedule: Schedule,
    ) -> EndpointToken {
        let token = EndpointToken::new();
        self.with_group(group_id, |g| {
            g.acceptors.push(AcceptorEndpoint {
                promise: (promise, promise_schedule),
                accept: (accept, accept_schedule),
                reachable: Arc::clone(&token.reachable),
            })
        });
        token
    }

    fn register_learner(
        &self,
        group_id: GroupId,
        learn: LearnHandler<K, V>,
        learn_schedule: Schedule,
        unlearn: UnlearnHandler<K>,
        unlearn_schedule: Schedule,
    ) -> EndpointToken {
        let token = EndpointToken::new();
        self.with_group(group_id, |g| {
            g.learners.push(LearnerEndpoint {
                learn: (learn, learn_schedule),
                unlearn: (unlearn, unlearn_schedule),
            })
        });
        token
    }

    fn send_promise(&self, group_id: GroupId, key: K, n: ProposalNumber) -> Self::PromiseRpc {
        let targets: Vec<_> = self.with_group(group_id, |g| {
            g.acceptors
                .iter()
                .filter(|e| e.reachable.load(Ordering::SeqCst))
                .map(|e| {
                    let (handler, schedule) = e.promise.clone();
                    let key = key.clone();
                    (move || handler(key, n), schedule)
                })
                .collect()
        });
        dispatch(targets)
    }

    fn send_accept(&self, group_id: GroupId, key: K, n: ProposalNumber, value: V) -> Self::AcceptRpc {
        let targets: Vec<_> = self.with_group(group_id, |g| {
            g.acceptors
                .iter()
                .filter(|e| e.reachable.load(Ordering::SeqCst))
                .map(|e| {
                    let (handler, schedule) = e.accept.clone();
                    let key = key.clone();
                    let value = value.clone();
                    (move || handler(key, n, value), schedule)
                })
                .collect()
        });
        dispatch(targets)
    }

    fn publish_learn(&self, group_id: GroupId, event: LearnEvent<K, V>) {
        let targets: Vec<(LearnHandler<K, V>, Schedule)> = self.with_group(group_id, |g| {
            g.learners.iter().map(|e| e.learn.clone()).collect()
        });
        for (handler, schedule) in targets {
            let event = event.clone();
            run_handler(schedule, move || handler(event));
        }
    }

    fn publish_unlearn(&self, group_id: GroupId, event: UnlearnEvent<K>) {
        let targets: Vec<(UnlearnHandler<K>, Schedule)> = self.with_group(group_id, |g| {
            g.learners.iter().map(|e| e.unlearn.clone()).collect()
        });
        for (handler, schedule) in targets {
            let event = event.clone();
            run_handler(schedule, move || handler(event));
        }
    }
}

/// A deadline derived once from a caller's `timeout`, decremented on each
/// wait. `None` means "wait forever".
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        Deadline(timeout.map(|d| Instant::now() + d))
    }

    /// Time left before the deadline, or `None` if there is no deadline.
    /// Returns `Some(Duration::ZERO)` once expired, never negative.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

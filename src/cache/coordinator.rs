//! Request coalescing.
//!
//! At most one computation per [`CacheKey`] is in flight at a time. The first
//! caller becomes the leader and holds a [`FlightGuard`]; later callers get a
//! [`FlightWaiter`] that resolves when the leader releases, after which they
//! re-read the store rather than receiving the leader's response directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use super::keys::CacheKey;

/// State of one in-flight computation as seen by its followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Pending,
    /// The leader wrote an entry to the store.
    Completed,
    /// The leader failed, was cancelled, or produced nothing storable.
    Failed,
}

struct Flight {
    id: u64,
    state: watch::Receiver<FlightState>,
}

/// Tracks pending computations by key.
#[derive(Clone)]
pub struct LockCoordinator {
    inflight: Arc<DashMap<CacheKey, Flight>>,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

pub enum Acquired {
    Leader(FlightGuard),
    Follower(FlightWaiter),
}

impl LockCoordinator {
    /// `timeout` bounds how long a follower waits for its leader.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Become the leader for `key`, or follow the computation already running.
    pub fn acquire(&self, key: &CacheKey) -> Acquired {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(occupied) => Acquired::Follower(FlightWaiter {
                state: occupied.get().state.clone(),
                timeout: self.timeout,
            }),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = watch::channel(FlightState::Pending);
                vacant.insert(Flight {
                    id,
                    state: receiver,
                });
                Acquired::Leader(FlightGuard {
                    key: key.clone(),
                    id,
                    sender,
                    inflight: Arc::clone(&self.inflight),
                    released: false,
                })
            }
        }
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.inflight.contains_key(key)
    }

    /// Number of keys with a computation in flight.
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

/// Leadership of one key. Dropping it without [`release`](Self::release)
/// releases as [`FlightState::Failed`].
pub struct FlightGuard {
    key: CacheKey,
    id: u64,
    sender: watch::Sender<FlightState>,
    inflight: Arc<DashMap<CacheKey, Flight>>,
    released: bool,
}

impl FlightGuard {
    /// Wake every follower with `outcome`.
    ///
    /// Call only after the entry (if any) has been written to the store.
    pub fn release(mut self, outcome: FlightState) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: FlightState) {
        if self.released {
            return;
        }
        self.released = true;
        let id = self.id;
        self.inflight.remove_if(&self.key, |_, flight| flight.id == id);
        self.sender.send_replace(outcome);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.finish(FlightState::Failed);
    }
}

/// Outcome of waiting on a leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Released(FlightState),
    /// The leader did not finish within the coordinator timeout.
    TimedOut,
}

pub struct FlightWaiter {
    state: watch::Receiver<FlightState>,
    timeout: Duration,
}

impl FlightWaiter {
    /// Wait for the leader, bounded by the coordinator timeout.
    ///
    /// Dropping the returned future abandons the wait immediately.
    pub async fn wait(mut self) -> WaitOutcome {
        let released = self
            .state
            .wait_for(|state| *state != FlightState::Pending);
        match tokio::time::timeout(self.timeout, released).await {
            Ok(Ok(state)) => WaitOutcome::Released(*state),
            Ok(Err(_closed)) => WaitOutcome::Released(FlightState::Failed),
            Err(_elapsed) => WaitOutcome::TimedOut,
        }
    }
}

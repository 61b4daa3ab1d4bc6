//! Per-Key Serialized Work Queue
//!
//! Keys (address space identities) flow through three states: pending,
//! running, dirty. A key enqueued while pending coalesces into the
//! existing entry; a key enqueued while running is marked dirty and is
//! re-queued when the worker finishes. At most one worker ever holds a
//! given key, so reconciles for one space are strictly serialized while
//! distinct spaces proceed in parallel.

use amc_model::SpaceKey;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct QueueState {
    order: VecDeque<SpaceKey>,
    pending: HashSet<SpaceKey>,
    running: HashSet<SpaceKey>,
    dirty: HashSet<SpaceKey>,
    shutdown: bool,
}

/// Coalescing work queue shared by the event fan-out and the worker pool
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Empty queue
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Schedule a key. Coalesces with an already-pending entry; marks the
    /// key dirty when a worker currently holds it.
    pub fn enqueue(&self, key: SpaceKey) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        if state.running.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.pending.insert(key.clone()) {
            state.order.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Take the next key, waiting until one is available. Returns `None`
    /// only after [`WorkQueue::shutdown`].
    pub async fn next(&self) -> Option<SpaceKey> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(key) = state.order.pop_front() {
                    state.pending.remove(&key);
                    state.running.insert(key.clone());
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Release a key after its reconcile completes; a dirty key goes
    /// straight back to pending.
    pub fn done(&self, key: &SpaceKey) {
        let mut state = self.state.lock();
        state.running.remove(key);
        if state.dirty.remove(key) && !state.shutdown {
            state.pending.insert(key.clone());
            state.order.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting work and wake all waiting workers
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.notify.notify_waiters();
        // Wake a worker parked before notify_waiters was observed.
        self.notify.notify_one();
    }

    /// Pending entries, for tests and introspection
    pub fn pending_len(&self) -> usize {
        self.state.lock().order.len()
    }
}

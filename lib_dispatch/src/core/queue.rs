//! # Priority Request Queue
//!
//! Bounded-concurrency admission control for outbound calls.
//!
//! At most `max_concurrent` callers hold a [`SlotGuard`] at any time. Everyone
//! else waits in a binary heap ordered by (priority descending, sequence
//! ascending), so equal priorities are served first-come first-served. A
//! running call is never preempted: priority only decides who gets the next
//! free slot.
//!
//! Slots are released when the guard drops. On release the slot is handed
//! straight to the best live waiter; a waiter whose caller has gone away
//! (future dropped, request cancelled) is skipped and discarded, so abandoned
//! requests never hold or leak a slot.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// Urgency of a request. Higher values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Background sync.
    pub const LOW: Priority = Priority(1);
    /// Page data. The default.
    pub const MEDIUM: Priority = Priority(2);
    /// Interactive user action.
    pub const HIGH: Priority = Priority(3);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::MEDIUM
    }
}

/// A caller waiting for a slot.
struct PendingEntry {
    priority: Priority,
    sequence: u64,
    grant: oneshot::Sender<SlotGuard>,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    // BinaryHeap pops the greatest element: higher priority wins, and among
    // equal priorities the lower (earlier) sequence must compare greater.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState {
    max_concurrent: usize,
    active: usize,
    next_sequence: u64,
    waiting: BinaryHeap<PendingEntry>,
}

/// Proof of holding one execution slot. Dropping it frees the slot.
pub struct SlotGuard {
    state: Arc<Mutex<QueueState>>,
    armed: bool,
}

impl SlotGuard {
    fn new(state: Arc<Mutex<QueueState>>) -> Self {
        Self { state, armed: true }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            release(&self.state);
        }
    }
}

/// Hands the slot to the best live waiter, or returns it to the pool.
fn release(state: &Arc<Mutex<QueueState>>) {
    let mut st = state.lock().expect("Queue lock poisoned");
    while let Some(entry) = st.waiting.pop() {
        match entry.grant.send(SlotGuard::new(Arc::clone(state))) {
            Ok(()) => {
                log::trace!(
                    "Slot handed to waiter #{} (priority {})",
                    entry.sequence,
                    entry.priority.0
                );
                return;
            }
            Err(mut orphan) => {
                // Waiter is gone. Disarm so dropping the guard does not re-enter.
                orphan.armed = false;
                log::debug!("Skipping abandoned waiter #{}", entry.sequence);
            }
        }
    }
    st.active -= 1;
}

/// Bounded-concurrency, priority ordered scheduler.
#[derive(Clone)]
pub struct RequestQueue {
    state: Arc<Mutex<QueueState>>,
}

impl RequestQueue {
    /// Creates a queue admitting `max_concurrent` calls at once (at least 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                max_concurrent: max_concurrent.max(1),
                active: 0,
                next_sequence: 0,
                waiting: BinaryHeap::new(),
            })),
        }
    }

    /// Waits for an execution slot.
    ///
    /// Dropping the returned future before it resolves withdraws the request.
    pub async fn acquire(&self, priority: Priority) -> SlotGuard {
        let rx = {
            let mut st = self.state.lock().expect("Queue lock poisoned");
            if st.active < st.max_concurrent {
                st.active += 1;
                return SlotGuard::new(Arc::clone(&self.state));
            }
            let (tx, rx) = oneshot::channel();
            let sequence = st.next_sequence;
            st.next_sequence += 1;
            st.waiting.push(PendingEntry {
                priority,
                sequence,
                grant: tx,
            });
            log::debug!(
                "Queued request #{} (priority {}, {} waiting)",
                sequence,
                priority.0,
                st.waiting.len()
            );
            rx
        };

        match rx.await {
            Ok(guard) => guard,
            // Senders are only dropped by `release`, which always sends first.
            Err(_) => unreachable!("queue dropped a waiter without granting"),
        }
    }

    /// Runs `execute` once a slot is available, holding it until the future settles.
    pub async fn enqueue<F, Fut>(&self, priority: Priority, execute: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _slot = self.acquire(priority).await;
        execute().await
    }

    /// Calls currently holding a slot.
    pub fn active_count(&self) -> usize {
        self.state.lock().expect("Queue lock poisoned").active
    }

    /// Calls waiting for a slot, including any that were abandoned but not yet skipped.
    pub fn waiting_len(&self) -> usize {
        self.state.lock().expect("Queue lock poisoned").waiting.len()
    }

    /// Concurrency bound.
    pub fn max_concurrent(&self) -> usize {
        self.state.lock().expect("Queue lock poisoned").max_concurrent
    }
}

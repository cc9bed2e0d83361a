//! A FIFO queue with join/task_done accounting.
//!
//! Every item taken with [`JoinQueue::get`] must be matched by one
//! [`JoinQueue::task_done`]; [`JoinQueue::join`] resolves once every item ever
//! enqueued has been marked done. Bounded queues hand out capacity through
//! [`JoinQueue::reserve`] so a caller can wait for room without giving up
//! ownership of the item it is about to enqueue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::warn;

struct State<T> {
    items: VecDeque<T>,
    unfinished: usize,
    /// Items pushed past the capacity limit that have not been taken yet
    overflow: usize,
}

pub struct JoinQueue<T> {
    state: Mutex<State<T>>,
    item_ready: Notify,
    all_done: Notify,
    capacity: Option<Arc<Semaphore>>,
}

impl<T> std::fmt::Debug for JoinQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("JoinQueue")
            .field("len", &state.items.len())
            .field("unfinished", &state.unfinished)
            .finish()
    }
}

/// Room for one item in a bounded queue.
pub struct Reservation<'a, T> {
    queue: &'a JoinQueue<T>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<T> Reservation<'_, T> {
    pub fn put(mut self, item: T) {
        // The capacity is returned by `get`, not when the reservation is dropped
        if let Some(permit) = self.permit.take() {
            permit.forget();
        }
        self.queue.enqueue(item, false);
    }
}

impl<T> JoinQueue<T> {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                unfinished: 0,
                overflow: 0,
            }),
            item_ready: Notify::new(),
            all_done: Notify::new(),
            capacity: capacity.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Wait until there is room for one more item.
    ///
    /// Unbounded queues never wait.
    pub async fn reserve(&self) -> Reservation<'_, T> {
        let permit = match &self.capacity {
            // The semaphore is never closed
            Some(capacity) => capacity.clone().acquire_owned().await.ok(),
            None => None,
        };
        Reservation {
            queue: self,
            permit,
        }
    }

    /// Enqueue without waiting for capacity.
    ///
    /// On a bounded queue the item is accounted as overflow and does not free
    /// a slot when taken.
    pub fn push(&self, item: T) {
        self.enqueue(item, self.capacity.is_some());
    }

    fn enqueue(&self, item: T, overflow: bool) {
        {
            let mut state = self.state.lock();
            state.items.push_back(item);
            state.unfinished += 1;
            if overflow {
                state.overflow += 1;
            }
        }
        self.item_ready.notify_one();
    }

    /// Remove the oldest item, waiting for one if the queue is empty.
    pub async fn get(&self) -> T {
        loop {
            if let Some(item) = self.try_get() {
                return item;
            }
            self.item_ready.notified().await;
        }
    }

    pub fn try_get(&self) -> Option<T> {
        let item = {
            let mut state = self.state.lock();
            let item = state.items.pop_front()?;
            if state.overflow > 0 {
                state.overflow -= 1;
                return Some(item);
            }
            item
        };
        if let Some(capacity) = &self.capacity {
            capacity.add_permits(1);
        }
        Some(item)
    }

    /// Mark one previously taken item as processed.
    pub fn task_done(&self) {
        let finished = {
            let mut state = self.state.lock();
            if state.unfinished == 0 {
                warn!("task_done called more times than items were enqueued");
                return;
            }
            state.unfinished -= 1;
            state.unfinished == 0
        };
        if finished {
            self.all_done.notify_waiters();
        }
    }

    /// Mark `n` previously taken items as processed.
    pub fn tasks_done(&self, n: usize) {
        for _ in 0..n {
            self.task_done();
        }
    }

    /// Wait until every enqueued item has been marked done.
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().unfinished == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }
}

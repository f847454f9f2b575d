//! Deduplicating, delayable work queue
//!
//! A key is in at most one of three places: waiting in the queue, being
//! processed by a worker, or both "processing" and "dirty" (re-added while a
//! worker held it). A dirty key goes back into the queue when its worker calls
//! [`WorkQueue::done`], so one key is never handed to two workers at once and
//! repeated adds collapse into a single pending delivery.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    cancel: CancellationToken,
}

/// Work queue handle; clones share the same queue
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Enqueue a key
    ///
    /// No-op if the key is already waiting or the queue is shutting down. A
    /// key that is currently being processed is marked dirty and re-queued
    /// when its worker calls [`done`](Self::done).
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Enqueue a key once `delay` has elapsed
    ///
    /// Pending delayed adds are dropped when the queue shuts down.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!("delayed add dropped on shutdown");
                }
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shut down and empty. Every key handed
    /// out must be released with [`done`](Self::done).
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release a key handed out by [`get`](Self::get)
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker
    ///
    /// Keys already queued are still handed out; `get` returns `None` once
    /// they are gone.
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.cancel.cancel();
        self.inner.notify.notify_waiters();
    }

    /// Whether [`shut_down`](Self::shut_down) has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add("games/poker");
        queue.add("games/poker");
        queue.add("games/chess");

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, Some("games/poker"));
        assert_eq!(queue.get().await, Some("games/chess"));
        assert!(queue.is_empty());
    }

    /// Story: a key re-added while a worker holds it is delivered again only
    /// after that worker is done, never concurrently
    #[tokio::test]
    async fn story_key_is_not_handed_out_twice_while_processing() {
        let queue = WorkQueue::new();
        queue.add("games/poker");
        let key = queue.get().await.unwrap();

        queue.add("games/poker");
        queue.add("games/poker");
        assert!(queue.is_empty(), "processing key must not be queued again");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("games/poker"));
    }

    #[tokio::test]
    async fn done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(1u32);
        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_delivers_once_delay_elapses() {
        let queue = WorkQueue::new();
        queue.add_after("games/poker", Duration::from_secs(15));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(queue.is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(queue.get().await, Some("games/poker"));
    }

    #[tokio::test]
    async fn get_waits_for_an_add() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add(7u32);
        assert_eq!(waiter.await.unwrap(), Some(7));
    }

    /// Story: on shutdown, queued keys are still drained, new adds are
    /// ignored and idle workers are released
    #[tokio::test]
    async fn story_shutdown_drains_then_releases_workers() {
        let queue = WorkQueue::new();
        queue.add("games/poker");

        let idle = {
            let queue: WorkQueue<&str> = WorkQueue::new();
            let waiter = queue.clone();
            let handle = tokio::spawn(async move { waiter.get().await });
            tokio::task::yield_now().await;
            queue.shut_down();
            handle
        };
        assert_eq!(idle.await.unwrap(), None);

        queue.shut_down();
        queue.add("games/chess");
        queue.add_after("games/chess", Duration::from_secs(1));
        assert!(queue.is_shutting_down());
        assert_eq!(queue.get().await, Some("games/poker"));
        assert_eq!(queue.get().await, None);
    }
}

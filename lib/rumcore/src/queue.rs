//! Data and message queues, and the queue group that lets a single consumer
//! thread wait on several of them plus external file descriptors at once.
//!
//! Grounded in `rum2/queue.h`: a data queue is a bounded ring with
//! drop-newest-at-tail overflow, a message queue is unbounded and never
//! drops, and a queue group aggregates both kinds for one `wait`/`tmwait`
//! loop.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// One item pushed through a queue. Queues are generic over the item type;
/// the reflector instantiates them over `Arc<Metadata>`-like payloads.
pub struct Queue<T> {
    inner: Mutex<QueueInner<T>>,
    groups: Mutex<Vec<Arc<QueueGroupState>>>,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
    total_received: u64,
    dropped: u64,
}

impl<T> Queue<T> {
    /// A data queue: bounded to `capacity`, drops the newly-pushed item when
    /// full.
    pub fn data(capacity: usize) -> Queue<T> {
        Queue {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                capacity: Some(capacity),
                total_received: 0,
                dropped: 0,
            }),
            groups: Mutex::new(Vec::new()),
        }
    }

    /// A message queue: unbounded, never drops.
    pub fn message() -> Queue<T> {
        Queue {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                capacity: None,
                total_received: 0,
                dropped: 0,
            }),
            groups: Mutex::new(Vec::new()),
        }
    }

    /// Attaches this queue to a queue group so pushes wake its consumer.
    pub fn join(&self, group: &QueueGroup) {
        self.groups.lock().unwrap().push(group.state.clone());
    }

    /// Pushes an item. On a full data queue the new item is dropped and
    /// `dropped` is incremented by exactly one; `total_received` always
    /// increments on every push attempt.
    pub fn push(&self, item: T) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.total_received += 1;
            match inner.capacity {
                Some(cap) if inner.items.len() >= cap => {
                    inner.dropped += 1;
                }
                _ => inner.items.push_back(item),
            }
        }
        self.signal_groups();
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Non-destructive peek at the head item; only meaningful with a single
    /// consumer, per the original semantics.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn total_received(&self) -> u64 {
        self.inner.lock().unwrap().total_received
    }

    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    fn signal_groups(&self) {
        for group in self.groups.lock().unwrap().iter() {
            group.signal();
        }
    }
}

/// Shared wake state for a queue group: a flag plus condvar, matching
/// `queue_group::cond`/`signal` in the original header.
struct QueueGroupState {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl QueueGroupState {
    fn new() -> QueueGroupState {
        QueueGroupState {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut happened = self.mutex.lock().unwrap();
        *happened = true;
        self.condvar.notify_all();
    }
}

/// Aggregates queues and external readiness sources (file descriptors, in
/// this port represented as opaque tokens supplied by the readiness bridge)
/// for one consumer thread's `wait`/`tmwait` loop.
pub struct QueueGroup {
    state: Arc<QueueGroupState>,
    io_tokens: Mutex<Vec<mio::Token>>,
}

impl QueueGroup {
    pub fn new() -> QueueGroup {
        QueueGroup {
            state: Arc::new(QueueGroupState::new()),
            io_tokens: Mutex::new(Vec::new()),
        }
    }

    /// Registers an external readiness source with this group. The
    /// readiness bridge thread calls `signal()` on this group's state when
    /// the token becomes readable.
    pub fn io_add(&self, token: mio::Token) {
        self.io_tokens.lock().unwrap().push(token);
    }

    pub fn io_remove(&self, token: mio::Token) {
        self.io_tokens.lock().unwrap().retain(|t| *t != token);
    }

    pub fn io_tokens(&self) -> Vec<mio::Token> {
        self.io_tokens.lock().unwrap().clone()
    }

    /// A handle consumers outside this module (the readiness bridge) can use
    /// to wake this group without holding a `&QueueGroup`.
    pub fn waker(&self) -> QueueGroupWaker {
        QueueGroupWaker {
            state: self.state.clone(),
        }
    }

    /// Blocks until woken by a queue push, an `io` signal, or an explicit
    /// `signal()`. Spurious wakeups are possible; callers must re-check
    /// their queues/fds.
    pub fn wait(&self) {
        let mut happened = self.state.mutex.lock().unwrap();
        while !*happened {
            happened = self.state.condvar.wait(happened).unwrap();
        }
        *happened = false;
    }

    /// As `wait`, but returns `false` on timeout without having observed a
    /// wake.
    pub fn tmwait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut happened = self.state.mutex.lock().unwrap();
        while !*happened {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.state.condvar.wait_timeout(happened, deadline - now).unwrap();
            happened = guard;
            if result.timed_out() && !*happened {
                return false;
            }
        }
        *happened = false;
        true
    }

    pub fn signal(&self) {
        self.state.signal();
    }
}

impl Default for QueueGroup {
    fn default() -> QueueGroup {
        QueueGroup::new()
    }
}

/// A cloneable, thread-shareable handle used to wake a queue group from the
/// readiness bridge thread.
#[derive(Clone)]
pub struct QueueGroupWaker {
    state: Arc<QueueGroupState>,
}

impl QueueGroupWaker {
    pub fn signal(&self) {
        self.state.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_queue_is_fifo() {
        let q: Queue<i32> = Queue::message();
        for i in 0..5 {
            q.push(i);
        }
        let observed: Vec<i32> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(observed, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn data_queue_drops_newest_on_overflow() {
        let q: Queue<i32> = Queue::data(4);
        for i in 0..7 {
            q.push(i);
        }
        assert_eq!(q.dropped(), 3);
        assert_eq!(q.total_received(), 7);

        let popped: Vec<i32> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3]);
        assert!(q.pop().is_none());
    }

    #[test]
    fn push_wakes_joined_group() {
        let q: Queue<i32> = Queue::message();
        let group = QueueGroup::new();
        q.join(&group);
        q.push(1);
        assert!(group.tmwait(Duration::from_millis(200)));
    }

    #[test]
    fn tmwait_times_out_without_signal() {
        let group = QueueGroup::new();
        assert!(!group.tmwait(Duration::from_millis(20)));
    }
}

//! Thread-safe FIFO queue for handing frames from producer to consumer.
//!
//! The capture core itself pushes frames straight into the consumer
//! callback; this queue exists for consumers that want to decouple the
//! producer thread from their own processing loop.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    deque: VecDeque<T>,
    closed: bool,
}

/// Unbounded multi-producer, multi-consumer FIFO with explicit close
/// semantics.
///
/// After [`close`](FrameQueue::close), all blocked `pop` calls wake up,
/// later pushes are discarded, and pops drain the remaining elements
/// before returning the default-constructed sentinel.
pub struct FrameQueue<T> {
    inner: Mutex<Inner<T>>,
    cv: Condvar,
}

impl<T: Default> FrameQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { deque: VecDeque::new(), closed: false }),
            cv: Condvar::new(),
        }
    }

    /// Enqueue a value. Discarded silently if the queue is closed.
    pub fn push(&self, value: T) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.deque.push_back(value);
        }
        self.cv.notify_one();
    }

    /// Block until a value is available or the queue is closed.
    ///
    /// Returns `T::default()` once the queue is closed and drained.
    pub fn pop(&self) -> T {
        let mut inner = self.inner.lock().unwrap();
        while inner.deque.is_empty() && !inner.closed {
            inner = self.cv.wait(inner).unwrap();
        }
        inner.deque.pop_front().unwrap_or_default()
    }

    /// As [`pop`](FrameQueue::pop), but gives up after `timeout` with no
    /// value available (or after close with the queue drained).
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        let (guard, result) = self
            .cv
            .wait_timeout_while(inner, timeout, |i| i.deque.is_empty() && !i.closed)
            .unwrap();
        inner = guard;
        if result.timed_out() && inner.deque.is_empty() {
            return None;
        }
        inner.deque.pop_front()
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().deque.pop_front()
    }

    /// Close the queue and wake every waiter.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
        }
        self.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().deque.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().deque.len()
    }
}

impl<T: Default> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn push_and_pop() {
        let q = FrameQueue::new();
        q.push(42);
        assert_eq!(q.pop(), 42);
    }

    #[test]
    fn fifo_order() {
        let q = FrameQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), 1);
        assert_eq!(q.pop(), 2);
        assert_eq!(q.pop(), 3);
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(FrameQueue::new());
        let received = Arc::new(AtomicBool::new(false));

        let q2 = q.clone();
        let received2 = received.clone();
        let consumer = thread::spawn(move || {
            assert_eq!(q2.pop(), 99);
            received2.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!received.load(Ordering::SeqCst));

        q.push(99);
        consumer.join().unwrap();
        assert!(received.load(Ordering::SeqCst));
    }

    #[test]
    fn try_pop_empty_and_non_empty() {
        let q = FrameQueue::new();
        assert_eq!(q.try_pop(), None);
        q.push(7);
        assert_eq!(q.try_pop(), Some(7));
        assert!(q.is_empty());
    }

    #[test]
    fn pop_timeout_expires() {
        let q: FrameQueue<i32> = FrameQueue::new();
        let start = Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn pop_timeout_returns_value() {
        let q = FrameQueue::new();
        q.push(5);
        assert_eq!(q.pop_timeout(Duration::from_millis(30)), Some(5));
    }

    #[test]
    fn len_and_empty() {
        let q = FrameQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
        q.push(1);
        q.push(2);
        assert_eq!(q.len(), 2);
        q.pop();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn close_unblocks_pop_within_bounded_time() {
        let q: Arc<FrameQueue<i32>> = Arc::new(FrameQueue::new());

        let q2 = q.clone();
        let consumer = thread::spawn(move || {
            let start = Instant::now();
            let v = q2.pop();
            (v, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        q.close();
        let (v, waited) = consumer.join().unwrap();
        assert_eq!(v, 0); // sentinel
        assert!(waited < Duration::from_millis(200));
    }

    #[test]
    fn push_after_close_is_noop() {
        let q = FrameQueue::new();
        q.push(1);
        q.close();
        q.push(2);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn close_drains_then_sentinel() {
        let q = FrameQueue::new();
        q.push(10);
        q.push(20);
        q.close();
        assert_eq!(q.pop(), 10);
        assert_eq!(q.pop(), 20);
        assert_eq!(q.pop(), 0);
        assert!(q.is_closed());
    }

    #[test]
    fn multi_producer_delivers_every_value_once() {
        let q: Arc<FrameQueue<i32>> = Arc::new(FrameQueue::new());
        const THREADS: i32 = 4;
        const PER_THREAD: i32 = 100;

        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        q.push(t * PER_THREAD + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(q.len() as i32, THREADS * PER_THREAD);
        let mut seen = std::collections::BTreeSet::new();
        let mut per_producer_last = [-1i32; THREADS as usize];
        for _ in 0..THREADS * PER_THREAD {
            let v = q.pop();
            assert!(seen.insert(v), "value {} observed twice", v);
            // Order within a single producer's range must be preserved.
            let producer = (v / PER_THREAD) as usize;
            assert!(v > per_producer_last[producer]);
            per_producer_last[producer] = v;
        }
        assert_eq!(seen.len() as i32, THREADS * PER_THREAD);
    }
}

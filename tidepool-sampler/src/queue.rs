//! Bounded blocking hand-off between worker threads and the consumer.
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded FIFO channel of completed samples.
///
/// Producers block in [`push`](SampleQueue::push) while the queue is full;
/// the consumer blocks in [`pop`](SampleQueue::pop) while it is empty.
/// [`close`](SampleQueue::close) wakes everyone: pushes fail from then on,
/// pops drain whatever is buffered and then fail. Ordering is strict FIFO
/// per producer; pushes from different producers interleave arbitrarily.
pub struct SampleQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    space_available: Condvar,
    item_available: Condvar,
}

impl<T> SampleQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            space_available: Condvar::new(),
            item_available: Condvar::new(),
        }
    }

    /// Blocks until there is space or the queue is closed. Returns `false`
    /// iff the queue was closed and the item was not enqueued.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap();
        while !state.closed && state.items.len() == self.capacity {
            state = self.space_available.wait(state).unwrap();
        }
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        self.item_available.notify_one();
        true
    }

    /// Blocks until an item is available or the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        while !state.closed && state.items.is_empty() {
            state = self.item_available.wait(state).unwrap();
        }
        let item = state.items.pop_front();
        if item.is_some() {
            self.space_available.notify_one();
        }
        item
    }

    /// Idempotent. Wakes all blocked producers and consumers.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.space_available.notify_all();
        self.item_available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_within_a_single_producer() {
        let queue = SampleQueue::new(4);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn push_blocks_until_space() {
        let queue = Arc::new(SampleQueue::new(1));
        assert!(queue.push(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2))
        };
        // Give the producer time to block on the full queue.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.pop(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn close_drains_residual_items_then_fails() {
        let queue = SampleQueue::new(2);
        assert!(queue.push(7));
        queue.close();
        assert!(!queue.push(8));
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(SampleQueue::<i32>::new(1));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }
}

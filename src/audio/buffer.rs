//! Lock-free hand-off queue between tasks
//!
//! Bounded single-producer single-consumer queue used to pass received
//! packets from the network task to the audio task without blocking
//! either side. When full, the newest item is rejected and counted.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded lock-free queue with overflow/underrun accounting
pub struct RingBuffer<T> {
    queue: ArrayQueue<T>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push an item.
    /// Returns false if the buffer is full (overflow)
    pub fn push(&self, item: T) -> bool {
        match self.queue.push(item) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop an item.
    /// Returns None if the buffer is empty (underrun)
    pub fn pop(&self) -> Option<T> {
        match self.queue.pop() {
            Some(item) => Some(item),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Pop without counting an underrun
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Drop everything queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer<T> = Arc<RingBuffer<T>>;

/// Create a new shared ring buffer
pub fn create_shared_buffer<T>(capacity: usize) -> SharedRingBuffer<T> {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(4);

        assert!(buffer.push(0u32));
        assert!(buffer.push(1u32));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop(), Some(0));
        assert_eq!(buffer.pop(), Some(1));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_and_underrun_counted() {
        let buffer = RingBuffer::new(2);
        assert!(buffer.push(1));
        assert!(buffer.push(2));
        assert!(!buffer.push(3));
        assert_eq!(buffer.overflow_count(), 1);
        assert!(buffer.is_full());

        buffer.clear();
        assert_eq!(buffer.pop(), None::<i32>);
        assert_eq!(buffer.underrun_count(), 1);

        // try_pop does not count
        assert_eq!(buffer.try_pop(), None);
        assert_eq!(buffer.underrun_count(), 1);

        buffer.reset_stats();
        assert_eq!(buffer.overflow_count(), 0);
    }

    #[test]
    fn test_cross_thread_handoff() {
        let buffer = create_shared_buffer::<u32>(64);
        let producer = Arc::clone(&buffer);

        let handle = std::thread::spawn(move || {
            for i in 0..32 {
                producer.push(i);
            }
        });
        handle.join().unwrap();

        let drained: Vec<u32> = std::iter::from_fn(|| buffer.try_pop()).collect();
        assert_eq!(drained, (0..32).collect::<Vec<_>>());
    }
}

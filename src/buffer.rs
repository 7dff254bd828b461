use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A bounded buffer that overwrites its oldest entry when full.
///
/// Every access goes through one mutex, so [`RingBuffer::drain`] observes
/// either all or none of a concurrent [`RingBuffer::push`]. Clones share the
/// same storage.
#[derive(Debug)]
pub struct RingBuffer<T> {
    items: Arc<Mutex<VecDeque<T>>>,
    capacity: usize,
    evicted_count: Arc<AtomicU64>,
}

impl<T> Clone for RingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            capacity: self.capacity,
            evicted_count: Arc::clone(&self.evicted_count),
        }
    }
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer holding at most `capacity` items.
    ///
    /// A zero capacity is rounded up to one; `PipelineConfig::validate`
    /// rejects it before a pipeline ever gets here.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            evicted_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an item, evicting the oldest one if the buffer is full.
    ///
    /// Returns the evicted item, if any. Never fails.
    pub fn push(&self, item: T) -> Option<T> {
        let mut items = self.items.lock();
        let evicted = if items.len() == self.capacity {
            self.evicted_count.fetch_add(1, Ordering::Relaxed);
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        evicted
    }

    /// Take the whole contents, oldest first, leaving the buffer empty.
    ///
    /// Returns `None` when there is nothing to emit.
    pub fn drain(&self) -> Option<Vec<T>> {
        let mut items = self.items.lock();
        if items.is_empty() {
            return None;
        }
        Some(items.drain(..).collect())
    }

    /// Put previously drained items back in front of anything pushed since.
    ///
    /// The buffer keeps its newest `capacity` items, so restored items are
    /// the first to be evicted (and counted) if they no longer fit.
    pub fn restore(&self, drained: Vec<T>) {
        let mut items = self.items.lock();
        let mut restored: VecDeque<T> = drained.into();
        restored.append(&mut items);
        let overflow = restored.len().saturating_sub(self.capacity);
        if overflow > 0 {
            restored.drain(..overflow);
            self.evicted_count.fetch_add(overflow as u64, Ordering::Relaxed);
        }
        *items = restored;
    }

    /// Get the current number of buffered items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Get the capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of items overwritten because the buffer was full
    pub fn evicted_count(&self) -> u64 {
        self.evicted_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_drain_empty() {
        let buffer: RingBuffer<i64> = RingBuffer::new(4);
        assert_eq!(buffer.drain(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_push_then_drain_single() {
        let buffer = RingBuffer::new(4);
        buffer.push(7);
        assert_eq!(buffer.drain(), Some(vec![7]));
        assert!(buffer.is_empty());
        assert_eq!(buffer.drain(), None);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let buffer = RingBuffer::new(2);
        assert_eq!(buffer.push(1), None);
        assert_eq!(buffer.push(2), None);
        assert_eq!(buffer.push(3), Some(1));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.evicted_count(), 1);
        assert_eq!(buffer.drain(), Some(vec![2, 3]));
    }

    #[test]
    fn test_restore_goes_before_newer_items() {
        let buffer = RingBuffer::new(4);
        buffer.push(1);
        buffer.push(2);
        let drained = buffer.drain().unwrap();
        buffer.push(3);

        buffer.restore(drained);
        assert_eq!(buffer.drain(), Some(vec![1, 2, 3]));
        assert_eq!(buffer.evicted_count(), 0);
    }

    #[test]
    fn test_restore_evicts_oldest_when_full() {
        let buffer = RingBuffer::new(3);
        buffer.push(1);
        buffer.push(2);
        let drained = buffer.drain().unwrap();
        buffer.push(3);
        buffer.push(4);

        buffer.restore(drained);
        assert_eq!(buffer.drain(), Some(vec![2, 3, 4]));
        assert_eq!(buffer.evicted_count(), 1);
    }

    #[test]
    fn test_capacity() {
        let buffer: RingBuffer<i64> = RingBuffer::new(42);
        assert_eq!(buffer.capacity(), 42);
        let buffer: RingBuffer<i64> = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = RingBuffer::new(3);
        let writer = buffer.clone();
        writer.push(5);
        assert_eq!(buffer.drain(), Some(vec![5]));
        assert!(writer.is_empty());
    }

    #[test]
    fn test_concurrent_push_and_drain_loses_nothing_below_capacity() {
        let buffer = RingBuffer::new(1_000);
        let writer = buffer.clone();
        let producer = thread::spawn(move || {
            for i in 0..500 {
                writer.push(i);
            }
        });

        let mut seen = Vec::new();
        while !producer.is_finished() {
            if let Some(batch) = buffer.drain() {
                seen.extend(batch);
            }
        }
        producer.join().unwrap();
        if let Some(batch) = buffer.drain() {
            seen.extend(batch);
        }

        assert_eq!(seen, (0..500).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn prop_keeps_most_recent_capacity_items(
            capacity in 1usize..16,
            values in proptest::collection::vec(any::<i64>(), 0..64),
        ) {
            let buffer = RingBuffer::new(capacity);
            for &v in &values {
                buffer.push(v);
                prop_assert!(buffer.len() <= capacity);
            }
            let expected: Vec<i64> = values
                .iter()
                .copied()
                .skip(values.len().saturating_sub(capacity))
                .collect();
            let drained = buffer.drain().unwrap_or_default();
            prop_assert_eq!(drained, expected);
            prop_assert!(buffer.is_empty());
        }
    }
}

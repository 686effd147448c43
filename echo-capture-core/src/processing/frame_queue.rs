use std::collections::VecDeque;

/// Bounded FIFO of raw audio frames.
///
/// Wrap in `parking_lot::Mutex` for cross-thread access.
///
/// Overflow behavior: drops the oldest frame and counts it, so a stalled
/// consumer costs at most `capacity` frames of memory.
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
    dropped: u64,
}

impl FrameQueue {
    /// A queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append a frame, evicting the oldest if the queue is full.
    ///
    /// Returns `true` if a frame was evicted.
    pub fn push(&mut self, frame: Vec<u8>) -> bool {
        let evicted = if self.frames.len() == self.capacity {
            self.frames.pop_front();
            self.dropped += 1;
            true
        } else {
            false
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Remove and return every queued frame, oldest first.
    pub fn drain_all(&mut self) -> Vec<Vec<u8>> {
        self.frames.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames lost since creation, by overflow or via [`record_dropped`].
    ///
    /// [`record_dropped`]: FrameQueue::record_dropped
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Count `frames` taken from the queue that never reached the consumer.
    pub fn record_dropped(&mut self, frames: usize) {
        self.dropped += frames as u64;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut queue = FrameQueue::new(4);
        queue.push(vec![1]);
        queue.push(vec![2]);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(vec![1]));
        assert_eq!(queue.pop(), Some(vec![2]));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut queue = FrameQueue::new(2);
        assert!(!queue.push(vec![1]));
        assert!(!queue.push(vec![2]));
        assert!(queue.push(vec![3]));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.drain_all(), vec![vec![2], vec![3]]);
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut queue = FrameQueue::new(0);
        queue.push(vec![1]);
        queue.push(vec![2]);

        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.pop(), Some(vec![2]));
    }

    #[test]
    fn consumer_losses_add_to_drop_count() {
        let mut queue = FrameQueue::new(1);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.record_dropped(2);

        assert_eq!(queue.dropped(), 3);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_keeps_drop_count() {
        let mut queue = FrameQueue::new(1);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 1);
    }
}

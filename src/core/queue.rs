//! FIFO queue shared by every per-peer send path.

use crate::core::error::SessionError;
use std::collections::VecDeque;

/// First-in, first-out queue.
///
/// `front`/`dequeue` on an empty queue return [`SessionError::EmptyQueue`];
/// callers check `is_empty` first, so that error marks a contract violation.
#[derive(Debug, Clone)]
pub struct Queue<T> {
    items: VecDeque<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append an item at the tail.
    pub fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the head.
    pub fn dequeue(&mut self) -> Result<T, SessionError> {
        self.items.pop_front().ok_or(SessionError::EmptyQueue)
    }

    /// Borrow the head without removing it.
    pub fn front(&self) -> Result<&T, SessionError> {
        self.items.front().ok_or(SessionError::EmptyQueue)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = Queue::new();
        for i in 0..100 {
            q.enqueue(i);
        }
        let drained: Vec<i32> = std::iter::from_fn(|| q.dequeue().ok()).collect();
        assert_eq!(drained, (0..100).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn test_interleaved_fifo() {
        let mut q = Queue::new();
        q.enqueue("a");
        q.enqueue("b");
        assert_eq!(q.dequeue().unwrap(), "a");
        q.enqueue("c");
        assert_eq!(q.dequeue().unwrap(), "b");
        assert_eq!(q.dequeue().unwrap(), "c");
    }

    #[test]
    fn test_front_does_not_remove() {
        let mut q = Queue::new();
        q.enqueue(7);
        assert_eq!(*q.front().unwrap(), 7);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_empty_queue_errors() {
        let mut q: Queue<u8> = Queue::new();
        assert!(matches!(q.front(), Err(SessionError::EmptyQueue)));
        assert!(matches!(q.dequeue(), Err(SessionError::EmptyQueue)));
    }
}

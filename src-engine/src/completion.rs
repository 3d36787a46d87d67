//! Completion queue shared between the submission path and the driver
//! completion path.
//!
//! Asynchronous drivers only report that *a* buffer finished, never which one,
//! so records are kept in submission order and the head is taken as the one
//! that completed. The lock is held for a single push or pop and never across
//! driver calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// FIFO of in-flight records awaiting a completion signal.
pub struct CompletionQueue<T> {
    entries: Mutex<VecDeque<T>>,
    depth: AtomicUsize,
}

impl<T> CompletionQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            depth: AtomicUsize::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record that has just been (or is about to be) submitted.
    pub fn push_back(&self, entry: T) {
        let mut entries = self.entries();
        entries.push_back(entry);
        self.depth.store(entries.len(), Ordering::SeqCst);
    }

    /// Take the oldest record, i.e. the one a completion signal refers to.
    pub fn pop_front(&self) -> Option<T> {
        let mut entries = self.entries();
        let entry = entries.pop_front();
        self.depth.store(entries.len(), Ordering::SeqCst);
        entry
    }

    /// Take back the newest record when its submission failed.
    pub fn pop_back(&self) -> Option<T> {
        let mut entries = self.entries();
        let entry = entries.pop_back();
        self.depth.store(entries.len(), Ordering::SeqCst);
        entry
    }

    /// Inspect the head record without removing it.
    pub fn peek_front<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries().front().map(f)
    }

    /// Remove every record, oldest first.
    pub fn take_all(&self) -> Vec<T> {
        let mut entries = self.entries();
        let drained: Vec<T> = entries.drain(..).collect();
        self.depth.store(0, Ordering::SeqCst);
        drained
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for CompletionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = CompletionQueue::new();
        queue.push_back("a");
        queue.push_back("b");
        queue.push_back("c");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front(), Some("a"));
        assert_eq!(queue.pop_front(), Some("b"));
        assert_eq!(queue.pop_front(), Some("c"));
        assert_eq!(queue.pop_front(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_back_removes_newest() {
        let queue = CompletionQueue::new();
        queue.push_back(1);
        queue.push_back(2);

        assert_eq!(queue.pop_back(), Some(2));
        assert_eq!(queue.peek_front(|v| *v), Some(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_take_all_empties_queue() {
        let queue = CompletionQueue::new();
        for i in 0..4 {
            queue.push_back(i);
        }

        assert_eq!(queue.take_all(), vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
        assert_eq!(queue.peek_front(|v| *v), None);
    }

    #[test]
    fn test_concurrent_push_and_pop_loses_nothing() {
        let queue = Arc::new(CompletionQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..1000u32 {
                    queue.push_back(i);
                }
            })
        };

        let mut popped = Vec::new();
        while popped.len() < 1000 {
            if let Some(v) = queue.pop_front() {
                popped.push(v);
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert_eq!(popped, (0..1000).collect::<Vec<_>>());
    }
}

//! Bounded FIFO of files waiting for capacity.

use std::path::PathBuf;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::debug;

/// Default number of paths the queue can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Bounded, non-blocking FIFO of file paths.
///
/// Paths are taken in the order they were offered. There is no
/// deduplication: a path offered twice occupies two slots.
#[derive(Debug)]
pub struct PendingQueue {
    tx: mpsc::Sender<PathBuf>,
    rx: Mutex<mpsc::Receiver<PathBuf>>,
    capacity: usize,
}

impl PendingQueue {
    /// Create a queue holding at most `capacity` paths. Zero falls back to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Append `path`. Returns `false` without waiting if the queue is full.
    pub fn offer(&self, path: PathBuf) -> bool {
        match self.tx.try_send(path) {
            Ok(()) => true,
            Err(TrySendError::Full(path)) => {
                debug!("Pending queue full, refusing {}", path.display());
                false
            }
            // The receiver lives as long as `self`.
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Remove the oldest path, if any, without waiting.
    pub fn try_take(&self) -> Option<PathBuf> {
        let mut rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        match rx.try_recv() {
            Ok(path) => Some(path),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Number of queued paths.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued paths.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fifo_order() {
        let queue = PendingQueue::new(4);
        assert!(queue.offer(PathBuf::from("a.html")));
        assert!(queue.offer(PathBuf::from("b.html")));

        assert_eq!(queue.try_take(), Some(PathBuf::from("a.html")));
        assert_eq!(queue.try_take(), Some(PathBuf::from("b.html")));
        assert_eq!(queue.try_take(), None);
    }

    #[test]
    fn test_full_queue_refuses() {
        let queue = PendingQueue::new(2);
        assert!(queue.offer(PathBuf::from("a")));
        assert!(queue.offer(PathBuf::from("b")));
        assert!(!queue.offer(PathBuf::from("c")));
        assert_eq!(queue.len(), 2);

        queue.try_take();
        assert!(queue.offer(PathBuf::from("c")));
    }

    #[test]
    fn test_duplicates_take_two_slots() {
        let queue = PendingQueue::new(3);
        queue.offer(PathBuf::from("same"));
        queue.offer(PathBuf::from("same"));

        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_default_capacity() {
        let queue = PendingQueue::default();
        assert_eq!(queue.capacity(), DEFAULT_QUEUE_CAPACITY);
        assert!(queue.is_empty());
    }
}

//! Work queue abstraction.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

/// FIFO queue of task ids awaiting execution.
///
/// Implementations only move ids around; all task state lives in the
/// store. The in-process implementation below is the default; a broker
/// -backed one would implement the same trait.
#[async_trait]
pub trait Queue: Send + Sync {
    fn enqueue(&self, task_id: &str) -> Result<(), QueueError>;

    /// Next task id, or None once the queue is closed and drained.
    async fn recv(&self) -> Option<String>;
}

/// Unbounded in-memory queue on a tokio mpsc channel.
///
/// The receiver sits behind an async mutex so any number of workers can
/// pull from the same queue.
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for InProcessQueue {
    fn enqueue(&self, task_id: &str) -> Result<(), QueueError> {
        self.tx
            .send(task_id.to_string())
            .map_err(|_| QueueError::Closed)
    }

    async fn recv(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InProcessQueue::new();
        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();
        assert_eq!(queue.recv().await.as_deref(), Some("a"));
        assert_eq!(queue.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_multiple_consumers_each_get_one() {
        use std::sync::Arc;
        let queue = Arc::new(InProcessQueue::new());
        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();

        let q1 = queue.clone();
        let q2 = queue.clone();
        let (one, two) = tokio::join!(
            tokio::spawn(async move { q1.recv().await }),
            tokio::spawn(async move { q2.recv().await }),
        );
        let mut got = vec![one.unwrap().unwrap(), two.unwrap().unwrap()];
        got.sort();
        assert_eq!(got, vec!["a".to_string(), "b".to_string()]);
    }
}

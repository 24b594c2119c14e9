//! Bounded generation queue shared by the worker pool.
//!
//! A tokio mpsc channel provides back-pressure: `push` suspends while the
//! queue is full. The receiving half sits behind an async mutex so any
//! number of workers can dequeue from it. The mutex is held only while
//! waiting for the next task, never while a task is being synthesized.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::GenerationTask;

/// Default queue capacity (tasks, not bytes).
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// The queue was closed before the task could be enqueued.
#[derive(Debug)]
pub struct QueueClosed(pub GenerationTask);

/// Producer half, owned by the session feeder.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<GenerationTask>,
}

/// Consumer half, cloned into every worker.
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<GenerationTask>>>,
}

/// Create a bounded generation queue. A capacity of zero is treated as one.
pub fn generation_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl QueueSender {
    /// Enqueue a task, waiting for space if the queue is full.
    pub async fn push(&self, task: GenerationTask) -> Result<(), QueueClosed> {
        self.tx.send(task).await.map_err(|e| QueueClosed(e.0))
    }

    /// Free slots right now.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl QueueReceiver {
    /// Next task, or `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<GenerationTask> {
        self.rx.lock().await.recv().await
    }

    /// Refuse further pushes. Tasks already queued can still be popped.
    ///
    /// If a worker is currently parked in `pop`, the close is applied as
    /// soon as it releases the lock.
    pub fn close(&self) {
        match self.rx.try_lock() {
            Ok(mut rx) => rx.close(),
            Err(_) => {
                let rx = Arc::clone(&self.rx);
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        rx.lock().await.close();
                    });
                }
            }
        }
    }
}

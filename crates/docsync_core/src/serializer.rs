//! Per-document task serializer.
//!
//! Every piece of sync-related work for a document (persistence, pulls,
//! pushes, realtime applies and publishes) runs as a task on that document's
//! [`TaskQueue`]. A single worker drains the queue in FIFO order, so at most
//! one task per document is ever in flight, while tasks of different
//! documents run freely in parallel.
//!
//! A task that fails does not poison the queue: its error is delivered to the
//! caller awaiting it (or to the error hook for detached tasks) and the
//! worker moves on to the next task.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

use crate::error::{DocsyncError, ErrorHook, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// FIFO chain of asynchronous tasks for one document.
///
/// Dropping the queue closes the channel; queued tasks still drain before the
/// worker exits, which is what lets in-flight sync work finish after a
/// document is closed or removed.
pub(crate) struct TaskQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl TaskQueue {
    /// Spawn the worker on the current tokio runtime.
    pub(crate) fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { tx }
    }

    /// Enqueue a task and return a future resolving to its result.
    ///
    /// The returned future resolves with [`DocsyncError::TaskCancelled`] if
    /// the queue shuts down before the task runs.
    pub(crate) fn enqueue<F, T>(&self, task: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The receiver may be gone (detached caller); that's fine.
            let _ = done_tx.send(task.await);
        });
        let accepted = self.tx.send(job).is_ok();

        async move {
            if !accepted {
                return Err(DocsyncError::TaskCancelled);
            }
            done_rx.await.unwrap_or(Err(DocsyncError::TaskCancelled))
        }
    }

    /// Enqueue a task nobody awaits; failures go to the error hook.
    pub(crate) fn enqueue_detached<F>(&self, task: F, on_error: ErrorHook)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let job: Job = Box::pin(async move {
            if let Err(err) = task.await {
                on_error(&err);
            }
        });
        if self.tx.send(job).is_err() {
            log::debug!("task queue closed; detached task dropped");
        }
    }

    /// Await completion of everything queued so far.
    pub(crate) fn barrier(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.enqueue(async { Ok(()) })
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

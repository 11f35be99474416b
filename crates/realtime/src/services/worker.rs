use std::future::Future;

use tokio::{sync::oneshot, task::JoinHandle};

/// Background task with a shutdown signal.
///
/// The task receives a `oneshot::Receiver` that resolves once [`WorkerHandle::shutdown`]
/// is called or the handle is dropped.
pub struct WorkerHandle {
    name: &'static str,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn<F, Fut>(name: &'static str, worker: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, signal) = oneshot::channel();
        let task = tokio::spawn(worker(signal));
        Self {
            name,
            shutdown,
            task,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the worker and waits for it to finish.
    pub async fn shutdown(self) {
        let Self {
            name,
            shutdown,
            task,
        } = self;
        let _ = shutdown.send(());
        if let Err(e) = task.await {
            tracing::error!(worker = name, "Worker task panicked: {:?}", e);
        }
        tracing::debug!(worker = name, "Worker stopped");
    }
}

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::transport::{RawHandler, RawMessage};
use crate::utils::error::BusError;

/// Called with every message whose handler returned an error.
pub(crate) type FailureHook = Arc<dyn Fn(RawMessage, &BusError) + Send + Sync>;

/// A fixed set of tokio tasks pulling deliveries from one shared queue.
///
/// Workers exit once every sender of the queue has been dropped.
pub(crate) struct WorkerPool {
    tx: Option<mpsc::UnboundedSender<RawMessage>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        label: String,
        handler: Arc<dyn RawHandler>,
        concurrency: usize,
        on_failure: FailureHook,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<RawMessage>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..concurrency.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let handler = handler.clone();
                let on_failure = on_failure.clone();
                let label = label.clone();

                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(message) = next else { break };

                        match handler.handle_raw(&message).await {
                            Ok(()) => debug!("{label} worker {worker} finished {}", message.id),
                            Err(err) => on_failure(message, &err),
                        }
                    }
                    debug!("{label} worker {worker} stopped");
                })
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
        }
    }

    pub(crate) fn sender(&self) -> Option<mpsc::UnboundedSender<RawMessage>> {
        self.tx.clone()
    }

    /// Drops the pool's own sender and waits for the workers. Callers must
    /// release every other sender first or this waits forever.
    pub(crate) async fn shutdown(&mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

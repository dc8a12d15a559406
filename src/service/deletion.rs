//! Asynchronous soft-delete batching
//!
//! Callers push `DeletionTask`s into one bounded queue. A fixed pool of
//! workers shares the receiving end; each keeps its own batch and flushes it
//! through `Storage::update_deleted_flags` when the batch is full or when its
//! ticker fires. Closing the queue makes every worker flush what it holds and
//! exit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::DeletionConfig;
use crate::models::DeletionTask;
use crate::storage::Storage;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<DeletionTask>>>;

pub struct DeletionQueue {
    sender: RwLock<Option<mpsc::Sender<DeletionTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Worker {
    id: usize,
    receiver: SharedReceiver,
    storage: Arc<dyn Storage>,
    batch: Vec<DeletionTask>,
    batch_size: usize,
    flush_interval: Duration,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick which fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                task = next_task(&self.receiver) => match task {
                    Some(task) => {
                        self.batch.push(task);
                        if self.batch.len() >= self.batch_size {
                            self.flush().await;
                        }
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        debug!("Deletion worker {} stopped", self.id);
    }

    async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.batch);
        match self.storage.update_deleted_flags(&batch).await {
            Ok(()) => debug!("Deletion worker {} flushed {} tasks", self.id, batch.len()),
            Err(e) => error!(
                "Deletion worker {} failed to flush {} tasks, dropping them: {}",
                self.id,
                batch.len(),
                e
            ),
        }
        self.batch.reserve(self.batch_size);
    }
}

/// Wait for the next task; `None` once the queue is closed and drained
async fn next_task(receiver: &Mutex<mpsc::Receiver<DeletionTask>>) -> Option<DeletionTask> {
    receiver.lock().await.recv().await
}

impl DeletionQueue {
    /// Create the queue and spawn its workers on the current runtime
    pub fn start(storage: Arc<dyn Storage>, config: &DeletionConfig) -> Self {
        let worker_count = config.workers.max(1);
        let batch_size = config.batch_size.max(1);
        let flush_interval = config.flush_interval().max(Duration::from_millis(1));

        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    receiver: Arc::clone(&receiver),
                    storage: Arc::clone(&storage),
                    batch: Vec::with_capacity(batch_size),
                    batch_size,
                    flush_interval,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            "Deletion queue started: {} workers, batch size {}, flush every {:?}",
            worker_count, batch_size, flush_interval
        );

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue one task per alias
    ///
    /// Waits only while the queue is full. After `shutdown` the tasks are
    /// dropped with a warning.
    pub async fn enqueue(&self, owner_id: &str, aliases: Vec<String>) {
        let Some(sender) = self.sender.read().await.clone() else {
            warn!(
                "Deletion queue is closed, dropping {} tasks for owner {}",
                aliases.len(),
                owner_id
            );
            return;
        };

        for alias in aliases {
            let task = DeletionTask {
                owner_id: owner_id.to_string(),
                alias,
            };
            if let Err(e) = sender.send(task).await {
                warn!("Deletion queue closed while enqueueing {}", e.0.alias);
                return;
            }
        }
    }

    /// Close the queue and wait for every worker to flush and exit
    pub async fn shutdown(&self) {
        if self.sender.write().await.take().is_none() {
            return;
        }

        let workers = std::mem::take(&mut *self.workers.lock().await);
        info!("Shutting down deletion queue, waiting for {} workers", workers.len());

        for handle in workers {
            if let Err(e) = handle.await {
                error!("Deletion worker panicked: {}", e);
            }
        }

        info!("Deletion queue drained");
    }
}

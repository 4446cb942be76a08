//! Proof-of-work worker.
//!
//! Mining is CPU-bound, so it runs on the blocking pool and never holds up
//! the accept loop or a handshake. A semaphore caps how many jobs mine at
//! once; the nonce comes back on a oneshot channel.

use std::sync::Arc;
use std::time::Instant;

use bitmsg_protocol::{pow, PowParams};
use tokio::sync::{oneshot, Semaphore};

#[derive(Clone)]
pub struct PowWorker {
    slots: Arc<Semaphore>,
}

impl PowWorker {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_jobs.max(1))),
        }
    }

    /// Queue `body` for mining. The receiver resolves with the nonce; it
    /// errors only if the job was dropped before finishing.
    pub fn mine(&self, body: Vec<u8>, params: PowParams) -> oneshot::Receiver<u64> {
        let (tx, rx) = oneshot::channel();
        let slots = self.slots.clone();
        tokio::spawn(async move {
            let Ok(permit) = slots.acquire_owned().await else {
                return;
            };
            let job = tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let nonce = pow::mine(&body, params);
                tracing::info!(
                    nonce,
                    bytes = body.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "pow: object mined"
                );
                nonce
            });
            match job.await {
                Ok(nonce) => {
                    let _ = tx.send(nonce);
                }
                Err(e) => tracing::warn!(error = %e, "pow: mining task failed"),
            }
            drop(permit);
        });
        rx
    }

    /// Jobs that could start right now without waiting.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

impl Default for PowWorker {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(cores)
    }
}

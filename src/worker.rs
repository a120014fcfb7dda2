use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::pipeline::{Outcome, Pipeline};
use crate::source::PhotoJob;

pub type JobSender = mpsc::Sender<PhotoJob>;

/// Fixed set of tasks draining the photo queue. Bounds how many photos are
/// in flight at once; a full queue makes the pollers wait.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(pipeline: Arc<Pipeline>, workers: usize, capacity: usize) -> (JobSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|id| {
                let pipeline = Arc::clone(&pipeline);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(job) = next else { break };
                        let result = pipeline.process(&job).await;
                        log_outcome(id, &job, result);
                    }
                    log::debug!("worker {id} stopped");
                })
            })
            .collect();

        (tx, Self { handles })
    }

    /// Waits until every sender is dropped and the queue is drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("photo worker panicked: {e}");
            }
        }
    }
}

fn log_outcome(worker: usize, job: &PhotoJob, result: Result<Outcome, PipelineError>) {
    let source = job.sender.platform();
    match result {
        Ok(Outcome::Published) => {
            info!("[worker {worker}] published {source} photo {}", job.reference)
        }
        Ok(Outcome::Rejected {
            category,
            probability,
        }) => info!(
            "[worker {worker}] BLOCKED {source} photo {} - {} at {:.1}%",
            job.reference,
            category,
            probability * 100.0
        ),
        Err(e) => warn!(
            "[worker {worker}] dropped {source} photo {} ({} error): {}",
            job.reference,
            e.kind(),
            e
        ),
    }
}

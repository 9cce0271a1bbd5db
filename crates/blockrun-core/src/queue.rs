//! Serial job queue.
//!
//! One worker task drains a FIFO of jobs, running exactly one at a time. Each
//! job runs in its own task so that a panicking job fails only its own caller,
//! and every job races the owning context's [`ClosedSignal`] so a dead context
//! never leaves callers hanging.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

use crate::context::ClosedSignal;
use crate::error::{Error, Result};

type BoxedJob = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct QueuedJob {
    body: BoxedJob,
    done: oneshot::Sender<Result<()>>,
}

/// FIFO of jobs for one context.
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl JobQueue {
    /// Create a queue and spawn its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(closed: ClosedSignal) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(rx, closed));
        Self { tx }
    }

    /// Queue `body` behind every job enqueued before it and wait for it.
    ///
    /// Resolves with the job's own result, or `Ok(())` if the context
    /// closed first. A failed job does not affect later jobs.
    pub async fn enqueue<F>(&self, body: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (done, wait) = oneshot::channel();
        let job = QueuedJob {
            body: Box::pin(body),
            done,
        };
        if self.tx.send(job).is_err() {
            // Worker is gone, which only happens once the queue is torn down.
            return Ok(());
        }
        wait.await.unwrap_or(Ok(()))
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<QueuedJob>, closed: ClosedSignal) {
    while let Some(QueuedJob { body, done }) = rx.recv().await {
        let result = if closed.is_closed() {
            Ok(())
        } else {
            run_one(body, &closed).await
        };
        let _ = done.send(result);
    }
}

async fn run_one(body: BoxedJob, closed: &ClosedSignal) -> Result<()> {
    let handle = tokio::spawn(body);
    let abort = handle.abort_handle();

    tokio::select! {
        joined = handle => match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Queued job failed: {}", e);
                Err(Error::JobFailed(e.to_string()))
            }
        },
        _ = closed.wait() => {
            tracing::debug!("Context closed with a job outstanding");
            abort.abort();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_order_one_at_a_time() {
        let queue = Arc::new(JobQueue::new(ClosedSignal::new()));
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut callers = Vec::new();
        for i in 0..5u64 {
            let queue = queue.clone();
            let log = log.clone();
            callers.push(tokio::spawn(async move {
                queue
                    .enqueue(async move {
                        log.lock().unwrap().push(format!("start {}", i));
                        tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                        log.lock().unwrap().push(format!("end {}", i));
                        Ok(())
                    })
                    .await
            }));
            // Fix the enqueue order.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for caller in callers {
            caller.await.unwrap().unwrap();
        }

        let log = log.lock().unwrap();
        let expected: Vec<String> = (0..5)
            .flat_map(|i| [format!("start {}", i), format!("end {}", i)])
            .collect();
        assert_eq!(*log, expected);
    }

    async fn explode() -> Result<()> {
        panic!("job panicked")
    }

    #[tokio::test]
    async fn test_failed_job_does_not_block_the_next() {
        let queue = JobQueue::new(ClosedSignal::new());

        let failed = queue
            .enqueue(async { Err(Error::JobFailed("boom".to_string())) })
            .await;
        assert!(matches!(failed, Err(Error::JobFailed(_))));

        let panicked = queue.enqueue(explode()).await;
        assert!(matches!(panicked, Err(Error::JobFailed(_))));

        queue.enqueue(async { Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_unblocks_outstanding_jobs() {
        let closed = ClosedSignal::new();
        let queue = Arc::new(JobQueue::new(closed.clone()));

        let stuck = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(std::future::pending()).await })
        };
        let behind = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(std::future::pending()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        closed.fire();

        for caller in [stuck, behind] {
            tokio::time::timeout(Duration::from_secs(1), caller)
                .await
                .expect("closing the context should unblock queued jobs")
                .unwrap()
                .unwrap();
        }

        // Jobs queued after close resolve without running.
        queue.enqueue(std::future::pending()).await.unwrap();
    }
}

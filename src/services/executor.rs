//! Local task executor.
//!
//! A bounded worker pool over an in-process job queue. Other services
//! (notably the report processor) hand their heavyweight work here
//! instead of running it inline. The pool must be up before anything
//! that submits to it.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::services::{ServiceContext, ServiceError};

/// A unit of work for the pool.
pub struct Job {
    pub name: String,
    pub run: Box<dyn FnOnce() + Send + 'static>,
}

/// The executor is shutting down and no longer accepts jobs.
#[derive(Debug, Error)]
#[error("executor is not accepting jobs")]
pub struct ExecutorClosed;

/// Cloneable handle for submitting jobs to the pool.
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::Sender<Job>,
}

impl ExecutorHandle {
    /// Queue a job, waiting for queue space if necessary.
    pub async fn submit(&self, job: Job) -> Result<(), ExecutorClosed> {
        self.tx.send(job).await.map_err(|_| ExecutorClosed)
    }
}

/// Launch the worker pool. The handshake completes once every worker is
/// running and the queue accepts jobs.
pub async fn spawn(ctx: &ServiceContext) -> Result<ExecutorHandle, ServiceError> {
    let cfg = &ctx.config.executor;
    let (tx, rx) = mpsc::channel(cfg.queue_depth);
    let rx = Arc::new(Mutex::new(rx));

    for worker in 0..cfg.workers {
        tokio::spawn(worker_loop(worker, rx.clone(), ctx.shutdown.subscribe()));
    }

    tracing::info!(workers = cfg.workers, "Task executor started");
    Ok(ExecutorHandle { tx })
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let job = tokio::select! {
            job = async { rx.lock().await.recv().await } => job,
            _ = shutdown.recv() => break,
        };

        let Some(job) = job else { break };
        tracing::debug!(worker, job = %job.name, "Running job");
        (job.run)();
    }
    tracing::debug!(worker, "Executor worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::services::test_context;

    #[tokio::test]
    async fn submitted_jobs_run() {
        let ctx = test_context();
        let handle = spawn(&ctx).await.unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let ran = ran.clone();
            handle
                .submit(Job {
                    name: format!("job-{}", i),
                    run: Box::new(move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                    }),
                })
                .await
                .unwrap();
        }

        for _ in 0..50 {
            if ran.load(Ordering::SeqCst) == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_eventually() {
        let ctx = test_context();
        let handle = spawn(&ctx).await.unwrap();
        ctx.shutdown.trigger();

        // Workers drain and drop the receiver; submissions then fail.
        for _ in 0..50 {
            let result = handle
                .submit(Job {
                    name: "late".to_string(),
                    run: Box::new(|| {}),
                })
                .await;
            if result.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("executor kept accepting jobs after shutdown");
    }
}

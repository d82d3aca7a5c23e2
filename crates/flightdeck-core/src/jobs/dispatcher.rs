// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded job queue and the worker pool that drains it.
//!
//! Callers hand jobs to a [`JobDispatcher`] and get a [`JobId`] back at once.
//! A [`JobWorkerPool`] pulls jobs off the queue and runs up to
//! `workers` of them at a time through the [`JobExecutor`]. Outcomes are
//! reported only through notifications.

use std::sync::Arc;

use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::DispatchError;
use super::executor::JobExecutor;
use super::job::{Job, JobId, JobKind};

/// Handle for submitting jobs.
#[derive(Clone)]
pub struct JobDispatcher {
    tx: mpsc::Sender<Job>,
}

/// Receiving side of the job queue, owned by the worker pool.
pub struct JobQueue {
    rx: mpsc::Receiver<Job>,
}

impl JobDispatcher {
    /// Create a queue holding at most `capacity` pending jobs.
    pub fn channel(capacity: usize) -> (JobDispatcher, JobQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (JobDispatcher { tx }, JobQueue { rx })
    }

    /// Queue a job and return its id without waiting for it to run.
    pub fn dispatch(&self, kind: JobKind) -> Result<JobId, DispatchError> {
        let job = Job::new(kind);
        let id = job.id;
        let name = job.kind.name();
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::ShuttingDown,
        })?;
        debug!(job_id = %id, kind = name, "Job queued");
        Ok(id)
    }

    /// Whether the worker pool has stopped accepting jobs.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Configuration for the job worker pool.
#[derive(Debug, Clone)]
pub struct JobWorkerPoolConfig {
    /// Jobs run concurrently.
    pub workers: usize,
}

impl Default for JobWorkerPoolConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Background worker that executes queued jobs.
pub struct JobWorkerPool {
    queue: JobQueue,
    executor: Arc<JobExecutor>,
    config: JobWorkerPoolConfig,
    shutdown: Arc<Notify>,
}

impl JobWorkerPool {
    pub fn new(queue: JobQueue, executor: Arc<JobExecutor>, config: JobWorkerPoolConfig) -> Self {
        Self {
            queue,
            executor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the pool until shutdown is signalled or every dispatcher is gone.
    ///
    /// On shutdown the queue is closed, jobs still waiting in it are reported
    /// as failed, and jobs already running are awaited.
    pub async fn run(mut self) {
        let workers = self.config.workers.max(1);
        info!(workers, "Job worker pool started");

        let permits = Arc::new(Semaphore::new(workers));
        let mut running = JoinSet::new();

        loop {
            while let Some(done) = running.try_join_next() {
                if let Err(e) = done {
                    error!(error = %e, "Job task panicked");
                }
            }

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                job = self.queue.rx.recv() => match job {
                    Some(job) => job,
                    None => {
                        debug!("All dispatchers dropped");
                        break;
                    }
                },
            };

            let executor = self.executor.clone();
            running.spawn(async move {
                executor.execute(job).await;
                drop(permit);
            });
        }

        self.queue.rx.close();
        let mut rejected = 0usize;
        while let Ok(job) = self.queue.rx.try_recv() {
            self.executor.reject(job, "shutting down");
            rejected += 1;
        }

        let in_flight = running.len();
        while let Some(done) = running.join_next().await {
            if let Err(e) = done {
                error!(error = %e, "Job task panicked");
            }
        }

        info!(rejected, in_flight, "Job worker pool stopped");
    }
}

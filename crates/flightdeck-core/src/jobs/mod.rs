// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Asynchronous jobs.
//!
//! Long-running work (archival, external upload, report generation) is
//! requested with [`JobDispatcher::dispatch`], which returns a job id at once.
//! A bounded pool of workers runs the job and reports the outcome only through
//! a `<Kind>Success` or `<Kind>Failure` notification carrying that id.

use thiserror::Error;

mod dispatcher;
mod executor;
mod external;
mod job;
mod report;

pub use dispatcher::{JobDispatcher, JobQueue, JobWorkerPool, JobWorkerPoolConfig};
pub use executor::{JobExecutor, TRANSIENT_ARCHIVE_TTL};
pub use external::{ExternalSink, HttpDatasourceSink};
pub use job::{Job, JobId, JobKind, RecordingRef};
pub use report::ReportGenerator;

/// Errors returned synchronously by [`JobDispatcher::dispatch`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The job queue is at capacity.
    #[error("Job queue is full")]
    QueueFull,

    /// The worker pool is shutting down.
    #[error("Job dispatcher is shutting down")]
    ShuttingDown,
}

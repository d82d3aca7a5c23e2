// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job execution and outcome notifications.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::external::ExternalSink;
use super::job::{Job, JobKind, RecordingRef};
use super::report::ReportGenerator;
use crate::archive::{ArchiveUploader, ArchivedRecordings};
use crate::error::{Error, Result};
use crate::notify::NotificationChannel;
use crate::stream::ByteStream;

/// Lifetime of the transient archive made when an active recording is
/// exported.
pub const TRANSIENT_ARCHIVE_TTL: Duration = Duration::from_secs(30 * 60);

/// Runs jobs and publishes exactly one outcome notification per job.
pub struct JobExecutor {
    uploader: Arc<ArchiveUploader>,
    archives: Arc<ArchivedRecordings>,
    notifier: Arc<dyn NotificationChannel>,
    external_sink: Option<Arc<dyn ExternalSink>>,
    report_generator: Option<Arc<dyn ReportGenerator>>,
}

impl JobExecutor {
    pub fn new(
        uploader: Arc<ArchiveUploader>,
        archives: Arc<ArchivedRecordings>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            uploader,
            archives,
            notifier,
            external_sink: None,
            report_generator: None,
        }
    }

    pub fn with_external_sink(mut self, sink: Arc<dyn ExternalSink>) -> Self {
        self.external_sink = Some(sink);
        self
    }

    pub fn with_report_generator(mut self, generator: Arc<dyn ReportGenerator>) -> Self {
        self.report_generator = Some(generator);
        self
    }

    /// Run a job to completion and publish its outcome. Never fails, and a
    /// panicking job still publishes its failure.
    pub async fn execute(&self, job: Job) {
        let started = std::time::Instant::now();
        let queued_ms = (Utc::now() - job.enqueued_at).num_milliseconds().max(0);
        let outcome = AssertUnwindSafe(self.run(&job.kind))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panicked(panic)));
        match outcome {
            Ok(fields) => {
                info!(
                    job_id = %job.id,
                    kind = job.kind.name(),
                    queued_ms,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job succeeded"
                );
                let mut payload = json!({ "jobId": job.id });
                if let (Value::Object(target), Value::Object(extra)) = (&mut payload, fields) {
                    target.extend(extra);
                }
                self.notifier.emit(job.kind.success_category(), payload);
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    kind = job.kind.name(),
                    queued_ms,
                    error = %e,
                    error_code = e.error_code(),
                    "Job failed"
                );
                self.notifier
                    .emit(job.kind.failure_category(), json!({ "jobId": job.id }));
            }
        }
    }

    /// Publish the failure outcome for a job that will never run.
    pub fn reject(&self, job: Job, reason: &str) {
        warn!(job_id = %job.id, kind = job.kind.name(), reason = %reason, "Job dropped");
        self.notifier
            .emit(job.kind.failure_category(), json!({ "jobId": job.id }));
    }

    async fn run(&self, kind: &JobKind) -> Result<Value> {
        match kind {
            JobKind::Archive {
                target,
                recording,
                expiry,
            } => {
                let filename = self.uploader.archive(target, recording, *expiry).await?;
                Ok(json!({
                    "jvmId": target.jvm_id,
                    "recording": recording.name,
                    "filename": filename,
                }))
            }
            JobKind::UploadExternal(recording) => {
                let sink = self
                    .external_sink
                    .clone()
                    .ok_or_else(|| Error::Other("external datasource is not configured".to_string()))?;
                let result = self
                    .with_archived_stream(recording, |filename, stream| async move {
                        sink.upload(&filename, stream).await
                    })
                    .await?;
                Ok(json!({ "jvmId": recording.jvm_id(), "result": result }))
            }
            JobKind::Report(recording) => {
                let generator = self
                    .report_generator
                    .clone()
                    .ok_or_else(|| Error::Other("report generation is not configured".to_string()))?;
                let report = self
                    .with_archived_stream(recording, |_, stream| {
                        let recording = recording.clone();
                        async move { generator.generate(&recording, stream).await }
                    })
                    .await?;
                Ok(json!({ "jvmId": recording.jvm_id(), "report": report }))
            }
        }
    }

    /// Run `f` over the bytes of a recording.
    ///
    /// Active recordings are first copied into a transient archive so the
    /// remote connection is held only for the copy; the transient archive is
    /// removed afterwards, even when `f` panics.
    async fn with_archived_stream<F, Fut, T>(&self, recording: &RecordingRef, f: F) -> Result<T>
    where
        F: FnOnce(String, Box<dyn ByteStream>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match recording {
            RecordingRef::Archived { jvm_id, filename } => {
                let stream = self.archives.open(jvm_id, filename).await?;
                f(filename.clone(), stream).await
            }
            RecordingRef::Active { target, recording } => {
                let ttl = chrono::Duration::from_std(TRANSIENT_ARCHIVE_TTL)
                    .map_err(|e| Error::Other(e.to_string()))?;
                let filename = self
                    .uploader
                    .archive(target, recording, Some(Utc::now() + ttl))
                    .await?;
                let result = match self.archives.open(&target.jvm_id, &filename).await {
                    Ok(stream) => AssertUnwindSafe(f(filename.clone(), stream))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(panicked(panic))),
                    Err(e) => Err(e),
                };
                if let Err(e) = self.archives.discard(&target.jvm_id, &filename).await {
                    warn!(
                        jvm_id = %target.jvm_id,
                        filename = %filename,
                        error = %e,
                        "Failed to remove transient archive"
                    );
                }
                result
            }
        }
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::Other(format!("job panicked: {}", message))
}

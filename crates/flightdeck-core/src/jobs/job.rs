// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job descriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ActiveRecording, Target};
use crate::notify::category;

/// Random job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A recording a job operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum RecordingRef {
    /// A recording on a remote target.
    Active {
        target: Target,
        recording: ActiveRecording,
    },
    /// An archived recording.
    #[serde(rename_all = "camelCase")]
    Archived { jvm_id: String, filename: String },
}

impl RecordingRef {
    /// JVM the recording belongs to.
    pub fn jvm_id(&self) -> &str {
        match self {
            RecordingRef::Active { target, .. } => &target.jvm_id,
            RecordingRef::Archived { jvm_id, .. } => jvm_id,
        }
    }

    /// Human-readable name, used as the upload filename hint.
    pub fn name(&self) -> &str {
        match self {
            RecordingRef::Active { recording, .. } => &recording.name,
            RecordingRef::Archived { filename, .. } => filename,
        }
    }
}

/// What a job does.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Archive an active recording.
    Archive {
        target: Target,
        recording: ActiveRecording,
        expiry: Option<DateTime<Utc>>,
    },
    /// Push a recording to the external datasource.
    UploadExternal(RecordingRef),
    /// Produce an analysis report.
    Report(RecordingRef),
}

impl JobKind {
    /// Kind name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Archive { .. } => "ARCHIVE",
            JobKind::UploadExternal(_) => "UPLOAD_EXTERNAL",
            JobKind::Report(_) => "REPORT",
        }
    }

    /// Notification category published when the job succeeds.
    pub fn success_category(&self) -> &'static str {
        match self {
            JobKind::Archive { .. } => category::ARCHIVE_RECORDING_SUCCESS,
            JobKind::UploadExternal(_) => category::GRAFANA_UPLOAD_SUCCESS,
            JobKind::Report(_) => category::REPORT_SUCCESS,
        }
    }

    /// Notification category published when the job fails.
    pub fn failure_category(&self) -> &'static str {
        match self {
            JobKind::Archive { .. } => category::ARCHIVE_RECORDING_FAILURE,
            JobKind::UploadExternal(_) => category::GRAFANA_UPLOAD_FAILURE,
            JobKind::Report(_) => category::REPORT_FAILURE,
        }
    }
}

/// A queued job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: JobId::new(),
            kind,
            enqueued_at: Utc::now(),
        }
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Archival of recordings into object storage.
//!
//! Recording bytes are streamed from the remote JVM straight into a multipart
//! upload, one fixed-size chunk per part, so memory use is bounded by the
//! chunk size regardless of the recording's length.

use thiserror::Error;

use crate::object_store::ObjectStoreError;
use crate::source::SourceError;

mod archived;
pub mod keys;
mod plan;
pub mod tags;
mod uploader;

pub use archived::ArchivedRecordings;
pub use plan::{ChunkPlan, MAX_PARTS};
pub use uploader::{ArchiveUploader, DEFAULT_CHUNK_SIZE, MAX_EMPTY_READ_RETRIES, UploadSummary};

/// Content type of archived recordings.
pub const RECORDING_MIME_TYPE: &str = "application/octet-stream";

/// Errors from the archival pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// The stream kept returning no data.
    #[error("Stream returned no data after {attempts} attempts")]
    ZeroReads {
        /// Consecutive empty reads observed.
        attempts: u32,
    },

    /// The recording needs more parts than multipart uploads allow.
    #[error("Recording exceeds {max_parts} parts")]
    PartLimitExceeded {
        /// Part limit.
        max_parts: u32,
    },

    /// Reading the recording failed.
    #[error("Read failed: {0}")]
    Read(#[from] std::io::Error),

    /// Opening the recording failed.
    #[error("Recording source error: {0}")]
    Source(#[from] SourceError),

    /// Creating the upload or uploading a part failed.
    #[error("Upload failed: {0}")]
    Upload(ObjectStoreError),

    /// Completing the upload failed.
    #[error("Completing upload failed: {0}")]
    Complete(ObjectStoreError),

    /// Key or filename rejected.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

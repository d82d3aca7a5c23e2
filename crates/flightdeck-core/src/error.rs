// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for flightdeck-core.

use std::time::Duration;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use crate::jobs::DispatchError;
use crate::object_store::ObjectStoreError;
use crate::source::SourceError;

/// Flightdeck errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A same-named recording exists and the replace policy forbids replacing it.
    #[error("Recording \"{name}\" already exists on target {target}")]
    Conflict {
        /// Target connect URL.
        target: String,
        /// Recording name.
        name: String,
    },

    /// Referenced target, recording or archive does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Remote recording source failed.
    #[error("Recording source error: {0}")]
    Source(#[from] SourceError),

    /// Object storage operation failed.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    /// Archival upload failed.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Job could not be queued.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Synchronous wait on the remote source exceeded the request timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// External HTTP call failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Coarse failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Replace policy rejected a start.
    Conflict,
    /// Missing target, recording or archive.
    NotFound,
    /// Malformed request.
    InvalidRequest,
    /// I/O that may succeed on a later attempt.
    TransientIo,
    /// Unrecoverable pipeline failure.
    Fatal,
    /// Remote or storage failure without a more specific class.
    Internal,
    /// Queue full, shutting down or timed out.
    Unavailable,
}

impl Error {
    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "RECORDING_CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Source(SourceError::NotFound(_)) => "NOT_FOUND",
            Self::Source(_) => "SOURCE_ERROR",
            Self::ObjectStore(ObjectStoreError::NotFound(_)) => "NOT_FOUND",
            Self::ObjectStore(_) => "OBJECT_STORE_ERROR",
            Self::Archive(ArchiveError::PartLimitExceeded { .. }) => "PART_LIMIT_EXCEEDED",
            Self::Archive(ArchiveError::ZeroReads { .. }) => "ZERO_READS_EXHAUSTED",
            Self::Archive(ArchiveError::Complete(_)) => "COMPLETE_FAILED",
            Self::Archive(_) => "ARCHIVE_FAILED",
            Self::Dispatch(DispatchError::QueueFull) => "QUEUE_FULL",
            Self::Dispatch(DispatchError::ShuttingDown) => "SHUTTING_DOWN",
            Self::Timeout(_) => "TIMEOUT",
            Self::Http(_) => "HTTP_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Json(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict { .. } => ErrorClass::Conflict,
            Self::NotFound(_)
            | Self::Source(SourceError::NotFound(_))
            | Self::ObjectStore(ObjectStoreError::NotFound(_))
            | Self::Archive(ArchiveError::Source(SourceError::NotFound(_))) => ErrorClass::NotFound,
            Self::InvalidRequest(_) | Self::Archive(ArchiveError::InvalidKey(_)) => {
                ErrorClass::InvalidRequest
            }
            Self::ObjectStore(ObjectStoreError::Io(_)) | Self::Io(_) => ErrorClass::TransientIo,
            Self::Archive(ArchiveError::Read(_)) => ErrorClass::TransientIo,
            Self::Archive(_) => ErrorClass::Fatal,
            Self::Dispatch(_) | Self::Timeout(_) => ErrorClass::Unavailable,
            _ => ErrorClass::Internal,
        }
    }

    /// Whether a remote lookup failure is the benign "not found" case.
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

/// Result type using the flightdeck Error.
pub type Result<T> = std::result::Result<T, Error>;

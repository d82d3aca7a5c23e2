// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording source trait definitions.
//!
//! Defines the abstract interface to the recordings running inside a remote
//! JVM. The wire protocol behind it is up to the implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{EventTemplate, RecordingDescriptor, RecordingOptions, Target};
use crate::stream::ByteStream;

/// Errors from recording source operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The remote reports that the recording does not exist.
    #[error("Recording not found: {0}")]
    NotFound(String),

    /// The target could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Access to the recordings of remote JVM targets.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// All recordings currently known to the target.
    async fn list_descriptors(&self, target: &Target) -> Result<Vec<RecordingDescriptor>>;

    /// Look up a recording by name.
    async fn find_by_name(
        &self,
        target: &Target,
        name: &str,
    ) -> Result<Option<RecordingDescriptor>> {
        Ok(self
            .list_descriptors(target)
            .await?
            .into_iter()
            .find(|d| d.name == name))
    }

    /// Open the recording's bytes for reading.
    ///
    /// The target connection is leased for as long as the returned stream is
    /// alive.
    async fn open_stream(&self, target: &Target, remote_id: i64) -> Result<Box<dyn ByteStream>>;

    /// Start a new recording.
    async fn start(
        &self,
        target: &Target,
        options: &RecordingOptions,
        template: &EventTemplate,
    ) -> Result<RecordingDescriptor>;

    /// Stop a running recording and return its updated descriptor.
    async fn stop(&self, target: &Target, remote_id: i64) -> Result<RecordingDescriptor>;

    /// Close (discard) a recording on the target.
    async fn close(&self, target: &Target, remote_id: i64) -> Result<()>;

    /// Refresh the connection lease; `false` means the connection is gone.
    async fn mark_in_use(&self, target: &Target) -> bool;
}

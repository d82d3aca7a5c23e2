// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage adapter.
//!
//! The subset of an S3-compatible API the archival pipeline needs: multipart
//! uploads, object tags, reads, deletes and prefix listings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::stream::ByteStream;

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

/// Errors from object storage operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ObjectStoreError {
    /// No object under the key.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Upload id is unknown, completed or aborted.
    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    /// Part list given on completion does not match the uploaded parts.
    #[error("Invalid part: {0}")]
    InvalidPart(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for object store operations.
pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// An object tag. Keys and values are stored as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An uploaded part, as passed to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// S3-style object storage.
///
/// Parts of a multipart upload are invisible until the upload completes; an
/// aborted upload leaves no object behind.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
        tags: &[Tag],
    ) -> Result<String>;

    /// Upload one part and return its ETag. Part numbers start at 1.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<String>;

    /// Assemble the listed parts, in order, into the object at `key`.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    /// Discard an upload and its parts.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Tags of an object, `None` when the object does not exist.
    async fn get_tags(&self, key: &str) -> Result<Option<Vec<Tag>>>;

    /// Replace the tags of an existing object.
    async fn put_tags(&self, key: &str, tags: &[Tag]) -> Result<()>;

    /// Read an object.
    async fn get(&self, key: &str) -> Result<Box<dyn ByteStream>>;

    /// Delete an object. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>>;
}

/// Hex SHA-256 of a part, used as its ETag.
pub(crate) fn etag_for(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Archived recordings: listing, metadata, reads, deletes and pushed uploads.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use super::keys::{jvm_prefix, split_key, storage_key};
use super::tags;
use super::uploader::ArchiveUploader;
use super::ArchiveError;
use crate::error::{Error, Result};
use crate::model::{ArchivedRecording, LABEL_JVM_ID, Metadata};
use crate::notify::{NotificationChannel, category};
use crate::object_store::{ObjectStore, ObjectStoreError, ObjectSummary};
use crate::stream::ByteStream;

/// Access to archived recordings.
pub struct ArchivedRecordings {
    uploader: Arc<ArchiveUploader>,
    notifier: Arc<dyn NotificationChannel>,
    push_max_files: usize,
}

impl ArchivedRecordings {
    pub fn new(
        uploader: Arc<ArchiveUploader>,
        notifier: Arc<dyn NotificationChannel>,
        push_max_files: usize,
    ) -> Self {
        Self {
            uploader,
            notifier,
            push_max_files: push_max_files.max(1),
        }
    }

    fn store(&self) -> &Arc<dyn ObjectStore> {
        self.uploader.store()
    }

    /// Archives visible in normal listings, optionally for one JVM.
    ///
    /// Transient archives (those with an expiry) are left out.
    pub async fn list(&self, jvm_id: Option<&str>) -> Result<Vec<ArchivedRecording>> {
        let prefix = jvm_id.map(jvm_prefix).unwrap_or_default();
        let mut out = Vec::new();
        for summary in self.store().list(&prefix).await? {
            match self.describe(&summary).await? {
                Some(recording) if recording.metadata.expiry.is_none() => out.push(recording),
                _ => {}
            }
        }
        Ok(out)
    }

    /// One archive by full key, including transient ones.
    pub async fn get(&self, jvm_id: &str, filename: &str) -> Result<Option<ArchivedRecording>> {
        let key = storage_key(jvm_id, filename);
        let summary = self
            .store()
            .list(&key)
            .await?
            .into_iter()
            .find(|s| s.key == key);
        match summary {
            Some(summary) => self.describe(&summary).await,
            None => Ok(None),
        }
    }

    /// Decoded metadata of an archive; `None` when the key does not exist.
    pub async fn metadata(&self, jvm_id: &str, filename: &str) -> Result<Option<Metadata>> {
        let key = storage_key(jvm_id, filename);
        Ok(self.store().get_tags(&key).await?.map(|t| tags::decode(&t)))
    }

    /// Open an archive for reading.
    pub async fn open(&self, jvm_id: &str, filename: &str) -> Result<Box<dyn ByteStream>> {
        let key = storage_key(jvm_id, filename);
        self.store().get(&key).await.map_err(|e| match e {
            ObjectStoreError::NotFound(_) => Error::NotFound(format!("archive {}", key)),
            other => other.into(),
        })
    }

    /// Delete an archive. Returns whether it existed.
    pub async fn delete(&self, jvm_id: &str, filename: &str) -> Result<bool> {
        let key = storage_key(jvm_id, filename);
        let metadata = self.metadata(jvm_id, filename).await?;
        let deleted = self.store().delete(&key).await?;
        if deleted {
            info!(jvm_id = %jvm_id, filename = %filename, "Deleted archived recording");
            self.notifier.emit(
                category::ARCHIVED_RECORDING_DELETED,
                json!({
                    "jvmId": jvm_id,
                    "recording": {
                        "jvmId": jvm_id,
                        "name": filename,
                        "metadata": metadata.unwrap_or_default(),
                    },
                }),
            );
        }
        Ok(deleted)
    }

    /// Delete a transient archive without announcing it.
    pub async fn discard(&self, jvm_id: &str, filename: &str) -> Result<bool> {
        Ok(self.store().delete(&storage_key(jvm_id, filename)).await?)
    }

    /// Store a recording pushed by an agent, then prune the JVM's archives to
    /// the configured maximum, oldest first.
    pub async fn ingest(
        &self,
        jvm_id: &str,
        filename: &str,
        stream: &mut dyn ByteStream,
        mut metadata: Metadata,
    ) -> Result<ArchivedRecording> {
        if filename.is_empty() || filename.contains('/') {
            return Err(ArchiveError::InvalidKey(filename.to_string()).into());
        }
        let key = storage_key(jvm_id, filename);
        metadata
            .labels
            .insert(LABEL_JVM_ID.to_string(), jvm_id.to_string());
        let tag_set = tags::encode(&metadata);

        let summary = self
            .uploader
            .upload_stream(&key, stream, &tag_set, None)
            .await?;

        let recording = ArchivedRecording {
            jvm_id: jvm_id.to_string(),
            filename: filename.to_string(),
            size: summary.size,
            archived_time: chrono::Utc::now(),
            metadata,
        };
        info!(jvm_id = %jvm_id, filename = %filename, size = summary.size, "Ingested pushed recording");
        self.notifier.emit(
            category::ARCHIVED_RECORDING_CREATED,
            json!({ "jvmId": jvm_id, "recording": recording }),
        );

        self.prune(jvm_id).await?;
        Ok(recording)
    }

    /// Delete the oldest archives of a JVM until at most the configured
    /// maximum remain. Transient archives neither count nor get deleted.
    /// Returns the filenames removed.
    pub async fn prune(&self, jvm_id: &str) -> Result<Vec<String>> {
        let mut retained = Vec::new();
        for summary in self.store().list(&jvm_prefix(jvm_id)).await? {
            match self.describe(&summary).await? {
                Some(recording) if recording.metadata.expiry.is_none() => retained.push(recording),
                Some(_) => {}
                None => warn!(key = %summary.key, "Skipping unreadable archive during prune"),
            }
        }
        if retained.len() <= self.push_max_files {
            return Ok(Vec::new());
        }
        retained.sort_by(|a, b| {
            a.archived_time
                .cmp(&b.archived_time)
                .then_with(|| a.filename.cmp(&b.filename))
        });

        let excess = retained.len() - self.push_max_files;
        let mut removed = Vec::with_capacity(excess);
        for recording in retained.into_iter().take(excess) {
            if self.delete(jvm_id, &recording.filename).await? {
                removed.push(recording.filename);
            }
        }
        info!(jvm_id = %jvm_id, removed = removed.len(), "Pruned archived recordings");
        Ok(removed)
    }

    async fn describe(&self, summary: &ObjectSummary) -> Result<Option<ArchivedRecording>> {
        let Ok((jvm_id, filename)) = split_key(&summary.key) else {
            return Ok(None);
        };
        let Some(tag_set) = self.store().get_tags(&summary.key).await? else {
            return Ok(None);
        };
        Ok(Some(ArchivedRecording {
            jvm_id,
            filename,
            size: summary.size,
            archived_time: summary.last_modified,
            metadata: tags::decode(&tag_set),
        }))
    }
}

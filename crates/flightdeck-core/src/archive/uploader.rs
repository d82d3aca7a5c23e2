// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Streaming multipart uploader.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::keys::{archive_filename, numbered_filename, storage_key};
use super::plan::ChunkPlan;
use super::tags::archive_tags;
use super::{ArchiveError, RECORDING_MIME_TYPE};
use crate::model::{ActiveRecording, Metadata, Target};
use crate::notify::{NotificationChannel, category};
use crate::object_store::{CompletedPart, ObjectStore, Tag};
use crate::source::RecordingSource;
use crate::stream::{ByteStream, ChunkRead};

/// Bytes per uploaded part.
pub const DEFAULT_CHUNK_SIZE: usize = 20 * 1024 * 1024;

/// Consecutive empty reads tolerated before the stream is considered stuck.
pub const MAX_EMPTY_READ_RETRIES: u32 = 30;

const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Numbered variants tried before giving up on a free archive filename.
const MAX_FILENAME_SEQ: u32 = 1000;

type Result<T> = std::result::Result<T, ArchiveError>;

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    /// Storage key of the new object.
    pub key: String,
    /// Bytes written.
    pub size: u64,
    /// Parts uploaded.
    pub parts: u32,
}

/// Streams recordings from their source into object storage.
pub struct ArchiveUploader {
    source: Arc<dyn RecordingSource>,
    store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn NotificationChannel>,
    chunk_size: usize,
    locks: std::sync::Mutex<HashMap<(i64, i64), Arc<Mutex<()>>>>,
    claimed_keys: std::sync::Mutex<HashSet<String>>,
}

/// A storage key reserved for an upload in progress; released on drop.
struct KeyClaim<'a> {
    claimed: &'a std::sync::Mutex<HashSet<String>>,
    key: String,
}

impl Drop for KeyClaim<'_> {
    fn drop(&mut self) {
        self.claimed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
    }
}

impl ArchiveUploader {
    pub fn new(
        source: Arc<dyn RecordingSource>,
        store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            chunk_size: DEFAULT_CHUNK_SIZE,
            locks: std::sync::Mutex::new(HashMap::new()),
            claimed_keys: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Override the part size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The object store archives are written to.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Archive an active recording and return the archive filename.
    ///
    /// Archives with an `expiry` are transient: they are hidden from listings
    /// and do not announce themselves with `ActiveRecordingSaved`.
    pub async fn archive(
        &self,
        target: &Target,
        recording: &ActiveRecording,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let lock = self.recording_lock(recording.target_id, recording.remote_id);
        let guard = lock.lock().await;

        let result = self.archive_locked(target, recording, expiry).await;

        drop(guard);
        self.release_lock(recording.target_id, recording.remote_id, lock);
        result
    }

    async fn archive_locked(
        &self,
        target: &Target,
        recording: &ActiveRecording,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let base = archive_filename(&target.alias, &recording.name, Utc::now());
        let (filename, claim) = self.claim_filename(&target.jvm_id, &base).await?;
        let key = claim.key.clone();
        let metadata = Metadata {
            labels: recording.metadata.labels.clone(),
            expiry,
        };
        let tags = archive_tags(target, &metadata);

        let mut stream = self
            .source
            .open_stream(target, recording.remote_id)
            .await?;

        let summary = self
            .upload_stream(&key, stream.as_mut(), &tags, Some(target))
            .await?;
        drop(stream);
        drop(claim);

        info!(
            target_id = target.id,
            recording = %recording.name,
            key = %key,
            size = summary.size,
            parts = summary.parts,
            "Archived recording"
        );

        if expiry.is_none() {
            self.notifier.emit(
                category::ACTIVE_RECORDING_SAVED,
                json!({ "jvmId": target.jvm_id, "recording": recording }),
            );
        }

        Ok(filename)
    }

    /// Upload a stream under `key` through the multipart protocol.
    ///
    /// When `lease_target` is given, its connection lease is refreshed before
    /// every chunk. On any failure the upload is aborted and the original
    /// error returned; nothing becomes visible under `key`.
    pub async fn upload_stream(
        &self,
        key: &str,
        stream: &mut dyn ByteStream,
        tags: &[Tag],
        lease_target: Option<&Target>,
    ) -> Result<UploadSummary> {
        let upload_id = self
            .store
            .create_multipart_upload(key, RECORDING_MIME_TYPE, tags)
            .await
            .map_err(ArchiveError::Upload)?;
        debug!(key = %key, upload_id = %upload_id, "Started multipart upload");

        let outcome = match self
            .upload_parts(key, &upload_id, stream, lease_target)
            .await
        {
            Ok((parts, size)) => self
                .store
                .complete_multipart_upload(key, &upload_id, &parts)
                .await
                .map(|_| UploadSummary {
                    key: key.to_string(),
                    size,
                    parts: parts.len() as u32,
                })
                .map_err(ArchiveError::Complete),
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            warn!(key = %key, upload_id = %upload_id, error = %e, "Upload failed, aborting");
            if let Err(abort_err) = self.store.abort_multipart_upload(key, &upload_id).await {
                warn!(
                    key = %key,
                    upload_id = %upload_id,
                    error = %abort_err,
                    "Failed to abort multipart upload"
                );
            }
        }
        outcome
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        stream: &mut dyn ByteStream,
        lease_target: Option<&Target>,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut plan = ChunkPlan::new(self.chunk_size);
        let mut buf = vec![0u8; plan.chunk_size()];
        let mut parts = Vec::new();
        let mut total: u64 = 0;

        loop {
            if let Some(target) = lease_target
                && !self.source.mark_in_use(target).await
            {
                warn!(target_id = target.id, key = %key, "Target connection no longer in use");
            }

            let (filled, eof) = fill_chunk(stream, &mut buf).await?;
            if filled == 0 && !parts.is_empty() {
                break;
            }

            let part_number = plan.next_part()?;
            let etag = self
                .store
                .upload_part(key, upload_id, part_number, buf[..filled].to_vec())
                .await
                .map_err(ArchiveError::Upload)?;
            debug!(key = %key, part_number, bytes = filled, "Uploaded part");

            parts.push(CompletedPart { part_number, etag });
            total += filled as u64;
            if eof {
                break;
            }
        }

        Ok((parts, total))
    }

    /// Reserve the first of `base`, `base-1`, `base-2`, ... that is neither
    /// stored nor being uploaded under `jvm_id`.
    ///
    /// The claim is taken before the store is checked, so a concurrent upload
    /// of the same key either still holds its claim or has already completed.
    async fn claim_filename(&self, jvm_id: &str, base: &str) -> Result<(String, KeyClaim<'_>)> {
        for seq in 0..MAX_FILENAME_SEQ {
            let filename = if seq == 0 {
                base.to_string()
            } else {
                numbered_filename(base, seq)
            };
            let Some(claim) = self.try_claim(storage_key(jvm_id, &filename)) else {
                continue;
            };
            let existing = self
                .store
                .get_tags(&claim.key)
                .await
                .map_err(ArchiveError::Upload)?;
            if existing.is_none() {
                return Ok((filename, claim));
            }
        }
        Err(ArchiveError::InvalidKey(format!(
            "no free archive filename for {}/{}",
            jvm_id, base
        )))
    }

    fn try_claim(&self, key: String) -> Option<KeyClaim<'_>> {
        let mut claimed = self.claimed_keys.lock().unwrap_or_else(|p| p.into_inner());
        if !claimed.insert(key.clone()) {
            return None;
        }
        Some(KeyClaim {
            claimed: &self.claimed_keys,
            key,
        })
    }

    fn recording_lock(&self, target_id: i64, remote_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry((target_id, remote_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, target_id: i64, remote_id: i64, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&(target_id, remote_id));
        }
    }
}

/// Fill `buf` from the stream. Returns the bytes read and whether the stream
/// ended.
async fn fill_chunk(stream: &mut dyn ByteStream, buf: &mut [u8]) -> Result<(usize, bool)> {
    let mut filled = 0;
    let mut empty_reads = 0u32;

    while filled < buf.len() {
        match stream.read_chunk(&mut buf[filled..]).await? {
            ChunkRead::Bytes(n) => {
                filled += n;
                empty_reads = 0;
            }
            ChunkRead::Empty => {
                empty_reads += 1;
                if empty_reads > MAX_EMPTY_READ_RETRIES {
                    return Err(ArchiveError::ZeroReads {
                        attempts: empty_reads,
                    });
                }
                tokio::time::sleep(EMPTY_READ_BACKOFF).await;
            }
            ChunkRead::Eof => return Ok((filled, true)),
        }
    }
    Ok((filled, false))
}

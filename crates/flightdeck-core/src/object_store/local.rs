// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filesystem-backed object store.
//!
//! Layout under the root directory:
//! - `objects/<key>`: completed objects
//! - `tags/<key>.json`: tag sidecars
//! - `multipart/<upload_id>/`: staged parts and the upload manifest
//!
//! Completion assembles the parts into a temporary file inside the upload
//! directory and renames it into place, so readers never see a partial object.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use super::*;
use crate::stream::{ByteStream, FileByteStream};

#[derive(Debug, Serialize, Deserialize)]
struct UploadManifest {
    key: String,
    content_type: String,
    tags: Vec<Tag>,
}

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open a store rooted at `root`, creating the directory layout.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects")).await?;
        fs::create_dir_all(root.join("tags")).await?;
        fs::create_dir_all(root.join("multipart")).await?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join("objects").join(checked_key(key)?))
    }

    fn tags_path(&self, key: &str) -> Result<PathBuf> {
        let rel = checked_key(key)?;
        let mut path = self.root.join("tags").join(rel);
        let name = format!(
            "{}.json",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        path.set_file_name(name);
        Ok(path)
    }

    fn upload_dir(&self, upload_id: &str) -> Result<PathBuf> {
        Uuid::parse_str(upload_id)
            .map_err(|_| ObjectStoreError::NoSuchUpload(upload_id.to_string()))?;
        Ok(self.root.join("multipart").join(upload_id))
    }

    async fn manifest(&self, key: &str, upload_id: &str) -> Result<(PathBuf, UploadManifest)> {
        let dir = self.upload_dir(upload_id)?;
        let raw = match fs::read(dir.join("manifest.json")).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObjectStoreError::NoSuchUpload(upload_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: UploadManifest = serde_json::from_slice(&raw)
            .map_err(|e| ObjectStoreError::Other(format!("corrupt upload manifest: {}", e)))?;
        if manifest.key != key {
            return Err(ObjectStoreError::NoSuchUpload(upload_id.to_string()));
        }
        Ok((dir, manifest))
    }

    async fn write_tags(&self, key: &str, tags: &[Tag]) -> Result<()> {
        let path = self.tags_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(tags)
            .map_err(|e| ObjectStoreError::Other(format!("failed to encode tags: {}", e)))?;
        fs::write(path, body).await?;
        Ok(())
    }
}

/// Reject keys that would escape the store root.
fn checked_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(ObjectStoreError::Other(format!("invalid object key: {}", key)))
    }
}

fn part_file(dir: &Path, part_number: u32) -> PathBuf {
    dir.join(format!("{:05}.part", part_number))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
        tags: &[Tag],
    ) -> Result<String> {
        checked_key(key)?;
        let upload_id = Uuid::new_v4().to_string();
        let dir = self.root.join("multipart").join(&upload_id);
        fs::create_dir_all(&dir).await?;

        let manifest = UploadManifest {
            key: key.to_string(),
            content_type: content_type.to_string(),
            tags: tags.to_vec(),
        };
        let body = serde_json::to_vec(&manifest)
            .map_err(|e| ObjectStoreError::Other(format!("failed to encode manifest: {}", e)))?;
        fs::write(dir.join("manifest.json"), body).await?;

        debug!(key = %key, upload_id = %upload_id, "Created multipart upload");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<String> {
        if part_number == 0 {
            return Err(ObjectStoreError::InvalidPart("part numbers start at 1".to_string()));
        }
        let (dir, _) = self.manifest(key, upload_id).await?;

        let etag = etag_for(&data);

        fs::write(part_file(&dir, part_number), &data).await?;
        fs::write(dir.join(format!("{:05}.etag", part_number)), &etag).await?;
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let (dir, manifest) = self.manifest(key, upload_id).await?;
        if parts.is_empty() {
            return Err(ObjectStoreError::InvalidPart("no parts given".to_string()));
        }

        let assembled = dir.join("assembled.tmp");
        let mut out = fs::File::create(&assembled).await?;
        let mut last = 0;
        let mut buf = vec![0u8; 1024 * 1024];
        for part in parts {
            if part.part_number <= last {
                return Err(ObjectStoreError::InvalidPart(format!(
                    "part {} out of order",
                    part.part_number
                )));
            }
            last = part.part_number;

            let etag_path = dir.join(format!("{:05}.etag", part.part_number));
            let stored_etag = fs::read_to_string(&etag_path).await.map_err(|_| {
                ObjectStoreError::InvalidPart(format!("part {} missing", part.part_number))
            })?;
            if stored_etag != part.etag {
                return Err(ObjectStoreError::InvalidPart(format!(
                    "part {} ETag mismatch",
                    part.part_number
                )));
            }

            let mut input = fs::File::open(part_file(&dir, part.part_number)).await?;
            loop {
                let n = input.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n]).await?;
            }
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.write_tags(key, &manifest.tags).await?;
        fs::rename(&assembled, &target).await?;
        fs::remove_dir_all(&dir).await?;

        debug!(key = %key, parts = parts.len(), "Completed multipart upload");
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let (dir, _) = self.manifest(key, upload_id).await?;
        fs::remove_dir_all(dir).await?;
        Ok(())
    }

    async fn get_tags(&self, key: &str) -> Result<Option<Vec<Tag>>> {
        if fs::metadata(self.object_path(key)?).await.is_err() {
            return Ok(None);
        }
        match fs::read(self.tags_path(key)?).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| ObjectStoreError::Other(format!("corrupt tags for {}: {}", key, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Some(Vec::new())),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_tags(&self, key: &str, tags: &[Tag]) -> Result<()> {
        if fs::metadata(self.object_path(key)?).await.is_err() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        self.write_tags(key, tags).await
    }

    async fn get(&self, key: &str) -> Result<Box<dyn ByteStream>> {
        match fs::File::open(self.object_path(key)?).await {
            Ok(file) => Ok(Box::new(FileByteStream::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.object_path(key)?).await {
            Ok(()) => {
                let _ = fs::remove_file(self.tags_path(key)?).await;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let base = self.root.join("objects");
        let mut out = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&base) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(prefix) {
                    continue;
                }
                let last_modified: DateTime<Utc> = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                out.push(ObjectSummary {
                    key,
                    size: meta.len(),
                    last_modified,
                });
            }
        }

        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

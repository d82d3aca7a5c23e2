// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory object store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::*;
use crate::stream::{ByteStream, MemoryByteStream};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    tags: Vec<Tag>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    tags: Vec<Tag>,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

/// In-memory object store with failure injection and call accounting.
#[derive(Default)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<Inner>>,
    fail_on_part: AtomicU32,
    fail_complete: AtomicBool,
    aborts: AtomicUsize,
    completes: AtomicUsize,
    parts_uploaded: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `upload_part` for the given part number. 0 disables.
    pub fn fail_on_part(&self, part_number: u32) {
        self.fail_on_part.store(part_number, Ordering::SeqCst);
    }

    /// Make `complete_multipart_upload` fail.
    pub fn fail_complete(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }

    /// Number of `abort_multipart_upload` calls.
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Number of successful completions.
    pub fn complete_count(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }

    /// Number of parts accepted across all uploads.
    pub fn parts_uploaded(&self) -> usize {
        self.parts_uploaded.load(Ordering::SeqCst)
    }

    /// Uploads created but neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.inner.lock().await.uploads.len()
    }

    /// Whether a completed object exists under `key`.
    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.objects.contains_key(key)
    }

    /// Full contents of a completed object.
    pub async fn object_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .await
            .objects
            .get(key)
            .map(|o| o.data.as_ref().clone())
    }

    /// Store an object directly, bypassing the multipart protocol.
    pub async fn insert(&self, key: &str, data: Vec<u8>, tags: Vec<Tag>, at: DateTime<Utc>) {
        self.inner.lock().await.objects.insert(
            key.to_string(),
            StoredObject {
                data: Arc::new(data),
                tags,
                last_modified: at,
            },
        );
    }

    /// Override the last-modified time of an object.
    pub async fn set_last_modified(&self, key: &str, at: DateTime<Utc>) {
        if let Some(obj) = self.inner.lock().await.objects.get_mut(key) {
            obj.last_modified = at;
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_multipart_upload(
        &self,
        key: &str,
        _content_type: &str,
        tags: &[Tag],
    ) -> Result<String> {
        let upload_id = Uuid::new_v4().to_string();
        self.inner.lock().await.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                tags: tags.to_vec(),
                parts: BTreeMap::new(),
            },
        );
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
        if self.fail_on_part.load(Ordering::SeqCst) == part_number {
            return Err(ObjectStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("injected failure on part {}", part_number),
            )));
        }

        let mut inner = self.inner.lock().await;
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| ObjectStoreError::NoSuchUpload(upload_id.to_string()))?;

        let etag = etag_for(&data);
        upload.parts.insert(part_number, (etag.clone(), data));
        self.parts_uploaded.fetch_add(1, Ordering::SeqCst);
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Other("injected completion failure".to_string()));
        }

        let mut inner = self.inner.lock().await;
        let upload = inner
            .uploads
            .remove(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| ObjectStoreError::NoSuchUpload(upload_id.to_string()))?;

        let data = assemble(&upload.parts, parts)?;
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                data: Arc::new(data),
                tags: upload.tags,
                last_modified: Utc::now(),
            },
        );
        self.completes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner
            .lock()
            .await
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| ObjectStoreError::NoSuchUpload(upload_id.to_string()))
    }

    async fn get_tags(&self, key: &str) -> Result<Option<Vec<Tag>>> {
        Ok(self
            .inner
            .lock()
            .await
            .objects
            .get(key)
            .map(|o| o.tags.clone()))
    }

    async fn put_tags(&self, key: &str, tags: &[Tag]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let obj = inner
            .objects
            .get_mut(key)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        obj.tags = tags.to_vec();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Box<dyn ByteStream>> {
        let inner = self.inner.lock().await;
        let obj = inner
            .objects
            .get(key)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        Ok(Box::new(MemoryByteStream::new(obj.data.as_ref().clone())))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.lock().await.objects.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<ObjectSummary> = inner
            .objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectSummary {
                key: k.clone(),
                size: o.data.len() as u64,
                last_modified: o.last_modified,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

/// Concatenate uploaded parts in the order given, checking ETags.
fn assemble(
    uploaded: &BTreeMap<u32, (String, Vec<u8>)>,
    parts: &[CompletedPart],
) -> Result<Vec<u8>> {
    if parts.is_empty() {
        return Err(ObjectStoreError::InvalidPart("no parts given".to_string()));
    }
    let mut last = 0;
    let mut data = Vec::new();
    for part in parts {
        if part.part_number <= last {
            return Err(ObjectStoreError::InvalidPart(format!(
                "part {} out of order",
                part.part_number
            )));
        }
        last = part.part_number;
        match uploaded.get(&part.part_number) {
            Some((etag, bytes)) if *etag == part.etag => data.extend_from_slice(bytes),
            _ => {
                return Err(ObjectStoreError::InvalidPart(format!(
                    "part {} missing or ETag mismatch",
                    part.part_number
                )));
            }
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;

    #[tokio::test]
    async fn test_parts_invisible_until_complete() {
        let store = MemoryObjectStore::new();
        let id = store
            .create_multipart_upload("jvm/a.jfr", "application/octet-stream", &[Tag::new("k", "v")])
            .await
            .unwrap();

        let e1 = store.upload_part("jvm/a.jfr", &id, 1, b"hello ".to_vec()).await.unwrap();
        let e2 = store.upload_part("jvm/a.jfr", &id, 2, b"world".to_vec()).await.unwrap();
        assert!(store.list("jvm/").await.unwrap().is_empty());
        assert!(store.get_tags("jvm/a.jfr").await.unwrap().is_none());

        store
            .complete_multipart_upload(
                "jvm/a.jfr",
                &id,
                &[
                    CompletedPart { part_number: 1, etag: e1 },
                    CompletedPart { part_number: 2, etag: e2 },
                ],
            )
            .await
            .unwrap();

        let mut stream = store.get("jvm/a.jfr").await.unwrap();
        assert_eq!(read_to_end(stream.as_mut()).await.unwrap(), b"hello world");
        assert_eq!(
            store.get_tags("jvm/a.jfr").await.unwrap(),
            Some(vec![Tag::new("k", "v")])
        );
        assert_eq!(store.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_abort_discards_upload() {
        let store = MemoryObjectStore::new();
        let id = store
            .create_multipart_upload("jvm/a.jfr", "application/octet-stream", &[])
            .await
            .unwrap();
        store.upload_part("jvm/a.jfr", &id, 1, vec![1, 2, 3]).await.unwrap();
        store.abort_multipart_upload("jvm/a.jfr", &id).await.unwrap();

        assert_eq!(store.abort_count(), 1);
        assert_eq!(store.pending_uploads().await, 0);
        assert!(!store.contains("jvm/a.jfr").await);
        assert!(matches!(
            store.upload_part("jvm/a.jfr", &id, 2, vec![4]).await,
            Err(ObjectStoreError::NoSuchUpload(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_rejects_bad_etag() {
        let store = MemoryObjectStore::new();
        let id = store
            .create_multipart_upload("k", "application/octet-stream", &[])
            .await
            .unwrap();
        store.upload_part("k", &id, 1, vec![1]).await.unwrap();
        let err = store
            .complete_multipart_upload(
                "k",
                &id,
                &[CompletedPart { part_number: 1, etag: "nope".to_string() }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidPart(_)));
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let store = MemoryObjectStore::new();
        let now = Utc::now();
        store.insert("a/1.jfr", vec![0; 3], vec![], now).await;
        store.insert("a/2.jfr", vec![0; 5], vec![], now).await;
        store.insert("b/1.jfr", vec![0; 7], vec![], now).await;

        let listed = store.list("a/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].size, 5);
        assert!(store.delete("a/1.jfr").await.unwrap());
        assert!(!store.delete("a/1.jfr").await.unwrap());
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock recording source for testing.
//!
//! Keeps recordings and their bytes in memory, keyed by target connect URL,
//! and can inject empty reads, short reads and stream failures.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::traits::*;
use crate::model::{EventTemplate, RecordingDescriptor, RecordingOptions, RemoteState, Target};
use crate::stream::{ByteStream, ChunkRead};

#[derive(Debug, Clone)]
struct MockRecording {
    descriptor: RecordingDescriptor,
    data: Arc<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockTarget {
    recordings: Vec<MockRecording>,
    next_id: i64,
    leases: Arc<AtomicUsize>,
}

/// Mock recording source for testing.
pub struct MockRecordingSource {
    targets: Arc<Mutex<HashMap<String, MockTarget>>>,
    /// Bytes given to recordings created through `start`.
    payload: Vec<u8>,
    /// Empty reads returned before every non-empty read.
    empty_reads_per_chunk: usize,
    /// Upper bound on bytes returned by one read, 0 for unlimited.
    max_read: usize,
    /// Fail the stream with an I/O error after this many bytes.
    fail_after_bytes: Option<usize>,
    fail_close: AtomicBool,
    connected: AtomicBool,
    mark_in_use_calls: AtomicUsize,
}

impl Default for MockRecordingSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRecordingSource {
    /// Create a new mock source.
    pub fn new() -> Self {
        Self {
            targets: Arc::new(Mutex::new(HashMap::new())),
            payload: b"FLR\0mock recording".to_vec(),
            empty_reads_per_chunk: 0,
            max_read: 0,
            fail_after_bytes: None,
            fail_close: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            mark_in_use_calls: AtomicUsize::new(0),
        }
    }

    /// Use `payload` as the bytes of recordings started through this source.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Return `n` empty reads before each non-empty read.
    pub fn with_empty_reads(mut self, n: usize) -> Self {
        self.empty_reads_per_chunk = n;
        self
    }

    /// Cap the bytes returned by a single read.
    pub fn with_max_read(mut self, n: usize) -> Self {
        self.max_read = n;
        self
    }

    /// Fail streams with an I/O error once `n` bytes have been read.
    pub fn with_stream_failure_after(mut self, n: usize) -> Self {
        self.fail_after_bytes = Some(n);
        self
    }

    /// Make `close` fail with a connection error.
    pub fn set_failing_close(&self, failing: bool) {
        self.fail_close.store(failing, Ordering::SeqCst);
    }

    /// Simulate the target connection dropping or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Add a recording directly on the target, as if started elsewhere.
    pub async fn insert_recording(
        &self,
        target: &Target,
        name: &str,
        state: RemoteState,
        data: Vec<u8>,
    ) -> RecordingDescriptor {
        let mut targets = self.targets.lock().await;
        let entry = targets.entry(target.connect_url.clone()).or_default();
        entry.next_id += 1;
        let descriptor = RecordingDescriptor {
            remote_id: entry.next_id,
            name: name.to_string(),
            state,
            duration_ms: 0,
            start_time_ms: Utc::now().timestamp_millis(),
            continuous: true,
            to_disk: true,
            max_size: 0,
            max_age: 0,
        };
        entry.recordings.push(MockRecording {
            descriptor: descriptor.clone(),
            data: Arc::new(data),
        });
        descriptor
    }

    /// Change the remote state of a recording.
    pub async fn set_state(&self, target: &Target, remote_id: i64, state: RemoteState) {
        let mut targets = self.targets.lock().await;
        if let Some(rec) = targets
            .get_mut(&target.connect_url)
            .and_then(|t| t.recordings.iter_mut().find(|r| r.descriptor.remote_id == remote_id))
        {
            rec.descriptor.state = state;
        }
    }

    /// Replace the bytes of a recording.
    pub async fn set_data(&self, target: &Target, remote_id: i64, data: Vec<u8>) {
        let mut targets = self.targets.lock().await;
        if let Some(rec) = targets
            .get_mut(&target.connect_url)
            .and_then(|t| t.recordings.iter_mut().find(|r| r.descriptor.remote_id == remote_id))
        {
            rec.data = Arc::new(data);
        }
    }

    /// Drop a recording without going through `close`.
    pub async fn remove_recording(&self, target: &Target, remote_id: i64) {
        let mut targets = self.targets.lock().await;
        if let Some(t) = targets.get_mut(&target.connect_url) {
            t.recordings.retain(|r| r.descriptor.remote_id != remote_id);
        }
    }

    /// Streams currently open against the target.
    pub async fn open_streams(&self, target: &Target) -> usize {
        let targets = self.targets.lock().await;
        targets
            .get(&target.connect_url)
            .map(|t| t.leases.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of `mark_in_use` calls so far.
    pub fn mark_in_use_calls(&self) -> usize {
        self.mark_in_use_calls.load(Ordering::SeqCst)
    }

    fn check_connected(&self, target: &Target) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SourceError::Connection(format!(
                "{} is unreachable",
                target.connect_url
            )))
        }
    }
}

#[async_trait]
impl RecordingSource for MockRecordingSource {
    async fn list_descriptors(&self, target: &Target) -> Result<Vec<RecordingDescriptor>> {
        self.check_connected(target)?;
        let targets = self.targets.lock().await;
        Ok(targets
            .get(&target.connect_url)
            .map(|t| t.recordings.iter().map(|r| r.descriptor.clone()).collect())
            .unwrap_or_default())
    }

    async fn open_stream(&self, target: &Target, remote_id: i64) -> Result<Box<dyn ByteStream>> {
        self.check_connected(target)?;
        let targets = self.targets.lock().await;
        let t = targets
            .get(&target.connect_url)
            .ok_or_else(|| SourceError::NotFound(format!("recording {}", remote_id)))?;
        let rec = t
            .recordings
            .iter()
            .find(|r| r.descriptor.remote_id == remote_id)
            .ok_or_else(|| SourceError::NotFound(format!("recording {}", remote_id)))?;

        t.leases.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            data: rec.data.clone(),
            pos: 0,
            pending_empty: self.empty_reads_per_chunk,
            empty_reads_per_chunk: self.empty_reads_per_chunk,
            max_read: self.max_read,
            fail_after_bytes: self.fail_after_bytes,
            leases: t.leases.clone(),
        }))
    }

    async fn start(
        &self,
        target: &Target,
        options: &RecordingOptions,
        _template: &EventTemplate,
    ) -> Result<RecordingDescriptor> {
        self.check_connected(target)?;
        let mut targets = self.targets.lock().await;
        let entry = targets.entry(target.connect_url.clone()).or_default();
        entry.next_id += 1;
        let descriptor = RecordingDescriptor {
            remote_id: entry.next_id,
            name: options.name.clone(),
            state: RemoteState::Running,
            duration_ms: options.duration_ms,
            start_time_ms: Utc::now().timestamp_millis(),
            continuous: options.duration_ms == 0,
            to_disk: options.to_disk,
            max_size: options.max_size,
            max_age: options.max_age,
        };
        entry.recordings.push(MockRecording {
            descriptor: descriptor.clone(),
            data: Arc::new(self.payload.clone()),
        });
        Ok(descriptor)
    }

    async fn stop(&self, target: &Target, remote_id: i64) -> Result<RecordingDescriptor> {
        self.check_connected(target)?;
        let mut targets = self.targets.lock().await;
        let rec = targets
            .get_mut(&target.connect_url)
            .and_then(|t| t.recordings.iter_mut().find(|r| r.descriptor.remote_id == remote_id))
            .ok_or_else(|| SourceError::NotFound(format!("recording {}", remote_id)))?;
        rec.descriptor.state = RemoteState::Stopped;
        Ok(rec.descriptor.clone())
    }

    async fn close(&self, target: &Target, remote_id: i64) -> Result<()> {
        self.check_connected(target)?;
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(SourceError::Connection("close refused".to_string()));
        }
        let mut targets = self.targets.lock().await;
        let t = targets
            .get_mut(&target.connect_url)
            .ok_or_else(|| SourceError::NotFound(format!("recording {}", remote_id)))?;
        let before = t.recordings.len();
        t.recordings.retain(|r| r.descriptor.remote_id != remote_id);
        if t.recordings.len() == before {
            return Err(SourceError::NotFound(format!("recording {}", remote_id)));
        }
        Ok(())
    }

    async fn mark_in_use(&self, _target: &Target) -> bool {
        self.mark_in_use_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.load(Ordering::SeqCst)
    }
}

struct MockStream {
    data: Arc<Vec<u8>>,
    pos: usize,
    pending_empty: usize,
    empty_reads_per_chunk: usize,
    max_read: usize,
    fail_after_bytes: Option<usize>,
    leases: Arc<AtomicUsize>,
}

#[async_trait]
impl ByteStream for MockStream {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<ChunkRead> {
        if self.pos >= self.data.len() {
            return Ok(ChunkRead::Eof);
        }
        if let Some(limit) = self.fail_after_bytes
            && self.pos >= limit
        {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "mock stream failure",
            ));
        }
        if self.pending_empty > 0 {
            self.pending_empty -= 1;
            return Ok(ChunkRead::Empty);
        }

        let mut n = buf.len().min(self.data.len() - self.pos);
        if self.max_read > 0 {
            n = n.min(self.max_read);
        }
        if let Some(limit) = self.fail_after_bytes {
            n = n.min(limit - self.pos);
        }
        if n == 0 {
            return Ok(ChunkRead::Empty);
        }
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        self.pending_empty = self.empty_reads_per_chunk;
        Ok(ChunkRead::Bytes(n))
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;

    fn target() -> Target {
        Target {
            id: 1,
            connect_url: "service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi".to_string(),
            alias: "app".to_string(),
            jvm_id: "jvm-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_and_list() {
        let source = MockRecordingSource::new();
        let target = target();
        let options = RecordingOptions {
            name: "profile".to_string(),
            ..Default::default()
        };

        let started = source
            .start(&target, &options, &EventTemplate::default())
            .await
            .unwrap();
        assert_eq!(started.state, RemoteState::Running);
        assert!(started.continuous);

        let listed = source.list_descriptors(&target).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].remote_id, started.remote_id);

        let found = source.find_by_name(&target, "profile").await.unwrap();
        assert!(found.is_some());
        assert!(source.find_by_name(&target, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_lease_released_on_drop() {
        let source = MockRecordingSource::new();
        let target = target();
        let rec = source
            .insert_recording(&target, "r", RemoteState::Stopped, b"bytes".to_vec())
            .await;

        let mut stream = source.open_stream(&target, rec.remote_id).await.unwrap();
        assert_eq!(source.open_streams(&target).await, 1);
        assert_eq!(read_to_end(stream.as_mut()).await.unwrap(), b"bytes");
        drop(stream);
        assert_eq!(source.open_streams(&target).await, 0);
    }

    #[tokio::test]
    async fn test_empty_reads_and_failure_injection() {
        let source = MockRecordingSource::new()
            .with_empty_reads(2)
            .with_stream_failure_after(4);
        let target = target();
        let rec = source
            .insert_recording(&target, "r", RemoteState::Stopped, b"abcdefgh".to_vec())
            .await;

        let mut stream = source.open_stream(&target, rec.remote_id).await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), ChunkRead::Empty);
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), ChunkRead::Empty);
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), ChunkRead::Bytes(4));
        assert!(stream.read_chunk(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_close_missing_is_not_found() {
        let source = MockRecordingSource::new();
        let err = source.close(&target(), 42).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }
}

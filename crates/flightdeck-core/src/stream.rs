// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pull-based byte streams used to move recording bytes.
//!
//! Unlike `AsyncRead`, a read may return zero bytes without the stream being
//! finished; end of stream is reported explicitly. Remote recording streams do
//! this while the JVM is still flushing a chunk.

use std::io;

use async_trait::async_trait;

/// Outcome of a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRead {
    /// `n > 0` bytes were written to the front of the buffer.
    Bytes(usize),
    /// Nothing available right now; the stream is not finished.
    Empty,
    /// The stream is finished.
    Eof,
}

/// Source of bytes read in caller-sized chunks.
///
/// Any resource held for the stream (a connection lease, an open file) is
/// released when the stream is dropped.
#[async_trait]
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes into `buf`.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<ChunkRead>;
}

/// Drain a stream into memory.
///
/// Empty reads are treated as "try again"; use only for small payloads and
/// tests.
pub async fn read_to_end(stream: &mut dyn ByteStream) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match stream.read_chunk(&mut buf).await? {
            ChunkRead::Bytes(n) => out.extend_from_slice(&buf[..n]),
            ChunkRead::Empty => tokio::task::yield_now().await,
            ChunkRead::Eof => return Ok(out),
        }
    }
}

/// A stream over an owned buffer.
#[derive(Debug, Clone)]
pub struct MemoryByteStream {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryByteStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

#[async_trait]
impl ByteStream for MemoryByteStream {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<ChunkRead> {
        if self.pos >= self.data.len() {
            return Ok(ChunkRead::Eof);
        }
        if buf.is_empty() {
            return Ok(ChunkRead::Empty);
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(ChunkRead::Bytes(n))
    }
}

/// A stream over a file on disk.
pub struct FileByteStream {
    file: tokio::fs::File,
}

impl FileByteStream {
    pub fn new(file: tokio::fs::File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl ByteStream for FileByteStream {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<ChunkRead> {
        use tokio::io::AsyncReadExt;

        if buf.is_empty() {
            return Ok(ChunkRead::Empty);
        }
        match self.file.read(buf).await? {
            0 => Ok(ChunkRead::Eof),
            n => Ok(ChunkRead::Bytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_stream_reads_in_chunks() {
        let mut stream = MemoryByteStream::new(b"abcdefg".to_vec());
        let mut buf = [0u8; 3];

        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), ChunkRead::Bytes(3));
        assert_eq!(&buf, b"abc");
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), ChunkRead::Bytes(3));
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), ChunkRead::Bytes(1));
        assert_eq!(buf[0], b'g');
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), ChunkRead::Eof);
    }

    #[tokio::test]
    async fn test_read_to_end() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut stream = MemoryByteStream::new(payload.clone());
        let read = read_to_end(&mut stream).await.unwrap();
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn test_file_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"recording bytes").await.unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let mut stream = FileByteStream::new(file);
        assert_eq!(read_to_end(&mut stream).await.unwrap(), b"recording bytes");
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Part numbering for chunked uploads.

use super::ArchiveError;

/// Most parts a multipart upload may have.
pub const MAX_PARTS: u32 = 10_000;

/// Hands out sequential part numbers, starting at 1, and enforces the part
/// limit. Holds no I/O; the uploader claims a number for every chunk it has
/// read before uploading it.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    chunk_size: usize,
    max_parts: u32,
    claimed: u32,
}

impl ChunkPlan {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_parts: MAX_PARTS,
            claimed: 0,
        }
    }

    /// Bytes per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Part numbers handed out so far.
    pub fn parts_claimed(&self) -> u32 {
        self.claimed
    }

    /// Claim the part number for the next non-empty chunk.
    pub fn next_part(&mut self) -> Result<u32, ArchiveError> {
        if self.claimed >= self.max_parts {
            return Err(ArchiveError::PartLimitExceeded {
                max_parts: self.max_parts,
            });
        }
        self.claimed += 1;
        Ok(self.claimed)
    }
}

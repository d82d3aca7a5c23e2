// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage of active recording rows.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ActiveRecording, NewActiveRecording};

mod sqlite;

pub use sqlite::SqliteRecordingStore;

/// CRUD over active recording rows.
#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Insert a new row and return it with its local id.
    async fn create(&self, recording: &NewActiveRecording) -> Result<ActiveRecording>;

    /// Fetch a row by local id.
    async fn get(&self, id: i64) -> Result<Option<ActiveRecording>>;

    /// Fetch the row for a recording name on a target.
    async fn find_by_name(&self, target_id: i64, name: &str) -> Result<Option<ActiveRecording>>;

    /// Fetch the row for a remote id on a target.
    async fn find_by_remote_id(
        &self,
        target_id: i64,
        remote_id: i64,
    ) -> Result<Option<ActiveRecording>>;

    /// Persist every mutable attribute of an existing row.
    async fn update(&self, recording: &ActiveRecording) -> Result<()>;

    /// Delete a row. Returns whether it existed.
    async fn delete(&self, id: i64) -> Result<bool>;

    /// All rows of a target, oldest first.
    async fn list_by_target(&self, target_id: i64) -> Result<Vec<ActiveRecording>>;

    /// Delete all rows of a target. Returns the number removed.
    async fn delete_by_target(&self, target_id: i64) -> Result<u64>;
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed recording store.

use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::RecordingStore;
use crate::error::{Error, Result};
use crate::migrations;
use crate::model::{ActiveRecording, Metadata, NewActiveRecording, RecordingState};

const COLUMNS: &str = "id, target_id, remote_id, name, state, duration_ms, start_time_ms, \
                       continuous, to_disk, max_size, max_age, archive_on_stop, external, metadata";

#[derive(Debug, sqlx::FromRow)]
struct ActiveRecordingRow {
    id: i64,
    target_id: i64,
    remote_id: i64,
    name: String,
    state: String,
    duration_ms: i64,
    start_time_ms: i64,
    continuous: bool,
    to_disk: bool,
    max_size: i64,
    max_age: i64,
    archive_on_stop: bool,
    external: bool,
    metadata: String,
}

impl TryFrom<ActiveRecordingRow> for ActiveRecording {
    type Error = Error;

    fn try_from(row: ActiveRecordingRow) -> Result<Self> {
        let state: RecordingState = row.state.parse().map_err(Error::Other)?;
        let metadata: Metadata = serde_json::from_str(&row.metadata)?;
        Ok(ActiveRecording {
            id: row.id,
            target_id: row.target_id,
            remote_id: row.remote_id,
            name: row.name,
            state,
            duration_ms: row.duration_ms,
            start_time_ms: row.start_time_ms,
            continuous: row.continuous,
            to_disk: row.to_disk,
            max_size: row.max_size,
            max_age: row.max_age,
            archive_on_stop: row.archive_on_stop,
            external: row.external,
            metadata,
        })
    }
}

/// SQLite-backed store of active recording rows.
#[derive(Clone)]
pub struct SqliteRecordingStore {
    pool: SqlitePool,
}

impl SqliteRecordingStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    ///
    /// ```ignore
    /// let store = SqliteRecordingStore::from_path(".data/flightdeck.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Connect to a SQLite URL and run migrations.
    ///
    /// In-memory databases get a single connection, since each connection
    /// would otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect(url)
            .await?;

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| Error::Other(format!("Failed to run migrations: {}", e)))?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl RecordingStore for SqliteRecordingStore {
    async fn create(&self, recording: &NewActiveRecording) -> Result<ActiveRecording> {
        if recording.name.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "recording name must not be blank".to_string(),
            ));
        }
        let metadata = serde_json::to_string(&recording.metadata)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO active_recordings
                (target_id, remote_id, name, state, duration_ms, start_time_ms, continuous,
                 to_disk, max_size, max_age, archive_on_stop, external, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(recording.target_id)
        .bind(recording.remote_id)
        .bind(&recording.name)
        .bind(recording.state.as_str())
        .bind(recording.duration_ms)
        .bind(recording.start_time_ms)
        .bind(recording.continuous)
        .bind(recording.to_disk)
        .bind(recording.max_size)
        .bind(recording.max_age)
        .bind(recording.archive_on_stop)
        .bind(recording.external)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(ActiveRecording {
            id,
            target_id: recording.target_id,
            remote_id: recording.remote_id,
            name: recording.name.clone(),
            state: recording.state,
            duration_ms: recording.duration_ms,
            start_time_ms: recording.start_time_ms,
            continuous: recording.continuous,
            to_disk: recording.to_disk,
            max_size: recording.max_size,
            max_age: recording.max_age,
            archive_on_stop: recording.archive_on_stop,
            external: recording.external,
            metadata: recording.metadata.clone(),
        })
    }

    async fn get(&self, id: i64) -> Result<Option<ActiveRecording>> {
        let sql = format!("SELECT {} FROM active_recordings WHERE id = ?", COLUMNS);
        sqlx::query_as::<_, ActiveRecordingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ActiveRecording::try_from)
            .transpose()
    }

    async fn find_by_name(&self, target_id: i64, name: &str) -> Result<Option<ActiveRecording>> {
        let sql = format!(
            "SELECT {} FROM active_recordings WHERE target_id = ? AND name = ? \
             ORDER BY id DESC LIMIT 1",
            COLUMNS
        );
        sqlx::query_as::<_, ActiveRecordingRow>(&sql)
            .bind(target_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(ActiveRecording::try_from)
            .transpose()
    }

    async fn find_by_remote_id(
        &self,
        target_id: i64,
        remote_id: i64,
    ) -> Result<Option<ActiveRecording>> {
        let sql = format!(
            "SELECT {} FROM active_recordings WHERE target_id = ? AND remote_id = ?",
            COLUMNS
        );
        sqlx::query_as::<_, ActiveRecordingRow>(&sql)
            .bind(target_id)
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?
            .map(ActiveRecording::try_from)
            .transpose()
    }

    async fn update(&self, recording: &ActiveRecording) -> Result<()> {
        let metadata = serde_json::to_string(&recording.metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE active_recordings
            SET name = ?, state = ?, duration_ms = ?, start_time_ms = ?, continuous = ?,
                to_disk = ?, max_size = ?, max_age = ?, archive_on_stop = ?, external = ?,
                metadata = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&recording.name)
        .bind(recording.state.as_str())
        .bind(recording.duration_ms)
        .bind(recording.start_time_ms)
        .bind(recording.continuous)
        .bind(recording.to_disk)
        .bind(recording.max_size)
        .bind(recording.max_age)
        .bind(recording.archive_on_stop)
        .bind(recording.external)
        .bind(metadata)
        .bind(recording.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("active recording {}", recording.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM active_recordings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_target(&self, target_id: i64) -> Result<Vec<ActiveRecording>> {
        let sql = format!(
            "SELECT {} FROM active_recordings WHERE target_id = ? ORDER BY id ASC",
            COLUMNS
        );
        sqlx::query_as::<_, ActiveRecordingRow>(&sql)
            .bind(target_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ActiveRecording::try_from)
            .collect()
    }

    async fn delete_by_target(&self, target_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM active_recordings WHERE target_id = ?")
            .bind(target_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Report generation hook.

use async_trait::async_trait;
use serde_json::Value;

use super::job::RecordingRef;
use crate::error::Result;
use crate::stream::ByteStream;

/// Produces an analysis report for a recording.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, recording: &RecordingRef, stream: Box<dyn ByteStream>) -> Result<Value>;
}

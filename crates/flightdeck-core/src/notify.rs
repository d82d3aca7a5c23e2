// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound notification channel.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Notification categories.
pub mod category {
    pub const ACTIVE_RECORDING_CREATED: &str = "ActiveRecordingCreated";
    pub const ACTIVE_RECORDING_STOPPED: &str = "ActiveRecordingStopped";
    pub const ACTIVE_RECORDING_DELETED: &str = "ActiveRecordingDeleted";
    pub const ACTIVE_RECORDING_SAVED: &str = "ActiveRecordingSaved";
    pub const ARCHIVED_RECORDING_CREATED: &str = "ArchivedRecordingCreated";
    pub const ARCHIVED_RECORDING_DELETED: &str = "ArchivedRecordingDeleted";
    pub const ARCHIVE_RECORDING_SUCCESS: &str = "ArchiveRecordingSuccess";
    pub const ARCHIVE_RECORDING_FAILURE: &str = "ArchiveRecordingFailure";
    pub const GRAFANA_UPLOAD_SUCCESS: &str = "GrafanaUploadSuccess";
    pub const GRAFANA_UPLOAD_FAILURE: &str = "GrafanaUploadFailure";
    pub const REPORT_SUCCESS: &str = "ReportSuccess";
    pub const REPORT_FAILURE: &str = "ReportFailure";
    /// Target discovery events; consumed, not produced, by this crate.
    pub const TARGET_JVM_DISCOVERY: &str = "TargetJvmDiscovery";
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Event category, see [`category`].
    pub category: String,
    /// Category-specific JSON payload.
    pub message: Value,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(category: impl Into<String>, message: Value) -> Self {
        Self {
            category: category.into(),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Sink for notifications. Publishing never fails the caller.
pub trait NotificationChannel: Send + Sync {
    fn publish(&self, notification: Notification);

    /// Convenience wrapper around [`NotificationChannel::publish`].
    fn emit(&self, category: &str, message: Value) {
        self.publish(Notification::new(category, message));
    }
}

type Route = (String, mpsc::UnboundedSender<Notification>);

/// In-process fan-out over a tokio broadcast channel.
///
/// Broadcast subscribers that fall behind by more than the capacity lose
/// the oldest notifications. Consumers that must see every notification of
/// one category use [`BroadcastNotifier::subscribe_category`] instead.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
    routes: Arc<Mutex<Vec<Route>>>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            routes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Receive every notification published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Receive every notification of `category` published after this call,
    /// over an unbounded queue that never drops.
    pub fn subscribe_category(&self, category: &str) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((category.to_string(), tx));
        rx
    }

    fn route(&self, notification: &Notification) {
        let mut routes = self
            .routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        routes.retain(|(category, tx)| {
            category != &notification.category || tx.send(notification.clone()).is_ok()
        });
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl NotificationChannel for BroadcastNotifier {
    fn publish(&self, notification: Notification) {
        self.route(&notification);
        let category = notification.category.clone();
        if self.tx.send(notification).is_err() {
            debug!(category = %category, "No notification subscribers");
        }
    }
}

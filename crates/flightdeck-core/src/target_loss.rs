// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Forgets targets when discovery reports them lost.
//!
//! Listens for `TargetJvmDiscovery` notifications shaped like
//! `{"event": {"kind": "LOST", "serviceRef": {"connectUrl": "..."}}}`,
//! delivered over [`BroadcastNotifier::subscribe_category`] so none are
//! dropped when the broadcast channel overflows.
//!
//! [`BroadcastNotifier::subscribe_category`]: crate::notify::BroadcastNotifier::subscribe_category

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

use crate::notify::{Notification, category};
use crate::registry::RecordingRegistry;

const LOST: &str = "LOST";

#[derive(Debug, Deserialize)]
struct DiscoveryMessage {
    event: DiscoveryEvent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryEvent {
    kind: String,
    service_ref: ServiceRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceRef {
    connect_url: String,
}

/// Connect URL of the lost target, if `notification` reports one.
pub fn lost_target_url(notification: &Notification) -> Option<String> {
    if notification.category != category::TARGET_JVM_DISCOVERY {
        return None;
    }
    match serde_json::from_value::<DiscoveryMessage>(notification.message.clone()) {
        Ok(msg) if msg.event.kind.eq_ignore_ascii_case(LOST) => Some(msg.event.service_ref.connect_url),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Malformed target discovery notification");
            None
        }
    }
}

/// Background worker that evicts lost targets from the registry.
pub struct TargetLossListener {
    registry: Arc<RecordingRegistry>,
    events: mpsc::UnboundedReceiver<Notification>,
    shutdown: Arc<Notify>,
}

impl TargetLossListener {
    pub fn new(
        registry: Arc<RecordingRegistry>,
        events: mpsc::UnboundedReceiver<Notification>,
    ) -> Self {
        Self {
            registry,
            events,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn run(mut self) {
        info!("Target loss listener started");

        loop {
            let notification = tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Target loss listener received shutdown signal");
                    break;
                }

                received = self.events.recv() => match received {
                    Some(notification) => notification,
                    None => break,
                },
            };

            let Some(connect_url) = lost_target_url(&notification) else {
                continue;
            };
            match self.registry.forget_target_by_url(&connect_url).await {
                Ok(Some(removed)) => {
                    info!(connect_url = %connect_url, removed, "Evicted lost target");
                }
                Ok(None) => debug!(connect_url = %connect_url, "Lost target was not registered"),
                Err(e) => error!(connect_url = %connect_url, error = %e, "Failed to evict lost target"),
            }
        }

        info!("Target loss listener stopped");
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that reconciles recording state with every target.
//!
//! Stops observed here (including fixed-duration recordings running out) go
//! through the same transition path as explicit stops, so archive-on-stop
//! fires for them too.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::registry::{RecordingRegistry, SyncReport};

/// Configuration for the state poller.
#[derive(Debug, Clone)]
pub struct StatePollerConfig {
    /// How often every target is polled.
    pub poll_interval: Duration,
}

impl Default for StatePollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Background worker that polls targets for recording state.
pub struct StatePoller {
    registry: Arc<RecordingRegistry>,
    config: StatePollerConfig,
    shutdown: Arc<Notify>,
}

impl StatePoller {
    pub fn new(registry: Arc<RecordingRegistry>, config: StatePollerConfig) -> Self {
        Self {
            registry,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the poll loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "State poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("State poller received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.poll_once().await;
                }
            }
        }

        info!("State poller stopped");
    }

    /// Reconcile every registered target once. Failures on one target do not
    /// stop the others.
    pub async fn poll_once(&self) -> SyncReport {
        let mut total = SyncReport::default();
        for target in self.registry.targets().await {
            match self.registry.sync_target(&target).await {
                Ok(report) => {
                    total.transitioned += report.transitioned;
                    total.adopted += report.adopted;
                    total.removed += report.removed;
                }
                Err(e) => warn!(
                    target_id = target.id,
                    connect_url = %target.connect_url,
                    error = %e,
                    "Failed to poll target"
                ),
            }
        }
        debug!(
            transitioned = total.transitioned,
            adopted = total.adopted,
            removed = total.removed,
            "Poll cycle completed"
        );
        total
    }
}

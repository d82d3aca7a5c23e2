// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording registry.
//!
//! Tracks the recordings believed to exist on each target, applies the
//! replace policy on start, walks recordings through their state machine and
//! hands archive-on-stop work to the job dispatcher. All mutations run on the
//! caller's task and return the stored row.

mod customizer;
mod replace;

pub use customizer::OptionsCustomizer;
pub use replace::{RecordingReplace, ReplaceDecision};

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::jobs::{JobDispatcher, JobId, JobKind, RecordingRef};
use crate::model::{
    ActiveRecording, EventTemplate, LABEL_TEMPLATE_NAME, LABEL_TEMPLATE_TYPE, Metadata,
    NewActiveRecording, RecordingDescriptor, RecordingOptions, RecordingOptionsOverrides,
    RecordingState, Target, map_remote_state,
};
use crate::notify::{NotificationChannel, category};
use crate::source::{self, RecordingSource};
use crate::store::RecordingStore;

/// Registry behaviour switches.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Upper bound on every synchronous call into the recording source.
    pub request_timeout: Duration,
    /// Whether externally discovered recordings are archived on stop.
    pub external_archival: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            external_archival: false,
        }
    }
}

/// A request to start a recording.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Options sent to the target. `name` must not be blank.
    pub options: RecordingOptions,
    /// What to do about an existing same-named recording.
    pub replace: RecordingReplace,
    /// Event template.
    pub template: EventTemplate,
    /// User labels stored with the recording and its archives.
    pub labels: BTreeMap<String, String>,
    /// Archive automatically when the recording stops.
    pub archive_on_stop: bool,
}

/// Counts from one reconciliation pass over a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Rows whose state changed.
    pub transitioned: usize,
    /// Recordings found on the target with no local row.
    pub adopted: usize,
    /// Rows whose recording disappeared from the target.
    pub removed: usize,
}

/// Owns active recording state for all known targets.
pub struct RecordingRegistry {
    store: Arc<dyn RecordingStore>,
    source: Arc<dyn RecordingSource>,
    notifier: Arc<dyn NotificationChannel>,
    dispatcher: Option<JobDispatcher>,
    settings: RegistrySettings,
    targets: RwLock<HashMap<i64, Target>>,
    customizer: OptionsCustomizer,
}

impl RecordingRegistry {
    pub fn new(
        store: Arc<dyn RecordingStore>,
        source: Arc<dyn RecordingSource>,
        notifier: Arc<dyn NotificationChannel>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            dispatcher: None,
            settings,
            targets: RwLock::new(HashMap::new()),
            customizer: OptionsCustomizer::new(),
        }
    }

    /// Route archive-on-stop and export requests through `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: JobDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    /// Make a target known to the registry. Replaces any target with the
    /// same id.
    pub async fn register_target(&self, target: Target) {
        info!(target_id = target.id, connect_url = %target.connect_url, "Registered target");
        self.targets.write().await.insert(target.id, target);
    }

    pub async fn target(&self, target_id: i64) -> Option<Target> {
        self.targets.read().await.get(&target_id).cloned()
    }

    /// Known targets, ordered by id.
    pub async fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.targets.read().await.values().cloned().collect();
        targets.sort_by_key(|t| t.id);
        targets
    }

    /// Set the option overrides applied to every start on a target.
    pub fn set_options_override(&self, target_id: i64, overrides: RecordingOptionsOverrides) {
        self.customizer.set(target_id, overrides);
    }

    pub fn options_override(&self, target_id: i64) -> Option<RecordingOptionsOverrides> {
        self.customizer.get(target_id)
    }

    /// Drop a lost target: its overrides, its registration and all its rows.
    /// Returns the number of rows removed.
    pub async fn forget_target(&self, target_id: i64) -> Result<u64> {
        self.customizer.evict(target_id);
        self.targets.write().await.remove(&target_id);
        let removed = self.store.delete_by_target(target_id).await?;
        info!(target_id, removed, "Forgot target");
        Ok(removed)
    }

    /// [`forget_target`](Self::forget_target) by connect URL. Returns `None`
    /// when no registered target has that URL.
    pub async fn forget_target_by_url(&self, connect_url: &str) -> Result<Option<u64>> {
        let target_id = self
            .targets
            .read()
            .await
            .values()
            .find(|t| t.connect_url == connect_url)
            .map(|t| t.id);
        match target_id {
            Some(id) => self.forget_target(id).await.map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Recording lifecycle
    // ------------------------------------------------------------------

    /// Start a recording, applying the replace policy to any existing
    /// same-named recording on the target.
    pub async fn resolve_start(
        &self,
        target: &Target,
        request: StartRequest,
    ) -> Result<ActiveRecording> {
        let name = request.options.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidRequest(
                "recording name must not be blank".to_string(),
            ));
        }

        let existing = match self.bounded(self.source.find_by_name(target, &name)).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let decision = request
            .replace
            .decide(existing.as_ref().map(|d| map_remote_state(&d.state)));
        debug!(
            target_id = target.id,
            recording = %name,
            replace = %request.replace,
            decision = ?decision,
            "Resolved replace policy"
        );

        match (decision, existing) {
            (ReplaceDecision::Conflict, _) => {
                return Err(Error::Conflict {
                    target: target.connect_url.clone(),
                    name,
                });
            }
            (ReplaceDecision::RemoveThenCreate, Some(descriptor)) => {
                self.remove_existing(target, &descriptor).await?;
            }
            _ => {}
        }

        let options = self.customizer.apply(
            target.id,
            RecordingOptions {
                name: name.clone(),
                ..request.options
            },
        );
        let descriptor = self
            .bounded(self.source.start(target, &options, &request.template))
            .await?;

        let mut labels = request.labels;
        labels.insert(LABEL_TEMPLATE_NAME.to_string(), request.template.name.clone());
        labels.insert(
            LABEL_TEMPLATE_TYPE.to_string(),
            request.template.template_type.to_string(),
        );

        let row = self
            .store
            .create(&NewActiveRecording::from_descriptor(
                target,
                &descriptor,
                Metadata::with_labels(labels),
                request.archive_on_stop,
                false,
            ))
            .await?;

        info!(
            target_id = target.id,
            recording = %row.name,
            remote_id = row.remote_id,
            state = %row.state,
            "Started recording"
        );
        self.notify_recording(category::ACTIVE_RECORDING_CREATED, target, &row);
        Ok(row)
    }

    /// Stop a recording and apply the RUNNING → STOPPED transition.
    pub async fn stop(&self, target: &Target, name: &str) -> Result<ActiveRecording> {
        let row = self.require(target, name).await?;
        let descriptor = self
            .bounded(self.source.stop(target, row.remote_id))
            .await?;
        let next = match map_remote_state(&descriptor.state) {
            // The remote may still be flushing; the stop itself is done.
            RecordingState::Running => RecordingState::Stopped,
            other => other,
        };
        self.apply_observed(target, row, &descriptor, next).await
    }

    /// Close a recording on the target and delete its row.
    pub async fn delete(&self, target: &Target, name: &str) -> Result<ActiveRecording> {
        let mut row = self.require(target, name).await?;
        match self.bounded(self.source.close(target, row.remote_id)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(target_id = target.id, recording = %name, "Recording already gone from target");
            }
            Err(e) => return Err(e),
        }
        self.store.delete(row.id).await?;
        row.state = RecordingState::Closed;

        info!(target_id = target.id, recording = %name, "Deleted recording");
        self.notify_recording(category::ACTIVE_RECORDING_DELETED, target, &row);
        Ok(row)
    }

    /// Queue an archive of a recording and return the job id.
    ///
    /// With an `expiry`, the archive is transient and not listed.
    pub async fn archive(
        &self,
        target: &Target,
        name: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<JobId> {
        let recording = self.require(target, name).await?;
        self.dispatch(JobKind::Archive {
            target: target.clone(),
            recording,
            expiry,
        })
    }

    /// Queue an upload of a recording to the external datasource.
    pub async fn upload_external(&self, target: &Target, name: &str) -> Result<JobId> {
        let recording = self.require(target, name).await?;
        self.dispatch(JobKind::UploadExternal(RecordingRef::Active {
            target: target.clone(),
            recording,
        }))
    }

    /// Queue an analysis report of a recording.
    pub async fn report(&self, target: &Target, name: &str) -> Result<JobId> {
        let recording = self.require(target, name).await?;
        self.dispatch(JobKind::Report(RecordingRef::Active {
            target: target.clone(),
            recording,
        }))
    }

    /// Rows for a target, oldest first.
    pub async fn list(&self, target: &Target) -> Result<Vec<ActiveRecording>> {
        self.store.list_by_target(target.id).await
    }

    pub async fn get(&self, target: &Target, name: &str) -> Result<Option<ActiveRecording>> {
        self.store.find_by_name(target.id, name).await
    }

    /// Reconcile a target's rows with what the target reports.
    ///
    /// Valid transitions are applied (and may trigger archive-on-stop),
    /// unknown recordings are adopted as external rows and rows whose
    /// recording vanished are removed.
    pub async fn sync_target(&self, target: &Target) -> Result<SyncReport> {
        let descriptors = self
            .bounded(self.source.list_descriptors(target))
            .await?;
        let rows = self.store.list_by_target(target.id).await?;
        let mut report = SyncReport::default();

        let mut by_remote_id: HashMap<i64, ActiveRecording> =
            rows.into_iter().map(|r| (r.remote_id, r)).collect();

        for descriptor in &descriptors {
            let next = map_remote_state(&descriptor.state);
            match by_remote_id.remove(&descriptor.remote_id) {
                Some(row) => {
                    let before = row.state;
                    let row = self.apply_observed(target, row, descriptor, next).await?;
                    if row.state != before {
                        report.transitioned += 1;
                    }
                }
                None => {
                    let row = self
                        .store
                        .create(&NewActiveRecording::from_descriptor(
                            target,
                            descriptor,
                            Metadata::default(),
                            self.settings.external_archival,
                            true,
                        ))
                        .await?;
                    debug!(
                        target_id = target.id,
                        recording = %row.name,
                        remote_id = row.remote_id,
                        "Adopted external recording"
                    );
                    report.adopted += 1;
                }
            }
        }

        // Rows left over have no remote recording any more.
        for mut row in by_remote_id.into_values() {
            self.store.delete(row.id).await?;
            row.state = RecordingState::Closed;
            if !row.external {
                self.notify_recording(category::ACTIVE_RECORDING_DELETED, target, &row);
            }
            report.removed += 1;
        }

        if report != SyncReport::default() {
            info!(
                target_id = target.id,
                transitioned = report.transitioned,
                adopted = report.adopted,
                removed = report.removed,
                "Synchronized target recordings"
            );
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn require(&self, target: &Target, name: &str) -> Result<ActiveRecording> {
        self.store
            .find_by_name(target.id, name)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "recording \"{}\" on target {}",
                    name, target.connect_url
                ))
            })
    }

    fn dispatch(&self, kind: JobKind) -> Result<JobId> {
        let dispatcher = self
            .dispatcher
            .as_ref()
            .ok_or_else(|| Error::Other("job dispatcher is not configured".to_string()))?;
        Ok(dispatcher.dispatch(kind)?)
    }

    /// Run a source call under the request timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = source::Result<T>>,
    {
        match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout(self.settings.request_timeout)),
        }
    }

    /// Remove the existing recording ahead of a replacing start: close it
    /// remotely (best-effort) and delete its row.
    async fn remove_existing(&self, target: &Target, descriptor: &RecordingDescriptor) -> Result<()> {
        if let Err(e) = self
            .bounded(self.source.close(target, descriptor.remote_id))
            .await
        {
            if e.is_not_found() {
                debug!(target_id = target.id, recording = %descriptor.name, "Replaced recording already closed");
            } else {
                warn!(
                    target_id = target.id,
                    recording = %descriptor.name,
                    error = %e,
                    "Failed to close replaced recording"
                );
            }
        }

        if let Some(mut row) = self
            .store
            .find_by_remote_id(target.id, descriptor.remote_id)
            .await?
        {
            self.store.delete(row.id).await?;
            row.state = RecordingState::Closed;
            self.notify_recording(category::ACTIVE_RECORDING_DELETED, target, &row);
        }
        info!(target_id = target.id, recording = %descriptor.name, "Removed recording for replacement");
        Ok(())
    }

    /// Apply an observed remote state to a row.
    ///
    /// Transitions the state machine forbids are ignored, which keeps a
    /// stopped row from being resurrected in place.
    async fn apply_observed(
        &self,
        target: &Target,
        mut row: ActiveRecording,
        descriptor: &RecordingDescriptor,
        next: RecordingState,
    ) -> Result<ActiveRecording> {
        if !row.state.can_transition_to(next) {
            debug!(
                target_id = target.id,
                recording = %row.name,
                from = %row.state,
                to = %next,
                "Ignoring disallowed state transition"
            );
            return Ok(row);
        }

        let previous = row.state;
        row.refresh_from(descriptor);
        row.state = next;
        self.store.update(&row).await?;

        if previous != next {
            info!(
                target_id = target.id,
                recording = %row.name,
                from = %previous,
                to = %next,
                "Recording state changed"
            );
            if next == RecordingState::Stopped {
                self.notify_recording(category::ACTIVE_RECORDING_STOPPED, target, &row);
                self.on_stopped(target, &row);
            }
        }
        Ok(row)
    }

    /// Archive-on-stop hook.
    fn on_stopped(&self, target: &Target, row: &ActiveRecording) {
        if !row.archive_on_stop || (row.external && !self.settings.external_archival) {
            return;
        }
        match self.dispatch(JobKind::Archive {
            target: target.clone(),
            recording: row.clone(),
            expiry: None,
        }) {
            Ok(job_id) => info!(
                target_id = target.id,
                recording = %row.name,
                job_id = %job_id,
                "Queued archive on stop"
            ),
            Err(e) => warn!(
                target_id = target.id,
                recording = %row.name,
                error = %e,
                "Failed to queue archive on stop"
            ),
        }
    }

    fn notify_recording(&self, kind: &str, target: &Target, row: &ActiveRecording) {
        if kind == category::ACTIVE_RECORDING_CREATED && row.external {
            return;
        }
        self.notifier.emit(
            kind,
            json!({
                "jvmId": target.jvm_id,
                "recording": row,
                "target": target.connect_url,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RemoteState;
    use crate::notify::BroadcastNotifier;
    use crate::source::MockRecordingSource;
    use crate::store::SqliteRecordingStore;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn registry() -> (RecordingRegistry, Arc<MockRecordingSource>, BroadcastNotifier) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrations::run_sqlite(&pool).await.unwrap();
        let source = Arc::new(MockRecordingSource::new());
        let notifier = BroadcastNotifier::new(64);
        let registry = RecordingRegistry::new(
            Arc::new(SqliteRecordingStore::new(pool)),
            source.clone(),
            Arc::new(notifier.clone()),
            RegistrySettings::default(),
        );
        (registry, source, notifier)
    }

    fn target() -> Target {
        Target {
            id: 1,
            connect_url: "service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi".to_string(),
            alias: "app".to_string(),
            jvm_id: "jvm-app".to_string(),
        }
    }

    fn start(name: &str, replace: RecordingReplace) -> StartRequest {
        StartRequest {
            options: RecordingOptions {
                name: name.to_string(),
                ..Default::default()
            },
            replace,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_records_template_labels() {
        let (registry, _source, notifier) = registry().await;
        let mut rx = notifier.subscribe();
        let target = target();

        let row = registry
            .resolve_start(&target, start("profile", RecordingReplace::Never))
            .await
            .unwrap();
        assert_eq!(row.state, RecordingState::Running);
        assert!(!row.external);
        assert_eq!(row.metadata.labels[LABEL_TEMPLATE_NAME], "Continuous");
        assert_eq!(row.metadata.labels[LABEL_TEMPLATE_TYPE], "TARGET");

        let n = rx.recv().await.unwrap();
        assert_eq!(n.category, category::ACTIVE_RECORDING_CREATED);
        assert_eq!(n.message["jvmId"], "jvm-app");
        assert_eq!(n.message["recording"]["name"], "profile");
        assert_eq!(n.message["target"], target.connect_url);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let (registry, _source, _notifier) = registry().await;
        let err = registry
            .resolve_start(&target(), start("   ", RecordingReplace::Always))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_overrides_applied_on_start() {
        let (registry, _source, _notifier) = registry().await;
        let target = target();
        registry.set_options_override(
            target.id,
            RecordingOptionsOverrides {
                to_disk: Some(true),
                max_size: Some(4096),
                max_age: None,
            },
        );
        let row = registry
            .resolve_start(&target, start("profile", RecordingReplace::Never))
            .await
            .unwrap();
        assert!(row.to_disk);
        assert_eq!(row.max_size, 4096);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_for_state() {
        let (registry, _source, _notifier) = registry().await;
        let target = target();
        registry
            .resolve_start(&target, start("profile", RecordingReplace::Never))
            .await
            .unwrap();

        let stopped = registry.stop(&target, "profile").await.unwrap();
        assert_eq!(stopped.state, RecordingState::Stopped);
        let again = registry.stop(&target, "profile").await.unwrap();
        assert_eq!(again.state, RecordingState::Stopped);
    }

    #[tokio::test]
    async fn test_sync_ignores_resurrection() {
        let (registry, source, _notifier) = registry().await;
        let target = target();
        let row = registry
            .resolve_start(&target, start("profile", RecordingReplace::Never))
            .await
            .unwrap();
        registry.stop(&target, "profile").await.unwrap();

        source
            .set_state(&target, row.remote_id, RemoteState::Running)
            .await;
        let report = registry.sync_target(&target).await.unwrap();
        assert_eq!(report, SyncReport::default());
        let row = registry.get(&target, "profile").await.unwrap().unwrap();
        assert_eq!(row.state, RecordingState::Stopped);
    }

    #[tokio::test]
    async fn test_archive_without_dispatcher_fails() {
        let (registry, _source, _notifier) = registry().await;
        let target = target();
        registry
            .resolve_start(&target, start("profile", RecordingReplace::Never))
            .await
            .unwrap();
        assert!(registry.archive(&target, "profile", None).await.is_err());
        assert!(matches!(
            registry.archive(&target, "missing", None).await,
            Err(Error::NotFound(_))
        ));
    }
}

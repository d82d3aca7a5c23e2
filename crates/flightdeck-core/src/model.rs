// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types shared by the registry, the archival uploader and the job
//! dispatcher.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Label key carrying the target's connect URL on archived objects.
pub const LABEL_CONNECT_URL: &str = "connectUrl";
/// Label key carrying the target's JVM id on archived objects.
pub const LABEL_JVM_ID: &str = "jvmId";
/// Label key recording the event template name a recording was started with.
pub const LABEL_TEMPLATE_NAME: &str = "template.name";
/// Label key recording the event template type a recording was started with.
pub const LABEL_TEMPLATE_TYPE: &str = "template.type";

/// A remote JVM that recordings run on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Local identifier of the target.
    pub id: i64,
    /// URL used to reach the JVM (e.g. `service:jmx:rmi:///jndi/rmi://host:9091/jmxrmi`).
    pub connect_url: String,
    /// Human-readable alias, used when deriving archive filenames.
    pub alias: String,
    /// Stable JVM identity hash; namespaces archived recordings.
    pub jvm_id: String,
}

/// Lifecycle state of an active recording as tracked locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingState {
    /// Created but not yet scheduled.
    New,
    /// Scheduled to start later.
    Delayed,
    /// Collecting events.
    Running,
    /// No longer collecting; data still readable.
    Stopped,
    /// Terminal. The recording no longer exists remotely.
    Closed,
}

impl RecordingState {
    /// Stable string form used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::New => "NEW",
            RecordingState::Delayed => "DELAYED",
            RecordingState::Running => "RUNNING",
            RecordingState::Stopped => "STOPPED",
            RecordingState::Closed => "CLOSED",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Staying in the same state is always allowed. A stopped recording never
    /// goes back to running in place; that only happens through a new start
    /// with a replace policy, which creates a fresh row.
    pub fn can_transition_to(self, next: RecordingState) -> bool {
        use RecordingState::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, Delayed | Running | Stopped) => true,
            (Delayed, Running | Stopped) => true,
            (Running, Stopped) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Ok(RecordingState::New),
            "DELAYED" => Ok(RecordingState::Delayed),
            "RUNNING" => Ok(RecordingState::Running),
            "STOPPED" => Ok(RecordingState::Stopped),
            "CLOSED" => Ok(RecordingState::Closed),
            _ => Err(format!("Unknown recording state: {}", s)),
        }
    }
}

/// Recording state as reported by the remote JVM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteState {
    /// Created, waiting for its start delay.
    Created,
    /// Collecting events.
    Running,
    /// Stop requested, still flushing.
    Stopping,
    /// Stopped.
    Stopped,
    /// Anything the remote reports that is not one of the above.
    #[serde(untagged)]
    Other(String),
}

/// Map the remote state onto the locally tracked state.
///
/// STOPPING is folded into RUNNING: it is a transient sub-state that is not
/// tracked separately.
pub fn map_remote_state(remote: &RemoteState) -> RecordingState {
    match remote {
        RemoteState::Created => RecordingState::Delayed,
        RemoteState::Running | RemoteState::Stopping => RecordingState::Running,
        RemoteState::Stopped => RecordingState::Stopped,
        RemoteState::Other(raw) => {
            warn!(remote_state = %raw, "Unrecognized remote recording state, treating as NEW");
            RecordingState::New
        }
    }
}

/// Free-form annotations plus an optional expiry for temporary archives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// User and system labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// When set, the archive is transient and hidden from normal listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Metadata {
    /// Metadata carrying only the given labels.
    pub fn with_labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            labels,
            expiry: None,
        }
    }
}

/// A recording as described by the remote JVM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingDescriptor {
    /// Id assigned by the remote process; unique within the target only.
    pub remote_id: i64,
    /// Recording name.
    pub name: String,
    /// Remote state.
    pub state: RemoteState,
    /// Fixed duration in milliseconds, 0 when unbounded.
    pub duration_ms: i64,
    /// Start time, epoch milliseconds.
    pub start_time_ms: i64,
    /// Whether the recording is continuous (no fixed duration).
    pub continuous: bool,
    /// Whether events are written to disk.
    pub to_disk: bool,
    /// Maximum size in bytes, 0 for no limit.
    pub max_size: i64,
    /// Maximum age in milliseconds, 0 for no limit.
    pub max_age: i64,
}

/// Options sent to the remote JVM when starting a recording.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    /// Recording name.
    pub name: String,
    /// Fixed duration in milliseconds, 0 when unbounded.
    pub duration_ms: i64,
    /// Whether events are written to disk.
    pub to_disk: bool,
    /// Maximum size in bytes, 0 for no limit.
    pub max_size: i64,
    /// Maximum age in milliseconds, 0 for no limit.
    pub max_age: i64,
}

/// Per-target overrides applied on top of requested options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptionsOverrides {
    /// Force `to_disk`.
    pub to_disk: Option<bool>,
    /// Force `max_size`.
    pub max_size: Option<i64>,
    /// Force `max_age`.
    pub max_age: Option<i64>,
}

impl RecordingOptionsOverrides {
    /// Apply the overrides to a set of options.
    pub fn apply(&self, mut options: RecordingOptions) -> RecordingOptions {
        if let Some(to_disk) = self.to_disk {
            options.to_disk = to_disk;
        }
        if let Some(max_size) = self.max_size {
            options.max_size = max_size;
        }
        if let Some(max_age) = self.max_age {
            options.max_age = max_age;
        }
        options
    }
}

/// Where an event template comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateType {
    /// Template shipped with the target JVM.
    #[default]
    Target,
    /// Template uploaded by a user.
    Custom,
}

impl std::fmt::Display for TemplateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateType::Target => write!(f, "TARGET"),
            TemplateType::Custom => write!(f, "CUSTOM"),
        }
    }
}

/// Event configuration a recording is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTemplate {
    /// Template name, e.g. `Continuous` or `Profiling`.
    pub name: String,
    /// Template origin.
    #[serde(rename = "type")]
    pub template_type: TemplateType,
}

impl Default for EventTemplate {
    fn default() -> Self {
        Self {
            name: "Continuous".to_string(),
            template_type: TemplateType::Target,
        }
    }
}

/// A recording believed to exist on a remote target.
///
/// Identity is the pair (`target_id`, `remote_id`); the local `id` is only a
/// storage handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRecording {
    /// Local id.
    pub id: i64,
    /// Owning target.
    pub target_id: i64,
    /// Id assigned by the remote process.
    pub remote_id: i64,
    /// Recording name.
    pub name: String,
    /// Local state.
    pub state: RecordingState,
    /// Fixed duration in milliseconds, 0 when unbounded.
    pub duration_ms: i64,
    /// Start time, epoch milliseconds.
    pub start_time_ms: i64,
    /// Whether the recording is continuous.
    pub continuous: bool,
    /// Whether events are written to disk.
    pub to_disk: bool,
    /// Maximum size in bytes.
    pub max_size: i64,
    /// Maximum age in milliseconds.
    pub max_age: i64,
    /// Archive automatically when the recording stops.
    pub archive_on_stop: bool,
    /// Discovered on the target rather than started here.
    pub external: bool,
    /// Labels and expiry.
    pub metadata: Metadata,
}

impl PartialEq for ActiveRecording {
    fn eq(&self, other: &Self) -> bool {
        self.target_id == other.target_id && self.remote_id == other.remote_id
    }
}

impl Eq for ActiveRecording {}

impl std::hash::Hash for ActiveRecording {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.target_id.hash(state);
        self.remote_id.hash(state);
    }
}

impl ActiveRecording {
    /// Copy the remote-observed attributes of a descriptor into this row.
    ///
    /// The state is not touched; callers go through the transition rules.
    pub fn refresh_from(&mut self, descriptor: &RecordingDescriptor) {
        self.duration_ms = descriptor.duration_ms;
        self.start_time_ms = descriptor.start_time_ms;
        self.continuous = descriptor.continuous;
        self.to_disk = descriptor.to_disk;
        self.max_size = descriptor.max_size;
        self.max_age = descriptor.max_age;
    }
}

/// Values for a row that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewActiveRecording {
    /// Owning target.
    pub target_id: i64,
    /// Id assigned by the remote process.
    pub remote_id: i64,
    /// Recording name.
    pub name: String,
    /// Initial state.
    pub state: RecordingState,
    /// Fixed duration in milliseconds.
    pub duration_ms: i64,
    /// Start time, epoch milliseconds.
    pub start_time_ms: i64,
    /// Whether the recording is continuous.
    pub continuous: bool,
    /// Whether events are written to disk.
    pub to_disk: bool,
    /// Maximum size in bytes.
    pub max_size: i64,
    /// Maximum age in milliseconds.
    pub max_age: i64,
    /// Archive automatically when the recording stops.
    pub archive_on_stop: bool,
    /// Discovered rather than started here.
    pub external: bool,
    /// Labels and expiry.
    pub metadata: Metadata,
}

impl NewActiveRecording {
    /// Build a row from a remote descriptor, mapping the remote state.
    pub fn from_descriptor(
        target: &Target,
        descriptor: &RecordingDescriptor,
        metadata: Metadata,
        archive_on_stop: bool,
        external: bool,
    ) -> Self {
        Self {
            target_id: target.id,
            remote_id: descriptor.remote_id,
            name: descriptor.name.clone(),
            state: map_remote_state(&descriptor.state),
            duration_ms: descriptor.duration_ms,
            start_time_ms: descriptor.start_time_ms,
            continuous: descriptor.continuous,
            to_disk: descriptor.to_disk,
            max_size: descriptor.max_size,
            max_age: descriptor.max_age,
            archive_on_stop,
            external,
            metadata,
        }
    }
}

/// Durable recording bytes plus metadata at `(jvm_id, filename)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedRecording {
    /// JVM the recording came from.
    pub jvm_id: String,
    /// Object filename within the JVM's namespace.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// When the object was written.
    pub archived_time: DateTime<Utc>,
    /// Labels and expiry decoded from the object tags.
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_state_mapping_is_total() {
        assert_eq!(map_remote_state(&RemoteState::Created), RecordingState::Delayed);
        assert_eq!(map_remote_state(&RemoteState::Running), RecordingState::Running);
        assert_eq!(map_remote_state(&RemoteState::Stopping), RecordingState::Running);
        assert_eq!(map_remote_state(&RemoteState::Stopped), RecordingState::Stopped);
        assert_eq!(
            map_remote_state(&RemoteState::Other("CLOSED".to_string())),
            RecordingState::New
        );
    }

    #[test]
    fn test_state_transitions() {
        use RecordingState::*;
        assert!(New.can_transition_to(Running));
        assert!(Delayed.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Closed));
        assert!(Stopped.can_transition_to(Closed));
        assert!(Stopped.can_transition_to(Stopped));

        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Delayed));
        assert!(!Closed.can_transition_to(Running));
    }

    #[test]
    fn test_recording_state_from_str() {
        assert_eq!("stopped".parse::<RecordingState>(), Ok(RecordingState::Stopped));
        assert_eq!("RUNNING".parse::<RecordingState>(), Ok(RecordingState::Running));
        assert!("paused".parse::<RecordingState>().is_err());
    }

    #[test]
    fn test_active_recording_identity_is_target_and_remote_id() {
        let descriptor = RecordingDescriptor {
            remote_id: 7,
            name: "profile".to_string(),
            state: RemoteState::Running,
            duration_ms: 0,
            start_time_ms: 0,
            continuous: true,
            to_disk: true,
            max_size: 0,
            max_age: 0,
        };
        let target = Target {
            id: 1,
            connect_url: "service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi".to_string(),
            alias: "app".to_string(),
            jvm_id: "abc".to_string(),
        };
        let new = NewActiveRecording::from_descriptor(
            &target,
            &descriptor,
            Metadata::default(),
            false,
            false,
        );
        let a = ActiveRecording {
            id: 1,
            target_id: new.target_id,
            remote_id: new.remote_id,
            name: new.name.clone(),
            state: new.state,
            duration_ms: 0,
            start_time_ms: 0,
            continuous: true,
            to_disk: true,
            max_size: 0,
            max_age: 0,
            archive_on_stop: false,
            external: false,
            metadata: Metadata::default(),
        };
        let mut b = a.clone();
        b.id = 99;
        b.name = "renamed".to_string();
        assert_eq!(a, b);

        b.remote_id = 8;
        assert_ne!(a, b);
    }

    #[test]
    fn test_overrides_apply() {
        let options = RecordingOptions {
            name: "r".to_string(),
            duration_ms: 0,
            to_disk: false,
            max_size: 0,
            max_age: 0,
        };
        let overrides = RecordingOptionsOverrides {
            to_disk: Some(true),
            max_size: None,
            max_age: Some(60_000),
        };
        let applied = overrides.apply(options);
        assert!(applied.to_disk);
        assert_eq!(applied.max_size, 0);
        assert_eq!(applied.max_age, 60_000);
    }

    #[test]
    fn test_remote_state_serde_untagged_fallback() {
        let parsed: RemoteState = serde_json::from_str("\"STOPPING\"").unwrap();
        assert_eq!(parsed, RemoteState::Stopping);
        let other: RemoteState = serde_json::from_str("\"STARTING\"").unwrap();
        assert_eq!(other, RemoteState::Other("STARTING".to_string()));
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flightdeck Core - JFR Recording Lifecycle and Archival
//!
//! This crate tracks Java Flight Recorder recordings running on remote JVMs,
//! decides whether a new recording may replace a same-named one, and moves
//! recordings into durable archive objects through a streaming multipart
//! upload. Long-running work is queued and reported through notifications.
//!
//! # Architecture
//!
//! ```text
//!   start / stop / delete / archive
//!                 │
//!                 ▼
//! ┌──────────────────────────────┐      ┌─────────────────────────┐
//! │      RecordingRegistry       │─────►│     RecordingStore      │
//! │  replace policy, state, hook │      │        (SQLite)         │
//! └──────────────────────────────┘      └─────────────────────────┘
//!        │                │
//!        │ dispatch       │ start/stop/close/list
//!        ▼                ▼
//! ┌──────────────┐   ┌──────────────────────┐
//! │ JobDispatcher│   │   RecordingSource    │◄──── open_stream
//! └──────────────┘   └──────────────────────┘          │
//!        │                                             │
//!        ▼                                             │
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │JobWorkerPool │──►│     JobExecutor      │──►│ArchiveUploader│
//! └──────────────┘   └──────────────────────┘   └──────────────┘
//!                          │                           │ multipart
//!                          ▼                           ▼
//!                ┌────────────────────┐        ┌──────────────┐
//!                │NotificationChannel │        │ ObjectStore  │
//!                └────────────────────┘        └──────────────┘
//! ```
//!
//! # Notifications
//!
//! | Category | Published when |
//! |----------|----------------|
//! | `ActiveRecordingCreated` | A recording was started (not for external ones) |
//! | `ActiveRecordingStopped` | A recording moved to STOPPED |
//! | `ActiveRecordingDeleted` | A recording was closed and its row removed |
//! | `ActiveRecordingSaved` | A non-transient archive was written |
//! | `ArchivedRecordingCreated` | A pushed recording was stored |
//! | `ArchivedRecordingDeleted` | An archive was deleted |
//! | `ArchiveRecording{Success,Failure}` | An archive job finished |
//! | `GrafanaUpload{Success,Failure}` | An external upload job finished |
//! | `Report{Success,Failure}` | A report job finished |
//!
//! Use [`runtime::FlightdeckRuntime`] to run everything inside an existing
//! tokio application.

/// Streaming multipart archival and archived recording access.
pub mod archive;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types.
pub mod error;

/// Async job queue, worker pool and job execution.
pub mod jobs;

/// Embedded database migrations.
pub mod migrations;

/// Shared domain types.
pub mod model;

/// Notification channel.
pub mod notify;

/// Object storage backends.
pub mod object_store;

/// Background recording state poller.
pub mod poller;

/// Recording registry and replace policy.
pub mod registry;

/// Embeddable runtime.
pub mod runtime;

/// Remote recording source abstraction.
pub mod source;

/// Active recording persistence.
pub mod store;

/// Chunked byte streams.
pub mod stream;

/// Lost target eviction.
pub mod target_loss;

pub use error::{Error, ErrorClass, Result};
pub use model::{
    ActiveRecording, ArchivedRecording, EventTemplate, Metadata, RecordingDescriptor,
    RecordingOptions, RecordingState, RemoteState, Target,
};
pub use registry::{RecordingRegistry, RecordingReplace, StartRequest};
pub use runtime::FlightdeckRuntime;

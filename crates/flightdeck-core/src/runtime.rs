// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime.
//!
//! [`FlightdeckRuntime`] wires the registry, the archival pipeline and the job
//! dispatcher together and runs the background workers inside an existing
//! tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flightdeck_core::config::Config;
//! use flightdeck_core::runtime::FlightdeckRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let runtime = FlightdeckRuntime::builder()
//!         .config(&config)
//!         .source(Arc::new(my_source))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... register targets, start recordings ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::archive::{ArchiveUploader, ArchivedRecordings, DEFAULT_CHUNK_SIZE};
use crate::config::Config;
use crate::jobs::{
    ExternalSink, HttpDatasourceSink, JobDispatcher, JobExecutor, JobWorkerPool,
    JobWorkerPoolConfig, ReportGenerator,
};
use crate::notify::{BroadcastNotifier, NotificationChannel, category};
use crate::object_store::{LocalObjectStore, ObjectStore};
use crate::poller::{StatePoller, StatePollerConfig};
use crate::registry::{RecordingRegistry, RegistrySettings};
use crate::source::RecordingSource;
use crate::store::{RecordingStore, SqliteRecordingStore};
use crate::target_loss::TargetLossListener;

/// Builder for creating a [`FlightdeckRuntime`].
pub struct FlightdeckRuntimeBuilder {
    source: Option<Arc<dyn RecordingSource>>,
    store: Option<Arc<dyn RecordingStore>>,
    database_url: Option<String>,
    object_store: Option<Arc<dyn ObjectStore>>,
    archive_dir: Option<PathBuf>,
    notifier: BroadcastNotifier,
    external_sink: Option<Arc<dyn ExternalSink>>,
    datasource_url: Option<String>,
    datasource_timeout: Option<Duration>,
    report_generator: Option<Arc<dyn ReportGenerator>>,
    job_workers: usize,
    job_queue_capacity: usize,
    request_timeout: Duration,
    poll_interval: Duration,
    external_archival: bool,
    push_max_files: usize,
    chunk_size: usize,
}

impl Default for FlightdeckRuntimeBuilder {
    fn default() -> Self {
        Self {
            source: None,
            store: None,
            database_url: None,
            object_store: None,
            archive_dir: None,
            notifier: BroadcastNotifier::default(),
            external_sink: None,
            datasource_url: None,
            datasource_timeout: None,
            report_generator: None,
            job_workers: 4,
            job_queue_capacity: 64,
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            external_archival: false,
            push_max_files: 10,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl FlightdeckRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every setting from a loaded [`Config`].
    ///
    /// The store and object store are opened from `database_url` and
    /// `archive_dir` at start unless set explicitly.
    pub fn config(mut self, config: &Config) -> Self {
        self.database_url = Some(config.database_url.clone());
        self.archive_dir = Some(config.archive_dir.clone());
        self.datasource_url = config.datasource_url.clone();
        self.datasource_timeout = config.datasource_timeout;
        self.job_workers = config.job_workers;
        self.job_queue_capacity = config.job_queue_capacity;
        self.request_timeout = config.request_timeout;
        self.poll_interval = config.poll_interval;
        self.external_archival = config.external_archival;
        self.push_max_files = config.push_max_files;
        self
    }

    /// Set the recording source (required).
    pub fn source(mut self, source: Arc<dyn RecordingSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the active recording store.
    pub fn store(mut self, store: Arc<dyn RecordingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Open a SQLite store at this URL on start.
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Set the archive object store.
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Open a local object store rooted here on start.
    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Use this notifier instead of a fresh one.
    pub fn notifier(mut self, notifier: BroadcastNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set the external datasource sink.
    pub fn external_sink(mut self, sink: Arc<dyn ExternalSink>) -> Self {
        self.external_sink = Some(sink);
        self
    }

    /// Set the report generator.
    pub fn report_generator(mut self, generator: Arc<dyn ReportGenerator>) -> Self {
        self.report_generator = Some(generator);
        self
    }

    /// Default: 4
    pub fn job_workers(mut self, workers: usize) -> Self {
        self.job_workers = workers;
        self
    }

    /// Default: 64
    pub fn job_queue_capacity(mut self, capacity: usize) -> Self {
        self.job_queue_capacity = capacity;
        self
    }

    /// Set the timeout for synchronous calls into the recording source.
    ///
    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound a whole upload to the external datasource. Connecting is bounded
    /// by the request timeout either way.
    ///
    /// Default: unbounded
    pub fn datasource_timeout(mut self, timeout: Duration) -> Self {
        self.datasource_timeout = Some(timeout);
        self
    }

    /// Default: 10 seconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Default: false
    pub fn external_archival(mut self, enabled: bool) -> Self {
        self.external_archival = enabled;
        self
    }

    /// Default: 10
    pub fn push_max_files(mut self, max: usize) -> Self {
        self.push_max_files = max;
        self
    }

    /// Set the multipart part size.
    ///
    /// Default: 20 MiB
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<FlightdeckRuntimeConfig> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("source is required"))?;
        let store = match (self.store, self.database_url) {
            (Some(store), _) => StoreSpec::Ready(store),
            (None, Some(url)) => StoreSpec::Url(url),
            (None, None) => return Err(anyhow::anyhow!("store or database_url is required")),
        };
        let object_store = match (self.object_store, self.archive_dir) {
            (Some(store), _) => ObjectStoreSpec::Ready(store),
            (None, Some(dir)) => ObjectStoreSpec::Dir(dir),
            (None, None) => {
                return Err(anyhow::anyhow!("object_store or archive_dir is required"));
            }
        };

        Ok(FlightdeckRuntimeConfig {
            source,
            store,
            object_store,
            notifier: self.notifier,
            external_sink: self.external_sink,
            datasource_url: self.datasource_url,
            datasource_timeout: self.datasource_timeout,
            report_generator: self.report_generator,
            job_workers: self.job_workers,
            job_queue_capacity: self.job_queue_capacity,
            request_timeout: self.request_timeout,
            poll_interval: self.poll_interval,
            external_archival: self.external_archival,
            push_max_files: self.push_max_files,
            chunk_size: self.chunk_size,
        })
    }
}

enum StoreSpec {
    Ready(Arc<dyn RecordingStore>),
    Url(String),
}

enum ObjectStoreSpec {
    Ready(Arc<dyn ObjectStore>),
    Dir(PathBuf),
}

/// Configuration for a [`FlightdeckRuntime`].
pub struct FlightdeckRuntimeConfig {
    source: Arc<dyn RecordingSource>,
    store: StoreSpec,
    object_store: ObjectStoreSpec,
    notifier: BroadcastNotifier,
    external_sink: Option<Arc<dyn ExternalSink>>,
    datasource_url: Option<String>,
    datasource_timeout: Option<Duration>,
    report_generator: Option<Arc<dyn ReportGenerator>>,
    job_workers: usize,
    job_queue_capacity: usize,
    request_timeout: Duration,
    poll_interval: Duration,
    external_archival: bool,
    push_max_files: usize,
    chunk_size: usize,
}

impl FlightdeckRuntimeConfig {
    /// Open the stores and spawn the job worker pool, the state poller and
    /// the target loss listener.
    pub async fn start(self) -> Result<FlightdeckRuntime> {
        let store: Arc<dyn RecordingStore> = match self.store {
            StoreSpec::Ready(store) => store,
            StoreSpec::Url(url) => Arc::new(SqliteRecordingStore::connect(&url).await?),
        };
        let object_store: Arc<dyn ObjectStore> = match self.object_store {
            ObjectStoreSpec::Ready(store) => store,
            ObjectStoreSpec::Dir(dir) => Arc::new(LocalObjectStore::new(dir).await?),
        };
        let external_sink: Option<Arc<dyn ExternalSink>> =
            match (self.external_sink, self.datasource_url) {
                (Some(sink), _) => Some(sink),
                (None, Some(url)) => Some(Arc::new(HttpDatasourceSink::new(
                    url,
                    self.request_timeout,
                    self.datasource_timeout,
                )?)),
                (None, None) => None,
            };

        let notifier: Arc<dyn NotificationChannel> = Arc::new(self.notifier.clone());
        let uploader = Arc::new(
            ArchiveUploader::new(self.source.clone(), object_store, notifier.clone())
                .with_chunk_size(self.chunk_size),
        );
        let archives = Arc::new(ArchivedRecordings::new(
            uploader.clone(),
            notifier.clone(),
            self.push_max_files,
        ));

        let mut executor = JobExecutor::new(uploader, archives.clone(), notifier.clone());
        if let Some(sink) = external_sink {
            executor = executor.with_external_sink(sink);
        }
        if let Some(generator) = self.report_generator {
            executor = executor.with_report_generator(generator);
        }

        let (dispatcher, queue) = JobDispatcher::channel(self.job_queue_capacity);
        let registry = Arc::new(
            RecordingRegistry::new(
                store,
                self.source,
                notifier,
                RegistrySettings {
                    request_timeout: self.request_timeout,
                    external_archival: self.external_archival,
                },
            )
            .with_dispatcher(dispatcher.clone()),
        );

        // Job worker pool
        let pool = JobWorkerPool::new(
            queue,
            Arc::new(executor),
            JobWorkerPoolConfig {
                workers: self.job_workers,
            },
        );
        let jobs_shutdown = pool.shutdown_handle();
        let jobs_handle = tokio::spawn(pool.run());

        // State poller
        let poller = StatePoller::new(
            registry.clone(),
            StatePollerConfig {
                poll_interval: self.poll_interval,
            },
        );
        let poller_shutdown = poller.shutdown_handle();
        let poller_handle = tokio::spawn(async move {
            poller.run().await;
        });

        // Target loss listener
        let listener = TargetLossListener::new(
            registry.clone(),
            self.notifier.subscribe_category(category::TARGET_JVM_DISCOVERY),
        );
        let listener_shutdown = listener.shutdown_handle();
        let listener_handle = tokio::spawn(listener.run());

        info!(
            job_workers = self.job_workers,
            job_queue_capacity = self.job_queue_capacity,
            poll_interval_secs = self.poll_interval.as_secs(),
            external_archival = self.external_archival,
            "FlightdeckRuntime started"
        );

        Ok(FlightdeckRuntime {
            registry,
            archives,
            dispatcher,
            notifier: self.notifier,
            jobs_handle,
            poller_handle,
            listener_handle,
            jobs_shutdown,
            poller_shutdown,
            listener_shutdown,
        })
    }
}

/// A running flightdeck instance embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct FlightdeckRuntime {
    registry: Arc<RecordingRegistry>,
    archives: Arc<ArchivedRecordings>,
    dispatcher: JobDispatcher,
    notifier: BroadcastNotifier,
    jobs_handle: JoinHandle<()>,
    poller_handle: JoinHandle<()>,
    listener_handle: JoinHandle<()>,
    jobs_shutdown: Arc<Notify>,
    poller_shutdown: Arc<Notify>,
    listener_shutdown: Arc<Notify>,
}

impl FlightdeckRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> FlightdeckRuntimeBuilder {
        FlightdeckRuntimeBuilder::new()
    }

    pub fn registry(&self) -> &Arc<RecordingRegistry> {
        &self.registry
    }

    pub fn archives(&self) -> &Arc<ArchivedRecordings> {
        &self.archives
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub fn notifier(&self) -> &BroadcastNotifier {
        &self.notifier
    }

    /// Gracefully shut down the runtime.
    ///
    /// The poller and listener stop first so no new work is queued; the job
    /// pool then fails whatever is still queued and waits for running jobs.
    pub async fn shutdown(self) -> Result<()> {
        info!("FlightdeckRuntime shutting down...");

        self.poller_shutdown.notify_one();
        self.listener_shutdown.notify_one();

        if let Err(e) = self.poller_handle.await {
            error!("State poller task panicked: {}", e);
        }
        if let Err(e) = self.listener_handle.await {
            error!("Target loss listener task panicked: {}", e);
        }

        self.jobs_shutdown.notify_one();
        if let Err(e) = self.jobs_handle.await {
            error!("Job worker pool task panicked: {}", e);
        }

        info!("FlightdeckRuntime shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use crate::source::MockRecordingSource;

    #[test]
    fn test_build_requires_source() {
        let err = FlightdeckRuntime::builder()
            .object_store(Arc::new(MemoryObjectStore::default()))
            .database_url("sqlite::memory:")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("source is required"));
    }

    #[test]
    fn test_build_requires_stores() {
        let err = FlightdeckRuntime::builder()
            .source(Arc::new(MockRecordingSource::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("store or database_url is required"));

        let err = FlightdeckRuntime::builder()
            .source(Arc::new(MockRecordingSource::new()))
            .database_url("sqlite::memory:")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("object_store or archive_dir is required"));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FlightdeckRuntime::builder()
            .source(Arc::new(MockRecordingSource::new()))
            .database_url("sqlite::memory:")
            .archive_dir(dir.path().join("archives"))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();
        assert!(runtime.registry().targets().await.is_empty());
        assert!(!runtime.dispatcher().is_closed());
        runtime.shutdown().await.unwrap();
    }
}

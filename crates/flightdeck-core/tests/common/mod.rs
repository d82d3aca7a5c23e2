// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for flightdeck-core integration tests.
//!
//! Provides TestContext wiring an in-memory SQLite store, the mock recording
//! source, the in-memory object store and a broadcast notifier.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

use flightdeck_core::archive::{ArchiveUploader, ArchivedRecordings};
use flightdeck_core::jobs::{
    ExternalSink, JobDispatcher, JobExecutor, JobQueue, JobWorkerPool, JobWorkerPoolConfig,
    ReportGenerator,
};
use flightdeck_core::model::{ActiveRecording, Metadata, NewActiveRecording, RemoteState, Target};
use flightdeck_core::notify::{BroadcastNotifier, Notification};
use flightdeck_core::object_store::MemoryObjectStore;
use flightdeck_core::registry::{RecordingRegistry, RegistrySettings};
use flightdeck_core::source::MockRecordingSource;
use flightdeck_core::store::{RecordingStore, SqliteRecordingStore};

/// Knobs for [`TestContext::with_options`].
pub struct ContextOptions {
    pub chunk_size: usize,
    pub push_max_files: usize,
    pub external_archival: bool,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
    /// Spawn the job worker pool right away.
    pub start_workers: bool,
    pub external_sink: Option<Arc<dyn ExternalSink>>,
    pub report_generator: Option<Arc<dyn ReportGenerator>>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            push_max_files: 10,
            external_archival: false,
            queue_capacity: 64,
            request_timeout: Duration::from_secs(5),
            start_workers: true,
            external_sink: None,
            report_generator: None,
        }
    }
}

/// Test context holding every component of the pipeline.
pub struct TestContext {
    pub source: Arc<MockRecordingSource>,
    pub objects: Arc<MemoryObjectStore>,
    pub store: Arc<SqliteRecordingStore>,
    pub notifier: BroadcastNotifier,
    pub uploader: Arc<ArchiveUploader>,
    pub archives: Arc<ArchivedRecordings>,
    pub executor: Arc<JobExecutor>,
    pub dispatcher: JobDispatcher,
    pub registry: Arc<RecordingRegistry>,
    queue: Option<JobQueue>,
    workers: Option<(Arc<Notify>, JoinHandle<()>)>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_options(MockRecordingSource::new(), ContextOptions::default()).await
    }

    pub async fn with_source(source: MockRecordingSource) -> Self {
        Self::with_options(source, ContextOptions::default()).await
    }

    pub async fn with_options(source: MockRecordingSource, options: ContextOptions) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        flightdeck_core::migrations::run_sqlite(&pool)
            .await
            .expect("migrations");

        let source = Arc::new(source);
        let objects = Arc::new(MemoryObjectStore::new());
        let store = Arc::new(SqliteRecordingStore::new(pool));
        let notifier = BroadcastNotifier::new(4096);

        let uploader = Arc::new(
            ArchiveUploader::new(source.clone(), objects.clone(), Arc::new(notifier.clone()))
                .with_chunk_size(options.chunk_size),
        );
        let archives = Arc::new(ArchivedRecordings::new(
            uploader.clone(),
            Arc::new(notifier.clone()),
            options.push_max_files,
        ));

        let mut executor =
            JobExecutor::new(uploader.clone(), archives.clone(), Arc::new(notifier.clone()));
        if let Some(sink) = options.external_sink {
            executor = executor.with_external_sink(sink);
        }
        if let Some(generator) = options.report_generator {
            executor = executor.with_report_generator(generator);
        }
        let executor = Arc::new(executor);

        let (dispatcher, queue) = JobDispatcher::channel(options.queue_capacity);
        let registry = Arc::new(
            RecordingRegistry::new(
                store.clone(),
                source.clone(),
                Arc::new(notifier.clone()),
                RegistrySettings {
                    request_timeout: options.request_timeout,
                    external_archival: options.external_archival,
                },
            )
            .with_dispatcher(dispatcher.clone()),
        );

        let mut ctx = Self {
            source,
            objects,
            store,
            notifier,
            uploader,
            archives,
            executor,
            dispatcher,
            registry,
            queue: Some(queue),
            workers: None,
        };
        if options.start_workers {
            ctx.start_workers();
        }
        ctx
    }

    /// Spawn the job worker pool if it is not running yet.
    pub fn start_workers(&mut self) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        let pool = JobWorkerPool::new(queue, self.executor.clone(), JobWorkerPoolConfig::default());
        let shutdown = pool.shutdown_handle();
        let handle = tokio::spawn(pool.run());
        self.workers = Some((shutdown, handle));
    }

    /// Stop the worker pool and wait for it.
    pub async fn shutdown(mut self) {
        if let Some((shutdown, handle)) = self.workers.take() {
            shutdown.notify_one();
            handle.await.expect("worker pool panicked");
        }
    }

    /// Put a recording with `data` on the target and track it locally.
    pub async fn active_recording(
        &self,
        target: &Target,
        name: &str,
        state: RemoteState,
        data: Vec<u8>,
        metadata: Metadata,
    ) -> ActiveRecording {
        let descriptor = self.source.insert_recording(target, name, state, data).await;
        self.store
            .create(&NewActiveRecording::from_descriptor(
                target,
                &descriptor,
                metadata,
                false,
                false,
            ))
            .await
            .expect("store row")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }
}

/// A target with predictable identifiers.
pub fn target(id: i64, alias: &str) -> Target {
    Target {
        id,
        connect_url: format!("service:jmx:rmi:///jndi/rmi://{}:9091/jmxrmi", alias),
        alias: alias.to_string(),
        jvm_id: format!("jvm-{}", alias),
    }
}

/// Deterministic, non-repeating payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Wait for the next notification in `category`, skipping others.
pub async fn recv_category(
    rx: &mut broadcast::Receiver<Notification>,
    category: &str,
) -> Notification {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let n = rx.recv().await.expect("notifier closed");
            if n.category == category {
                return n;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", category))
}

/// Collect every notification published within `window`.
pub async fn drain(rx: &mut broadcast::Receiver<Notification>, window: Duration) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(Ok(n)) = tokio::time::timeout(window, rx.recv()).await {
        out.push(n);
    }
    out
}

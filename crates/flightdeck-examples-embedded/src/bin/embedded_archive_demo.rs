// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded mode example - start, stop and archive a recording.
//!
//! Uses `FLIGHTDECK_*` variables when `FLIGHTDECK_DATABASE_URL` is set,
//! otherwise keeps everything under `.data/`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use flightdeck_core::config::Config;
use flightdeck_core::model::{RecordingOptions, Target};
use flightdeck_core::notify::category;
use flightdeck_core::source::MockRecordingSource;
use flightdeck_core::{FlightdeckRuntime, RecordingReplace, StartRequest};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flightdeck_core=info,embedded_archive_demo=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let payload: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 251) as u8).collect();
    let source = Arc::new(MockRecordingSource::new().with_payload(payload));

    let builder = FlightdeckRuntime::builder().source(source);
    let builder = if std::env::var("FLIGHTDECK_DATABASE_URL").is_ok() {
        builder.config(&Config::from_env()?)
    } else {
        tokio::fs::create_dir_all(".data").await?;
        builder
            .database_url("sqlite:.data/flightdeck.db?mode=rwc")
            .archive_dir(".data/archives")
            .poll_interval(Duration::from_secs(1))
    };
    let runtime = builder.build()?.start().await?;
    let mut events = runtime.notifier().subscribe();

    let target = Target {
        id: 1,
        connect_url: "service:jmx:rmi:///jndi/rmi://localhost:9091/jmxrmi".to_string(),
        alias: "demo-app".to_string(),
        jvm_id: "demo-jvm".to_string(),
    };
    runtime.registry().register_target(target.clone()).await;

    let mut labels = BTreeMap::new();
    labels.insert("purpose".to_string(), "demo".to_string());
    let recording = runtime
        .registry()
        .resolve_start(
            &target,
            StartRequest {
                options: RecordingOptions {
                    name: "startup profile".to_string(),
                    to_disk: true,
                    ..Default::default()
                },
                replace: RecordingReplace::Always,
                labels,
                archive_on_stop: true,
                ..Default::default()
            },
        )
        .await?;
    info!(recording = %recording.name, remote_id = recording.remote_id, "Recording started");

    runtime.registry().stop(&target, &recording.name).await?;

    let outcome = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Ok(n) if n.category == category::ARCHIVE_RECORDING_SUCCESS => return Ok(n),
                Ok(n) if n.category == category::ARCHIVE_RECORDING_FAILURE => {
                    return Err(anyhow::anyhow!("archive job failed: {}", n.message));
                }
                Ok(_) => continue,
                Err(e) => return Err(anyhow::anyhow!("notification channel closed: {}", e)),
            }
        }
    })
    .await??;
    info!(filename = %outcome.message["filename"], "Recording archived");

    for archived in runtime.archives().list(Some(&target.jvm_id)).await? {
        println!(
            "{}  {} bytes  {}",
            archived.filename,
            archived.size,
            serde_json::to_string(&archived.metadata.labels)?
        );
    }

    runtime.shutdown().await?;
    Ok(())
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry lifecycle, reconciliation and archive-on-stop.

mod common;

use std::time::Duration;

use common::{ContextOptions, TestContext, payload, target};
use flightdeck_core::model::{
    Metadata, NewActiveRecording, RecordingOptions, RecordingOptionsOverrides, RecordingState,
    RemoteState,
};
use flightdeck_core::notify::{NotificationChannel, category};
use flightdeck_core::poller::{StatePoller, StatePollerConfig};
use flightdeck_core::registry::SyncReport;
use flightdeck_core::source::{MockRecordingSource, RecordingSource};
use flightdeck_core::store::RecordingStore;
use flightdeck_core::target_loss::TargetLossListener;
use flightdeck_core::{RecordingReplace, StartRequest};
use regex::Regex;
use serde_json::json;

fn request(name: &str, archive_on_stop: bool) -> StartRequest {
    StartRequest {
        options: RecordingOptions {
            name: name.to_string(),
            ..Default::default()
        },
        replace: RecordingReplace::Never,
        archive_on_stop,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_stop_with_archive_on_stop_archives() {
    let ctx = TestContext::with_source(MockRecordingSource::new().with_payload(payload(3000))).await;
    let mut rx = ctx.subscribe();
    let t = target(1, "app");

    ctx.registry.resolve_start(&t, request("test", true)).await.unwrap();
    let stopped = ctx.registry.stop(&t, "test").await.unwrap();
    assert_eq!(stopped.state, RecordingState::Stopped);

    let created = common::recv_category(&mut rx, category::ACTIVE_RECORDING_CREATED).await;
    assert_eq!(created.message["jvmId"], t.jvm_id);
    assert_eq!(created.message["target"], t.connect_url);
    let stop = common::recv_category(&mut rx, category::ACTIVE_RECORDING_STOPPED).await;
    assert_eq!(stop.message["recording"]["state"], "STOPPED");

    let success = common::recv_category(&mut rx, category::ARCHIVE_RECORDING_SUCCESS).await;
    let filename = success.message["filename"].as_str().unwrap().to_string();
    let pattern = Regex::new(r"^app_test_\d{8}T\d{6}Z\.jfr$").unwrap();
    assert!(pattern.is_match(&filename), "unexpected filename {}", filename);

    let archived = ctx.archives.get(&t.jvm_id, &filename).await.unwrap().unwrap();
    assert_eq!(archived.size, 3000);
    assert_eq!(archived.metadata.labels["template.name"], "Continuous");
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_stop_without_archive_on_stop_does_not_archive() {
    let ctx = TestContext::new().await;
    let mut rx = ctx.subscribe();
    let t = target(1, "app");

    ctx.registry.resolve_start(&t, request("test", false)).await.unwrap();
    ctx.registry.stop(&t, "test").await.unwrap();

    let events = common::drain(&mut rx, Duration::from_millis(200)).await;
    assert!(events.iter().any(|n| n.category == category::ACTIVE_RECORDING_STOPPED));
    assert!(events.iter().all(|n| n.category != category::ARCHIVE_RECORDING_SUCCESS));
    assert!(ctx.archives.list(None).await.unwrap().is_empty());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_polled_stop_triggers_archive_on_stop() {
    let ctx = TestContext::new().await;
    let mut rx = ctx.subscribe();
    let t = target(1, "app");
    ctx.registry.register_target(t.clone()).await;

    let row = ctx.registry.resolve_start(&t, request("bounded", true)).await.unwrap();
    // Fixed-duration recording ran out on the target.
    ctx.source.set_state(&t, row.remote_id, RemoteState::Stopped).await;

    let poller = StatePoller::new(ctx.registry.clone(), StatePollerConfig::default());
    let report = poller.poll_once().await;
    assert_eq!(report.transitioned, 1);

    common::recv_category(&mut rx, category::ACTIVE_RECORDING_STOPPED).await;
    let success = common::recv_category(&mut rx, category::ARCHIVE_RECORDING_SUCCESS).await;
    assert_eq!(success.message["recording"], "bounded");

    let second = poller.poll_once().await;
    assert_eq!(second.transitioned, 0);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_sync_adopts_and_removes() {
    let ctx = TestContext::new().await;
    let mut rx = ctx.subscribe();
    let t = target(1, "app");

    let ours = ctx.registry.resolve_start(&t, request("ours", false)).await.unwrap();
    ctx.source
        .insert_recording(&t, "theirs", RemoteState::Running, Vec::new())
        .await;
    ctx.source.remove_recording(&t, ours.remote_id).await;
    common::recv_category(&mut rx, category::ACTIVE_RECORDING_CREATED).await;

    let report = ctx.registry.sync_target(&t).await.unwrap();
    assert_eq!(report.adopted, 1);
    assert_eq!(report.removed, 1);

    let rows = ctx.registry.list(&t).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "theirs");
    assert!(rows[0].external);

    let events = common::drain(&mut rx, Duration::from_millis(100)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category, category::ACTIVE_RECORDING_DELETED);
    assert_eq!(events[0].message["recording"]["name"], "ours");
    assert_eq!(events[0].message["recording"]["state"], "CLOSED");

    let again = ctx.registry.sync_target(&t).await.unwrap();
    assert_eq!(again, SyncReport::default());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_sync_removes_only_vanished_rows() {
    let ctx = TestContext::new().await;
    let t = target(1, "app");

    let kept = ctx.registry.resolve_start(&t, request("kept", false)).await.unwrap();
    let stopped = ctx.registry.resolve_start(&t, request("stopped", false)).await.unwrap();
    let gone = ctx.registry.resolve_start(&t, request("gone", false)).await.unwrap();
    ctx.source.set_state(&t, stopped.remote_id, RemoteState::Stopped).await;
    ctx.source.remove_recording(&t, gone.remote_id).await;

    let report = ctx.registry.sync_target(&t).await.unwrap();
    assert_eq!(
        report,
        SyncReport {
            transitioned: 1,
            adopted: 0,
            removed: 1,
        }
    );

    let mut names: Vec<_> = ctx
        .registry
        .list(&t)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.remote_id, r.state))
        .collect();
    names.sort_by_key(|(remote_id, _)| *remote_id);
    assert_eq!(
        names,
        vec![
            (kept.remote_id, RecordingState::Running),
            (stopped.remote_id, RecordingState::Stopped),
        ]
    );
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_external_stop_is_not_archived_by_default() {
    let ctx = TestContext::new().await;
    let mut rx = ctx.subscribe();
    let t = target(1, "app");

    let descriptor = ctx
        .source
        .insert_recording(&t, "theirs", RemoteState::Running, payload(64))
        .await;
    ctx.store
        .create(&NewActiveRecording::from_descriptor(
            &t,
            &descriptor,
            Metadata::default(),
            true,
            true,
        ))
        .await
        .unwrap();
    ctx.source.set_state(&t, descriptor.remote_id, RemoteState::Stopped).await;

    let report = ctx.registry.sync_target(&t).await.unwrap();
    assert_eq!(report.transitioned, 1);

    let events = common::drain(&mut rx, Duration::from_millis(200)).await;
    assert!(events.iter().any(|n| n.category == category::ACTIVE_RECORDING_STOPPED));
    assert!(events.iter().all(|n| n.category != category::ARCHIVE_RECORDING_SUCCESS));
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_external_archival_archives_adopted_recordings() {
    let ctx = TestContext::with_options(
        MockRecordingSource::new(),
        ContextOptions {
            external_archival: true,
            ..Default::default()
        },
    )
    .await;
    let mut rx = ctx.subscribe();
    let t = target(1, "app");

    let descriptor = ctx
        .source
        .insert_recording(&t, "theirs", RemoteState::Running, payload(512))
        .await;
    ctx.registry.sync_target(&t).await.unwrap();
    let adopted = ctx.registry.get(&t, "theirs").await.unwrap().unwrap();
    assert!(adopted.external);
    assert!(adopted.archive_on_stop);

    ctx.source.set_state(&t, descriptor.remote_id, RemoteState::Stopped).await;
    ctx.registry.sync_target(&t).await.unwrap();

    let success = common::recv_category(&mut rx, category::ARCHIVE_RECORDING_SUCCESS).await;
    assert_eq!(success.message["recording"], "theirs");
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_delete_closes_remote_and_notifies() {
    let ctx = TestContext::new().await;
    let mut rx = ctx.subscribe();
    let t = target(1, "app");

    let row = ctx.registry.resolve_start(&t, request("test", false)).await.unwrap();
    let deleted = ctx.registry.delete(&t, "test").await.unwrap();
    assert_eq!(deleted.remote_id, row.remote_id);
    assert_eq!(deleted.state, RecordingState::Closed);

    assert!(ctx.source.list_descriptors(&t).await.unwrap().is_empty());
    assert!(ctx.registry.get(&t, "test").await.unwrap().is_none());

    let n = common::recv_category(&mut rx, category::ACTIVE_RECORDING_DELETED).await;
    assert_eq!(n.message["recording"]["remoteId"], row.remote_id);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_delete_when_remote_already_gone() {
    let ctx = TestContext::new().await;
    let t = target(1, "app");

    let row = ctx.registry.resolve_start(&t, request("test", false)).await.unwrap();
    ctx.source.remove_recording(&t, row.remote_id).await;

    ctx.registry.delete(&t, "test").await.unwrap();
    assert!(ctx.registry.list(&t).await.unwrap().is_empty());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_delete_unknown_is_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx.registry.delete(&target(1, "app"), "nope").await.unwrap_err();
    assert!(err.is_not_found());
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_lost_target_is_forgotten() {
    let ctx = TestContext::new().await;
    let t = target(7, "lost");
    let other = target(8, "kept");
    ctx.registry.register_target(t.clone()).await;
    ctx.registry.register_target(other.clone()).await;
    ctx.registry.set_options_override(
        t.id,
        RecordingOptionsOverrides {
            to_disk: Some(true),
            ..Default::default()
        },
    );
    ctx.registry.resolve_start(&t, request("a", false)).await.unwrap();
    ctx.registry.resolve_start(&t, request("b", false)).await.unwrap();
    ctx.registry.resolve_start(&other, request("c", false)).await.unwrap();

    let listener = TargetLossListener::new(
        ctx.registry.clone(),
        ctx.notifier.subscribe_category(category::TARGET_JVM_DISCOVERY),
    );
    let shutdown = listener.shutdown_handle();
    let handle = tokio::spawn(listener.run());

    ctx.notifier.emit(
        category::TARGET_JVM_DISCOVERY,
        json!({ "event": { "kind": "LOST", "serviceRef": { "connectUrl": t.connect_url } } }),
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.registry.target(t.id).await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("target evicted");

    assert!(ctx.registry.list(&t).await.unwrap().is_empty());
    assert!(ctx.registry.options_override(t.id).is_none());
    assert_eq!(ctx.registry.list(&other).await.unwrap().len(), 1);
    assert!(ctx.registry.target(other.id).await.is_some());

    shutdown.notify_one();
    handle.await.unwrap();
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_lost_target_survives_notification_flood() {
    let ctx = TestContext::new().await;
    let t = target(7, "lost");
    ctx.registry.register_target(t.clone()).await;
    ctx.registry.resolve_start(&t, request("a", false)).await.unwrap();

    let listener = TargetLossListener::new(
        ctx.registry.clone(),
        ctx.notifier.subscribe_category(category::TARGET_JVM_DISCOVERY),
    );
    let mut lagging = ctx.subscribe();

    // Far more than the broadcast capacity, published before the listener runs.
    for i in 0..5000 {
        ctx.notifier.emit(category::REPORT_SUCCESS, json!({ "jobId": i }));
    }
    ctx.notifier.emit(
        category::TARGET_JVM_DISCOVERY,
        json!({ "event": { "kind": "LOST", "serviceRef": { "connectUrl": t.connect_url } } }),
    );
    for i in 0..5000 {
        ctx.notifier.emit(category::REPORT_SUCCESS, json!({ "jobId": i }));
    }
    assert!(matches!(
        lagging.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Lagged(_))
    ));

    let shutdown = listener.shutdown_handle();
    let handle = tokio::spawn(listener.run());
    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.registry.target(t.id).await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("target evicted");
    assert!(ctx.registry.list(&t).await.unwrap().is_empty());

    shutdown.notify_one();
    handle.await.unwrap();
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_other_discovery_events_are_ignored() {
    let ctx = TestContext::new().await;
    let t = target(7, "app");
    ctx.registry.register_target(t.clone()).await;

    let listener = TargetLossListener::new(
        ctx.registry.clone(),
        ctx.notifier.subscribe_category(category::TARGET_JVM_DISCOVERY),
    );
    let shutdown = listener.shutdown_handle();
    let handle = tokio::spawn(listener.run());

    ctx.notifier.emit(
        category::TARGET_JVM_DISCOVERY,
        json!({ "event": { "kind": "FOUND", "serviceRef": { "connectUrl": t.connect_url } } }),
    );
    ctx.notifier.emit(category::TARGET_JVM_DISCOVERY, json!({ "unexpected": true }));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(ctx.registry.target(t.id).await.is_some());
    shutdown.notify_one();
    handle.await.unwrap();
    ctx.shutdown().await;
}

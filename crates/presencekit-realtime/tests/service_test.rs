//! Integration tests for the presence façade.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use presencekit_core::clock::TokioClock;
use presencekit_core::config::PresenceConfig;
use presencekit_core::error::{AppError, ErrorKind};
use presencekit_core::types::{PresenceSource, UserInfo};
use presencekit_realtime::{ConnectionState, PresenceService, PresenceStatus, PresenceStores, ServiceState};
use presencekit_store::{MemoryDurableMirror, MemoryPresenceServer};

use helpers::{ANN, BOB, TestApp, settle, yield_briefly};

#[tokio::test]
async fn test_new_requires_authenticated_user() {
    let clock = TokioClock::new().shared();
    let server = MemoryPresenceServer::new(clock.clone());
    let stores = PresenceStores::new(
        Arc::new(server.client()),
        Arc::new(MemoryDurableMirror::new(clock.clone())),
    );

    let err = PresenceService::new("   ", stores, PresenceConfig::default(), clock).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_is_idempotent() {
    let app = TestApp::new();
    app.service.initialize().await;
    app.service.initialize().await;
    settle().await;
    app.service.initialize().await;
    settle().await;

    assert_eq!(app.service.state(), ServiceState::Initialized);
    assert_eq!(app.server.stats().session_creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_set_online_twice_writes_once() {
    let app = TestApp::connected().await;
    app.client.set_latency(Duration::from_millis(100));
    let writes = app.server.stats().writes();

    let (first, second) = tokio::join!(app.service.set_online(), app.service.set_online());

    assert!(first);
    assert!(!second);
    assert_eq!(app.server.stats().writes() - writes, 1);
    assert_eq!(app.service.metrics().mutations_dropped, 1);
    assert_eq!(app.manual_patches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_set_offline_writes_both_stores() {
    let app = TestApp::connected().await;

    assert!(app.service.set_offline().await);

    let record = app.server.record(&app.user).unwrap();
    assert!(!record.online);
    let profile = app.durable.profile(ANN).unwrap();
    assert!(!profile.is_online);
    assert_eq!(profile.presence_source, Some(PresenceSource::Manual));
    assert!(!app.service.is_online(ANN).await);
}

#[tokio::test(start_paused = true)]
async fn test_set_online_mirrors_durable_when_ephemeral_unreachable() {
    let app = TestApp::connected().await;
    app.service.set_offline().await;
    app.client.set_reachable(false);

    assert!(app.service.set_online().await);

    let profile = app.durable.profile(ANN).unwrap();
    assert!(profile.is_online);
    assert_eq!(profile.presence_source, Some(PresenceSource::Manual));
    assert!(!app.server.record(&app.user).unwrap().online);

    assert!(app.service.is_online(ANN).await);
    assert_eq!(app.service.metrics().durable_fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_durable_write_retried_in_background() {
    let app = TestApp::connected().await;
    app.durable.set_reachable(false);

    app.service.set_offline().await;
    assert!(app.manual_patches().is_empty());

    app.durable.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(5)).await;

    let patches = app.manual_patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].is_online, Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_reads_fail_closed() {
    let app = TestApp::connected().await;
    let (viewer_client, viewer) = app.viewer(BOB);
    viewer_client.set_reachable(false);
    app.durable.set_reachable(false);

    assert!(!viewer.is_online(ANN).await);
    assert!(viewer.get_last_seen(ANN).await.is_none());
    assert_eq!(
        viewer.presence_status(ANN).await,
        PresenceStatus::Offline { last_seen: None }
    );
}

#[tokio::test(start_paused = true)]
async fn test_ephemeral_read_populates_cache() {
    let app = TestApp::connected().await;
    let (viewer_client, viewer) = app.viewer(BOB);

    assert!(viewer.is_online(ANN).await);
    let reads = app.server.stats().reads();

    viewer_client.set_reachable(false);
    assert!(viewer.is_online(ANN).await);
    assert!(viewer.get_last_seen(ANN).await.is_some());
    assert_eq!(app.server.stats().reads(), reads);
    assert_eq!(viewer.metrics().durable_fallbacks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_record_falls_back_to_durable() {
    let app = TestApp::connected().await;
    let (_viewer_client, viewer) = app.viewer(BOB);
    app.server.inject_raw(&app.user, serde_json::json!({"online": "yes"}));

    assert!(viewer.is_online(ANN).await);
    assert_eq!(viewer.metrics().durable_fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missed_cleanup_is_offline_after_window() {
    let app = TestApp::connected().await;
    let (_viewer_client, viewer) = app.viewer(BOB);

    app.client.drop_connection_silently();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(app.server.record(&app.user).unwrap().online);
    assert!(viewer.is_online(ANN).await);

    tokio::time::sleep(Duration::from_secs(125)).await;
    assert!(app.server.record(&app.user).unwrap().online);
    assert!(!viewer.is_online(ANN).await);
    assert!(matches!(
        viewer.presence_status(ANN).await,
        PresenceStatus::Offline { last_seen: Some(_) }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_get_last_seen_tracks_registration() {
    let app = TestApp::connected().await;
    let last_seen = app.service.get_last_seen(ANN).await.unwrap();
    let record = app.server.record(&app.user).unwrap();
    assert_eq!(last_seen, record.last_seen);
}

#[tokio::test(start_paused = true)]
async fn test_presence_stream_republishes_after_error() {
    let app = TestApp::connected().await;
    let (_viewer_client, viewer) = app.viewer(BOB);
    let mut stream = viewer.presence_stream(ANN);

    let first = stream.next().await.unwrap().unwrap();
    assert!(first.online);

    app.server.inject_feed_error(&app.user, AppError::store("feed interrupted"));
    let republished = stream.next().await.unwrap().unwrap();
    assert_eq!(republished, first);
    assert_eq!(viewer.metrics().stream_errors, 1);

    app.service.set_offline().await;
    let next = stream.next().await.unwrap().unwrap();
    assert!(!next.online);
}

#[tokio::test(start_paused = true)]
async fn test_presence_stream_republishes_record_older_than_ttl() {
    let app = TestApp::connected().await;
    app.service.heartbeat().unwrap().set_foreground(false);
    let (viewer_client, viewer) = app.viewer(BOB);
    let mut stream = viewer.presence_stream(ANN);
    let first = stream.next().await.unwrap().unwrap();

    tokio::time::advance(Duration::from_secs(60)).await;
    viewer_client.set_reachable(false);
    viewer.is_online(ANN).await;

    app.server.inject_feed_error(&app.user, AppError::store("feed interrupted"));
    let republished = stream.next().await.unwrap().unwrap();
    assert_eq!(republished, first);
}

#[tokio::test(start_paused = true)]
async fn test_presence_stream_updates_cache() {
    let app = TestApp::connected().await;
    let (viewer_client, viewer) = app.viewer(BOB);
    let mut stream = viewer.presence_stream(ANN);
    stream.next().await.unwrap();

    viewer_client.set_reachable(false);
    app.durable.set_reachable(false);
    assert!(viewer.is_online(ANN).await);
}

#[tokio::test(start_paused = true)]
async fn test_presence_stream_ends_on_dispose() {
    let app = TestApp::connected().await;
    let (_viewer_client, viewer) = app.viewer(BOB);
    let mut stream = viewer.presence_stream(ANN);
    stream.next().await.unwrap();

    viewer.dispose();
    assert!(stream.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_update_user_info_reaches_durable_when_ephemeral_fails() {
    let app = TestApp::connected().await;
    app.client.set_reachable(false);

    app.service
        .update_user_info(UserInfo {
            display_name: Some("Ann".into()),
            status_message: Some("on call".into()),
            ..UserInfo::default()
        })
        .await;

    let profile = app.durable.profile(ANN).unwrap();
    assert_eq!(profile.user_info.display_name.as_deref(), Some("Ann"));
    assert_eq!(profile.user_info.status_message.as_deref(), Some("on call"));
    assert!(app.server.record(&app.user).unwrap().user_info.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_update_user_info_writes_both_stores() {
    let app = TestApp::connected().await;

    app.service
        .update_user_info(UserInfo {
            photo_url: Some("https://img.example.com/ann.png".into()),
            ..UserInfo::default()
        })
        .await;

    let record = app.server.record(&app.user).unwrap();
    assert_eq!(
        record.user_info.photo_url.as_deref(),
        Some("https://img.example.com/ann.png")
    );
    assert!(app.durable.profile(ANN).unwrap().user_info.photo_url.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_removes_session_and_resets() {
    let app = TestApp::connected().await;

    app.service.sign_out().await;

    assert_eq!(app.service.state(), ServiceState::Uninitialized);
    assert_eq!(app.service.connection_state(), ConnectionState::Disconnected);
    assert_eq!(app.server.stats().explicit_removals(), 1);

    let record = app.server.record(&app.user).unwrap();
    assert!(!record.online);
    assert!(record.connections.is_empty());
    assert!(!app.durable.profile(ANN).unwrap().is_online);

    app.client.drop_connection();
    assert_eq!(app.server.stats().cleanup_removals(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_without_initialize_is_safe() {
    let app = TestApp::new();

    app.service.sign_out().await;

    assert_eq!(app.service.state(), ServiceState::Uninitialized);
    assert!(!app.durable.profile(ANN).unwrap().is_online);
    assert_eq!(app.server.stats().explicit_removals(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_writes_nothing_and_allows_reinitialize() {
    let app = TestApp::connected().await;
    let writes = app.server.stats().writes();
    let history = app.durable.history(ANN).len();

    app.service.dispose();
    tokio::time::sleep(Duration::from_secs(100)).await;

    assert_eq!(app.service.state(), ServiceState::Uninitialized);
    assert_eq!(app.server.stats().writes(), writes);
    assert_eq!(app.durable.history(ANN).len(), history);

    app.service.initialize().await;
    settle().await;
    assert_eq!(app.service.connection_state(), ConnectionState::Connected);
    yield_briefly().await;
    assert!(app.durable.profile(ANN).unwrap().is_online);
}

//! Integration tests for debounced lifecycle handling.

mod helpers;

use std::time::Duration;

use presencekit_realtime::AppLifecycle;

use helpers::TestApp;

#[tokio::test(start_paused = true)]
async fn test_lifecycle_burst_applies_final_state_once() {
    let app = TestApp::connected().await;

    app.service.handle_lifecycle(AppLifecycle::Background).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    app.service.handle_lifecycle(AppLifecycle::Foreground).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    app.service.handle_lifecycle(AppLifecycle::Background).await;
    assert_eq!(app.service.pending_lifecycle(), Some(false));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(app.manual_patches().is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let patches = app.manual_patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].is_online, Some(false));
    assert!(!app.server.record(&app.user).unwrap().online);
    assert_eq!(app.service.pending_lifecycle(), None);
}

#[tokio::test(start_paused = true)]
async fn test_quick_return_to_foreground_stays_online() {
    let app = TestApp::connected().await;

    app.service.handle_lifecycle(AppLifecycle::Background).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    app.service.handle_lifecycle(AppLifecycle::Foreground).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let patches = app.manual_patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].is_online, Some(true));
    assert!(app.server.record(&app.user).unwrap().online);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_goes_offline_immediately() {
    let app = TestApp::connected().await;

    app.service.handle_lifecycle(AppLifecycle::Foreground).await;
    app.service.handle_lifecycle(AppLifecycle::Terminate).await;

    assert_eq!(app.service.pending_lifecycle(), None);
    let patches = app.manual_patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].is_online, Some(false));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(app.manual_patches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_pauses_heartbeat() {
    let app = TestApp::connected().await;
    let heartbeat = app.service.heartbeat().unwrap();

    app.service.handle_lifecycle(AppLifecycle::Background).await;
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(heartbeat.beat_count(), 0);

    app.service.handle_lifecycle(AppLifecycle::Foreground).await;
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(heartbeat.beat_count(), 1);
}

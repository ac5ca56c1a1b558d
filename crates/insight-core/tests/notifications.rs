//! Live delivery, caching and replay of task notifications

use futures::StreamExt;
use insight_core::prelude::*;
use insight_core::{HubConfig, NotificationHub};
use insight_test_utils::{
    collect_events, event_types, fail_with, fast_config, next_event, succeed_after, test_service,
    test_service_with, wait_for_terminal,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn connected_stream_sees_failure_in_order() {
    let service = test_service();
    let subscriber = SubscriberId(7);
    let mut stream = service.open_stream(subscriber);

    let id = service
        .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| {
            fail_with("model refused")
        })
        .unwrap();

    let events = collect_events(&mut stream, 3).await;
    assert_eq!(
        event_types(&events),
        vec!["connected", "task_started", "task_failed"]
    );
    assert_eq!(events[0].data()["subscriber_id"], json!(7));
    assert_eq!(
        events[2].data(),
        json!({
            "task_id": id.to_string(),
            "task_type": "insight",
            "error": "model refused",
        })
    );
}

#[tokio::test]
async fn reconnect_replays_missed_events() {
    let service = test_service();
    let subscriber = SubscriberId(9);
    let id = service
        .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| {
            succeed_after(Duration::from_millis(10), json!({"summary": "done"}))
        })
        .unwrap();
    service.executor().wait_idle().await;
    assert_eq!(wait_for_terminal(&service, id).await, TaskStatus::Completed);
    assert_eq!(service.hub().cached_len(subscriber), 2);

    let mut stream = service.open_stream(subscriber);
    let events = collect_events(&mut stream, 3).await;

    assert_eq!(
        event_types(&events),
        vec!["connected", "task_started", "task_completed"]
    );
    let completed = events[2].data();
    assert_eq!(completed["task_id"], json!(id.to_string()));
    assert_eq!(completed["result"], json!({"summary": "done"}));
    assert!(completed["processing_time"].as_f64().unwrap() >= 0.0);
    assert_eq!(service.hub().cached_len(subscriber), 0);
}

#[tokio::test]
async fn cache_keeps_newest_fifty() {
    let hub = NotificationHub::new(HubConfig::default());
    let subscriber = SubscriberId(11);
    let ids: Vec<TaskId> = (0..51).map(|_| TaskId::new()).collect();

    for id in &ids {
        let outcome = hub.publish(
            subscriber,
            EventKind::TaskStarted {
                task_id: *id,
                task_type: "bulk".to_string(),
            },
        );
        assert!(outcome.cached);
    }

    let cached = hub.cached_events(subscriber);
    assert_eq!(cached.len(), 50);
    let cached_ids: Vec<TaskId> = cached.iter().filter_map(|e| e.kind().task_id()).collect();
    assert_eq!(cached_ids, ids[1..].to_vec());
}

#[tokio::test]
async fn every_tab_receives_every_event() {
    let service = test_service();
    let subscriber = SubscriberId(5);
    let mut tab_a = service.open_stream(subscriber);
    let mut tab_b = service.open_stream(subscriber);
    assert_eq!(service.hub().channel_count(subscriber), 2);

    service
        .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| async {
            Ok(json!("ok"))
        })
        .unwrap();

    for tab in [&mut tab_a, &mut tab_b] {
        let events = collect_events(tab, 3).await;
        assert_eq!(
            event_types(&events),
            vec!["connected", "task_started", "task_completed"]
        );
    }
}

#[tokio::test]
async fn tasks_without_subscriber_publish_nothing() {
    let service = test_service();
    let id = service
        .submit_task("anonymous", TaskMetadata::new(), |_ctx| async { Ok(json!(1)) })
        .unwrap();
    service.executor().wait_idle().await;
    assert_eq!(wait_for_terminal(&service, id).await, TaskStatus::Completed);

    assert_eq!(service.hub().stats().cached_events, 0);
}

#[tokio::test]
async fn progress_arrives_between_start_and_completion() {
    let service = test_service();
    let subscriber = SubscriberId(21);
    let mut stream = service.open_stream(subscriber);

    service
        .submit_task("analysis", TaskMetadata::for_subscriber(subscriber), |ctx| async move {
            ctx.report_progress("extracting_concepts", 30);
            ctx.report_progress("generating_insights", 250);
            Ok(json!("ok"))
        })
        .unwrap();

    let events = collect_events(&mut stream, 5).await;
    assert_eq!(
        event_types(&events),
        vec![
            "connected",
            "task_started",
            "task_progress",
            "task_progress",
            "task_completed"
        ]
    );
    assert_eq!(events[2].data()["stage"], json!("extracting_concepts"));
    assert_eq!(events[3].data()["progress"], json!(100));
}

#[tokio::test]
async fn closed_tab_does_not_block_the_other() {
    let service = test_service();
    let subscriber = SubscriberId(8);
    let mut kept = service.open_stream(subscriber);
    let closed = service.open_stream(subscriber);
    drop(closed);
    assert_eq!(service.hub().channel_count(subscriber), 1);

    service
        .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| async {
            Ok(json!(null))
        })
        .unwrap();

    let events = collect_events(&mut kept, 3).await;
    assert_eq!(events[2].event_type(), "task_completed");
    assert_eq!(service.hub().cached_len(subscriber), 0);
}

#[tokio::test]
async fn events_published_after_disconnect_are_cached() {
    let service = test_service();
    let subscriber = SubscriberId(12);
    let stream = service.open_stream(subscriber);
    drop(stream);

    let id = service
        .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| async {
            Ok(json!(null))
        })
        .unwrap();
    service.executor().wait_idle().await;
    assert_eq!(wait_for_terminal(&service, id).await, TaskStatus::Completed);
    assert_eq!(service.hub().cached_len(subscriber), 2);

    let mut stream = service.open_stream(subscriber);
    let events = collect_events(&mut stream, 3).await;
    assert_eq!(
        event_types(&events),
        vec!["connected", "task_started", "task_completed"]
    );
}

#[tokio::test(start_paused = true)]
async fn cache_expires_after_retention_window() {
    let service = test_service();
    let subscriber = SubscriberId(13);
    let id = service
        .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| async {
            Ok(json!(null))
        })
        .unwrap();
    service.executor().wait_idle().await;
    assert_eq!(service.get_task(id).unwrap().status, TaskStatus::Completed);
    assert_eq!(service.hub().cached_len(subscriber), 2);

    tokio::time::advance(Duration::from_secs(301)).await;

    let mut stream = service.open_stream(subscriber);
    assert_eq!(service.hub().cached_len(subscriber), 0);
    assert_eq!(stream.next().await.unwrap().event_type(), "connected");
    // Nothing was replayed: the next thing the stream produces is a heartbeat
    assert_eq!(stream.next().await.unwrap().event_type(), "heartbeat");
}

#[tokio::test(start_paused = true)]
async fn cache_survives_a_short_disconnect() {
    let service = test_service();
    let subscriber = SubscriberId(14);
    drop(service.open_stream(subscriber));

    service
        .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| async {
            Ok(json!(null))
        })
        .unwrap();
    service.executor().wait_idle().await;
    tokio::time::advance(Duration::from_secs(60)).await;

    let mut stream = service.open_stream(subscriber);
    let events = collect_events(&mut stream, 3).await;
    assert_eq!(events[1].event_type(), "task_started");
}

#[tokio::test]
async fn small_channel_leaves_overflow_cached_until_next_connect() {
    let config = fast_config().with_hub(
        HubConfig::default()
            .with_channel_capacity(2)
            .with_heartbeat_interval_secs(1),
    );
    let service = test_service_with(config);
    let subscriber = SubscriberId(15);
    for _ in 0..3 {
        let id = service
            .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| async {
                Ok(json!(null))
            })
            .unwrap();
        service.executor().wait_idle().await;
        assert_eq!(wait_for_terminal(&service, id).await, TaskStatus::Completed);
    }
    assert_eq!(service.hub().cached_len(subscriber), 6);

    let first = service.open_stream(subscriber);
    assert_eq!(service.hub().cached_len(subscriber), 4);
    drop(first);

    let mut second = service.open_stream(subscriber);
    assert_eq!(service.hub().cached_len(subscriber), 2);
    assert_eq!(next_event(&mut second).await.event_type(), "connected");
}

#[tokio::test]
async fn sse_frames_render_each_event() {
    let service = test_service();
    let subscriber = SubscriberId(16);
    let mut stream = service.open_stream(subscriber);

    let frame = next_event(&mut stream).await.to_frame().to_string();
    assert!(frame.starts_with("event: connected\ndata: {"));
    assert!(frame.contains(r#""subscriber_id":16"#));
    assert!(frame.ends_with("}\n\n"));
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! End-to-end pipeline tests over the in-memory transport, aligned with user stories

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::Instant;
use workspace_dispatch::{
    AckEvent, AckStatus, ChangeEvent, ChangeStatus, DispatchConfig, DispatchError,
    MemoryTransport, Publisher,
};

const CHANGE_TOPIC: &str = "workspace.events";
const ACK_TOPIC: &str = "workspace.events.ack";

async fn open_publisher(transport: &MemoryTransport, config: DispatchConfig) -> Arc<Publisher> {
    Arc::new(
        Publisher::with_transport(Arc::new(transport.clone()), config)
            .await
            .expect("publisher should start over the memory transport"),
    )
}

/// Wait until `count` change events have been published
async fn published_at_least(transport: &MemoryTransport, count: usize) {
    while transport.published(CHANGE_TOPIC).len() < count {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// User Story: Reliable change dispatch
///
/// As an API handler
/// I want change events published even when the broker hiccups
/// So that a transient failure does not lose a workspace request
///
/// ```mermaid
/// sequenceDiagram
///     participant API
///     participant Queue
///     participant Loop as Publisher Loop
///     participant NATS
///
///     API->>Queue: enqueue(ws-1, creating)
///     Queue->>Loop: recv
///     Loop->>NATS: publish (fails)
///     Loop->>NATS: publish (fails)
///     Loop->>NATS: publish (ok)
/// ```
///
/// Acceptance Criteria:
/// - Event is published exactly once downstream
/// - Two failed attempts are recorded
/// - Payload is the event's JSON encoding
#[tokio::test(start_paused = true)]
async fn test_ws1_published_once_after_two_failures() {
    // Given a broker that rejects the next two publishes
    let transport = MemoryTransport::new();
    transport.fail_next_publishes(2);
    let publisher = open_publisher(&transport, DispatchConfig::default()).await;

    // When ws-1 creation is enqueued
    let event = ChangeEvent::creating("ws-1", "alice");
    publisher.enqueue(event.clone()).await.unwrap();
    published_at_least(&transport, 1).await;

    // Then it is published exactly once, after two failed attempts
    let published = transport.published(CHANGE_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].as_ref(), serde_json::to_vec(&event).unwrap().as_slice());

    let stats = publisher.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.dropped, 0);

    publisher.close().await;
}

/// User Story: Bounded retry
///
/// As an operator
/// I want a broker outage to cost a fixed number of attempts per event
/// So that the worker never spins forever on one request
///
/// Acceptance Criteria:
/// - Exactly `max_publish_attempts` attempts before the drop
/// - The loop keeps serving later events
#[tokio::test(start_paused = true)]
async fn test_exhausted_event_dropped_and_loop_survives() {
    // Given a broker that rejects exactly three publishes
    let transport = MemoryTransport::new();
    transport.fail_next_publishes(3);
    let publisher = open_publisher(&transport, DispatchConfig::default()).await;

    // When two events are enqueued
    publisher.enqueue(ChangeEvent::creating("ws-1", "alice")).await.unwrap();
    publisher.enqueue(ChangeEvent::updating("ws-5", "alice")).await.unwrap();
    published_at_least(&transport, 1).await;

    // Then the first is dropped after three attempts and the second goes through
    assert_eq!(transport.publish_attempts(), 4);
    let published = transport.published(CHANGE_TOPIC);
    let survivor = ChangeEvent::from_payload(&published[0]).unwrap();
    assert_eq!(survivor.name, "ws-5");
    assert_eq!(survivor.status, ChangeStatus::Updating);
    assert_eq!(publisher.stats().dropped, 1);

    publisher.close().await;
}

/// User Story: Waiting for the reconciler
///
/// As an API handler
/// I want to block until the reconciler confirms a change
/// So that I can report the provisioned resources to the user
///
/// ```mermaid
/// sequenceDiagram
///     participant API
///     participant Publisher
///     participant Reconciler
///
///     API->>Publisher: enqueue(ws-2, deleting)
///     API->>Publisher: wait_for_ack(ws-2)
///     Reconciler-->>Publisher: ack(ws-2, deleted)
///     Publisher-->>API: AckEvent
/// ```
///
/// Acceptance Criteria:
/// - The matching ack is returned
/// - The broker message is acknowledged
#[tokio::test(start_paused = true)]
async fn test_ws2_ack_returned_and_acknowledged() {
    let transport = MemoryTransport::new();
    let publisher = open_publisher(&transport, DispatchConfig::default()).await;

    // Given ws-2 deletion has been enqueued and a caller is waiting
    let event = ChangeEvent::deleting("ws-2", "alice");
    publisher.enqueue(event.clone()).await.unwrap();
    let waiter = publisher.register(&event).unwrap();

    // When the reconciler acknowledges within the timeout
    tokio::time::sleep(Duration::from_secs(3)).await;
    transport.inject(
        ACK_TOPIC,
        AckEvent::new(event.clone(), AckStatus::Deleted).to_payload().unwrap(),
    );

    // Then the waiter gets that ack and the message is acknowledged
    let ack = waiter.wait().await.unwrap();
    assert_eq!(ack.workspace(), "ws-2");
    assert_eq!(ack.status, AckStatus::Deleted);
    assert_eq!(ack.workspace_event, event);
    assert_eq!(transport.acked_count(), 1);

    publisher.close().await;
}

/// User Story: Fast reconciler
///
/// As an API handler
/// I want an acknowledgment that beats my `wait_for_ack` call to still reach me
/// So that a quick reconciler does not turn into a spurious timeout
///
/// Acceptance Criteria:
/// - The early ack is handed back to the broker once, not exhausted
/// - The late waiter receives it within the ack timeout
/// - The redelivered message is acknowledged
#[tokio::test(start_paused = true)]
async fn test_ack_before_wait_still_reaches_caller() {
    let transport = MemoryTransport::new();
    let publisher = open_publisher(&transport, DispatchConfig::default()).await;

    // Given ws-2 creation has been published
    let event = ChangeEvent::creating("ws-2", "alice");
    publisher.enqueue(event.clone()).await.unwrap();
    published_at_least(&transport, 1).await;

    // When the reconciler answers 5ms later, before anyone waits
    tokio::time::sleep(Duration::from_millis(5)).await;
    transport.inject(
        ACK_TOPIC,
        AckEvent::new(event.clone(), AckStatus::Created).to_payload().unwrap(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.nacked_count(), 1);

    // Then the caller that waits afterwards still receives it
    let started = Instant::now();
    let ack = publisher.wait_for_ack(&event).await.unwrap();
    assert_eq!(ack.status, AckStatus::Created);
    assert!(started.elapsed() < Duration::from_secs(30));

    tokio::task::yield_now().await;
    assert_eq!(transport.acked_count(), 1);

    publisher.close().await;
}

/// User Story: Bounded waits
///
/// As an API handler
/// I want waits to end at a known deadline
/// So that a silent reconciler turns into a clear, retryable error
///
/// Acceptance Criteria:
/// - `Timeout` after exactly the configured ack timeout
/// - The error is classified as retryable
#[tokio::test(start_paused = true)]
async fn test_wait_times_out_at_configured_deadline() {
    let transport = MemoryTransport::new();
    let config = DispatchConfig {
        ack_timeout: Duration::from_secs(12),
        ..DispatchConfig::default()
    };
    let publisher = open_publisher(&transport, config).await;

    let started = Instant::now();
    let err = publisher
        .wait_for_ack(&ChangeEvent::creating("ws-3", "alice"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(started.elapsed(), Duration::from_secs(12));
    assert_eq!(publisher.pending_acks(), 0);

    publisher.close().await;
}

/// User Story: Concurrent requests
///
/// As a platform serving many users
/// I want each waiting request to receive only its own acknowledgment
/// So that one user's result never leaks into another's response
///
/// Acceptance Criteria:
/// - Interleaved acks for two workspaces reach their own waiters
#[tokio::test(start_paused = true)]
async fn test_concurrent_waits_route_interleaved_acks() {
    let transport = MemoryTransport::new();
    let publisher = open_publisher(&transport, DispatchConfig::default()).await;

    let alpha = ChangeEvent::creating("ws-alpha", "alice");
    let beta = ChangeEvent::creating("ws-beta", "bob");

    let wait_alpha = {
        let publisher = Arc::clone(&publisher);
        let event = alpha.clone();
        tokio::spawn(async move { publisher.submit_and_wait(event).await })
    };
    let wait_beta = {
        let publisher = Arc::clone(&publisher);
        let event = beta.clone();
        tokio::spawn(async move { publisher.submit_and_wait(event).await })
    };

    published_at_least(&transport, 2).await;

    transport.inject(ACK_TOPIC, AckEvent::new(beta.clone(), AckStatus::Created).to_payload().unwrap());
    transport.inject(
        ACK_TOPIC,
        AckEvent::failed(alpha.clone(), "bucket quota exceeded")
            .to_payload()
            .unwrap(),
    );

    let ack_alpha = wait_alpha.await.unwrap().unwrap();
    let ack_beta = wait_beta.await.unwrap().unwrap();

    assert_eq!(ack_alpha.workspace_event, alpha);
    assert_eq!(ack_alpha.status, AckStatus::Failed);
    assert_eq!(ack_beta.workspace_event, beta);
    assert_eq!(ack_beta.status, AckStatus::Created);

    publisher.close().await;
}

/// User Story: Backpressure
///
/// As an API handler
/// I want a full queue to fail fast with a distinct error
/// So that I can answer "service unavailable" instead of hanging
///
/// Acceptance Criteria:
/// - `QueueFull` after the enqueue wait bound, never later
#[tokio::test(start_paused = true)]
async fn test_full_queue_reports_backpressure() {
    // Given a one-slot queue whose worker is stuck retrying
    let transport = MemoryTransport::new();
    transport.fail_next_publishes(1_000);
    let config = DispatchConfig {
        queue_capacity: 1,
        enqueue_timeout: Duration::from_secs(3),
        max_publish_attempts: 100,
        retry_delay: Duration::from_secs(60),
        drain_timeout: Duration::from_secs(1),
        ..DispatchConfig::default()
    };
    let publisher = open_publisher(&transport, config).await;

    publisher.enqueue(ChangeEvent::creating("ws-1", "alice")).await.unwrap();
    // Let the worker take ws-1 so ws-2 fills the only slot
    tokio::time::sleep(Duration::from_millis(10)).await;
    publisher.enqueue(ChangeEvent::creating("ws-2", "alice")).await.unwrap();

    // When a third event arrives
    let started = Instant::now();
    let err = publisher
        .enqueue(ChangeEvent::creating("ws-3", "alice"))
        .await
        .unwrap_err();

    // Then it is rejected after exactly the wait bound
    assert!(matches!(err, DispatchError::QueueFull { capacity: 1, .. }));
    assert_eq!(started.elapsed(), Duration::from_secs(3));

    publisher.close().await;
    assert_eq!(publisher.stats().abandoned, 2);
}

/// User Story: Clean shutdown
///
/// As an operator
/// I want shutdown to finish promptly and be safe to repeat
/// So that deploys never hang or crash on exit
///
/// Acceptance Criteria:
/// - Queued events are drained before the transport closes
/// - A second `close` is harmless
/// - Later calls fail with `Closed`
#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_and_is_repeatable() {
    let transport = MemoryTransport::new();
    let publisher = open_publisher(&transport, DispatchConfig::default()).await;

    for name in ["ws-1", "ws-2", "ws-3", "ws-4"] {
        publisher.enqueue(ChangeEvent::creating(name, "alice")).await.unwrap();
    }

    publisher.close().await;
    publisher.close().await;

    let names: Vec<String> = transport
        .published(CHANGE_TOPIC)
        .iter()
        .map(|payload| ChangeEvent::from_payload(payload).unwrap().name)
        .collect();
    assert_eq!(names, vec!["ws-1", "ws-2", "ws-3", "ws-4"]);
    assert!(transport.is_closed());
    assert_eq!(transport.subscriber_count(ACK_TOPIC), 0);

    assert!(matches!(
        publisher.enqueue(ChangeEvent::creating("ws-5", "alice")).await,
        Err(DispatchError::Closed)
    ));
}

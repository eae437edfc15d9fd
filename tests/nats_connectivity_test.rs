// Copyright (c) 2025 - Cowboy AI, Inc.
//! Live NATS tests
//!
//! These need a JetStream-enabled server at `NATS_URL` (default
//! `nats://localhost:4222`). Run with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream;
use workspace_dispatch::{
    AckEvent, AckStatus, ChangeEvent, DispatchConfig, NatsConfig, NatsTransport, Publisher,
    Transport, TransportError,
};

fn nats_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

#[tokio::test]
#[ignore = "requires a running NATS server"]
async fn test_publish_and_ack_over_jetstream() -> Result<(), Box<dyn std::error::Error>> {
    let suffix = uuid::Uuid::now_v7().simple().to_string();
    let stream_name = format!("TEST_WORKSPACE_{suffix}");
    let change_topic = format!("test.{suffix}.events");
    let ack_topic = format!("test.{suffix}.ack");

    // Provision the stream the way an operator would
    let client = async_nats::connect(nats_url()).await?;
    let js = jetstream::new(client);
    js.get_or_create_stream(jetstream::stream::Config {
        name: stream_name.clone(),
        subjects: vec![format!("test.{suffix}.>")],
        ..Default::default()
    })
    .await?;

    let config = DispatchConfig {
        nats: NatsConfig {
            servers: vec![nats_url()],
            stream: stream_name.clone(),
            ..NatsConfig::default()
        },
        change_topic: change_topic.clone(),
        ack_topic: ack_topic.clone(),
        ack_timeout: Duration::from_secs(10),
        ..DispatchConfig::default()
    };

    let publisher = Arc::new(Publisher::open(config).await?);
    let event = ChangeEvent::creating("ws-live", "integration");
    let waiter = publisher.register(&event)?;
    publisher.enqueue(event.clone()).await?;

    // Play the reconciler
    let ack = AckEvent::new(event.clone(), AckStatus::Created);
    js.publish(ack_topic, ack.to_payload()?.into()).await?.await?;

    let received = waiter.wait().await?;
    assert_eq!(received.workspace_event, event);

    publisher.close().await;
    js.delete_stream(&stream_name).await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running NATS server"]
async fn test_missing_stream_is_connection_error() {
    let config = NatsConfig {
        servers: vec![nats_url()],
        stream: format!("MISSING_{}", uuid::Uuid::now_v7().simple()),
        ..NatsConfig::default()
    };

    assert!(NatsTransport::connect(&config).await.is_err());
}

#[tokio::test]
#[ignore = "requires a running NATS server"]
async fn test_close_releases_connection() -> Result<(), Box<dyn std::error::Error>> {
    let suffix = uuid::Uuid::now_v7().simple().to_string();
    let stream_name = format!("TEST_CLOSE_{suffix}");
    let client = async_nats::connect(nats_url()).await?;
    let js = jetstream::new(client);
    js.get_or_create_stream(jetstream::stream::Config {
        name: stream_name.clone(),
        subjects: vec![format!("close.{suffix}.>")],
        ..Default::default()
    })
    .await?;

    let transport = NatsTransport::connect(&NatsConfig {
        servers: vec![nats_url()],
        stream: stream_name.clone(),
        ..NatsConfig::default()
    })
    .await?;

    transport.close().await?;
    transport.close().await?;

    assert!(transport.is_closed());
    assert_eq!(
        transport
            .publish(&format!("close.{suffix}.events"), "x".into())
            .await
            .unwrap_err(),
        TransportError::Closed
    );

    js.delete_stream(&stream_name).await?;
    Ok(())
}

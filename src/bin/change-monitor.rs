// Copyright (c) 2025 - Cowboy AI, Inc.
//! Change Monitor Service
//!
//! Consumes the workspace change topic with a plain durable consumer and logs
//! every change event. Messages that cannot be handled after three deliveries
//! are copied to `<topic>-dlq`.
//!
//! Run with: cargo run --bin change-monitor
//!
//! Prerequisites:
//! 1. NATS server running with the change stream provisioned (default: localhost:4222)
//! 2. `NATS_STREAM` naming the stream that carries `WORKSPACE_EVENTS_TOPIC`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use workspace_dispatch::dead_letter::{DeadLetterConsumer, MessageHandler};
use workspace_dispatch::{ChangeEvent, DispatchConfig, DispatchResult, NatsTransport, Transport};

/// Subscription name used by the monitor
const MONITOR_SUBSCRIPTION: &str = "workspace-change-monitor";

/// Logs each change event it sees
#[derive(Default)]
struct ChangeLogger {
    seen: AtomicU64,
}

#[async_trait]
impl MessageHandler for ChangeLogger {
    type Message = ChangeEvent;

    async fn handle(&self, event: ChangeEvent) -> DispatchResult<()> {
        event.validate()?;

        let total = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            workspace = %event.name,
            status = %event.status,
            owner = %event.owner,
            request_id = ?event.request_id,
            requested_at = %event.timestamp,
            total,
            "Workspace change observed"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = DispatchConfig::from_env().context("Failed to load configuration")?;
    info!(
        servers = ?config.nats.servers,
        stream = %config.nats.stream,
        topic = %config.change_topic,
        "Starting change monitor"
    );

    let transport: Arc<dyn Transport> = Arc::new(
        NatsTransport::connect(&config.nats)
            .await
            .context("Failed to connect to NATS")?,
    );

    let shutdown = CancellationToken::new();
    let consumer = DeadLetterConsumer::new(
        Arc::clone(&transport),
        config.change_topic.clone(),
        MONITOR_SUBSCRIPTION,
        Arc::new(ChangeLogger::default()),
    );
    let mut handle = consumer
        .spawn(shutdown.clone())
        .await
        .context("Failed to start consumer")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            shutdown.cancel();
            (&mut handle).await.context("Consumer task failed")?;
        }
        result = &mut handle => {
            result.context("Consumer task failed")?;
            warn!("Consumer stopped before shutdown was requested");
        }
    }

    transport.close().await.context("Failed to close NATS transport")?;

    info!("Change monitor stopped");
    Ok(())
}

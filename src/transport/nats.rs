// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS JetStream transport
//!
//! Publishes wait for the JetStream publish ack, so a returned `Ok` means the
//! stream stored the message. Subscriptions are durable pull consumers with
//! explicit acknowledgment. The stream itself is provisioned out of band; this
//! module only looks it up.
//!
//! `close` flushes and then drops the transport's client handles. Open
//! subscriptions keep their own handles, so the connection ends once they are
//! dropped too.

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, AckKind};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::NatsConfig;
use crate::errors::{TransportError, TransportResult};
use crate::transport::{Acknowledger, Delivery, Subscription, SubscriptionConfig, Transport};

struct NatsConnection {
    client: Client,
    jetstream: jetstream::Context,
}

/// JetStream-backed [`Transport`]
pub struct NatsTransport {
    connection: Mutex<Option<NatsConnection>>,
    stream: String,
}

impl NatsTransport {
    /// Connect and resolve the pre-provisioned stream
    ///
    /// If the stream cannot be found the connection is flushed and dropped
    /// before the error is returned.
    pub async fn connect(config: &NatsConfig) -> TransportResult<Self> {
        let connect_options = ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout);

        let client = async_nats::connect_with_options(config.servers.join(","), connect_options)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        info!(servers = ?config.servers, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());

        if let Err(e) = jetstream.get_stream(&config.stream).await {
            if let Err(flush_err) = client.flush().await {
                warn!(error = %flush_err, "Flush failed while releasing NATS connection");
            }
            return Err(TransportError::Connection(format!(
                "stream '{}' unavailable: {}",
                config.stream, e
            )));
        }

        Ok(Self {
            connection: Mutex::new(Some(NatsConnection { client, jetstream })),
            stream: config.stream.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<NatsConnection>> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// JetStream context of the open connection
    fn jetstream(&self) -> TransportResult<jetstream::Context> {
        self.lock()
            .as_ref()
            .map(|connection| connection.jetstream.clone())
            .ok_or(TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()> {
        let ack = self
            .jetstream()?
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        debug!(topic = %topic, stream_sequence = ack.sequence, "Published to JetStream");
        Ok(())
    }

    async fn subscribe(&self, config: SubscriptionConfig) -> TransportResult<Box<dyn Subscription>> {
        let stream = self
            .jetstream()?
            .get_stream(&self.stream)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                &config.name,
                pull::Config {
                    durable_name: Some(config.name.clone()),
                    filter_subject: config.topic.clone(),
                    ack_policy: AckPolicy::Explicit,
                    max_deliver: config.max_deliveries.map(i64::from).unwrap_or(-1),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?
            .map(|result| result.map_err(|e| e.to_string()))
            .boxed();

        info!(
            topic = %config.topic,
            subscription = %config.name,
            stream = %self.stream,
            "Subscribed to JetStream consumer"
        );

        Ok(Box::new(NatsSubscription { messages }))
    }

    async fn close(&self) -> TransportResult<()> {
        let taken = self.lock().take();
        let Some(connection) = taken else {
            return Ok(());
        };

        let flushed = connection
            .client
            .flush()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()));
        drop(connection);

        info!("NATS transport closed");
        flushed
    }
}

struct NatsSubscription {
    messages: BoxStream<'static, Result<jetstream::Message, String>>,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<TransportResult<Delivery>> {
        match self.messages.next().await? {
            Ok(message) => {
                let delivered = match message.info() {
                    Ok(info) => info.delivered.max(1) as u32,
                    Err(_) => 1,
                };
                let payload = message.payload.clone();
                Some(Ok(Delivery::new(
                    payload,
                    delivered,
                    Box::new(NatsAcker { message }),
                )))
            }
            Err(e) => Some(Err(TransportError::Receive(e))),
        }
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for NatsAcker {
    async fn ack(&self) -> TransportResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| TransportError::Acknowledge(e.to_string()))
    }

    async fn nack(&self, delay: Option<Duration>) -> TransportResult<()> {
        self.message
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(|e| TransportError::Acknowledge(e.to_string()))
    }

    async fn term(&self) -> TransportResult<()> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| TransportError::Acknowledge(e.to_string()))
    }
}

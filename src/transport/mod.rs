// Copyright (c) 2025 - Cowboy AI, Inc.
//! Message Transport Abstraction
//!
//! The dispatch pipeline only needs three things from a broker: ordered
//! publish to a topic, a durable subscription that yields deliveries, and
//! per-delivery acknowledgment. [`Transport`] captures exactly that so the
//! publisher can run over NATS JetStream in production and over
//! [`MemoryTransport`] in tests.
//!
//! ```text
//! Publisher Loop ──publish(topic, bytes)──▶ Transport
//! Ack Correlator ◀──Subscription::next()── Transport
//!                 ──Delivery::ack/nack/term──▶
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

use crate::errors::TransportResult;

pub mod memory;
pub mod nats;

pub use memory::MemoryTransport;
pub use nats::NatsTransport;

/// Durable subscription settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Topic to consume
    pub topic: String,
    /// Durable subscription (consumer) name
    pub name: String,
    /// Broker-side redelivery bound; `None` means unbounded
    pub max_deliveries: Option<u32>,
}

impl SubscriptionConfig {
    pub fn new(topic: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            name: name.into(),
            max_deliveries: None,
        }
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }
}

/// Pub/sub broker capability
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` to `topic`, returning once the broker has accepted it
    async fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()>;

    /// Open a durable subscription
    async fn subscribe(&self, config: SubscriptionConfig) -> TransportResult<Box<dyn Subscription>>;

    /// Release the broker connection
    async fn close(&self) -> TransportResult<()>;
}

/// Stream of deliveries from a subscription
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery; `None` once the subscription has ended
    async fn next(&mut self) -> Option<TransportResult<Delivery>>;
}

/// Broker-side settlement of a single delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Processed; do not redeliver
    async fn ack(&self) -> TransportResult<()>;
    /// Not processed here; redeliver, after `delay` when given
    async fn nack(&self, delay: Option<Duration>) -> TransportResult<()>;
    /// Unprocessable; never redeliver
    async fn term(&self) -> TransportResult<()>;
}

/// A message received from a subscription
pub struct Delivery {
    payload: Bytes,
    delivered: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Bytes, delivered: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            delivered,
            acker,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// How many times the broker has delivered this message, starting at 1
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    pub async fn ack(self) -> TransportResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(self) -> TransportResult<()> {
        self.acker.nack(None).await
    }

    /// Ask the broker to redeliver no sooner than `delay` from now
    pub async fn nack_with_delay(self, delay: Duration) -> TransportResult<()> {
        self.acker.nack(Some(delay)).await
    }

    pub async fn term(self) -> TransportResult<()> {
        self.acker.term().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_size", &self.payload.len())
            .field("delivered", &self.delivered)
            .finish()
    }
}

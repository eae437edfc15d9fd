// Copyright (c) 2025 - Cowboy AI, Inc.
//! Plain consumer with a dead-letter policy
//!
//! Used by consumers outside the publisher's own retry, such as the
//! `change-monitor` binary. A message whose handler keeps failing is
//! redelivered by the broker until `max_deliveries`, then copied to
//! `<topic>-dlq` and acknowledged. Undecodable messages go to the dead-letter
//! topic on first sight.
//!
//! ```text
//! topic ──▶ decode ──▶ handler ──ok──▶ ack
//!              │          │
//!              │          └─err─▶ delivered < max ? nack : dlq + ack
//!              └─err──────────────▶ dlq + ack
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{DispatchError, DispatchResult};
use crate::subjects::dead_letter_topic;
use crate::transport::{Delivery, SubscriptionConfig, Transport};

/// Redelivery bound and where exhausted messages go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    pub max_deliveries: u32,
    pub dead_letter_topic: String,
}

impl DeadLetterPolicy {
    /// Default deliveries before a message is dead-lettered
    pub const DEFAULT_MAX_DELIVERIES: u32 = 3;

    /// Default policy for `topic`: 3 deliveries, then `<topic>-dlq`
    pub fn for_topic(topic: &str) -> Self {
        Self {
            max_deliveries: Self::DEFAULT_MAX_DELIVERIES,
            dead_letter_topic: dead_letter_topic(topic),
        }
    }
}

/// Trait for handling messages from a plain consumer
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The type of message this handler processes
    type Message: DeserializeOwned + Send;

    /// Handle a message; an error asks for redelivery
    async fn handle(&self, message: Self::Message) -> DispatchResult<()>;
}

/// Subscription plus handler plus dead-letter policy
pub struct DeadLetterConsumer<H> {
    transport: Arc<dyn Transport>,
    topic: String,
    subscription: String,
    policy: DeadLetterPolicy,
    handler: Arc<H>,
}

impl<H> DeadLetterConsumer<H>
where
    H: MessageHandler + 'static,
{
    pub fn new(
        transport: Arc<dyn Transport>,
        topic: impl Into<String>,
        subscription: impl Into<String>,
        handler: Arc<H>,
    ) -> Self {
        let topic = topic.into();
        Self {
            policy: DeadLetterPolicy::for_topic(&topic),
            transport,
            topic,
            subscription: subscription.into(),
            handler,
        }
    }

    pub fn with_policy(mut self, policy: DeadLetterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Subscribe and process messages until `shutdown` fires or the subscription ends
    pub async fn spawn(self, shutdown: CancellationToken) -> DispatchResult<JoinHandle<()>> {
        if self.policy.max_deliveries == 0 {
            return Err(DispatchError::Configuration(
                "dead-letter max deliveries must be at least 1".into(),
            ));
        }

        let mut subscription = self
            .transport
            .subscribe(
                SubscriptionConfig::new(self.topic.clone(), self.subscription.clone())
                    .with_max_deliveries(self.policy.max_deliveries),
            )
            .await?;

        info!(
            topic = %self.topic,
            subscription = %self.subscription,
            dead_letter_topic = %self.policy.dead_letter_topic,
            max_deliveries = self.policy.max_deliveries,
            "Started dead-letter consumer"
        );

        Ok(tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    next = subscription.next() => next,
                };

                match next {
                    Some(Ok(delivery)) => self.process(delivery).await,
                    Some(Err(e)) => warn!(topic = %self.topic, error = %e, "Receive failed"),
                    None => {
                        warn!(topic = %self.topic, "Subscription ended");
                        break;
                    }
                }
            }

            info!(topic = %self.topic, "Dead-letter consumer stopped");
        }))
    }

    async fn process(&self, delivery: Delivery) {
        let message = match serde_json::from_slice::<H::Message>(delivery.payload()) {
            Ok(message) => message,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Undecodable message, dead-lettering");
                self.dead_letter(delivery).await;
                return;
            }
        };

        match self.handler.handle(message).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    warn!(topic = %self.topic, error = %e, "Failed to ack message");
                }
                debug!(topic = %self.topic, "Message processed");
            }
            Err(e) if delivery.delivered() >= self.policy.max_deliveries => {
                error!(
                    topic = %self.topic,
                    delivered = delivery.delivered(),
                    error = %e,
                    "Handler failed on final delivery, dead-lettering"
                );
                self.dead_letter(delivery).await;
            }
            Err(e) => {
                warn!(
                    topic = %self.topic,
                    delivered = delivery.delivered(),
                    max_deliveries = self.policy.max_deliveries,
                    error = %e,
                    "Handler failed, requesting redelivery"
                );
                if let Err(e) = delivery.nack().await {
                    warn!(topic = %self.topic, error = %e, "Failed to nack message");
                }
            }
        }
    }

    async fn dead_letter(&self, delivery: Delivery) {
        match self
            .transport
            .publish(&self.policy.dead_letter_topic, delivery.payload().clone())
            .await
        {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    warn!(topic = %self.topic, error = %e, "Failed to ack dead-lettered message");
                }
            }
            Err(e) => {
                error!(
                    topic = %self.topic,
                    dead_letter_topic = %self.policy.dead_letter_topic,
                    error = %e,
                    "Dead-letter publish failed"
                );
                if let Err(e) = delivery.nack().await {
                    warn!(topic = %self.topic, error = %e, "Failed to nack message");
                }
            }
        }
    }
}

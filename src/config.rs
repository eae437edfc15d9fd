// Copyright (c) 2025 - Cowboy AI, Inc.

//! Configuration for change-event dispatch
//!
//! Values come from the environment; nothing here is computed.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `NATS_URL` | `nats://localhost:4222` |
//! | `NATS_STREAM` | `WORKSPACE_EVENTS` |
//! | `WORKSPACE_EVENTS_TOPIC` | `workspace.events` |
//! | `WORKSPACE_ACK_TOPIC` | `workspace.events.ack` |
//! | `WORKSPACE_ACK_SUBSCRIPTION` | `workspace-dispatch-ack` |
//! | `DISPATCH_QUEUE_CAPACITY` | `100` |
//! | `DISPATCH_ENQUEUE_TIMEOUT_SECS` | `5` |
//! | `DISPATCH_MAX_PUBLISH_ATTEMPTS` | `3` |
//! | `DISPATCH_RETRY_DELAY_SECS` | `2` |
//! | `DISPATCH_ACK_TIMEOUT_SECS` | `30` |
//! | `DISPATCH_DRAIN_TIMEOUT_SECS` | `5` |
//! | `DISPATCH_ACK_MAX_DELIVERIES` | `3` |

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{DispatchError, DispatchResult};
use crate::subjects::{
    validate_subscription_name, validate_topic, DEFAULT_ACK_SUBSCRIPTION, DEFAULT_ACK_TOPIC,
    DEFAULT_CHANGE_TOPIC,
};

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    /// NATS server URLs
    pub servers: Vec<String>,
    /// Client name
    pub name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// JetStream stream that carries the change and ack topics
    pub stream: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "workspace-dispatch".to_string(),
            connect_timeout: Duration::from_secs(10),
            stream: "WORKSPACE_EVENTS".to_string(),
        }
    }
}

/// Full dispatch configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub nats: NatsConfig,
    /// Outbound change topic
    pub change_topic: String,
    /// Acknowledgment topic
    pub ack_topic: String,
    /// Durable subscription name on the ack topic
    pub ack_subscription: String,
    /// Dispatch queue capacity
    pub queue_capacity: usize,
    /// How long `enqueue` waits for capacity
    pub enqueue_timeout: Duration,
    /// Total publish attempts per event
    pub max_publish_attempts: u32,
    /// Fixed delay between publish attempts
    pub retry_delay: Duration,
    /// How long `wait_for_ack` waits
    pub ack_timeout: Duration,
    /// How long `close` lets the publisher loop drain
    pub drain_timeout: Duration,
    /// Redelivery bound for unmatched acks
    pub ack_max_deliveries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            change_topic: DEFAULT_CHANGE_TOPIC.to_string(),
            ack_topic: DEFAULT_ACK_TOPIC.to_string(),
            ack_subscription: DEFAULT_ACK_SUBSCRIPTION.to_string(),
            queue_capacity: 100,
            enqueue_timeout: Duration::from_secs(5),
            max_publish_attempts: 3,
            retry_delay: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
            ack_max_deliveries: 3,
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> DispatchResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> DispatchResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let servers = match lookup("NATS_URL") {
            Some(urls) => urls
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.nats.servers,
        };

        let config = Self {
            nats: NatsConfig {
                servers,
                stream: lookup("NATS_STREAM").unwrap_or(defaults.nats.stream),
                ..defaults.nats
            },
            change_topic: lookup("WORKSPACE_EVENTS_TOPIC").unwrap_or(defaults.change_topic),
            ack_topic: lookup("WORKSPACE_ACK_TOPIC").unwrap_or(defaults.ack_topic),
            ack_subscription: lookup("WORKSPACE_ACK_SUBSCRIPTION")
                .unwrap_or(defaults.ack_subscription),
            queue_capacity: parse_or(&lookup, "DISPATCH_QUEUE_CAPACITY", defaults.queue_capacity)?,
            enqueue_timeout: secs_or(&lookup, "DISPATCH_ENQUEUE_TIMEOUT_SECS", defaults.enqueue_timeout)?,
            max_publish_attempts: parse_or(
                &lookup,
                "DISPATCH_MAX_PUBLISH_ATTEMPTS",
                defaults.max_publish_attempts,
            )?,
            retry_delay: secs_or(&lookup, "DISPATCH_RETRY_DELAY_SECS", defaults.retry_delay)?,
            ack_timeout: secs_or(&lookup, "DISPATCH_ACK_TIMEOUT_SECS", defaults.ack_timeout)?,
            drain_timeout: secs_or(&lookup, "DISPATCH_DRAIN_TIMEOUT_SECS", defaults.drain_timeout)?,
            ack_max_deliveries: parse_or(
                &lookup,
                "DISPATCH_ACK_MAX_DELIVERIES",
                defaults.ack_max_deliveries,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// How long the broker holds back an unmatched ack before redelivering it
    ///
    /// The redeliveries are spread over `ack_timeout`, so an ack that arrives
    /// before its waiter registers is still offered within the wait window.
    pub fn unmatched_ack_delay(&self) -> Duration {
        self.ack_timeout / self.ack_max_deliveries.saturating_sub(1).max(1)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> DispatchResult<()> {
        if self.nats.servers.is_empty() {
            return Err(DispatchError::Configuration("no NATS servers configured".into()));
        }
        if self.queue_capacity == 0 {
            return Err(DispatchError::Configuration("queue capacity must be at least 1".into()));
        }
        if self.max_publish_attempts == 0 {
            return Err(DispatchError::Configuration(
                "max publish attempts must be at least 1".into(),
            ));
        }
        if self.ack_max_deliveries == 0 {
            return Err(DispatchError::Configuration(
                "ack max deliveries must be at least 1".into(),
            ));
        }
        if self.change_topic == self.ack_topic {
            return Err(DispatchError::Configuration(
                "change and ack topics must differ".into(),
            ));
        }

        validate_topic(&self.change_topic)?;
        validate_topic(&self.ack_topic)?;
        validate_subscription_name(&self.ack_subscription)?;
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> DispatchResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DispatchError::Configuration(format!("{key} is not a valid number: {raw:?}"))),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> DispatchResult<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

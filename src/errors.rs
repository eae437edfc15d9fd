// Copyright (c) 2025 - Cowboy AI, Inc.

//! Error types for change-event dispatch

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a message transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Broker connection could not be established or was lost
    #[error("Transport connection error: {0}")]
    Connection(String),

    /// Publish was rejected or not confirmed
    #[error("Transport publish error: {0}")]
    Publish(String),

    /// Subscription could not be created
    #[error("Transport subscribe error: {0}")]
    Subscribe(String),

    /// Ack, nack or term could not be delivered to the broker
    #[error("Transport acknowledge error: {0}")]
    Acknowledge(String),

    /// A subscription failed while receiving
    #[error("Transport receive error: {0}")]
    Receive(String),

    /// The transport has been closed
    #[error("Transport is closed")]
    Closed,
}

/// Errors that can occur while dispatching change events
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Payload could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Broker call failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Dispatch queue stayed full for the whole enqueue wait
    #[error("Dispatch queue full (capacity {capacity}) after waiting {waited:?}")]
    QueueFull { capacity: usize, waited: Duration },

    /// No acknowledgment arrived within the wait window
    #[error("No acknowledgment for workspace '{workspace}' within {waited:?}")]
    Timeout { workspace: String, waited: Duration },

    /// Inbound payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Event failed validation before enqueue
    #[error("Invalid change event: {0}")]
    InvalidEvent(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller cancelled the wait
    #[error("Wait for acknowledgment was cancelled")]
    Cancelled,

    /// The publisher has been closed
    #[error("Publisher is closed")]
    Closed,
}

impl DispatchError {
    /// Whether re-running the whole operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::QueueFull { .. }
                | DispatchError::Timeout { .. }
                | DispatchError::Transport(_)
        )
    }
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Encoding(err.to_string())
    }
}

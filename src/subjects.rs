// Copyright (c) 2025 - Cowboy AI, Inc.

//! NATS subject names for workspace change events
//!
//! ```text
//! workspace.events        change requests (publisher → reconciler)
//! workspace.events.ack    reconciler acknowledgments
//! workspace.events-dlq    dead letters from the plain consumer
//! ```
//!
//! # Examples
//!
//! ```rust
//! use workspace_dispatch::subjects::{dead_letter_topic, validate_topic};
//!
//! assert_eq!(dead_letter_topic("workspace.events"), "workspace.events-dlq");
//! assert!(validate_topic("workspace.events").is_ok());
//! assert!(validate_topic("workspace..events").is_err());
//! ```

use crate::errors::{DispatchError, DispatchResult};

/// Default outbound change topic
pub const DEFAULT_CHANGE_TOPIC: &str = "workspace.events";

/// Default acknowledgment topic
pub const DEFAULT_ACK_TOPIC: &str = "workspace.events.ack";

/// Default durable subscription name for the ack listener
pub const DEFAULT_ACK_SUBSCRIPTION: &str = "workspace-dispatch-ack";

/// Suffix appended to a topic to form its dead-letter topic
pub const DEAD_LETTER_SUFFIX: &str = "-dlq";

/// Dead-letter topic for `topic`
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

/// Check that `topic` is a concrete, publishable NATS subject
///
/// Tokens are separated by `.`, must be non-empty, and may not contain
/// whitespace or the wildcards `*` and `>`.
pub fn validate_topic(topic: &str) -> DispatchResult<()> {
    if topic.is_empty() {
        return Err(DispatchError::Configuration("topic is empty".into()));
    }

    for token in topic.split('.') {
        if token.is_empty() {
            return Err(DispatchError::Configuration(format!(
                "topic has an empty token: {topic}"
            )));
        }

        if token
            .chars()
            .any(|c| c.is_whitespace() || c == '*' || c == '>')
        {
            return Err(DispatchError::Configuration(format!(
                "topic must not contain whitespace or wildcards: {topic}"
            )));
        }
    }

    Ok(())
}

/// Check that `name` is usable as a durable consumer name
pub fn validate_subscription_name(name: &str) -> DispatchResult<()> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
    {
        return Err(DispatchError::Configuration(format!(
            "invalid subscription name: {name:?}"
        )));
    }
    Ok(())
}

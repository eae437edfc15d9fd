// Copyright (c) 2025 - Cowboy AI, Inc.
//! Workspace Change Events
//!
//! A change event is the request half of the pipeline: it names the workspace,
//! the requested lifecycle transition and who asked for it. Events are
//! immutable once handed to the dispatch queue, which takes ownership.
//!
//! Timestamps issued by [`ChangeEvent::new`] never go backwards within a
//! process, even if the wall clock is stepped back.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use crate::errors::{DispatchError, DispatchResult};
use crate::events::AckStatus;

/// Requested workspace lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Provision a new workspace
    Creating,
    /// Apply changes to an existing workspace
    Updating,
    /// Tear a workspace down
    Deleting,
}

impl ChangeStatus {
    /// Terminal ack status a successful reconcile reports for this request
    pub fn expected_outcome(&self) -> AckStatus {
        match self {
            ChangeStatus::Creating => AckStatus::Created,
            ChangeStatus::Updating => AckStatus::Updated,
            ChangeStatus::Deleting => AckStatus::Deleted,
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStatus::Creating => write!(f, "creating"),
            ChangeStatus::Updating => write!(f, "updating"),
            ChangeStatus::Deleting => write!(f, "deleting"),
        }
    }
}

/// Latest timestamp handed out, in nanoseconds since the epoch
static LAST_ISSUED_NANOS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current time, clamped to the latest timestamp already issued
fn monotonic_now() -> DateTime<Utc> {
    let now = Utc::now();
    let Some(nanos) = now.timestamp_nanos_opt() else {
        return now;
    };
    let floor = LAST_ISSUED_NANOS.fetch_max(nanos, Ordering::AcqRel);
    not_before(now, floor)
}

fn not_before(now: DateTime<Utc>, floor_nanos: i64) -> DateTime<Utc> {
    match now.timestamp_nanos_opt() {
        Some(nanos) if nanos < floor_nanos => Utc.timestamp_nanos(floor_nanos),
        _ => now,
    }
}

/// Requested mutation of a workspace, published to the change topic
///
/// The JSON field names are shared with the downstream reconciler and must
/// not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Workspace name
    pub name: String,

    /// Requested transition
    pub status: ChangeStatus,

    /// When the request was made
    pub timestamp: DateTime<Utc>,

    /// Requesting account owner
    pub owner: String,

    /// Cloud account the workspace lives in, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Unique request id (UUID v7), echoed back by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl ChangeEvent {
    /// Maximum workspace name length (one DNS label)
    pub const MAX_NAME_LENGTH: usize = 63;

    /// Create a new change event stamped with the current time and a fresh request id
    pub fn new(name: impl Into<String>, status: ChangeStatus, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            timestamp: monotonic_now(),
            owner: owner.into(),
            account: None,
            request_id: Some(Uuid::now_v7()),
        }
    }

    pub fn creating(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::new(name, ChangeStatus::Creating, owner)
    }

    pub fn updating(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::new(name, ChangeStatus::Updating, owner)
    }

    pub fn deleting(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::new(name, ChangeStatus::Deleting, owner)
    }

    /// Attach the cloud account
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Validate the event before it is queued
    ///
    /// # Invariants
    /// - Name is 1..=63 characters
    /// - Name holds only lowercase ASCII alphanumerics and hyphens
    /// - Name does not start or end with a hyphen
    /// - Owner is non-empty
    pub fn validate(&self) -> DispatchResult<()> {
        let name = &self.name;

        if name.is_empty() {
            return Err(DispatchError::InvalidEvent("workspace name is empty".into()));
        }

        if name.len() > Self::MAX_NAME_LENGTH {
            return Err(DispatchError::InvalidEvent(format!(
                "workspace name exceeds {} characters: {}",
                Self::MAX_NAME_LENGTH,
                name.len()
            )));
        }

        if let Some(ch) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(DispatchError::InvalidEvent(format!(
                "invalid character in workspace name: {ch:?}"
            )));
        }

        if name.starts_with('-') || name.ends_with('-') {
            return Err(DispatchError::InvalidEvent(format!(
                "workspace name cannot start or end with hyphen: {name}"
            )));
        }

        if self.owner.trim().is_empty() {
            return Err(DispatchError::InvalidEvent("owner is empty".into()));
        }

        Ok(())
    }

    /// Serialize to the wire payload
    pub fn to_payload(&self) -> DispatchResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a wire payload
    pub fn from_payload(payload: &[u8]) -> DispatchResult<Self> {
        serde_json::from_slice(payload).map_err(|e| DispatchError::Decode(e.to_string()))
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Acknowledgment Events
//!
//! Acks are produced by the downstream reconciler once it has applied (or
//! failed to apply) a change. They echo the originating change event verbatim
//! under `workspace_event` so the waiting request can be found again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{DispatchError, DispatchResult};
use crate::events::ChangeEvent;

/// Terminal outcome reported by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Created,
    Updated,
    Deleted,
    Failed,
    /// Any status string this version does not know about
    #[serde(other)]
    Unknown,
}

impl AckStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, AckStatus::Created | AckStatus::Updated | AckStatus::Deleted)
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStatus::Created => write!(f, "created"),
            AckStatus::Updated => write!(f, "updated"),
            AckStatus::Deleted => write!(f, "deleted"),
            AckStatus::Failed => write!(f, "failed"),
            AckStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// IAM role provisioned for the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDetails {
    pub role_name: String,
    pub role_arn: String,
}

/// Object-store bucket provisioned for the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreDetails {
    pub bucket_name: String,
    pub bucket_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Block-store volume provisioned for the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStoreDetails {
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gib: Option<u64>,
}

/// Outcome of a change event as reported by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckEvent {
    /// The originating change event, verbatim
    pub workspace_event: ChangeEvent,

    /// Terminal status
    pub status: AckStatus,

    /// Failure detail when `status` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleDetails>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store: Option<ObjectStoreDetails>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_store: Option<BlockStoreDetails>,
}

impl AckEvent {
    /// Build an ack for `event`. Only reconcilers and test harnesses construct acks.
    pub fn new(workspace_event: ChangeEvent, status: AckStatus) -> Self {
        Self {
            workspace_event,
            status,
            error: None,
            role: None,
            object_store: None,
            block_store: None,
        }
    }

    /// Build a failed ack carrying an error message
    pub fn failed(workspace_event: ChangeEvent, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(workspace_event, AckStatus::Failed)
        }
    }

    pub fn with_role(mut self, role: RoleDetails) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_object_store(mut self, object_store: ObjectStoreDetails) -> Self {
        self.object_store = Some(object_store);
        self
    }

    pub fn with_block_store(mut self, block_store: BlockStoreDetails) -> Self {
        self.block_store = Some(block_store);
        self
    }

    /// Workspace this ack refers to
    pub fn workspace(&self) -> &str {
        &self.workspace_event.name
    }

    pub fn to_payload(&self) -> DispatchResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an inbound ack payload
    pub fn from_payload(payload: &[u8]) -> DispatchResult<Self> {
        serde_json::from_slice(payload).map_err(|e| DispatchError::Decode(e.to_string()))
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for workspace-dispatch
//!
//! Deterministic change and ack events for wire-format tests. All UUIDs and
//! timestamps are fixed constants so golden payloads stay reproducible.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use workspace_dispatch::events::{
    AckEvent, AckStatus, BlockStoreDetails, ChangeEvent, ChangeStatus, ObjectStoreDetails,
    RoleDetails,
};

pub const REQUEST_ID_1: &str = "01934f4a-0001-7000-8000-000000000001";

// 2026-01-19T12:00:00Z
pub const FIXED_TIMESTAMP: &str = "2026-01-19T12:00:00Z";

pub fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("Invalid UUID in test fixture")
}

pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(FIXED_TIMESTAMP)
        .expect("Invalid timestamp in test fixture")
        .with_timezone(&Utc)
}

/// ws-1 creation requested by alice
pub fn change_event_fixture() -> ChangeEvent {
    ChangeEvent {
        name: "ws-1".to_string(),
        status: ChangeStatus::Creating,
        timestamp: fixed_timestamp(),
        owner: "alice".to_string(),
        account: Some("123456789012".to_string()),
        request_id: Some(parse_uuid(REQUEST_ID_1)),
    }
}

/// Successful ack for [`change_event_fixture`] with every result block
pub fn created_ack_fixture() -> AckEvent {
    AckEvent::new(change_event_fixture(), AckStatus::Created)
        .with_role(RoleDetails {
            role_name: "ws-1-role".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/ws-1-role".to_string(),
        })
        .with_object_store(ObjectStoreDetails {
            bucket_name: "ws-1-data".to_string(),
            bucket_arn: "arn:aws:s3:::ws-1-data".to_string(),
            region: Some("eu-west-1".to_string()),
        })
        .with_block_store(BlockStoreDetails {
            volume_id: "vol-0123456789abcdef0".to_string(),
            availability_zone: Some("eu-west-1a".to_string()),
            size_gib: Some(50),
        })
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Change Event Wire Encoding
//!
//! The reconciler decodes whatever the publisher encodes and echoes it back
//! inside acks, so encoding must be lossless for every valid event.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;
use workspace_dispatch::{AckEvent, AckStatus, ChangeEvent, ChangeStatus};

fn status_strategy() -> impl Strategy<Value = ChangeStatus> {
    prop_oneof![
        Just(ChangeStatus::Creating),
        Just(ChangeStatus::Updating),
        Just(ChangeStatus::Deleting),
    ]
}

fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    // 2000-01-01 .. 2100-01-01 with nanosecond precision
    (946_684_800i64..4_102_444_800i64, 0u32..1_000_000_000u32)
        .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
}

prop_compose! {
    fn change_event_strategy()(
        name in "[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?",
        status in status_strategy(),
        timestamp in timestamp_strategy(),
        owner in "[a-zA-Z0-9@._-]{1,32}",
        account in proptest::option::of("[0-9]{12}"),
        request_id in proptest::option::of(any::<u128>().prop_map(Uuid::from_u128)),
    ) -> ChangeEvent {
        ChangeEvent { name, status, timestamp, owner, account, request_id }
    }
}

proptest! {
    #[test]
    fn prop_change_event_round_trips(event in change_event_strategy()) {
        let payload = event.to_payload().unwrap();
        let decoded = ChangeEvent::from_payload(&payload).unwrap();
        prop_assert_eq!(decoded, event);
    }

    #[test]
    fn prop_generated_events_are_valid(event in change_event_strategy()) {
        prop_assert!(event.validate().is_ok());
    }

    #[test]
    fn prop_ack_embeds_event_verbatim(event in change_event_strategy()) {
        let ack = AckEvent::new(event.clone(), event.status.expected_outcome());
        let decoded = AckEvent::from_payload(&ack.to_payload().unwrap()).unwrap();
        prop_assert_eq!(&decoded.workspace_event, &event);
        prop_assert!(decoded.status.is_success());
        prop_assert_ne!(decoded.status, AckStatus::Failed);
    }
}

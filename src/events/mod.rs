// Copyright (c) 2025 - Cowboy AI, Inc.
//! Workspace Change Events
//!
//! Wire entities exchanged with the downstream reconciler.
//!
//! # Event Flow
//!
//! ```text
//! API request → ChangeEvent → change topic → Reconciler
//!                                                ↓
//! waiting request ← Ack Correlator ← ack topic ← AckEvent
//! ```
//!
//! # Correlation
//!
//! Every [`ChangeEvent`] carries a `request_id` (UUID v7). The reconciler
//! echoes the whole event back inside the [`AckEvent`], so the waiting request
//! is found by id. Acks from reconcilers that drop the id fall back to the
//! workspace name.
//!
//! # Module Organization
//!
//! - [`change`] - Change requests
//! - [`ack`] - Reconciler acknowledgments

pub mod ack;
pub mod change;

pub use ack::{AckEvent, AckStatus, BlockStoreDetails, ObjectStoreDetails, RoleDetails};
pub use change::{ChangeEvent, ChangeStatus};

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Ack Correlator
//!
//! Matches reconciler acknowledgments to the requests waiting for them.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────┐
//! ack topic ──next()──▶ │ listener (one task)  │
//!                       └──────────┬───────────┘
//!                                  │ take_match(ack)
//!                       ┌──────────▼───────────┐
//!                       │ pending table        │ request_id → oneshot
//!                       └──┬────────┬───────┬──┘
//!                          ▼        ▼       ▼
//!                      AckWaiter AckWaiter AckWaiter
//! ```
//!
//! One listener owns the ack subscription, so concurrent waiters never race
//! each other for messages. Each waiter holds a single-use slot.
//!
//! # Matching
//!
//! - Ack carries `request_id`: only the waiter registered under that id.
//! - Ack without `request_id`: the earliest-registered waiter for the same
//!   workspace name.
//!
//! Matched messages are acked to the broker. Unmatched ones are nacked with a
//! redelivery delay so the broker offers them again later (bounded by the
//! subscription's max deliveries), either to a waiter that registered late or
//! to another process that holds the waiter. Undecodable ones are terminated.
//!
//! # Wait states
//!
//! ```text
//! Waiting ─┬─▶ Matched
//!          ├─▶ TimedOut
//!          ├─▶ Cancelled
//!          └─▶ Closed
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{DispatchError, DispatchResult};
use crate::events::{AckEvent, ChangeEvent};
use crate::transport::{Delivery, Subscription};

/// Pause after a receive error before polling the subscription again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Correlation record for one waiting request
struct PendingRequest {
    workspace: String,
    seq: u64,
    responder: oneshot::Sender<AckEvent>,
}

#[derive(Default)]
struct PendingState {
    next_seq: u64,
    waiters: HashMap<Uuid, PendingRequest>,
    closed: bool,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    state: Mutex<PendingState>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, key: Uuid, workspace: String) -> DispatchResult<oneshot::Receiver<AckEvent>> {
        let mut state = self.lock();

        if state.closed {
            return Err(DispatchError::Closed);
        }
        if state.waiters.contains_key(&key) {
            return Err(DispatchError::InvalidEvent(format!(
                "an acknowledgment wait is already registered for request {key}"
            )));
        }

        let (responder, receiver) = oneshot::channel();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.waiters.insert(
            key,
            PendingRequest {
                workspace,
                seq,
                responder,
            },
        );

        Ok(receiver)
    }

    fn remove(&self, key: &Uuid) -> Option<PendingRequest> {
        self.lock().waiters.remove(key)
    }

    /// Remove and return the waiter `ack` belongs to, if any
    fn take_match(&self, ack: &AckEvent) -> Option<PendingRequest> {
        let mut state = self.lock();

        let key = match ack.workspace_event.request_id {
            Some(id) => id,
            None => state
                .waiters
                .iter()
                .filter(|(_, pending)| pending.workspace == ack.workspace())
                .min_by_key(|(_, pending)| pending.seq)
                .map(|(key, _)| *key)?,
        };

        state.waiters.remove(&key)
    }

    fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Refuse new waiters and fail the current ones with `Closed`
    fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let failed = state.waiters.len();
        // Dropping the responders wakes every waiter
        state.waiters.clear();
        failed
    }
}

/// A registered wait for one change event's acknowledgment
///
/// Dropping the waiter unregisters it.
pub struct AckWaiter {
    key: Uuid,
    workspace: String,
    deadline: Instant,
    timeout: Duration,
    receiver: oneshot::Receiver<AckEvent>,
    table: Arc<PendingTable>,
}

impl AckWaiter {
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Wait until the acknowledgment arrives or the deadline passes
    pub async fn wait(self) -> DispatchResult<AckEvent> {
        self.wait_inner(None).await
    }

    /// Like [`AckWaiter::wait`], but also returns `Cancelled` when `cancel` fires
    pub async fn wait_with_cancel(self, cancel: &CancellationToken) -> DispatchResult<AckEvent> {
        self.wait_inner(Some(cancel)).await
    }

    async fn wait_inner(mut self, cancel: Option<&CancellationToken>) -> DispatchResult<AckEvent> {
        let result = tokio::select! {
            biased;
            ack = &mut self.receiver => ack.map_err(|_| DispatchError::Closed),
            _ = cancelled(cancel) => Err(DispatchError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(DispatchError::Timeout {
                workspace: self.workspace.clone(),
                waited: self.timeout,
            }),
        };

        match &result {
            Ok(ack) => debug!(
                workspace = %self.workspace,
                request_id = %self.key,
                status = %ack.status,
                "Acknowledgment matched"
            ),
            Err(e) => debug!(
                workspace = %self.workspace,
                request_id = %self.key,
                error = %e,
                "Stopped waiting for acknowledgment"
            ),
        }

        result
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        self.table.remove(&self.key);
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Shared acknowledgment listener plus its table of waiters
///
/// Dropping the correlator stops the listener.
pub struct AckCorrelator {
    table: Arc<PendingTable>,
    timeout: Duration,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AckCorrelator {
    /// Start the listener on `subscription`
    ///
    /// Waits give up after `timeout`. Acks nobody is waiting for are handed
    /// back to the broker for redelivery after `unmatched_delay`.
    pub fn start(
        subscription: Box<dyn Subscription>,
        timeout: Duration,
        unmatched_delay: Duration,
    ) -> Self {
        let table = Arc::new(PendingTable::default());
        let shutdown = CancellationToken::new();

        let listener = tokio::spawn(run_listener(
            subscription,
            Arc::clone(&table),
            unmatched_delay,
            shutdown.clone(),
        ));

        Self {
            table,
            timeout,
            shutdown,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Register interest in `event`'s acknowledgment
    ///
    /// Register before publishing so an early ack cannot slip past. The
    /// deadline starts now.
    pub fn register(&self, event: &ChangeEvent) -> DispatchResult<AckWaiter> {
        // Events without a request id can only be matched by name
        let key = event.request_id.unwrap_or_else(Uuid::now_v7);
        let deadline = Instant::now() + self.timeout;
        let receiver = self.table.insert(key, event.name.clone())?;

        debug!(workspace = %event.name, request_id = %key, "Waiting for acknowledgment");

        Ok(AckWaiter {
            key,
            workspace: event.name.clone(),
            deadline,
            timeout: self.timeout,
            receiver,
            table: Arc::clone(&self.table),
        })
    }

    /// Block until `event` is acknowledged or the timeout passes
    pub async fn wait_for_ack(&self, event: &ChangeEvent) -> DispatchResult<AckEvent> {
        self.register(event)?.wait().await
    }

    /// Like [`AckCorrelator::wait_for_ack`], abandoning the wait when `cancel` fires
    pub async fn wait_for_ack_with_cancel(
        &self,
        event: &ChangeEvent,
        cancel: &CancellationToken,
    ) -> DispatchResult<AckEvent> {
        self.register(event)?.wait_with_cancel(cancel).await
    }

    /// Requests currently waiting
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    /// Stop the listener and fail all waiters with `Closed`
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!(error = %e, "Ack listener task failed");
            }
        }

        let failed = self.table.close();
        if failed > 0 {
            warn!(failed, "Closed pending acknowledgment waits");
        }
    }
}

impl Drop for AckCorrelator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_listener(
    mut subscription: Box<dyn Subscription>,
    table: Arc<PendingTable>,
    unmatched_delay: Duration,
    shutdown: CancellationToken,
) {
    info!(unmatched_delay = ?unmatched_delay, "Ack listener started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = subscription.next() => next,
        };

        match next {
            Some(Ok(delivery)) => handle_delivery(&table, delivery, unmatched_delay).await,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to receive acknowledgment");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                }
            }
            None => {
                warn!("Ack subscription ended");
                break;
            }
        }
    }

    info!("Ack listener stopped");
}

async fn handle_delivery(table: &PendingTable, delivery: Delivery, unmatched_delay: Duration) {
    let ack = match AckEvent::from_payload(delivery.payload()) {
        Ok(ack) => ack,
        Err(e) => {
            warn!(
                error = %e,
                payload_size = delivery.payload().len(),
                "Skipping undecodable acknowledgment"
            );
            if let Err(e) = delivery.term().await {
                warn!(error = %e, "Failed to terminate undecodable acknowledgment");
            }
            return;
        }
    };

    let unmatched = match table.take_match(&ack) {
        Some(pending) => {
            let expected = ack.workspace_event.status.expected_outcome();
            if ack.status.is_success() && ack.status != expected {
                warn!(
                    workspace = %pending.workspace,
                    status = %ack.status,
                    expected = %expected,
                    "Acknowledgment status does not match the requested change"
                );
            }

            match pending.responder.send(ack) {
                Ok(()) => {
                    if let Err(e) = delivery.ack().await {
                        warn!(workspace = %pending.workspace, error = %e, "Failed to ack matched message");
                    }
                    return;
                }
                // Waiter gave up between the match and the send
                Err(ack) => ack,
            }
        }
        None => ack,
    };

    debug!(
        workspace = %unmatched.workspace(),
        request_id = ?unmatched.workspace_event.request_id,
        delivered = delivery.delivered(),
        "No waiter for acknowledgment"
    );
    if let Err(e) = delivery.nack_with_delay(unmatched_delay).await {
        warn!(error = %e, "Failed to nack unmatched acknowledgment");
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Publisher Loop
//!
//! The single worker that drains the dispatch queue and publishes each change
//! event to the change topic.
//!
//! # Retry
//!
//! Publish failures are retried with a fixed delay between attempts (linear,
//! not exponential) up to `max_attempts` total attempts. After that the event
//! is logged and dropped; there is no dead-letter store on this side.
//! Encoding failures are never retried.
//!
//! The retry sleep runs on the worker itself, so one stuck event delays the
//! ones queued behind it by at most `(max_attempts - 1) * retry_delay`.
//!
//! # Shutdown
//!
//! The loop ends when the queue is closed and drained, or immediately when the
//! shutdown token fires. Events still queued at that point are counted and
//! reported in a single warning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::ChangeEvent;
use crate::transport::Transport;

/// Publisher loop settings
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total publish attempts per event
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Snapshot of publisher loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Events published
    pub published: u64,
    /// Events dropped after exhausting retries or failing to encode
    pub dropped: u64,
    /// Individual publish attempts that failed
    pub failed_attempts: u64,
    /// Events abandoned by a forced shutdown
    pub abandoned: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PublisherCounters {
    published: AtomicU64,
    dropped: AtomicU64,
    failed_attempts: AtomicU64,
    abandoned: AtomicU64,
}

impl PublisherCounters {
    pub(crate) fn snapshot(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of handing one event to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Published,
    Dropped,
    Interrupted,
}

pub(crate) struct PublisherLoop {
    transport: Arc<dyn Transport>,
    topic: String,
    policy: RetryPolicy,
    receiver: mpsc::Receiver<ChangeEvent>,
    shutdown: CancellationToken,
    counters: Arc<PublisherCounters>,
}

impl PublisherLoop {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        topic: impl Into<String>,
        policy: RetryPolicy,
        receiver: mpsc::Receiver<ChangeEvent>,
        shutdown: CancellationToken,
        counters: Arc<PublisherCounters>,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            policy,
            receiver,
            shutdown,
            counters,
        }
    }

    /// Start the worker task
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(topic = %self.topic, "Publisher loop started");

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = self.receiver.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!(topic = %self.topic, "Dispatch queue closed and drained");
                        return;
                    }
                },
            };

            if self.publish_with_retry(&event).await == Outcome::Interrupted {
                // The in-flight event counts as abandoned too
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }

        self.abandon_remaining();
    }

    /// Forced shutdown: drop whatever is still queued, loudly
    fn abandon_remaining(&mut self) {
        self.receiver.close();

        let mut abandoned = 0u64;
        while let Ok(event) = self.receiver.try_recv() {
            debug!(workspace = %event.name, "Abandoning queued change event");
            abandoned += 1;
        }

        self.counters.abandoned.fetch_add(abandoned, Ordering::Relaxed);

        if abandoned > 0 {
            warn!(
                topic = %self.topic,
                abandoned,
                "Forced shutdown dropped queued change events"
            );
        } else {
            info!(topic = %self.topic, "Publisher loop stopped");
        }
    }

    async fn publish_with_retry(&self, event: &ChangeEvent) -> Outcome {
        let payload = match event.to_payload() {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                error!(workspace = %event.name, error = %e, "Failed to encode change event, dropping");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return Outcome::Dropped;
            }
        };

        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.transport.publish(&self.topic, payload.clone()).await {
                Ok(()) => {
                    debug!(
                        topic = %self.topic,
                        workspace = %event.name,
                        status = %event.status,
                        attempt,
                        "Change event published"
                    );
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                    return Outcome::Published;
                }
                Err(e) => {
                    self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic = %self.topic,
                        workspace = %event.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Publish attempt failed"
                    );
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Outcome::Interrupted,
                    _ = tokio::time::sleep(self.policy.delay) => {}
                }
            }
        }

        error!(
            topic = %self.topic,
            workspace = %event.name,
            attempts = max_attempts,
            "Publish retries exhausted, dropping change event"
        );
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        Outcome::Dropped
    }
}

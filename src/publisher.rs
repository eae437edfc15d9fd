// Copyright (c) 2025 - Cowboy AI, Inc.
//! Change-Event Publisher
//!
//! Owns the whole dispatch pipeline: the transport connection, the dispatch
//! queue, the publisher loop and the ack correlator. Construct one per
//! process and share it behind an `Arc`.
//!
//! # Example
//!
//! ```rust,no_run
//! use workspace_dispatch::{ChangeEvent, DispatchConfig, Publisher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let publisher = Publisher::open(DispatchConfig::from_env()?).await?;
//!
//!     let event = ChangeEvent::creating("ws-1", "alice");
//!     let ack = publisher.submit_and_wait(event).await?;
//!     println!("workspace {} is {}", ack.workspace(), ack.status);
//!
//!     publisher.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Delivery guarantees
//!
//! An event accepted by [`Publisher::enqueue`] is either published, dropped
//! with an error log after the retry budget is spent, or abandoned by a
//! forced shutdown (counted in [`PublisherStats::abandoned`] and logged).
//! Nothing survives a process restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::correlator::{AckCorrelator, AckWaiter};
use crate::errors::DispatchResult;
use crate::events::{AckEvent, ChangeEvent};
use crate::publisher_loop::{PublisherCounters, PublisherLoop, PublisherStats, RetryPolicy};
use crate::queue::DispatchQueue;
use crate::transport::{NatsTransport, SubscriptionConfig, Transport};

/// Lifecycle owner of the dispatch pipeline
pub struct Publisher {
    config: DispatchConfig,
    transport: Arc<dyn Transport>,
    queue: DispatchQueue,
    correlator: AckCorrelator,
    counters: Arc<PublisherCounters>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Publisher {
    /// Connect to NATS and start the pipeline
    pub async fn open(config: DispatchConfig) -> DispatchResult<Self> {
        config.validate()?;

        let transport = NatsTransport::connect(&config.nats).await?;
        Self::with_transport(Arc::new(transport), config).await
    }

    /// Start the pipeline over an already-connected transport
    ///
    /// On failure the transport is closed before the error is returned.
    pub async fn with_transport(
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> DispatchResult<Self> {
        if let Err(e) = config.validate() {
            release(&transport).await;
            return Err(e);
        }

        let subscription_config =
            SubscriptionConfig::new(config.ack_topic.clone(), config.ack_subscription.clone())
                .with_max_deliveries(config.ack_max_deliveries);

        let subscription = match transport.subscribe(subscription_config).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(topic = %config.ack_topic, error = %e, "Ack subscription failed, releasing transport");
                release(&transport).await;
                return Err(e.into());
            }
        };

        let (queue, receiver) = DispatchQueue::new(config.queue_capacity, config.enqueue_timeout);
        let shutdown = CancellationToken::new();
        let counters = Arc::new(PublisherCounters::default());

        let worker = PublisherLoop::new(
            Arc::clone(&transport),
            config.change_topic.clone(),
            RetryPolicy {
                max_attempts: config.max_publish_attempts,
                delay: config.retry_delay,
            },
            receiver,
            shutdown.clone(),
            Arc::clone(&counters),
        )
        .spawn();

        let correlator = AckCorrelator::start(
            subscription,
            config.ack_timeout,
            config.unmatched_ack_delay(),
        );

        info!(
            change_topic = %config.change_topic,
            ack_topic = %config.ack_topic,
            queue_capacity = config.queue_capacity,
            "Change-event publisher started"
        );

        Ok(Self {
            config,
            transport,
            queue,
            correlator,
            counters,
            shutdown,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue `event` for publishing
    ///
    /// Returns once the event is queued, not once it is published.
    pub async fn enqueue(&self, event: ChangeEvent) -> DispatchResult<()> {
        self.queue.enqueue(event).await
    }

    /// Register interest in `event`'s acknowledgment without waiting yet
    pub fn register(&self, event: &ChangeEvent) -> DispatchResult<AckWaiter> {
        self.correlator.register(event)
    }

    /// Block until the reconciler acknowledges `event` or the ack timeout passes
    pub async fn wait_for_ack(&self, event: &ChangeEvent) -> DispatchResult<AckEvent> {
        self.correlator.wait_for_ack(event).await
    }

    /// Like [`Publisher::wait_for_ack`], returning `Cancelled` when `cancel` fires
    pub async fn wait_for_ack_with_cancel(
        &self,
        event: &ChangeEvent,
        cancel: &CancellationToken,
    ) -> DispatchResult<AckEvent> {
        self.correlator.wait_for_ack_with_cancel(event, cancel).await
    }

    /// Register, enqueue, then wait for the acknowledgment
    pub async fn submit_and_wait(&self, event: ChangeEvent) -> DispatchResult<AckEvent> {
        let waiter = self.correlator.register(&event)?;
        self.queue.enqueue(event).await?;
        waiter.wait().await
    }

    /// Publisher loop counters
    pub fn stats(&self) -> PublisherStats {
        self.counters.snapshot()
    }

    /// Requests currently waiting for an acknowledgment
    pub fn pending_acks(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut the pipeline down
    ///
    /// 1. Stop accepting events.
    /// 2. Let the publisher loop drain for up to `drain_timeout`, then force it.
    /// 3. Stop the ack listener and fail pending waits with `Closed`.
    /// 4. Close the transport.
    ///
    /// Calling `close` again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(queued = self.queue.len(), "Closing change-event publisher");
        self.queue.close();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(mut worker) = worker {
            match tokio::time::timeout(self.config.drain_timeout, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Publisher loop task failed"),
                Err(_) => {
                    warn!(
                        drain_timeout = ?self.config.drain_timeout,
                        "Publisher loop did not drain in time, forcing shutdown"
                    );
                    self.shutdown.cancel();
                    if let Err(e) = worker.await {
                        warn!(error = %e, "Publisher loop task failed");
                    }
                }
            }
        }
        self.shutdown.cancel();

        self.correlator.shutdown().await;

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Transport close failed");
        }

        let stats = self.counters.snapshot();
        info!(
            published = stats.published,
            dropped = stats.dropped,
            abandoned = stats.abandoned,
            "Change-event publisher closed"
        );
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(
                queued = self.queue.len(),
                "Publisher dropped without close, stopping background tasks"
            );
            self.shutdown.cancel();
        }
    }
}

async fn release(transport: &Arc<dyn Transport>) {
    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to release transport after setup error");
    }
}

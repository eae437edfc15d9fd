// Copyright (c) 2025 - Cowboy AI, Inc.
//! Dispatch Queue
//!
//! Bounded in-process buffer between request handlers and the publisher loop.
//! Many tasks enqueue concurrently, exactly one worker drains it. The queue
//! lives in memory only: anything still buffered when the process dies is
//! gone.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use crate::errors::{DispatchError, DispatchResult};
use crate::events::ChangeEvent;

/// Producer side of the dispatch queue
pub struct DispatchQueue {
    sender: Mutex<Option<mpsc::Sender<ChangeEvent>>>,
    capacity: usize,
    enqueue_timeout: Duration,
}

impl DispatchQueue {
    /// Create a queue of `capacity` events; the receiver goes to the publisher loop
    pub fn new(capacity: usize, enqueue_timeout: Duration) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let queue = Self {
            sender: Mutex::new(Some(sender)),
            capacity: capacity.max(1),
            enqueue_timeout,
        };

        (queue, receiver)
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<ChangeEvent>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `event` for publishing
    ///
    /// Waits at most the configured enqueue timeout for capacity.
    ///
    /// # Errors
    /// - `InvalidEvent` if the event fails validation
    /// - `QueueFull` if no slot freed up in time
    /// - `Closed` once the queue has been closed
    pub async fn enqueue(&self, event: ChangeEvent) -> DispatchResult<()> {
        event.validate()?;

        let sender = self.sender().clone().ok_or(DispatchError::Closed)?;
        let name = event.name.clone();

        match sender.send_timeout(event, self.enqueue_timeout).await {
            Ok(()) => {
                debug!(workspace = %name, "Change event queued");
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    workspace = %name,
                    capacity = self.capacity,
                    waited = ?self.enqueue_timeout,
                    "Dispatch queue full, rejecting change event"
                );
                Err(DispatchError::QueueFull {
                    capacity: self.capacity,
                    waited: self.enqueue_timeout,
                })
            }
            Err(SendTimeoutError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Stop accepting events. Already-queued events stay readable by the worker.
    ///
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        self.sender().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events currently buffered
    pub fn len(&self) -> usize {
        self.sender()
            .as_ref()
            .map(|s| self.capacity - s.capacity())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-process transport
//!
//! A broker that lives inside the process: every subscription on a topic gets
//! its own copy of each published message, nacked deliveries are redelivered
//! (after the requested delay) until the subscription's `max_deliveries` is
//! reached, and counters record what happened. Faults can be injected to
//! exercise retry paths.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{TransportError, TransportResult};
use crate::transport::{Acknowledger, Delivery, Subscription, SubscriptionConfig, Transport};

#[derive(Default)]
struct MemoryState {
    subscribers: HashMap<String, Vec<Subscriber>>,
    published: Vec<(String, Bytes)>,
    publish_attempts: usize,
    fail_publishes: usize,
    fail_subscribe: bool,
    fail_receives: usize,
    acked: usize,
    nacked: usize,
    terminated: usize,
    closed: bool,
}

struct Subscriber {
    name: String,
    max_deliveries: Option<u32>,
    sender: mpsc::UnboundedSender<Delivery>,
}

/// In-memory [`Transport`] with fault injection and inspection
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock_state(&self.state)
    }

    /// Fail the next `count` publish calls
    pub fn fail_next_publishes(&self, count: usize) {
        self.lock().fail_publishes = count;
    }

    /// Make every subsequent `subscribe` fail
    pub fn fail_subscriptions(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// Make the next `count` receive calls, on any subscription, yield an error
    pub fn fail_next_receives(&self, count: usize) {
        self.lock().fail_receives = count;
    }

    /// Deliver `payload` to subscribers of `topic` without touching the
    /// publish counters or injected faults
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        let state = self.lock();
        fan_out(&self.state, &state, topic, payload.into());
    }

    /// Payloads successfully published to `topic`, in order
    pub fn published(&self, topic: &str) -> Vec<Bytes> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Publish calls made, including failed ones
    pub fn publish_attempts(&self) -> usize {
        self.lock().publish_attempts
    }

    pub fn acked_count(&self) -> usize {
        self.lock().acked
    }

    pub fn nacked_count(&self) -> usize {
        self.lock().nacked
    }

    pub fn terminated_count(&self) -> usize {
        self.lock().terminated
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .subscribers
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    // A panic while holding the lock leaves only counters behind
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fan_out(shared: &Arc<Mutex<MemoryState>>, state: &MemoryState, topic: &str, payload: Bytes) {
    let Some(subscribers) = state.subscribers.get(topic) else {
        debug!(topic = %topic, "No subscribers for in-memory topic");
        return;
    };

    for subscriber in subscribers {
        let acker = MemoryAcker {
            state: Arc::clone(shared),
            payload: payload.clone(),
            delivered: 1,
            max_deliveries: subscriber.max_deliveries,
            redeliver: subscriber.sender.clone(),
        };
        // A dropped subscription simply misses the message
        let _ = subscriber
            .sender
            .send(Delivery::new(payload.clone(), 1, Box::new(acker)));
        debug!(topic = %topic, subscription = %subscriber.name, "Delivered in-memory message");
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()> {
        let mut state = self.lock();

        if state.closed {
            return Err(TransportError::Closed);
        }

        state.publish_attempts += 1;

        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Err(TransportError::Publish("injected publish failure".into()));
        }

        state.published.push((topic.to_string(), payload.clone()));
        fan_out(&self.state, &state, topic, payload);
        Ok(())
    }

    async fn subscribe(&self, config: SubscriptionConfig) -> TransportResult<Box<dyn Subscription>> {
        let mut state = self.lock();

        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.fail_subscribe {
            return Err(TransportError::Subscribe("injected subscribe failure".into()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state
            .subscribers
            .entry(config.topic.clone())
            .or_default()
            .push(Subscriber {
                name: config.name,
                max_deliveries: config.max_deliveries,
                sender,
            });

        Ok(Box::new(MemorySubscription {
            state: Arc::clone(&self.state),
            receiver,
        }))
    }

    async fn close(&self) -> TransportResult<()> {
        let mut state = self.lock();
        state.closed = true;
        // Dropping the senders ends every subscription stream
        state.subscribers.clear();
        Ok(())
    }
}

struct MemorySubscription {
    state: Arc<Mutex<MemoryState>>,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<TransportResult<Delivery>> {
        {
            let mut state = lock_state(&self.state);
            if state.fail_receives > 0 {
                state.fail_receives -= 1;
                return Some(Err(TransportError::Receive("injected receive failure".into())));
            }
        }
        self.receiver.recv().await.map(Ok)
    }
}

struct MemoryAcker {
    state: Arc<Mutex<MemoryState>>,
    payload: Bytes,
    delivered: u32,
    max_deliveries: Option<u32>,
    redeliver: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> TransportResult<()> {
        lock_state(&self.state).acked += 1;
        Ok(())
    }

    async fn nack(&self, delay: Option<Duration>) -> TransportResult<()> {
        lock_state(&self.state).nacked += 1;

        let exhausted = self
            .max_deliveries
            .is_some_and(|max| self.delivered >= max);
        if exhausted {
            return Ok(());
        }

        let acker = MemoryAcker {
            state: Arc::clone(&self.state),
            payload: self.payload.clone(),
            delivered: self.delivered + 1,
            max_deliveries: self.max_deliveries,
            redeliver: self.redeliver.clone(),
        };
        let redelivery = Delivery::new(self.payload.clone(), self.delivered + 1, Box::new(acker));

        match delay {
            Some(delay) if !delay.is_zero() => {
                let redeliver = self.redeliver.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = redeliver.send(redelivery);
                });
            }
            _ => {
                let _ = self.redeliver.send(redelivery);
            }
        }
        Ok(())
    }

    async fn term(&self) -> TransportResult<()> {
        lock_state(&self.state).terminated += 1;
        Ok(())
    }
}

//! Asynchronous workspace change-event dispatch
//!
//! Request handlers hand workspace lifecycle changes to a [`Publisher`], which
//! queues them in memory, publishes them to NATS with bounded retry, and lets
//! callers wait for the downstream reconciler's acknowledgment.
//!
//! - [`queue`] - bounded in-process dispatch queue
//! - [`publisher_loop`] - single publishing worker with linear retry
//! - [`correlator`] - shared ack listener and pending-waiter table
//! - [`publisher`] - lifecycle owner tying the pieces together
//! - [`transport`] - broker capability, NATS JetStream and in-memory backends
//! - [`dead_letter`] - plain consumer with a dead-letter policy

pub mod config;
pub mod correlator;
pub mod dead_letter;
pub mod errors;
pub mod events;
pub mod publisher;
pub mod publisher_loop;
pub mod queue;
pub mod subjects;
pub mod transport;

// Re-export commonly used types
pub use config::{DispatchConfig, NatsConfig};
pub use correlator::{AckCorrelator, AckWaiter};
pub use errors::{DispatchError, DispatchResult, TransportError, TransportResult};
pub use events::{AckEvent, AckStatus, ChangeEvent, ChangeStatus};
pub use publisher::Publisher;
pub use publisher_loop::{PublisherStats, RetryPolicy};
pub use transport::{MemoryTransport, NatsTransport, Transport};

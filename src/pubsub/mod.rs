//! Pub/Sub pull subscriber.
//!
//! ```text
//!  pull ──► Producer ──► JoinQueue ──► Consumer ──► handler tasks
//!                                                     │ ok      │ err
//!                                                     ▼         ▼
//!                                                  ack queue  nack queue
//!                                                     │         │
//!                                                  Batcher   Batcher
//! ```

pub mod batcher;
pub mod client;
pub mod consumer;
pub mod deadline;
pub mod error;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod queue;
pub mod subscriber;

pub use batcher::{ACK_IDS_MAX_BATCH_SIZE, BatchKind, Batcher};
pub use client::{PullBackend, SubscriberClient, SubscriptionInfo, subscription_path};
pub use consumer::{
    Consumer, HandlerError, HandlerFn, MessageHandler, PulledMessage, handler_fn,
};
pub use deadline::AckDeadlineCache;
pub use error::SubscriberError;
pub use message::SubscriberMessage;
pub use metrics::{MetricsSnapshot, SubscriberMetrics};
pub use producer::Producer;
pub use queue::JoinQueue;
pub use subscriber::{Subscriber, subscribe};

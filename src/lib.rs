pub mod auth;
pub mod config;
pub mod core;
pub mod errors;
pub mod pubsub;
pub mod taskqueue;

// Re-export commonly used items for convenience
pub use auth::{Token, TokenConfig, TokenProvider};
pub use config::{ConfigError, SubscriberConfig, TaskManagerConfig};
pub use core::*;
pub use errors::auth_error::{AuthError, AuthResult};
pub use errors::session_error::SessionError;
pub use pubsub::{Subscriber, SubscriberClient, SubscriberError, subscribe};
pub use taskqueue::{TaskManager, TaskQueue, TaskQueueError, WorkerError};

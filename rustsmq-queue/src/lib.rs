//! Simple message queue engine for rustsmq
//!
//! Provides queues backed by a shared key-value store with support for:
//! - CreateQueue, DeleteQueue, ListQueues, queue attributes
//! - SendMessage with per-message delivery delay
//! - ReceiveMessage with per-message visibility timeouts (leases)
//! - DeleteMessage, PopMessage, ChangeMessageVisibility
//!
//! Expired leases are detected lazily on the next receive, so no background
//! sweeper is needed. Two storage backends are available: an in-memory
//! [`EphemeralStorage`] and a [`RedisStorage`] driven by Lua scripts.

pub mod client;
pub mod clock;
pub mod config;
mod error;
pub mod lease;
pub mod message;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod store;
mod validation;

pub use client::QueueClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use error::QueueError;
pub use lease::LeaseManager;
pub use message::{Message, MessageId};
pub use queue::{MaxSize, QueueAttributes, QueueConfig, QueueOptions, QueueSettings, QueueUpdate};
pub use registry::QueueRegistry;
pub use storage::{
    Arrivals, Claim, EphemeralStorage, QueueStorage, RedisPoolConfig, RedisStorage, SentMessage,
    StorageError,
};
pub use store::MessageStore;
pub use validation::QueueLimits;

//! Storage backend traits

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

use crate::message::{Message, MessageId};
use crate::queue::{QueueAttributes, QueueConfig, QueueSettings, QueueUpdate};

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection lost or backend down
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// Payload exceeds the queue's `maxsize` as stored when the send ran
    #[error("Payload of {size} bytes exceeds the limit of {max}")]
    PayloadTooLarge { size: usize, max: u32 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stored state violates an invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

/// What a successful claim does to the claimed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Hide the message for `vt` seconds, the queue default when `None`
    Lease { vt: Option<u32> },
    /// Delete the message
    Remove,
}

/// A stored message and the queue depth right after storing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: MessageId,
    pub depth: u64,
}

/// One page of queue names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueuePage {
    pub names: Vec<String>,
    /// Cursor for the next page, `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

/// Hints that a queue may have a new eligible message
///
/// The stream ends when the backend can no longer deliver hints.
pub type Arrivals = BoxStream<'static, ()>;

/// Atomic primitives over a shared key-value store
///
/// Every method is a single round trip. Queue config lookups, defaults and
/// the clock are resolved inside that round trip, so callers pass only raw
/// overrides and never act on state read by an earlier call.
#[async_trait]
pub trait QueueStorage: Send + Sync {
    /// Current time according to the backend
    async fn now(&self) -> Result<DateTime<Utc>, StorageError>;

    /// Create a queue stamped with the backend clock; `None` if the name is taken
    async fn insert_queue(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> Result<Option<QueueConfig>, StorageError>;

    async fn load_queue(&self, name: &str) -> Result<Option<QueueConfig>, StorageError>;

    /// Apply attribute changes and return the result; `None` if the queue does not exist
    async fn update_queue(
        &self,
        name: &str,
        update: &QueueUpdate,
    ) -> Result<Option<QueueAttributes>, StorageError>;

    /// Remove a queue and all of its messages; returns whether it existed
    async fn remove_queue(&self, name: &str) -> Result<bool, StorageError>;

    /// One page of queue names
    ///
    /// `cursor` is `None` for the first page and otherwise a value returned
    /// as [`QueuePage::next_cursor`]. Its format is backend specific.
    async fn queue_page(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<QueuePage, StorageError>;

    /// Config and counters as of the backend's current time
    async fn queue_attributes(&self, name: &str)
        -> Result<Option<QueueAttributes>, StorageError>;

    /// Store a new message
    ///
    /// `delay` overrides the queue default. The payload is checked against
    /// the queue's `maxsize` in the same step that stores it.
    async fn insert_message(
        &self,
        queue: &str,
        payload: &Bytes,
        delay: Option<u32>,
    ) -> Result<SentMessage, StorageError>;

    /// The message the next claim at `at` would take, without changing anything
    ///
    /// `at` defaults to the backend clock.
    async fn peek_eligible(
        &self,
        queue: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<Message>, StorageError>;

    /// Atomically find the next visible message and lease or remove it
    ///
    /// Leases that already expired are returned to the ready ordering
    /// first. The returned message carries its updated receive count and
    /// lease.
    async fn claim_eligible(&self, queue: &str, claim: Claim)
        -> Result<Option<Message>, StorageError>;

    /// Hide a message for `vt` seconds from now; returns `false` if it does not exist
    async fn set_lease(&self, queue: &str, id: &MessageId, vt: u32) -> Result<bool, StorageError>;

    /// Remove a message; returns whether it existed
    async fn remove_message(&self, queue: &str, id: &MessageId) -> Result<bool, StorageError>;

    /// Subscribe to arrival hints for `queue`
    ///
    /// Hints are only hints; callers must re-check with a claim. Backends
    /// without notifications return a stream that never yields.
    async fn watch(&self, _queue: &str) -> Result<Arrivals, StorageError> {
        Ok(stream::pending().boxed())
    }
}

//! Public operation surface of the queue engine

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::QueueError;
use crate::lease::LeaseManager;
use crate::message::{Message, MessageId};
use crate::queue::{QueueAttributes, QueueOptions};
use crate::registry::QueueRegistry;
use crate::storage::{EphemeralStorage, QueueStorage};
use crate::store::MessageStore;
use crate::validation::validate_queue_name;

/// Client for queues living in one storage backend
///
/// Every call is validated up front and then performs a single atomic step
/// against storage. Cloning is cheap and clones share the backend.
///
/// ```rust,ignore
/// let client = QueueClient::ephemeral();
/// client.create_queue("jobs", QueueOptions::new()).await?;
/// let id = client.send_message("jobs", "hello", None).await?;
/// if let Some(message) = client.receive_message("jobs", None).await? {
///     client.delete_message("jobs", message.id.as_str()).await?;
/// }
/// ```
#[derive(Clone)]
pub struct QueueClient {
    registry: QueueRegistry,
    store: MessageStore,
    leases: LeaseManager,
    storage: Arc<dyn QueueStorage>,
    config: ClientConfig,
}

impl QueueClient {
    pub fn new(storage: Arc<dyn QueueStorage>) -> Self {
        Self::with_config(storage, ClientConfig::default())
    }

    pub fn with_config(storage: Arc<dyn QueueStorage>, config: ClientConfig) -> Self {
        let registry = QueueRegistry::new(Arc::clone(&storage), config.limits)
            .with_page_size(config.list_page_size);
        Self {
            store: MessageStore::new(registry.clone()),
            leases: LeaseManager::new(registry.clone()),
            registry,
            storage,
            config,
        }
    }

    /// Client over a fresh in-memory backend
    pub fn ephemeral() -> Self {
        Self::new(Arc::new(EphemeralStorage::new()))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn create_queue(&self, name: &str, options: QueueOptions) -> Result<(), QueueError> {
        self.registry.create_queue(name, options).await?;
        Ok(())
    }

    pub async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.registry.delete_queue(name).await
    }

    /// Every queue name, collected
    pub async fn list_queues(&self) -> Result<Vec<String>, QueueError> {
        self.registry.list_queues().try_collect().await
    }

    /// Every queue name, fetched lazily
    pub fn queue_names(&self) -> BoxStream<'static, Result<String, QueueError>> {
        self.registry.list_queues()
    }

    pub async fn get_queue_attributes(&self, name: &str) -> Result<QueueAttributes, QueueError> {
        self.registry.get_queue_attributes(name).await
    }

    pub async fn set_queue_attributes(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueAttributes, QueueError> {
        self.registry.set_queue_attributes(name, options).await
    }

    pub async fn send_message(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
        delay: Option<i64>,
    ) -> Result<MessageId, QueueError> {
        self.store.enqueue(queue, payload, delay).await
    }

    /// Receive without waiting; `None` if nothing is eligible right now
    pub async fn receive_message(
        &self,
        queue: &str,
        vt: Option<i64>,
    ) -> Result<Option<Message>, QueueError> {
        self.leases.receive(queue, vt).await
    }

    /// Receive, waiting up to `wait` for a message to become eligible
    ///
    /// Subscribes to arrival hints once, before the first attempt, so a send
    /// landing between an empty receive and the next wait is not missed.
    /// Re-checks at the configured poll interval when no hint arrives. `wait`
    /// may not exceed the configured maximum.
    pub async fn receive_message_wait(
        &self,
        queue: &str,
        vt: Option<i64>,
        wait: Duration,
    ) -> Result<Option<Message>, QueueError> {
        if wait > self.config.max_wait() {
            return Err(QueueError::invalid(format!(
                "Incorrect value for wait parameter; allowed range is 0 to {} seconds.",
                self.config.max_wait_secs
            )));
        }
        if let Some(vt) = vt {
            self.config.limits.vt(vt)?;
        }
        validate_queue_name(queue)?;

        let mut arrivals = self.storage.watch(queue).await?;
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.leases.receive(queue, vt).await? {
                return Ok(Some(message));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let tick = remaining.min(self.config.poll_interval());
            if let Ok(None) = tokio::time::timeout(tick, arrivals.next()).await {
                // Hints stopped; keep polling on the interval
                arrivals = stream::pending().boxed();
            }
        }
    }

    /// Receive and delete in one step (at-most-once delivery)
    pub async fn pop_message(&self, queue: &str) -> Result<Option<Message>, QueueError> {
        self.leases.pop(queue).await
    }

    pub async fn change_message_visibility(
        &self,
        queue: &str,
        id: &str,
        vt: i64,
    ) -> Result<(), QueueError> {
        self.leases.change_visibility(queue, id, vt).await
    }

    /// Returns whether the message existed
    pub async fn delete_message(&self, queue: &str, id: &str) -> Result<bool, QueueError> {
        self.store.delete_message(queue, id).await
    }
}

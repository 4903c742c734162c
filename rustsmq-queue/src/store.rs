//! Message store: enqueue, peek and delete

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::QueueError;
use crate::message::{Message, MessageId};
use crate::registry::QueueRegistry;
use crate::storage::QueueStorage;
use crate::validation::validate_queue_name;

#[derive(Clone)]
pub struct MessageStore {
    registry: QueueRegistry,
    storage: Arc<dyn QueueStorage>,
}

impl MessageStore {
    pub fn new(registry: QueueRegistry) -> Self {
        let storage = Arc::clone(registry.storage());
        Self { registry, storage }
    }

    /// Add a message to `queue`; it becomes receivable once its delay has passed
    ///
    /// `delay` overrides the queue default for this message only. The
    /// payload is checked against the queue's `maxsize` in the same storage
    /// step that stores it.
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
        delay: Option<i64>,
    ) -> Result<MessageId, QueueError> {
        let payload = payload.into();
        let delay = delay.map(|d| self.registry.limits().delay(d)).transpose()?;
        validate_queue_name(queue)?;

        let sent = self.storage.insert_message(queue, &payload, delay).await?;
        debug!(queue = %queue, id = %sent.id, ?delay, depth = sent.depth, "Sent message");
        Ok(sent.id)
    }

    /// The message a receive at `now` would return, without leasing it
    ///
    /// `now` defaults to the backend clock.
    pub async fn peek_next_eligible(
        &self,
        queue: &str,
        now: Option<DateTime<Utc>>,
    ) -> Result<Option<Message>, QueueError> {
        validate_queue_name(queue)?;
        Ok(self.storage.peek_eligible(queue, now).await?)
    }

    /// Remove a message whatever its state; returns whether it existed
    pub async fn delete_message(&self, queue: &str, id: &str) -> Result<bool, QueueError> {
        let id = MessageId::parse(id)?;
        validate_queue_name(queue)?;

        let existed = self.storage.remove_message(queue, &id).await?;
        debug!(queue = %queue, id = %id, existed, "Deleted message");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::QueueOptions;
    use crate::storage::{Claim, EphemeralStorage};
    use crate::validation::QueueLimits;
    use std::time::Duration;

    async fn store_with_clock() -> (MessageStore, ManualClock) {
        let clock = ManualClock::starting_now();
        let storage = Arc::new(EphemeralStorage::with_clock(Arc::new(clock.clone())));
        let registry = QueueRegistry::new(storage, QueueLimits::default());
        registry
            .create_queue("jobs", QueueOptions::new().maxsize(4096))
            .await
            .unwrap();
        (MessageStore::new(registry), clock)
    }

    #[tokio::test]
    async fn test_enqueue_and_peek() {
        let (store, _clock) = store_with_clock().await;
        let id = store.enqueue("jobs", "hello", None).await.unwrap();

        let peeked = store.peek_next_eligible("jobs", None).await.unwrap().unwrap();
        assert_eq!(peeked.id, id);
        assert_eq!(peeked.payload_str(), Some("hello"));
        assert_eq!(peeked.receive_count, 0);

        // Peeking again returns the same message
        let again = store.peek_next_eligible("jobs", None).await.unwrap().unwrap();
        assert_eq!(again.id, id);
    }

    #[tokio::test]
    async fn test_enqueue_with_delay() {
        let (store, clock) = store_with_clock().await;
        let id = store.enqueue("jobs", "later", Some(5)).await.unwrap();

        assert!(store.peek_next_eligible("jobs", None).await.unwrap().is_none());
        clock.advance(Duration::from_secs(4));
        assert!(store.peek_next_eligible("jobs", None).await.unwrap().is_none());
        clock.advance(Duration::from_secs(1));
        let peeked = store.peek_next_eligible("jobs", None).await.unwrap().unwrap();
        assert_eq!(peeked.id, id);
    }

    #[tokio::test]
    async fn test_enqueue_uses_queue_delay() {
        let (store, clock) = store_with_clock().await;
        store
            .registry
            .set_queue_attributes("jobs", QueueOptions::new().delay(10))
            .await
            .unwrap();

        store.enqueue("jobs", "x", None).await.unwrap();
        let immediate = store.enqueue("jobs", "y", Some(0)).await.unwrap();

        let peeked = store.peek_next_eligible("jobs", None).await.unwrap().unwrap();
        assert_eq!(peeked.id, immediate);

        clock.advance(Duration::from_secs(10));
        let at = store.storage.now().await.unwrap();
        let first = store.peek_next_eligible("jobs", Some(at)).await.unwrap();
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn test_enqueue_validation() {
        let (store, _clock) = store_with_clock().await;

        let result = store.enqueue("jobs", vec![b'x'; 4097], None).await;
        assert!(matches!(
            result,
            Err(QueueError::PayloadTooLarge {
                size: 4097,
                max: 4096
            })
        ));
        assert!(store.enqueue("jobs", vec![b'x'; 4096], None).await.is_ok());

        let result = store.enqueue("jobs", "x", Some(-1)).await;
        assert!(matches!(result, Err(QueueError::InvalidParameter(_))));

        let result = store.enqueue("ghost", "x", None).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_unbounded_queue_takes_large_payloads() {
        let (store, _clock) = store_with_clock().await;
        store
            .registry
            .create_queue("big", QueueOptions::new().maxsize(-1))
            .await
            .unwrap();
        assert!(store.enqueue("big", vec![0u8; 1 << 20], None).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_message_is_idempotent() {
        let (store, _clock) = store_with_clock().await;
        let id = store.enqueue("jobs", "x", None).await.unwrap();

        assert!(store.delete_message("jobs", id.as_str()).await.unwrap());
        assert!(!store.delete_message("jobs", id.as_str()).await.unwrap());
        assert!(store.peek_next_eligible("jobs", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_leased_message() {
        let (store, _clock) = store_with_clock().await;
        let id = store.enqueue("jobs", "x", None).await.unwrap();
        store
            .storage
            .claim_eligible("jobs", Claim::Lease { vt: None })
            .await
            .unwrap()
            .unwrap();

        assert!(store.delete_message("jobs", id.as_str()).await.unwrap());
        let attrs = store.registry.get_queue_attributes("jobs").await.unwrap();
        assert_eq!(attrs.messages, 0);
    }

    #[tokio::test]
    async fn test_delete_message_errors() {
        let (store, _clock) = store_with_clock().await;
        let result = store.delete_message("jobs", "not-an-id").await;
        assert!(matches!(result, Err(QueueError::InvalidParameter(_))));

        let id = MessageId::generate(Utc::now());
        let result = store.delete_message("ghost", id.as_str()).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound(_))));
    }
}

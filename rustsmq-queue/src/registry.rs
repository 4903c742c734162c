//! Queue registry: queue configuration records

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::info;

use crate::error::QueueError;
use crate::queue::{
    MaxSize, QueueAttributes, QueueConfig, QueueOptions, QueueSettings, DEFAULT_DELAY,
    DEFAULT_MAX_SIZE, DEFAULT_VT,
};
use crate::storage::QueueStorage;
use crate::validation::{validate_queue_name, QueueLimits};

/// Default number of names fetched per storage round trip when listing
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Creates, looks up and removes queues
///
/// Queue configuration is read from storage on every call and never cached,
/// so changes made by other processes are seen immediately.
#[derive(Clone)]
pub struct QueueRegistry {
    storage: Arc<dyn QueueStorage>,
    limits: QueueLimits,
    page_size: usize,
}

impl QueueRegistry {
    pub fn new(storage: Arc<dyn QueueStorage>, limits: QueueLimits) -> Self {
        Self {
            storage,
            limits,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn limits(&self) -> &QueueLimits {
        &self.limits
    }

    pub(crate) fn storage(&self) -> &Arc<dyn QueueStorage> {
        &self.storage
    }

    pub async fn create_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueConfig, QueueError> {
        validate_queue_name(name)?;
        let update = self.limits.update(&options)?;

        let settings = QueueSettings {
            vt: update.vt.unwrap_or(DEFAULT_VT),
            delay: update.delay.unwrap_or(DEFAULT_DELAY),
            maxsize: update
                .maxsize
                .unwrap_or(MaxSize::Bytes(DEFAULT_MAX_SIZE.min(self.limits.max_max_size))),
        };

        let Some(config) = self.storage.insert_queue(name, &settings).await? else {
            return Err(QueueError::AlreadyExists(name.to_string()));
        };

        info!(
            name = %name,
            vt = config.vt,
            delay = config.delay,
            maxsize = config.maxsize.as_raw(),
            "Creating queue"
        );
        Ok(config)
    }

    pub async fn get_queue(&self, name: &str) -> Result<QueueConfig, QueueError> {
        validate_queue_name(name)?;
        self.storage
            .load_queue(name)
            .await?
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    /// Delete a queue together with all of its messages
    pub async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        validate_queue_name(name)?;
        if !self.storage.remove_queue(name).await? {
            return Err(QueueError::QueueNotFound(name.to_string()));
        }
        info!(name = %name, "Deleted queue");
        Ok(())
    }

    /// Lazily stream every queue name
    ///
    /// Pages are pulled from storage only as the stream is polled. Each call
    /// starts a fresh listing.
    pub fn list_queues(&self) -> BoxStream<'static, Result<String, QueueError>> {
        let storage = Arc::clone(&self.storage);
        let page_size = self.page_size;

        // `None` once exhausted, `Some(None)` before the first page
        stream::try_unfold(Some(None::<String>), move |cursor| {
            let storage = Arc::clone(&storage);
            async move {
                let Some(cursor) = cursor else {
                    return Ok::<_, QueueError>(None);
                };
                let page = storage.queue_page(cursor.as_deref(), page_size).await?;
                Ok(Some((page.names, page.next_cursor.map(Some))))
            }
        })
        .map_ok(|names| stream::iter(names.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    pub async fn get_queue_attributes(&self, name: &str) -> Result<QueueAttributes, QueueError> {
        validate_queue_name(name)?;
        self.storage
            .queue_attributes(name)
            .await?
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    /// Change any of `vt`, `delay` and `maxsize`; at least one must be given
    pub async fn set_queue_attributes(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueAttributes, QueueError> {
        validate_queue_name(name)?;
        if options.is_empty() {
            return Err(QueueError::invalid(
                "No attribute was supplied; set at least one of vt, delay, maxsize.",
            ));
        }
        let update = self.limits.update(&options)?;

        let Some(attrs) = self.storage.update_queue(name, &update).await? else {
            return Err(QueueError::QueueNotFound(name.to_string()));
        };
        info!(name = %name, ?update, "Updated queue attributes");
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EphemeralStorage;

    fn registry() -> QueueRegistry {
        QueueRegistry::new(Arc::new(EphemeralStorage::new()), QueueLimits::default())
    }

    #[tokio::test]
    async fn test_create_queue_defaults() {
        let r = registry();
        let config = r.create_queue("jobs", QueueOptions::new()).await.unwrap();
        assert_eq!(config.vt, 30);
        assert_eq!(config.delay, 0);
        assert_eq!(config.maxsize, MaxSize::Bytes(65536));
        assert_eq!(config.created, config.modified);

        assert_eq!(r.get_queue("jobs").await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_create_queue_twice() {
        let r = registry();
        r.create_queue("jobs", QueueOptions::new()).await.unwrap();
        let result = r.create_queue("jobs", QueueOptions::new().vt(5)).await;
        assert!(matches!(result, Err(QueueError::AlreadyExists(_))));
        assert_eq!(r.get_queue("jobs").await.unwrap().vt, 30);
    }

    #[tokio::test]
    async fn test_create_queue_rejects_bad_input() {
        let r = registry();
        let result = r.create_queue("bad name", QueueOptions::new()).await;
        assert!(matches!(result, Err(QueueError::InvalidParameter(_))));

        let result = r.create_queue("jobs", QueueOptions::new().vt(-1)).await;
        assert!(matches!(result, Err(QueueError::InvalidParameter(_))));

        let result = r.create_queue("jobs", QueueOptions::new().maxsize(100)).await;
        assert!(matches!(result, Err(QueueError::InvalidParameter(_))));

        // Nothing was written
        assert!(matches!(
            r.get_queue("jobs").await,
            Err(QueueError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_queue() {
        let r = registry();
        r.create_queue("jobs", QueueOptions::new()).await.unwrap();
        r.delete_queue("jobs").await.unwrap();

        assert!(matches!(
            r.delete_queue("jobs").await,
            Err(QueueError::QueueNotFound(_))
        ));
        assert!(matches!(
            r.get_queue("jobs").await,
            Err(QueueError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_queues_spans_pages() {
        let r = registry().with_page_size(2);
        for name in ["e", "a", "d", "b", "c"] {
            r.create_queue(name, QueueOptions::new()).await.unwrap();
        }

        let names: Vec<String> = r.list_queues().try_collect().await.unwrap();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);

        // A second listing starts over
        let first = r.list_queues().next().await.unwrap().unwrap();
        assert_eq!(first, "a");
    }

    #[tokio::test]
    async fn test_list_queues_empty() {
        let names: Vec<String> = registry().list_queues().try_collect().await.unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_set_queue_attributes() {
        let r = registry();
        r.create_queue("jobs", QueueOptions::new()).await.unwrap();

        let attrs = r
            .set_queue_attributes("jobs", QueueOptions::new().vt(45).maxsize(-1))
            .await
            .unwrap();
        assert_eq!(attrs.vt, 45);
        assert_eq!(attrs.delay, 0);
        assert_eq!(attrs.maxsize, MaxSize::Unbounded);
        assert!(attrs.modified >= attrs.created);
    }

    #[tokio::test]
    async fn test_set_queue_attributes_requires_one() {
        let r = registry();
        r.create_queue("jobs", QueueOptions::new()).await.unwrap();
        let result = r.set_queue_attributes("jobs", QueueOptions::new()).await;
        assert!(matches!(result, Err(QueueError::InvalidParameter(_))));

        let result = r
            .set_queue_attributes("ghost", QueueOptions::new().vt(1))
            .await;
        assert!(matches!(result, Err(QueueError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_attributes_of_empty_queue() {
        let r = registry();
        r.create_queue("jobs", QueueOptions::new().delay(3)).await.unwrap();
        let attrs = r.get_queue_attributes("jobs").await.unwrap();
        assert_eq!(attrs.delay, 3);
        assert_eq!(attrs.messages, 0);
        assert_eq!(attrs.hidden_messages, 0);
        assert_eq!(attrs.total_sent, 0);
        assert_eq!(attrs.total_recv, 0);
    }
}

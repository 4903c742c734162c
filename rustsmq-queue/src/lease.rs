//! Lease manager: receive, pop and visibility changes
//!
//! A lease hides a received message for its visibility timeout. Nothing
//! expires leases in the background; the next receive after the expiry
//! simply finds the message eligible again.

use std::sync::Arc;
use tracing::debug;

use crate::error::QueueError;
use crate::message::{Message, MessageId};
use crate::registry::QueueRegistry;
use crate::storage::{Claim, QueueStorage};
use crate::validation::validate_queue_name;

#[derive(Clone)]
pub struct LeaseManager {
    registry: QueueRegistry,
    storage: Arc<dyn QueueStorage>,
}

impl LeaseManager {
    pub fn new(registry: QueueRegistry) -> Self {
        let storage = Arc::clone(registry.storage());
        Self { registry, storage }
    }

    /// Lease the next eligible message for `vt` seconds (queue default if `None`)
    ///
    /// Returns `None` when nothing is eligible. The returned snapshot carries
    /// the incremented receive count and the new lease expiry.
    pub async fn receive(&self, queue: &str, vt: Option<i64>) -> Result<Option<Message>, QueueError> {
        let vt = vt.map(|v| self.registry.limits().vt(v)).transpose()?;
        validate_queue_name(queue)?;

        let message = self.storage.claim_eligible(queue, Claim::Lease { vt }).await?;
        if let Some(message) = &message {
            debug!(
                queue = %queue,
                id = %message.id,
                rc = message.receive_count,
                until = ?message.lease_expires_at,
                "Leased message"
            );
        }
        Ok(message)
    }

    /// Receive and delete the next eligible message in one step
    pub async fn pop(&self, queue: &str) -> Result<Option<Message>, QueueError> {
        validate_queue_name(queue)?;

        let message = self.storage.claim_eligible(queue, Claim::Remove).await?;
        if let Some(message) = &message {
            debug!(queue = %queue, id = %message.id, "Popped message");
        }
        Ok(message)
    }

    /// Hide message `id` for `vt` seconds from now; `vt = 0` reveals it at once
    pub async fn change_visibility(&self, queue: &str, id: &str, vt: i64) -> Result<(), QueueError> {
        let id = MessageId::parse(id)?;
        let vt = self.registry.limits().vt(vt)?;
        validate_queue_name(queue)?;

        if !self.storage.set_lease(queue, &id, vt).await? {
            return Err(QueueError::MessageNotFound(id.to_string()));
        }
        debug!(queue = %queue, id = %id, vt, "Changed message visibility");
        Ok(())
    }
}

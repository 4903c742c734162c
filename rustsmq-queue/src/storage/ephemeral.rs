//! In-memory ephemeral storage backend

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;

use super::traits::*;
use crate::clock::{after_secs, Clock, SystemClock};
use crate::message::{Message, MessageId};
use crate::queue::{
    MaxSize, QueueAttributes, QueueConfig, QueueSettings, QueueStats, QueueUpdate,
};

/// Messages of one queue, ordered for delivery
struct QueueState {
    config: QueueConfig,
    total_sent: u64,
    total_recv: u64,
    /// Un-leased messages by `(eligible_at, id)`
    ready: BTreeSet<(DateTime<Utc>, MessageId)>,
    /// Leased messages by `(lease_expires_at, id)`
    leased: BTreeSet<(DateTime<Utc>, MessageId)>,
    messages: HashMap<MessageId, Message>,
    /// Set once the queue is removed, for callers still holding the slot
    deleted: bool,
}

impl QueueState {
    fn new(config: QueueConfig) -> Self {
        Self {
            config,
            total_sent: 0,
            total_recv: 0,
            ready: BTreeSet::new(),
            leased: BTreeSet::new(),
            messages: HashMap::new(),
            deleted: false,
        }
    }

    fn attributes(&self, now: DateTime<Utc>) -> QueueAttributes {
        let hidden = self
            .messages
            .values()
            .filter(|message| !message.is_visible(now))
            .count();
        QueueAttributes::new(
            &self.config,
            QueueStats {
                total_recv: self.total_recv,
                total_sent: self.total_sent,
                messages: self.messages.len() as u64,
                hidden_messages: hidden as u64,
            },
        )
    }

    fn push(
        &mut self,
        payload: &Bytes,
        delay: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<SentMessage, StorageError> {
        if let MaxSize::Bytes(max) = self.config.maxsize {
            if payload.len() > max as usize {
                return Err(StorageError::PayloadTooLarge {
                    size: payload.len(),
                    max,
                });
            }
        }

        let id = MessageId::generate(now);
        let eligible_at = after_secs(now, delay.unwrap_or(self.config.delay));
        let message = Message::new(id.clone(), payload.clone(), now, eligible_at);
        self.ready.insert((eligible_at, id.clone()));
        self.messages.insert(id.clone(), message);
        self.total_sent += 1;
        Ok(SentMessage {
            id,
            depth: self.messages.len() as u64,
        })
    }

    /// Move every lease that ended at or before `now` back to the ready set
    fn release_expired(&mut self, now: DateTime<Utc>) {
        while self.leased.first().is_some_and(|(until, _)| *until <= now) {
            let Some((_, id)) = self.leased.pop_first() else {
                break;
            };
            if let Some(message) = self.messages.get_mut(&id) {
                message.lease_expires_at = None;
                self.ready.insert((message.eligible_at, id));
            }
        }
    }

    /// Lowest `(eligible_at, id)` visible at `now`, without moving anything
    fn next_eligible(&self, now: DateTime<Utc>) -> Option<&MessageId> {
        let ready = self.ready.first().filter(|(at, _)| *at <= now);
        let expired = self
            .leased
            .iter()
            .take_while(|(until, _)| *until <= now)
            .filter_map(|(_, id)| self.messages.get(id))
            .filter(|message| message.eligible_at <= now)
            .map(|message| (message.eligible_at, &message.id))
            .min();

        match (ready.map(|(at, id)| (*at, id)), expired) {
            (Some(a), Some(b)) => Some(a.min(b).1),
            (Some(a), None) => Some(a.1),
            (None, Some(b)) => Some(b.1),
            (None, None) => None,
        }
    }

    fn claim(&mut self, now: DateTime<Utc>, claim: Claim) -> Result<Option<Message>, StorageError> {
        self.release_expired(now);

        let Some((at, _)) = self.ready.first() else {
            return Ok(None);
        };
        if *at > now {
            return Ok(None);
        }
        let Some((_, id)) = self.ready.pop_first() else {
            return Ok(None);
        };

        let Some(message) = self.messages.get_mut(&id) else {
            return Err(StorageError::Internal(format!(
                "ready entry {id} has no message record"
            )));
        };
        if message.lease_expires_at.is_some_and(|until| until > now) {
            return Err(StorageError::Internal(format!(
                "message {id} is already leased"
            )));
        }

        self.total_recv += 1;
        message.receive_count += 1;
        message.first_received_at.get_or_insert(now);

        match claim {
            Claim::Lease { vt } => {
                let until = after_secs(now, vt.unwrap_or(self.config.vt));
                message.lease_expires_at = Some(until);
                let snapshot = message.clone();
                self.leased.insert((until, id));
                Ok(Some(snapshot))
            }
            Claim::Remove => Ok(self.messages.remove(&id)),
        }
    }

    /// Drop `id` from whichever ordering currently holds it
    fn unlink(&mut self, message: &Message) {
        self.ready
            .remove(&(message.eligible_at, message.id.clone()));
        if let Some(until) = message.lease_expires_at {
            self.leased.remove(&(until, message.id.clone()));
        }
    }
}

struct QueueSlot {
    state: Mutex<QueueState>,
    /// Bumped whenever a message may have become claimable
    arrivals: watch::Sender<u64>,
}

impl QueueSlot {
    fn new(config: QueueConfig) -> Self {
        let (arrivals, _) = watch::channel(0);
        Self {
            state: Mutex::new(QueueState::new(config)),
            arrivals,
        }
    }

    fn signal(&self) {
        self.arrivals.send_modify(|version| *version = version.wrapping_add(1));
    }
}

/// Ephemeral (in-memory) storage backend
pub struct EphemeralStorage {
    queues: DashMap<String, Arc<QueueSlot>>,
    clock: Arc<dyn Clock>,
}

impl Default for EphemeralStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: DashMap::new(),
            clock,
        }
    }

    fn slot(&self, name: &str) -> Result<Arc<QueueSlot>, StorageError> {
        self.queues
            .get(name)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| StorageError::QueueNotFound(name.to_string()))
    }

    /// Run `f` under the queue lock with the clock read inside it
    ///
    /// Fails if the queue is gone. Returns the slot as well so callers can
    /// signal watchers after the lock is released.
    fn with_queue<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut QueueState, DateTime<Utc>) -> Result<T, StorageError>,
    ) -> Result<(T, Arc<QueueSlot>), StorageError> {
        let slot = self.slot(name)?;
        let value = {
            let mut state = slot.state.lock();
            if state.deleted {
                return Err(StorageError::QueueNotFound(name.to_string()));
            }
            f(&mut state, self.clock.now())?
        };
        Ok((value, slot))
    }

    /// Like [`Self::with_queue`], mapping a missing queue to `None`
    fn with_existing<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut QueueState, DateTime<Utc>) -> T,
    ) -> Result<Option<T>, StorageError> {
        match self.with_queue(name, |state, now| Ok(f(state, now))) {
            Ok((value, _)) => Ok(Some(value)),
            Err(StorageError::QueueNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl QueueStorage for EphemeralStorage {
    async fn now(&self) -> Result<DateTime<Utc>, StorageError> {
        Ok(self.clock.now())
    }

    async fn insert_queue(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> Result<Option<QueueConfig>, StorageError> {
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(entry) => {
                let config = QueueConfig::new(name, settings, self.clock.now().timestamp());
                entry.insert(Arc::new(QueueSlot::new(config.clone())));
                Ok(Some(config))
            }
        }
    }

    async fn load_queue(&self, name: &str) -> Result<Option<QueueConfig>, StorageError> {
        self.with_existing(name, |state, _| state.config.clone())
    }

    async fn update_queue(
        &self,
        name: &str,
        update: &QueueUpdate,
    ) -> Result<Option<QueueAttributes>, StorageError> {
        self.with_existing(name, |state, now| {
            state.config.apply(update, now.timestamp());
            state.attributes(now)
        })
    }

    async fn remove_queue(&self, name: &str) -> Result<bool, StorageError> {
        let Some((_, slot)) = self.queues.remove(name) else {
            return Ok(false);
        };
        slot.state.lock().deleted = true;
        slot.signal();
        Ok(true)
    }

    async fn queue_page(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<QueuePage, StorageError> {
        let mut names: Vec<String> = self
            .queues
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| cursor.map_or(true, |after| name.as_str() > after))
            .collect();
        names.sort();

        let limit = limit.max(1);
        let next_cursor = if names.len() > limit {
            names.truncate(limit);
            names.last().cloned()
        } else {
            None
        };
        Ok(QueuePage { names, next_cursor })
    }

    async fn queue_attributes(
        &self,
        name: &str,
    ) -> Result<Option<QueueAttributes>, StorageError> {
        self.with_existing(name, |state, now| state.attributes(now))
    }

    async fn insert_message(
        &self,
        queue: &str,
        payload: &Bytes,
        delay: Option<u32>,
    ) -> Result<SentMessage, StorageError> {
        let (sent, slot) = self.with_queue(queue, |state, now| state.push(payload, delay, now))?;
        slot.signal();
        Ok(sent)
    }

    async fn peek_eligible(
        &self,
        queue: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<Message>, StorageError> {
        let (message, _) = self.with_queue(queue, |state, now| {
            let at = at.unwrap_or(now);
            Ok(state
                .next_eligible(at)
                .and_then(|id| state.messages.get(id))
                .cloned())
        })?;
        Ok(message)
    }

    async fn claim_eligible(
        &self,
        queue: &str,
        claim: Claim,
    ) -> Result<Option<Message>, StorageError> {
        let (message, _) = self.with_queue(queue, |state, now| state.claim(now, claim))?;
        Ok(message)
    }

    async fn set_lease(&self, queue: &str, id: &MessageId, vt: u32) -> Result<bool, StorageError> {
        let (found, slot) = self.with_queue(queue, |state, now| {
            let Some(message) = state.messages.get(id).cloned() else {
                return Ok(false);
            };
            let until = after_secs(now, vt);
            state.unlink(&message);
            state.leased.insert((until, id.clone()));
            if let Some(stored) = state.messages.get_mut(id) {
                stored.lease_expires_at = Some(until);
            }
            Ok(true)
        })?;
        if found {
            slot.signal();
        }
        Ok(found)
    }

    async fn remove_message(&self, queue: &str, id: &MessageId) -> Result<bool, StorageError> {
        let (found, _) = self.with_queue(queue, |state, _| {
            let Some(message) = state.messages.remove(id) else {
                return Ok(false);
            };
            state.unlink(&message);
            Ok(true)
        })?;
        Ok(found)
    }

    async fn watch(&self, queue: &str) -> Result<Arrivals, StorageError> {
        let slot = self.slot(queue)?;
        // Subscribe under the lock so a concurrent removal is either seen here or signalled
        let receiver = {
            let state = slot.state.lock();
            if state.deleted {
                return Err(StorageError::QueueNotFound(queue.to_string()));
            }
            slot.arrivals.subscribe()
        };
        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            Some(((), receiver))
        })
        .boxed())
    }
}

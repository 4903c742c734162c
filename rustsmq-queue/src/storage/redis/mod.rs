//! Redis storage backend
//!
//! Every operation is a single Lua script, so Redis executes it atomically.
//! Time comes from the server's `TIME` command inside each script, which
//! keeps every process sharing the same Redis on the same clock.

mod pool;
mod scripts;

use async_trait::async_trait;
use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::debug;

use super::traits::*;
use crate::clock::{from_millis, to_millis};
use crate::message::{Message, MessageId};
use crate::queue::{
    MaxSize, QueueAttributes, QueueConfig, QueueSettings, QueueStats, QueueUpdate,
};

pub use pool::RedisPoolConfig;

/// Default key namespace
pub const DEFAULT_NAMESPACE: &str = "rsmq";

/// Keys holding one queue
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueKeys {
    /// Config, counters and message records
    hash: String,
    ready: String,
    leased: String,
}

impl QueueKeys {
    fn new(namespace: &str, queue: &str) -> Self {
        Self {
            hash: format!("{}:{}:Q", namespace, queue),
            ready: format!("{}:{}", namespace, queue),
            leased: format!("{}:{}:leased", namespace, queue),
        }
    }
}

/// Set of every queue name in `namespace`
///
/// The empty segment keeps it apart from [`QueueKeys`], whose queue names
/// are never empty.
fn registry_key(namespace: &str) -> String {
    format!("{}::QUEUES", namespace)
}

/// Redis-backed queue storage
#[derive(Clone)]
pub struct RedisStorage {
    pool: Pool<RedisConnectionManager>,
    client: redis::Client,
    namespace: String,
    realtime: bool,
}

impl RedisStorage {
    /// Connect to `redis_url` and verify the connection
    pub async fn connect(
        redis_url: &str,
        namespace: impl Into<String>,
        config: RedisPoolConfig,
    ) -> Result<Self, StorageError> {
        let pool = pool::create_pool(redis_url, config).await?;
        let client = redis::Client::open(redis_url)
            .map_err(|e| StorageError::Configuration(format!("invalid redis url: {}", e)))?;
        Ok(Self::new(pool, client, namespace))
    }

    pub fn new(
        pool: Pool<RedisConnectionManager>,
        client: redis::Client,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            client,
            namespace: namespace.into(),
            realtime: false,
        }
    }

    /// Publish on `ns:rt:<queue>` after every send and use it to wake long polls
    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.namespace, queue)
    }

    fn realtime_channel(&self, queue: &str) -> String {
        format!("{}:rt:{}", self.namespace, queue)
    }

    async fn get_conn(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Unavailable(format!("failed to get connection: {}", e)))
    }

    /// Run a script over the ready, leased and config keys of `queue`
    fn message_script(&self, lua: &str, queue: &str) -> redis::Cmd {
        let keys = self.keys(queue);
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(lua)
            .arg(3)
            .arg(keys.ready)
            .arg(keys.leased)
            .arg(keys.hash);
        cmd
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StorageError::Unavailable(err.to_string())
        } else {
            StorageError::Internal(err.to_string())
        }
    }
}

fn text(raw: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(raw)
        .map_err(|_| StorageError::Internal("non UTF-8 value in message record".into()))
}

fn int_field(raw: &[u8], field: &str) -> Result<i64, StorageError> {
    text(raw)?
        .parse::<f64>()
        .map(|v| v as i64)
        .map_err(|_| StorageError::Internal(format!("bad {} value in message record", field)))
}

fn millis_field(raw: &[u8], field: &str) -> Result<DateTime<Utc>, StorageError> {
    let millis = int_field(raw, field)?;
    from_millis(millis)
        .ok_or_else(|| StorageError::Internal(format!("{} out of range: {}", field, millis)))
}

fn unexpected(what: &str, fields: usize) -> StorageError {
    StorageError::Internal(format!("unexpected {} reply with {} fields", what, fields))
}

/// Decode `{'ok', id, payload, rc, fr, ea, lease}` replies
fn parse_message_reply(queue: &str, reply: Vec<Vec<u8>>) -> Result<Option<Message>, StorageError> {
    match reply.first().map(Vec::as_slice) {
        Some(b"missing") => return Err(StorageError::QueueNotFound(queue.to_string())),
        Some(b"empty") => return Ok(None),
        Some(b"ok") if reply.len() == 7 => {}
        _ => return Err(unexpected("script", reply.len())),
    }

    let mut fields = reply.into_iter().skip(1);
    let mut next = || fields.next().unwrap_or_default();
    let id = MessageId::from_stored(text(&next())?.to_string());
    let payload = Bytes::from(next());
    let receive_count = int_field(&next(), "rc")?.max(0) as u64;
    let first_received = next();
    let eligible = next();
    let lease = next();

    let sent_at = id
        .sent_at()
        .ok_or_else(|| StorageError::Internal(format!("message id {} has no timestamp", id)))?;
    let eligible_at = millis_field(&eligible, "ea")?;
    let first_received_at = if first_received.is_empty() {
        None
    } else {
        Some(millis_field(&first_received, "fr")?)
    };
    let lease_expires_at = if lease.is_empty() {
        None
    } else {
        Some(millis_field(&lease, "lease")?)
    };

    Ok(Some(Message {
        id,
        payload,
        sent_at,
        eligible_at,
        receive_count,
        first_received_at,
        lease_expires_at,
    }))
}

/// Decode `{'missing'}`, `{'toolarge', size, max}` or `{'ok', id, depth}`
fn parse_send_reply(queue: &str, reply: Vec<Vec<u8>>) -> Result<SentMessage, StorageError> {
    match reply.as_slice() {
        [status] if status == b"missing" => Err(StorageError::QueueNotFound(queue.to_string())),
        [status, size, max] if status == b"toolarge" => Err(StorageError::PayloadTooLarge {
            size: int_field(size, "size")?.max(0) as usize,
            max: u32::try_from(int_field(max, "maxsize")?)
                .map_err(|_| StorageError::Internal(format!("queue {} has a bad maxsize", queue)))?,
        }),
        [status, id, depth] if status == b"ok" => Ok(SentMessage {
            id: MessageId::from_stored(text(id)?.to_string()),
            depth: int_field(depth, "depth")?.max(0) as u64,
        }),
        other => Err(unexpected("send", other.len())),
    }
}

fn parse_maxsize(name: &str, raw: i64) -> Result<MaxSize, StorageError> {
    match raw {
        -1 => Ok(MaxSize::Unbounded),
        bytes => u32::try_from(bytes)
            .map(MaxSize::Bytes)
            .map_err(|_| StorageError::Internal(format!("queue {} has a bad maxsize field", name))),
    }
}

fn parse_config(name: &str, fields: Vec<Option<String>>) -> Result<Option<QueueConfig>, StorageError> {
    if fields.iter().all(Option::is_none) {
        return Ok(None);
    }
    let field = |index: usize, label: &str| -> Result<i64, StorageError> {
        fields
            .get(index)
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| StorageError::Internal(format!("queue {} has a bad {} field", name, label)))
    };
    let unsigned = |value: i64, label: &str| {
        u32::try_from(value)
            .map_err(|_| StorageError::Internal(format!("queue {} has a bad {} field", name, label)))
    };

    Ok(Some(QueueConfig {
        name: name.to_string(),
        vt: unsigned(field(0, "vt")?, "vt")?,
        delay: unsigned(field(1, "delay")?, "delay")?,
        maxsize: parse_maxsize(name, field(2, "maxsize")?)?,
        created: field(3, "created")?,
        modified: field(4, "modified")?,
    }))
}

/// Decode `{vt, delay, maxsize, created, modified, totalrecv, totalsent, msgs, hidden}`
fn parse_attributes(name: &str, reply: Vec<i64>) -> Result<Option<QueueAttributes>, StorageError> {
    let [vt, delay, maxsize, created, modified, recv, sent, msgs, hidden] = reply.as_slice() else {
        return if reply.is_empty() {
            Ok(None)
        } else {
            Err(unexpected("attributes", reply.len()))
        };
    };
    let unsigned = |value: i64, label: &str| {
        u32::try_from(value)
            .map_err(|_| StorageError::Internal(format!("queue {} has a bad {} field", name, label)))
    };
    let config = QueueConfig {
        name: name.to_string(),
        vt: unsigned(*vt, "vt")?,
        delay: unsigned(*delay, "delay")?,
        maxsize: parse_maxsize(name, *maxsize)?,
        created: *created,
        modified: *modified,
    };
    let stats = QueueStats {
        total_recv: (*recv).max(0) as u64,
        total_sent: (*sent).max(0) as u64,
        messages: (*msgs).max(0) as u64,
        hidden_messages: (*hidden).max(0) as u64,
    };
    Ok(Some(QueueAttributes::new(&config, stats)))
}

fn optional_arg<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[async_trait]
impl QueueStorage for RedisStorage {
    async fn now(&self) -> Result<DateTime<Utc>, StorageError> {
        let mut conn = self.get_conn().await?;
        let (secs, micros): (i64, i64) = redis::cmd("TIME").query_async(&mut *conn).await?;
        DateTime::from_timestamp_micros(secs * 1_000_000 + micros)
            .ok_or_else(|| StorageError::Internal(format!("server time out of range: {}", secs)))
    }

    async fn insert_queue(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> Result<Option<QueueConfig>, StorageError> {
        let mut conn = self.get_conn().await?;
        let created: i64 = redis::cmd("EVAL")
            .arg(scripts::CREATE_QUEUE)
            .arg(2)
            .arg(self.keys(name).hash)
            .arg(registry_key(&self.namespace))
            .arg(settings.vt)
            .arg(settings.delay)
            .arg(settings.maxsize.as_raw())
            .arg(name)
            .query_async(&mut *conn)
            .await?;
        Ok((created >= 0).then(|| QueueConfig::new(name, settings, created)))
    }

    async fn load_queue(&self, name: &str) -> Result<Option<QueueConfig>, StorageError> {
        let mut conn = self.get_conn().await?;
        let fields: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.keys(name).hash)
            .arg("vt")
            .arg("delay")
            .arg("maxsize")
            .arg("created")
            .arg("modified")
            .query_async(&mut *conn)
            .await?;
        parse_config(name, fields)
    }

    async fn update_queue(
        &self,
        name: &str,
        update: &QueueUpdate,
    ) -> Result<Option<QueueAttributes>, StorageError> {
        let mut conn = self.get_conn().await?;
        let reply: Vec<i64> = self
            .message_script(scripts::UPDATE_QUEUE, name)
            .arg(optional_arg(update.vt))
            .arg(optional_arg(update.delay))
            .arg(optional_arg(update.maxsize.map(MaxSize::as_raw)))
            .query_async(&mut *conn)
            .await?;
        parse_attributes(name, reply)
    }

    async fn remove_queue(&self, name: &str) -> Result<bool, StorageError> {
        let keys = self.keys(name);
        let mut conn = self.get_conn().await?;
        let removed: i64 = redis::cmd("EVAL")
            .arg(scripts::DELETE_QUEUE)
            .arg(4)
            .arg(keys.hash)
            .arg(keys.ready)
            .arg(keys.leased)
            .arg(registry_key(&self.namespace))
            .arg(name)
            .query_async(&mut *conn)
            .await?;
        Ok(removed == 1)
    }

    async fn queue_page(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<QueuePage, StorageError> {
        let mut conn = self.get_conn().await?;
        let (next, names): (String, Vec<String>) = redis::cmd("SSCAN")
            .arg(registry_key(&self.namespace))
            .arg(cursor.unwrap_or("0"))
            .arg("COUNT")
            .arg(limit.max(1))
            .query_async(&mut *conn)
            .await?;
        let next_cursor = (next != "0").then_some(next);
        Ok(QueuePage { names, next_cursor })
    }

    async fn queue_attributes(
        &self,
        name: &str,
    ) -> Result<Option<QueueAttributes>, StorageError> {
        let mut conn = self.get_conn().await?;
        let reply: Vec<i64> = self
            .message_script(scripts::QUEUE_ATTRIBUTES, name)
            .query_async(&mut *conn)
            .await?;
        parse_attributes(name, reply)
    }

    async fn insert_message(
        &self,
        queue: &str,
        payload: &Bytes,
        delay: Option<u32>,
    ) -> Result<SentMessage, StorageError> {
        let channel = if self.realtime {
            self.realtime_channel(queue)
        } else {
            String::new()
        };
        let mut conn = self.get_conn().await?;
        let reply: Vec<Vec<u8>> = self
            .message_script(scripts::SEND_MESSAGE, queue)
            .arg(MessageId::random_suffix())
            .arg(&payload[..])
            .arg(optional_arg(delay))
            .arg(channel)
            .query_async(&mut *conn)
            .await?;
        parse_send_reply(queue, reply)
    }

    async fn peek_eligible(
        &self,
        queue: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<Message>, StorageError> {
        let mut conn = self.get_conn().await?;
        let reply: Vec<Vec<u8>> = self
            .message_script(scripts::PEEK_MESSAGE, queue)
            .arg(optional_arg(at.map(to_millis)))
            .query_async(&mut *conn)
            .await?;
        parse_message_reply(queue, reply)
    }

    async fn claim_eligible(
        &self,
        queue: &str,
        claim: Claim,
    ) -> Result<Option<Message>, StorageError> {
        let (vt, mode) = match claim {
            Claim::Lease { vt } => (vt, "lease"),
            Claim::Remove => (None, "remove"),
        };
        let mut conn = self.get_conn().await?;
        let reply: Vec<Vec<u8>> = self
            .message_script(scripts::CLAIM_MESSAGE, queue)
            .arg(optional_arg(vt))
            .arg(mode)
            .query_async(&mut *conn)
            .await?;
        parse_message_reply(queue, reply)
    }

    async fn set_lease(&self, queue: &str, id: &MessageId, vt: u32) -> Result<bool, StorageError> {
        let mut conn = self.get_conn().await?;
        let status: i64 = self
            .message_script(scripts::SET_LEASE, queue)
            .arg(id.as_str())
            .arg(vt)
            .query_async(&mut *conn)
            .await?;
        match status {
            -1 => Err(StorageError::QueueNotFound(queue.to_string())),
            found => Ok(found == 1),
        }
    }

    async fn remove_message(&self, queue: &str, id: &MessageId) -> Result<bool, StorageError> {
        let mut conn = self.get_conn().await?;
        let status: i64 = self
            .message_script(scripts::DELETE_MESSAGE, queue)
            .arg(id.as_str())
            .query_async(&mut *conn)
            .await?;
        match status {
            -1 => Err(StorageError::QueueNotFound(queue.to_string())),
            removed => Ok(removed == 1),
        }
    }

    async fn watch(&self, queue: &str) -> Result<Arrivals, StorageError> {
        if !self.realtime {
            return Ok(stream::pending().boxed());
        }

        let channel = self.realtime_channel(queue);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        debug!(queue = %queue, channel = %channel, "Subscribed to realtime notifications");
        Ok(pubsub.into_on_message().map(|_| ()).boxed())
    }
}

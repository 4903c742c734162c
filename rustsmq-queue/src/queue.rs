//! Queue configuration and attributes

use serde::Serialize;

/// Default visibility timeout in seconds
pub const DEFAULT_VT: u32 = 30;
/// Default delivery delay in seconds
pub const DEFAULT_DELAY: u32 = 0;
/// Default maximum message size in bytes
pub const DEFAULT_MAX_SIZE: u32 = 65536;
/// Wire value meaning "no size limit"
pub const MAX_SIZE_UNBOUNDED: i64 = -1;

/// Upper bound on message payload size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i64")]
pub enum MaxSize {
    Unbounded,
    Bytes(u32),
}

impl MaxSize {
    /// Whether a payload of `len` bytes fits
    pub fn admits(self, len: usize) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Bytes(max) => len <= max as usize,
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Self::Unbounded => MAX_SIZE_UNBOUNDED,
            Self::Bytes(max) => i64::from(max),
        }
    }
}

impl Default for MaxSize {
    fn default() -> Self {
        Self::Bytes(DEFAULT_MAX_SIZE)
    }
}

impl From<MaxSize> for i64 {
    fn from(size: MaxSize) -> Self {
        size.as_raw()
    }
}

/// Persisted configuration of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueConfig {
    pub name: String,
    /// Default visibility timeout in seconds
    pub vt: u32,
    /// Default delivery delay in seconds
    pub delay: u32,
    pub maxsize: MaxSize,
    /// Unix seconds
    pub created: i64,
    /// Unix seconds
    pub modified: i64,
}

/// Raw, unvalidated queue attributes as supplied by a caller
///
/// Used both for creating a queue (absent fields take defaults) and for
/// updating one (absent fields are left untouched).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub vt: Option<i64>,
    pub delay: Option<i64>,
    pub maxsize: Option<i64>,
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn vt(mut self, secs: i64) -> Self {
        self.vt = Some(secs);
        self
    }

    #[must_use]
    pub fn delay(mut self, secs: i64) -> Self {
        self.delay = Some(secs);
        self
    }

    #[must_use]
    pub fn maxsize(mut self, bytes: i64) -> Self {
        self.maxsize = Some(bytes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.vt.is_none() && self.delay.is_none() && self.maxsize.is_none()
    }
}

/// Validated settings for a new queue, defaults already applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub vt: u32,
    pub delay: u32,
    pub maxsize: MaxSize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            vt: DEFAULT_VT,
            delay: DEFAULT_DELAY,
            maxsize: MaxSize::default(),
        }
    }
}

/// Validated attribute changes handed to storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueUpdate {
    pub vt: Option<u32>,
    pub delay: Option<u32>,
    pub maxsize: Option<MaxSize>,
}

/// Counters kept by storage alongside the queue config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total_recv: u64,
    pub total_sent: u64,
    /// Every stored message
    pub messages: u64,
    /// Messages not receivable right now (delayed or leased)
    pub hidden_messages: u64,
}

/// Queue configuration together with live counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueAttributes {
    pub vt: u32,
    pub delay: u32,
    pub maxsize: MaxSize,
    #[serde(rename = "totalrecv")]
    pub total_recv: u64,
    #[serde(rename = "totalsent")]
    pub total_sent: u64,
    pub created: i64,
    pub modified: i64,
    #[serde(rename = "msgs")]
    pub messages: u64,
    #[serde(rename = "hiddenmsgs")]
    pub hidden_messages: u64,
}

impl QueueConfig {
    pub(crate) fn new(name: &str, settings: &QueueSettings, created: i64) -> Self {
        Self {
            name: name.to_string(),
            vt: settings.vt,
            delay: settings.delay,
            maxsize: settings.maxsize,
            created,
            modified: created,
        }
    }

    /// Apply `update`, stamping `modified`
    pub(crate) fn apply(&mut self, update: &QueueUpdate, modified: i64) {
        if let Some(vt) = update.vt {
            self.vt = vt;
        }
        if let Some(delay) = update.delay {
            self.delay = delay;
        }
        if let Some(maxsize) = update.maxsize {
            self.maxsize = maxsize;
        }
        self.modified = modified;
    }
}

impl QueueAttributes {
    pub(crate) fn new(config: &QueueConfig, stats: QueueStats) -> Self {
        Self {
            vt: config.vt,
            delay: config.delay,
            maxsize: config.maxsize,
            total_recv: stats.total_recv,
            total_sent: stats.total_sent,
            created: config.created,
            modified: config.modified,
            messages: stats.messages,
            hidden_messages: stats.hidden_messages,
        }
    }
}

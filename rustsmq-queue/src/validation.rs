//! Parameter validation

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::QueueError;
use crate::queue::{MaxSize, QueueOptions, QueueUpdate, MAX_SIZE_UNBOUNDED};

static QUEUE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,160}$").expect("queue name pattern is valid"));

pub(crate) fn validate_queue_name(name: &str) -> Result<(), QueueError> {
    if QUEUE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(QueueError::invalid("Incorrect format for queue name."))
    }
}

/// Allowed ranges for queue attributes and per-call overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueLimits {
    /// Largest visibility timeout in seconds
    pub max_vt: u32,
    /// Largest delivery delay in seconds
    pub max_delay: u32,
    /// Smallest bounded `maxsize` in bytes
    pub min_max_size: u32,
    /// Ceiling for a bounded `maxsize` in bytes
    pub max_max_size: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_vt: 9_999_999,
            max_delay: 9_999_999,
            min_max_size: 1024,
            max_max_size: 65536,
        }
    }
}

impl QueueLimits {
    pub fn vt(&self, secs: i64) -> Result<u32, QueueError> {
        in_range(secs, self.max_vt)
            .ok_or_else(|| QueueError::invalid("Incorrect value for vt parameter."))
    }

    pub fn delay(&self, secs: i64) -> Result<u32, QueueError> {
        in_range(secs, self.max_delay)
            .ok_or_else(|| QueueError::invalid("Incorrect value for delay parameter."))
    }

    pub fn max_size(&self, bytes: i64) -> Result<MaxSize, QueueError> {
        if bytes == MAX_SIZE_UNBOUNDED {
            return Ok(MaxSize::Unbounded);
        }
        match u32::try_from(bytes) {
            Ok(bytes) if (self.min_max_size..=self.max_max_size).contains(&bytes) => {
                Ok(MaxSize::Bytes(bytes))
            }
            _ => Err(QueueError::invalid("Incorrect value for maxsize parameter.")),
        }
    }

    /// Validate every attribute present in `options`
    pub(crate) fn update(&self, options: &QueueOptions) -> Result<QueueUpdate, QueueError> {
        Ok(QueueUpdate {
            vt: options.vt.map(|v| self.vt(v)).transpose()?,
            delay: options.delay.map(|d| self.delay(d)).transpose()?,
            maxsize: options.maxsize.map(|m| self.max_size(m)).transpose()?,
        })
    }
}

fn in_range(value: i64, max: u32) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v <= max)
}

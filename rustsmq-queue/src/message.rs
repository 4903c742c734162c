//! Messages and message identifiers

use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::QueueError;

const ID_TIME_DIGITS: usize = 10;
const ID_RANDOM_LENGTH: usize = 22;
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9:]{32}$").expect("message id pattern is valid"));

/// Highest timestamp prefix handed out by this process
static LAST_ID_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Time-ordered message identifier
///
/// Ten base-36 digits of the enqueue time in microseconds followed by 22
/// random alphanumeric characters. The prefix is zero-padded, so comparing
/// two ids as strings compares their enqueue times.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate an id for a message enqueued at `at`
    ///
    /// Ids generated in the same process are strictly increasing, even when
    /// the clock does not move between calls.
    pub fn generate(at: DateTime<Utc>) -> Self {
        let wall = at.timestamp_micros();
        let previous = match LAST_ID_MICROS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(wall.max(last.saturating_add(1)))
        }) {
            Ok(previous) | Err(previous) => previous,
        };
        let micros = wall.max(previous.saturating_add(1));

        Self(format!("{}{}", base36_encode(micros), Self::random_suffix()))
    }

    /// Random tail of an id, for backends that stamp the time prefix themselves
    pub(crate) fn random_suffix() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_RANDOM_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Parse an id supplied by a caller
    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        if ID_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(QueueError::invalid("Incorrect format for message ID."))
        }
    }

    /// Wrap an id read back from storage
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Enqueue time encoded in the id prefix
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let prefix = self.0.get(..ID_TIME_DIGITS)?;
        let micros = i64::from_str_radix(prefix, 36).ok()?;
        DateTime::from_timestamp_micros(micros)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MessageId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn base36_encode(value: i64) -> String {
    let mut n = value.max(0).unsigned_abs();
    let mut digits = Vec::with_capacity(ID_TIME_DIGITS);
    while n > 0 {
        digits.push(BASE36_ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    while digits.len() < ID_TIME_DIGITS {
        digits.push(b'0');
    }
    digits.iter().rev().map(|&b| char::from(b)).collect()
}

/// A message as stored, with its delivery state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Bytes,
    pub sent_at: DateTime<Utc>,
    /// Earliest time the message may be received
    pub eligible_at: DateTime<Utc>,
    /// Number of leases granted so far
    pub receive_count: u64,
    pub first_received_at: Option<DateTime<Utc>>,
    /// End of the current lease, if one was granted
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Message {
    pub(crate) fn new(
        id: MessageId,
        payload: Bytes,
        sent_at: DateTime<Utc>,
        eligible_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            sent_at,
            eligible_at,
            receive_count: 0,
            first_received_at: None,
            lease_expires_at: None,
        }
    }

    /// Whether a receive at `now` may return this message
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        now >= self.eligible_at && self.lease_expires_at.map_or(true, |until| now >= until)
    }

    /// Payload as UTF-8 text, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_format() {
        let id = MessageId::generate(Utc::now());
        assert_eq!(id.as_str().len(), 32);
        assert!(MessageId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_ids_increase_with_frozen_clock() {
        let at = Utc::now();
        let ids: Vec<MessageId> = (0..100).map(|_| MessageId::generate(at)).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_sent_at_decodes_prefix() {
        let at = Utc::now();
        let id = MessageId::generate(at);
        let sent = id.sent_at().unwrap();
        assert!(sent >= at - chrono::Duration::microseconds(1));
        assert!(sent - at < chrono::Duration::minutes(1));
    }

    #[test]
    fn test_random_suffix_fills_id() {
        let suffix = MessageId::random_suffix();
        assert_eq!(suffix.len() + ID_TIME_DIGITS, 32);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_parse_rejects_bad_ids() {
        assert!(MessageId::parse("short").is_err());
        assert!(MessageId::parse(&"a".repeat(33)).is_err());
        assert!(MessageId::parse(&format!("{}!", "a".repeat(31))).is_err());
        assert!(MessageId::parse(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn test_base36_is_zero_padded() {
        assert_eq!(base36_encode(0), "0000000000");
        assert_eq!(base36_encode(35), "000000000z");
        assert_eq!(base36_encode(36), "0000000010");
    }

    #[test]
    fn test_visibility_rules() {
        let now = Utc::now();
        let mut message = Message::new(
            MessageId::generate(now),
            Bytes::from_static(b"x"),
            now,
            now + chrono::Duration::seconds(5),
        );
        assert!(!message.is_visible(now));
        assert!(message.is_visible(now + chrono::Duration::seconds(5)));

        message.lease_expires_at = Some(now + chrono::Duration::seconds(10));
        assert!(!message.is_visible(now + chrono::Duration::seconds(9)));
        assert!(message.is_visible(now + chrono::Duration::seconds(10)));
    }
}

//! # Wire Envelope
//!
//! The transport-level wrapper around every request and reply body.
//!
//! ## Properties
//!
//! - **Correlation**: requests carry a fresh `correlation_id`; replies echo it.
//! - **Reply routing**: requests expecting an answer carry `reply_to`.
//! - **Retry accounting**: the `x-retry-count` header is a typed integer,
//!   decoded leniently (absent or garbage reads as 0) and always encoded as an
//!   integer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header carrying the number of times a message went back to its main queue.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Content type used for every JSON body on the bus.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A single header value, modelled on the AMQP field table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        HeaderValue::Bytes(value)
    }
}

/// Message header table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderValue>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    /// Read the retry count carried by these headers.
    #[must_use]
    pub fn retry_count(&self) -> RetryCount {
        RetryCount::decode(self)
    }

    /// Overwrite the retry count carried by these headers.
    pub fn set_retry_count(&mut self, count: RetryCount) {
        count.encode(self);
    }
}

/// Number of times a message has been returned to its main queue.
///
/// Starts at 0 and only ever grows by one per requeue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RetryCount(u32);

impl RetryCount {
    pub const ZERO: RetryCount = RetryCount(0);

    #[must_use]
    pub fn new(count: u32) -> Self {
        Self(count)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// True once this count has used up a budget of `max_retries` requeues.
    #[must_use]
    pub fn is_exhausted(self, max_retries: u32) -> bool {
        self.0 >= max_retries
    }

    /// Decode from a header table.
    ///
    /// Integers are taken as-is; strings and byte arrays must hold a base-10
    /// integer. Anything absent, negative or unparsable is 0, never "exhausted".
    #[must_use]
    pub fn decode(headers: &Headers) -> Self {
        let parsed = match headers.get(RETRY_COUNT_HEADER) {
            Some(HeaderValue::Int(n)) => u32::try_from(*n).ok(),
            Some(HeaderValue::Str(s)) => s.trim().parse::<u32>().ok(),
            Some(HeaderValue::Bytes(b)) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok()),
            None => None,
        };
        Self(parsed.unwrap_or(0))
    }

    /// Encode into a header table as an integer.
    pub fn encode(self, headers: &mut Headers) {
        headers.insert(RETRY_COUNT_HEADER, i64::from(self.0));
    }
}

impl fmt::Display for RetryCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-message properties, mirroring AMQP basic properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// Token linking a request to its reply.
    pub correlation_id: Option<String>,
    /// Destination for the reply, if one is expected.
    pub reply_to: Option<String>,
    /// MIME type of the body.
    pub content_type: Option<String>,
    /// Header table (retry count lives here).
    pub headers: Headers,
}

impl MessageProperties {
    /// Properties for a request that expects a reply on `reply_to`.
    #[must_use]
    pub fn request(correlation_id: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            reply_to: Some(reply_to.into()),
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            headers: Headers::new(),
        }
    }

    /// Properties for a reply to the request identified by `correlation_id`.
    #[must_use]
    pub fn reply(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            reply_to: None,
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn retry_count(&self) -> RetryCount {
        self.headers.retry_count()
    }

    /// Where and under which correlation id a reply should go.
    ///
    /// Returns `None` unless both the reply destination and the correlation
    /// id are present and non-empty.
    #[must_use]
    pub fn reply_route(&self) -> Option<(&str, &str)> {
        match (self.reply_to.as_deref(), self.correlation_id.as_deref()) {
            (Some(reply_to), Some(correlation_id))
                if !reply_to.is_empty() && !correlation_id.is_empty() =>
            {
                Some((reply_to, correlation_id))
            }
            _ => None,
        }
    }
}

/// A published message: properties plus an opaque body.
///
/// Immutable once published; the broker hands out clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub properties: MessageProperties,
    pub body: Bytes,
}

impl Envelope {
    #[must_use]
    pub fn new(properties: MessageProperties, body: impl Into<Bytes>) -> Self {
        Self {
            properties,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    #[must_use]
    pub fn retry_count(&self) -> RetryCount {
        self.properties.retry_count()
    }
}

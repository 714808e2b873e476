//! Cache types

use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Metadata for one cached file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub last_access_time: i64,
}

impl CacheEntry {
    pub fn new(size: u64, last_access_time: i64) -> Self {
        Self {
            size,
            last_access_time,
        }
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub used_space: u64,
    pub file_count: usize,
    /// `None` while the cache is empty
    pub oldest_access_time: Option<i64>,
    /// Writes since the last snapshot
    pub write_ops: u64,
    pub last_snapshot: Option<i64>,
    pub last_eviction: Option<i64>,
}

/// Content handed to `FileCache::add`
pub enum Payload {
    /// Copied to disk as it is read
    Stream(Pin<Box<dyn AsyncRead + Send>>),
    Bytes(Vec<u8>),
    /// JSON text, encoded once when the payload is built
    Record(Vec<u8>),
    /// Written as-is
    Scalar(String),
}

impl Payload {
    pub fn stream<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Payload::Stream(Box::pin(reader))
    }

    /// Encode a serializable value as a record payload
    pub fn record<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Payload::Record(serde_json::to_vec(value)?))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Stream(_) => "stream",
            Payload::Bytes(_) => "bytes",
            Payload::Record(_) => "record",
            Payload::Scalar(_) => "scalar",
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Stream(_) => f.write_str("Payload::Stream(..)"),
            Payload::Bytes(data) => write!(f, "Payload::Bytes({} bytes)", data.len()),
            Payload::Record(json) => write!(f, "Payload::Record({} bytes)", json.len()),
            Payload::Scalar(text) => write!(f, "Payload::Scalar({:?})", text),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Bytes(data)
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Payload::Bytes(data.to_vec())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Record(value.to_string().into_bytes())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Scalar(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Scalar(text.to_string())
    }
}

macro_rules! scalar_payload {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Payload {
                fn from(value: $t) -> Self {
                    Payload::Scalar(value.to_string())
                }
            }
        )*
    };
}

scalar_payload!(i32, i64, u32, u64, usize, f32, f64, bool);

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

//! Error types for the file cache

use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CacheError {
    /// The requested key has no backing file
    NotFound(PathBuf),
    /// The key cannot be mapped to a path inside the cache directory
    InvalidKey(String),
    /// Directory creation or payload write failed
    Write(Box<io::Error>),
    /// The payload could not be encoded
    Serialization(String),
    /// Unlinking a single entry failed
    Delete(Box<io::Error>),
    /// Reading or writing the metadata snapshot failed
    Persistence(String),
    Io(Box<io::Error>),
}

impl CacheError {
    /// True for every failure of the write path, including encoding failures
    pub fn is_write_error(&self) -> bool {
        matches!(self, CacheError::Write(_) | CacheError::Serialization(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::NotFound(path) => write!(f, "Cache entry not found: {}", path.display()),
            CacheError::InvalidKey(key) => write!(f, "Invalid cache key: {:?}", key),
            CacheError::Write(err) => write!(f, "Write error: {}", err),
            CacheError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::Delete(err) => write!(f, "Delete error: {}", err),
            CacheError::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Write(err) | CacheError::Delete(err) | CacheError::Io(err) => {
                Some(err.as_ref())
            }
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

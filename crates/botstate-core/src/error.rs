//! Error types for the botstate-core crate

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using `StorageError`
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// The presented eTag does not allow overwriting the stored record
    #[error("concurrency conflict on key {key:?}: presented eTag {presented:?}, current {current:?}")]
    ConcurrencyConflict {
        key: String,
        presented: String,
        current: String,
    },

    /// Stored payload cannot be deserialized
    #[error("corrupt record for key {key:?}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Filesystem error
    #[error("io failure for key {key:?}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Payload could not be serialized
    #[error("serialization error for key {key:?}: {reason}")]
    Serialization { key: String, reason: String },

    /// Key cannot be stored by this backend
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Timeout error
    #[error("operation on key {key:?} timed out after {limit:?}")]
    Timeout { key: String, limit: Duration },

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One or more keys of a write batch were rejected
    #[error("{0}")]
    Write(WriteFailures),
}

/// Flat classification of a [`StorageError`], comparable across backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConcurrencyConflict,
    CorruptRecord,
    Io,
    Serialization,
    InvalidKey,
    Timeout,
    Configuration,
    /// A write batch whose failures are of different kinds
    Batch,
}

impl StorageError {
    /// Create an IO error attributed to a key
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error.
    ///
    /// A [`StorageError::Write`] reports the kind shared by all of its
    /// failures, or [`ErrorKind::Batch`] when they differ.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::CorruptRecord { .. } => ErrorKind::CorruptRecord,
            Self::Io { .. } => ErrorKind::Io,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Write(failures) => failures.uniform_kind().unwrap_or(ErrorKind::Batch),
        }
    }

    /// Whether this error is (entirely) a concurrency conflict
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }

    /// The key this error is attributed to, if it concerns a single key
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::ConcurrencyConflict { key, .. }
            | Self::CorruptRecord { key, .. }
            | Self::Io { key, .. }
            | Self::Serialization { key, .. }
            | Self::InvalidKey { key, .. }
            | Self::Timeout { key, .. } => Some(key),
            Self::Configuration(_) | Self::Write(_) => None,
        }
    }

    /// Every key this error reports as failed
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            Self::Write(failures) => failures.failed_keys().collect(),
            other => other.key().into_iter().collect(),
        }
    }
}

/// Per-key outcome of a write batch that was not fully accepted.
///
/// Keys listed as written were committed and carry fresh eTags; every other
/// key of the batch is mapped to the error that rejected it.
#[derive(Debug, Default)]
pub struct WriteFailures {
    failures: BTreeMap<String, StorageError>,
    written: Vec<String>,
}

impl WriteFailures {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a key was rejected
    pub fn record_failure(&mut self, key: impl Into<String>, error: StorageError) {
        self.failures.insert(key.into(), error);
    }

    /// Record that a key was committed
    pub fn record_written(&mut self, key: impl Into<String>) {
        self.written.push(key.into());
    }

    /// Whether no key failed
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failed keys
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// The error for a failed key
    pub fn get(&self, key: &str) -> Option<&StorageError> {
        self.failures.get(key)
    }

    /// Failed keys, in sorted order
    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.failures.keys().map(String::as_str)
    }

    /// Keys that were committed
    pub fn written_keys(&self) -> &[String] {
        &self.written
    }

    /// Iterate over failed keys and their errors
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StorageError)> {
        self.failures.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// `Ok(())` when nothing failed, otherwise [`StorageError::Write`]
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Write(self))
        }
    }

    fn uniform_kind(&self) -> Option<ErrorKind> {
        let mut kinds = self.failures.values().map(StorageError::kind);
        let first = kinds.next()?;
        kinds.all(|k| k == first).then_some(first)
    }
}

impl fmt::Display for WriteFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write rejected for {} key(s)", self.failures.len())?;
        for (i, error) in self.failures.values().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, error)?;
        }
        Ok(())
    }
}

//! Optimistic concurrency rules shared by every backend
//!
//! A write presents the eTag it last observed. The stored eTag of the key
//! decides whether that write may proceed:
//!
//! | stored  | presented          | outcome   |
//! |---------|--------------------|-----------|
//! | none    | anything           | create    |
//! | some    | `*`                | overwrite |
//! | some    | equal, non-empty   | match     |
//! | some    | anything else      | conflict  |

use crate::{Result, StorageError};
use tracing::warn;

/// eTag that skips the concurrency check
pub const WILDCARD_ETAG: &str = "*";

/// Why a write was accepted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precondition {
    /// The key does not exist yet
    Create,
    /// The wildcard eTag was presented
    Overwrite,
    /// The presented eTag equals the stored one
    Match,
}

/// Decide whether a write presenting `presented` may replace a key whose
/// stored eTag is `current` (`None` if the key does not exist).
///
/// Creating a key accepts any presented eTag, including a non-empty one the
/// backend never issued. An empty eTag never matches an existing key, even
/// one stored without an eTag.
pub fn validate(key: &str, current: Option<&str>, presented: &str) -> Result<Precondition> {
    let current = match current {
        None => return Ok(Precondition::Create),
        Some(current) => current,
    };

    if presented == WILDCARD_ETAG {
        return Ok(Precondition::Overwrite);
    }
    if !presented.is_empty() && presented == current {
        return Ok(Precondition::Match);
    }

    warn!(key = %key, presented = %presented, current = %current, "Rejected write with stale eTag");
    Err(StorageError::ConcurrencyConflict {
        key: key.to_string(),
        presented: presented.to_string(),
        current: current.to_string(),
    })
}

/// Longest key accepted, measured in its escaped form where every byte
/// outside `A-Z a-z 0-9 - . _ ~` counts as three. A key at the limit still
/// fits a 255-byte file name once suffixed with `.json`.
pub const MAX_KEY_LEN: usize = 250;

/// Length of `key` once percent-encoded
pub fn escaped_len(key: &str) -> usize {
    key.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => 1,
            _ => 3,
        })
        .sum()
}

/// Reject keys no backend can store
pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key(key, "key must not be empty"));
    }
    let len = escaped_len(key);
    if len > MAX_KEY_LEN {
        return Err(StorageError::invalid_key(
            key,
            format!("escaped key is {} bytes, limit is {}", len, MAX_KEY_LEN),
        ));
    }
    Ok(())
}

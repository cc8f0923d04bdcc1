//! Key to file name mapping for [`FileStorage`](crate::FileStorage)
//!
//! A key is percent-encoded (every byte outside `A-Z a-z 0-9 - . _ ~` becomes
//! `%XX` with uppercase hex, `%` included) and suffixed with `.json`. The
//! mapping is injective and reversible, and the encoded name never contains a
//! path separator. It assumes a case-sensitive filesystem.
//!
//! Key length is bounded by [`check_key`], which every backend applies, so a
//! key accepted here is accepted by the memory backend too.

use botstate_core::{check_key, Result};

/// Extension of record files
pub const RECORD_EXTENSION: &str = ".json";

/// Longest file name accepted by common filesystems
pub const MAX_FILE_NAME_LEN: usize = 255;

/// File name storing `key`
pub fn file_name_for(key: &str) -> Result<String> {
    check_key(key)?;
    Ok(format!("{}{}", urlencoding::encode(key), RECORD_EXTENSION))
}

/// Key stored in a file, or `None` for files this backend did not write
pub fn key_for(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(RECORD_EXTENSION)?;
    let key = urlencoding::decode(stem).ok()?;
    if key.is_empty() || urlencoding::encode(&key) != stem {
        return None;
    }
    Some(key.into_owned())
}

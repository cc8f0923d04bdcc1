//! # botstate
//!
//! ETag-guarded key-value state storage.
//!
//! Applications persist structured records under string keys and update them
//! with optimistic concurrency: every write presents the eTag it last saw and
//! is rejected if the record changed in the meantime. Two interchangeable
//! backends implement the same [`Storage`] contract:
//!
//! - [`MemoryStorage`] for tests and single-process state
//! - [`FileStorage`] for durable state, one JSON file per key
//!
//! ## Example
//!
//! ```rust,ignore
//! use botstate::{MemoryStorage, Record, StorageExt};
//!
//! let storage = MemoryStorage::new();
//! let mut profile = Record::new(Profile { name: "ada".into(), visits: 1 });
//! storage.write_record("user/ada", &mut profile).await?;
//!
//! profile.value.visits += 1;
//! storage.write_record("user/ada", &mut profile).await?; // matches, accepted
//! ```

pub use botstate_core::{
    check_key, etag, validate, Document, ErrorKind, Precondition, Record, Result, Storage,
    StorageError, StorageExt, StoreItem, StoreItems, WriteFailures, ETAG_FIELD, MAX_KEY_LEN,
    WILDCARD_ETAG,
};
pub use botstate_storage::{naming, FileStorage, FileStorageConfig, MemoryStorage};

//! # botstate storage
//!
//! Storage backends for botstate.
//!
//! This crate provides:
//! - **MemoryStorage**: process-local records behind a single lock
//! - **FileStorage**: one JSON file per key with atomic replace-on-write
//! - **Key naming**: the reversible key to file name mapping used on disk
//!
//! Both backends run every write through the same eTag validator, so the
//! same sequence of calls has the same observable outcome on either.
//!
//! ## Example
//!
//! ```rust,ignore
//! use botstate_storage::{FileStorage, FileStorageConfig};
//! use botstate_core::{Document, StorageExt};
//!
//! let storage = FileStorage::new(FileStorageConfig::new("/var/lib/bot/state")).await?;
//! let mut doc = Document::new().with_field("turns", 1);
//! storage.write_one("conversation/42", &mut doc).await?;
//! ```

pub mod config;
pub mod file;
pub mod memory;
pub mod naming;

pub use config::FileStorageConfig;
pub use file::FileStorage;
pub use memory::MemoryStorage;

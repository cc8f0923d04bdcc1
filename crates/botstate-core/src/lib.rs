//! # botstate core
//!
//! Record model and storage contract for eTag-guarded key-value state.
//!
//! This crate provides:
//! - **Record model**: [`Document`], the typed [`Record`] view and [`StoreItems`] batches
//! - **Storage contract**: the async [`Storage`] trait every backend implements
//! - **Concurrency validation**: the optimistic eTag rules in [`validator`]
//! - **eTag generation**: content digest plus random disambiguator in [`etag`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Application Layer            │
//! ├─────────────────────────────────────────┤
//! │      Storage / StorageExt Traits        │
//! ├─────────────────────────────────────────┤
//! │     Concurrency Validator + eTags       │
//! ├────────────────────┬────────────────────┤
//! │   MemoryStorage    │    FileStorage     │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use botstate_core::{Document, Storage, StorageExt, StoreItem};
//!
//! let mut doc = Document::new().with_field("count", 1);
//! storage.write_one("update", &mut doc).await?;
//! // doc now carries the eTag the backend issued
//! let current = storage.read_one("update").await?;
//! ```

pub mod error;
pub mod etag;
pub mod item;
pub mod validator;

pub use error::{ErrorKind, Result, StorageError, WriteFailures};
pub use item::{Document, Record, StoreItem, StoreItems, ETAG_FIELD};
pub use validator::{check_key, escaped_len, validate, Precondition, MAX_KEY_LEN, WILDCARD_ETAG};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Trait for storage backends
///
/// Unknown keys are never an error: `read` leaves them out of the result and
/// `delete` ignores them. `write` validates each key's eTag independently;
/// accepted keys are committed and their documents in `items` receive the
/// newly issued eTag, rejected keys keep the eTag they presented and are
/// reported through [`StorageError::Write`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the documents stored under `keys`
    async fn read(&self, keys: &[&str]) -> Result<StoreItems>;

    /// Write a batch of documents
    async fn write(&self, items: &mut StoreItems) -> Result<()>;

    /// Delete keys unconditionally
    async fn delete(&self, keys: &[&str]) -> Result<()>;
}

/// Single-key and typed conveniences available on every [`Storage`]
#[async_trait]
pub trait StorageExt: Storage {
    /// Read one document
    async fn read_one(&self, key: &str) -> Result<Option<Document>> {
        let mut items = self.read(&[key]).await?;
        Ok(items.remove(key))
    }

    /// Read one document as a typed record
    async fn read_record<T>(&self, key: &str) -> Result<Option<Record<T>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        match self.read_one(key).await? {
            Some(document) => Record::from_document(&document)
                .map(Some)
                .map_err(|e| StorageError::CorruptRecord {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Write one document; on success it carries the new eTag
    async fn write_one(&self, key: &str, document: &mut Document) -> Result<()> {
        let mut items = StoreItems::new();
        items.insert(key, document.clone());
        let result = self.write(&mut items).await;
        if let Some(written) = items.remove(key) {
            document.set_e_tag(written.e_tag().to_string());
        }
        result
    }

    /// Write one typed record; on success it carries the new eTag
    async fn write_record<T>(&self, key: &str, record: &mut Record<T>) -> Result<()>
    where
        T: Serialize + Send + Sync,
    {
        let mut document = record
            .to_document()
            .map_err(|e| StorageError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        let result = self.write_one(key, &mut document).await;
        record.e_tag = document.e_tag().to_string();
        result
    }

    /// Delete one key
    async fn delete_one(&self, key: &str) -> Result<()> {
        self.delete(&[key]).await
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}

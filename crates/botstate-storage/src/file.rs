//! File-system storage: one JSON file per key
//!
//! Reads go straight to disk and never take a lock; writes replace a file by
//! renaming a fully written temp file over it, so a reader sees either the old
//! or the new record. The read-validate-replace sequence of a write holds a
//! per-file lock for its whole duration. The configured timeout bounds the
//! lock wait and validation; a commit that has started always finishes.

use crate::naming::{file_name_for, key_for};
use crate::FileStorageConfig;
use async_trait::async_trait;
use botstate_core::{
    etag, validate, Document, Result, Storage, StorageError, StoreItem, StoreItems, WriteFailures,
};
use dashmap::DashMap;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Prefix of in-flight temp files
const TEMP_PREFIX: &str = ".botstate-";
const TEMP_SUFFIX: &str = ".tmp";

/// A store keeping each record in its own file inside one directory
#[derive(Clone)]
pub struct FileStorage {
    inner: Arc<Inner>,
}

struct Inner {
    config: FileStorageConfig,
    /// Write/delete locks keyed by file name
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileStorage {
    /// Open a store over an existing directory
    pub async fn new(config: FileStorageConfig) -> Result<Self> {
        let directory = &config.directory;
        match tokio::fs::metadata(directory).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StorageError::Configuration(format!(
                    "{} is not a directory",
                    directory.display()
                )))
            }
            Err(e) => {
                return Err(StorageError::Configuration(format!(
                    "storage directory {} is unavailable: {}",
                    directory.display(),
                    e
                )))
            }
        }

        info!(directory = %directory.display(), "File storage opened");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                locks: DashMap::new(),
            }),
        })
    }

    /// Open a store over `directory` with default settings
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        Self::new(FileStorageConfig::new(directory)).await
    }

    /// The directory records live in
    pub fn directory(&self) -> &Path {
        &self.inner.config.directory
    }

    /// Get the configuration
    pub fn config(&self) -> &FileStorageConfig {
        &self.inner.config
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        Ok(self.directory().join(file_name_for(key)?))
    }

    /// List the keys currently stored, sorted. Files not written by this
    /// backend are skipped.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let dir_error = |e| StorageError::io(self.directory().display().to_string(), e);
        let mut entries = tokio::fs::read_dir(self.directory())
            .await
            .map_err(dir_error)?;

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(dir_error)? {
            if let Some(key) = entry.file_name().to_str().and_then(key_for) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn lock_for(&self, file_name: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.inner.locks.entry(file_name.to_string()).or_default())
    }

    /// Drop the lock of `file_name` once no operation holds or awaits it
    fn release(&self, file_name: &str) {
        self.inner
            .locks
            .remove_if(file_name, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Run one key's operation under the configured timeout
    async fn bounded<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.inner.config.io_timeout {
            Some(limit) => tokio::time::timeout(limit, op).await.map_err(|_| {
                warn!(key = %key, timeout = ?limit, "Storage operation timed out");
                StorageError::Timeout {
                    key: key.to_string(),
                    limit,
                }
            })?,
            None => op.await,
        }
    }

    async fn read_key(&self, key: &str) -> Result<Option<Document>> {
        load(key, &self.path_for(key)?).await
    }

    /// Validate and commit one document, returning the eTag it was stored with
    async fn write_key(&self, key: &str, document: &Document) -> Result<String> {
        let file_name = file_name_for(key)?;
        let result = self.write_locked(key, &file_name, document).await;
        self.release(&file_name);
        result
    }

    /// The timeout covers the lock wait and validation only. Once the commit
    /// has started it runs to completion, so a reported timeout always means
    /// the file was left untouched.
    async fn write_locked(
        &self,
        key: &str,
        file_name: &str,
        document: &Document,
    ) -> Result<String> {
        let path = self.directory().join(file_name);

        let mut stored = document.clone();
        stored.set_e_tag(etag::generate_for(document.fields()));
        let bytes = encode(key, &stored, self.inner.config.pretty)?;

        let (guard, precondition) = self
            .bounded(key, async {
                let guard = self.lock_for(file_name).lock_owned().await;
                let current = load(key, &path).await?;
                let current = current.as_ref().map(|doc| doc.e_tag());
                let precondition = validate(key, current, document.e_tag())?;
                Ok::<_, StorageError>((guard, precondition))
            })
            .await?;

        let commit = Commit {
            key: key.to_string(),
            directory: self.directory().to_path_buf(),
            path,
            bytes,
            sync: self.inner.config.sync_on_write,
        };

        // The guard moves into the blocking task so the lock outlives a
        // cancelled caller until the rename has happened.
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            commit.run()
        })
        .await
        .map_err(|e| StorageError::io(key, io::Error::other(e)))??;

        debug!(key = %key, ?precondition, e_tag = %stored.e_tag(), "Record written");
        Ok(stored.e_tag().to_string())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let file_name = file_name_for(key)?;
        let result = self.delete_locked(key, &file_name).await;
        self.release(&file_name);
        result
    }

    async fn delete_locked(&self, key: &str, file_name: &str) -> Result<()> {
        let path = self.directory().join(file_name);
        let guard = self
            .bounded(key, async {
                Ok::<_, StorageError>(self.lock_for(file_name).lock_owned().await)
            })
            .await?;

        let removed = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            std::fs::remove_file(path)
        })
        .await
        .map_err(|e| StorageError::io(key, io::Error::other(e)))?;

        match removed {
            Ok(()) => {
                debug!(key = %key, "Record deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    #[instrument(skip(self))]
    async fn read(&self, keys: &[&str]) -> Result<StoreItems> {
        let mut items = StoreItems::new();
        for key in keys {
            if let Some(document) = self.bounded(key, self.read_key(key)).await? {
                items.insert(*key, document);
            }
        }
        Ok(items)
    }

    #[instrument(skip(self, items), fields(batch = items.len()))]
    async fn write(&self, items: &mut StoreItems) -> Result<()> {
        let mut failures = WriteFailures::new();

        for (key, document) in items.iter_mut() {
            match self.write_key(key, document).await {
                Ok(e_tag) => {
                    document.set_e_tag(e_tag);
                    failures.record_written(key.clone());
                }
                Err(e) => failures.record_failure(key.clone(), e),
            }
        }

        failures.into_result()
    }

    #[instrument(skip(self))]
    async fn delete(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.delete_key(key).await?;
        }
        Ok(())
    }
}

/// The blocking half of a write: replacing the file once the write has been
/// validated under the key's lock
struct Commit {
    key: String,
    directory: PathBuf,
    path: PathBuf,
    bytes: Vec<u8>,
    sync: bool,
}

impl Commit {
    fn run(self) -> Result<()> {
        let io_error = |e| StorageError::io(&self.key, e);
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.directory)
            .map_err(io_error)?;
        temp.write_all(&self.bytes).map_err(io_error)?;
        if self.sync {
            temp.as_file().sync_all().map_err(io_error)?;
        }
        temp.persist(&self.path).map_err(|e| io_error(e.error))?;
        Ok(())
    }
}

/// Current record at `path`, `None` if there is none
async fn load(key: &str, path: &Path) -> Result<Option<Document>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(key = %key, "Key not found");
            return Ok(None);
        }
        Err(e) => return Err(StorageError::io(key, e)),
    };
    decode(key, &bytes).map(Some)
}

fn encode(key: &str, document: &Document, pretty: bool) -> Result<Vec<u8>> {
    let encoded = if pretty {
        serde_json::to_vec_pretty(document)
    } else {
        serde_json::to_vec(document)
    };
    encoded.map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode(key: &str, bytes: &[u8]) -> Result<Document> {
    serde_json::from_slice(bytes).map_err(|e| {
        warn!(key = %key, error = %e, "Corrupt record on disk");
        StorageError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use botstate_core::{ErrorKind, StorageExt};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        let store = FileStorage::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_file_store_basic() {
        let (dir, store) = open_store().await;

        let mut doc = Document::new().with_field("id", "1");
        store.write_one("a/b", &mut doc).await.unwrap();
        assert!(!doc.e_tag().is_empty());
        assert!(dir.path().join("a%2Fb.json").exists());

        let read = store.read_one("a/b").await.unwrap().unwrap();
        assert_eq!(read, doc);
    }

    #[tokio::test]
    async fn test_file_store_on_disk_format() {
        let (dir, store) = open_store().await;

        let mut doc = Document::new().with_field("count", 2);
        store.write_one("k", &mut doc).await.unwrap();

        let raw = std::fs::read(dir.path().join("k.json")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value, json!({ "eTag": doc.e_tag(), "count": 2 }));
    }

    #[tokio::test]
    async fn test_file_store_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let err = FileStorage::open(&missing).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_file_store_path_is_not_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let err = FileStorage::open(&file).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_record() {
        let (dir, store) = open_store().await;
        std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();

        let err = store.read_one("broken").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptRecord);
        assert_eq!(err.key(), Some("broken"));

        let err = store
            .write_one("broken", &mut Document::new().with_e_tag("*"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptRecord);
    }

    #[tokio::test]
    async fn test_file_store_sees_external_changes() {
        let (dir, store) = open_store().await;
        store
            .write_one("k", &mut Document::new().with_field("v", 1))
            .await
            .unwrap();

        std::fs::write(
            dir.path().join("k.json"),
            br#"{ "eTag": "external", "v": 5 }"#,
        )
        .unwrap();

        let read = store.read_one("k").await.unwrap().unwrap();
        assert_eq!(read.e_tag(), "external");
        assert_eq!(read.field("v"), Some(&json!(5)));

        std::fs::remove_file(dir.path().join("k.json")).unwrap();
        assert!(store.read_one("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_keys_skip_foreign_files() {
        let (dir, store) = open_store().await;
        store.write_one("b", &mut Document::new()).await.unwrap();
        store.write_one("a b", &mut Document::new()).await.unwrap();
        std::fs::write(dir.path().join("README.txt"), b"hi").unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["a b", "b"]);
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_files() {
        let (dir, store) = open_store().await;
        let mut doc = Document::new();
        for i in 0..5 {
            doc.set_field("i", i);
            store.write_one("k", &mut doc).await.unwrap();
        }
        let _ = store
            .write_one("k", &mut Document::new().with_e_tag("stale"))
            .await;

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["k.json".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_pretty_output() {
        let dir = TempDir::new().unwrap();
        let config = FileStorageConfig::new(dir.path())
            .with_pretty()
            .with_io_timeout(Duration::from_secs(5));
        let store = FileStorage::new(config).await.unwrap();

        store
            .write_one("k", &mut Document::new().with_field("v", 1))
            .await
            .unwrap();
        let raw = std::fs::read_to_string(dir.path().join("k.json")).unwrap();
        assert!(raw.contains('\n'));
        assert!(store.read_one("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_store_timeout_while_locked() {
        let dir = TempDir::new().unwrap();
        let config = FileStorageConfig::new(dir.path()).with_io_timeout(Duration::from_millis(50));
        let store = FileStorage::new(config).await.unwrap();

        let lock = store.lock_for("k.json");
        let held = lock.lock().await;

        let err = store
            .write_one("k", &mut Document::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        drop(held);

        // nothing was applied by the timed-out write
        assert!(store.read_one("k").await.unwrap().is_none());
        store.write_one("k", &mut Document::new()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_store_timed_out_write_is_not_applied() {
        let dir = TempDir::new().unwrap();
        let config = FileStorageConfig::new(dir.path()).with_io_timeout(Duration::from_micros(1));
        let store = FileStorage::new(config).await.unwrap();

        for i in 0..50 {
            let key = format!("k{i}");
            let mut doc = Document::new().with_field("i", i);
            let result = store.write_one(&key, &mut doc).await;

            // anything still running in the background gets a chance to land
            tokio::time::sleep(Duration::from_millis(5)).await;
            let on_disk = dir.path().join(format!("{key}.json")).exists();
            match result {
                Ok(()) => assert!(on_disk),
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::Timeout);
                    assert!(!on_disk, "timed-out write of {key} was applied");
                    assert!(doc.e_tag().is_empty());
                }
            }
        }
        assert!(store.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_lock_table_is_drained() {
        let (_dir, store) = open_store().await;

        for i in 0..20 {
            let key = format!("conversation/{i}");
            store.write_one(&key, &mut Document::new()).await.unwrap();
            let _ = store
                .write_one(&key, &mut Document::new().with_e_tag("stale"))
                .await;
            store.delete_one(&key).await.unwrap();
        }
        store.delete_one("never-written").await.unwrap();

        assert!(store.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_lock_kept_while_held() {
        let (_dir, store) = open_store().await;
        let lock = store.lock_for("k.json");

        store.write_one("k", &mut Document::new()).await.unwrap();
        assert!(store.inner.locks.contains_key("k.json"));

        drop(lock);
        store.delete_one("k").await.unwrap();
        assert!(store.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_io_failure_names_key() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("state");
        std::fs::create_dir(&root).unwrap();
        let store = FileStorage::open(&root).await.unwrap();
        std::fs::remove_dir(&root).unwrap();

        let mut doc = Document::new().with_field("v", 1);
        let err = store.write_one("k", &mut doc).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.failed_keys(), vec!["k"]);
        match &err {
            StorageError::Write(failures) => {
                assert_eq!(failures.get("k").unwrap().key(), Some("k"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(doc.e_tag().is_empty());
        assert!(store.read_one("k").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_read_only_directory() {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;

        let (dir, store) = open_store().await;
        std::fs::set_permissions(dir.path(), Permissions::from_mode(0o555)).unwrap();

        // privileged users ignore directory permissions
        let writable = std::fs::File::create(dir.path().join("access-check")).is_ok();
        let result = store.write_one("k", &mut Document::new()).await;
        std::fs::set_permissions(dir.path(), Permissions::from_mode(0o755)).unwrap();
        if writable {
            return;
        }

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.failed_keys(), vec!["k"]);
        assert!(store.read_one("k").await.unwrap().is_none());
    }
}

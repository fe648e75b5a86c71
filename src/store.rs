//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::query::QueryBuilder;
use crate::records::Collection;
use crate::subscriptions::{Channel, SubscriptionManager};
use crate::types::StoreStats;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the store.
    pub path: PathBuf,

    /// Collections that must exist after open, in declaration order.
    pub collections: Vec<String>,

    /// Schema version. Raising it adds the configured collections that are
    /// missing; lowering it is refused.
    pub version: u32,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync every committed transaction.
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            collections: Vec::new(),
            version: 1,
            create_if_missing: true,
            sync_on_commit: true,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Parse a JSON config such as
    /// `{"path": "./data", "version": 2, "collections": ["employees"]}`.
    /// Omitted fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::InvalidFormat(e.to_string()))
    }
}

/// Persisted description of the store's schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    collections: Vec<String>,
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"PST\0";

/// Current store format version.
const STORE_FORMAT: u8 = 1;

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const COLLECTIONS_DIR: &str = "collections";

/// An open document store.
///
/// Holds an exclusive lock on its directory for as long as it lives. Share it
/// by reference or behind an `Arc`; every method takes `&self`.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Schema version recorded in the manifest.
    version: u32,

    /// Open collections keyed by name.
    collections: HashMap<String, Arc<Collection>>,

    /// Manifest order of `collections`.
    names: Vec<String>,

    subscriptions: Arc<SubscriptionManager>,
}

impl Store {
    /// Open the store at `config.path`, creating it when allowed.
    ///
    /// Every configured collection exists afterwards. A version above the
    /// recorded one is a migration that adds missing collections and keeps
    /// existing data; a version below it fails with
    /// [`StoreError::VersionDowngrade`].
    pub fn open(config: StoreConfig) -> Result<Self> {
        for name in &config.collections {
            validate_collection_name(name)?;
        }

        let manifest_path = config.path.join(MANIFEST_FILE);
        if !manifest_path.exists() && !config.create_if_missing {
            return Err(StoreError::NotInitialized);
        }
        fs::create_dir_all(config.path.join(COLLECTIONS_DIR))?;

        // Acquire lock
        let lock_file = Self::acquire_lock(&config.path)?;

        let manifest = match Self::read_manifest(&config.path)? {
            None => {
                let manifest = Manifest {
                    version: config.version,
                    collections: dedup(config.collections.iter().cloned()),
                };
                Self::write_manifest(&config.path, &manifest)?;
                info!(
                    path = %config.path.display(),
                    version = manifest.version,
                    collections = manifest.collections.len(),
                    "created store"
                );
                manifest
            }
            Some(recorded) => Self::migrate(&config, recorded)?,
        };

        let mut collections = HashMap::with_capacity(manifest.collections.len());
        for name in &manifest.collections {
            validate_collection_name(name)?;
            let collection = Collection::open(
                name,
                collection_path(&config.path, name),
                config.sync_on_commit,
            )?;
            collections.insert(name.clone(), Arc::new(collection));
        }

        debug!(
            path = %config.path.display(),
            version = manifest.version,
            "opened store"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            version: manifest.version,
            collections,
            names: manifest.collections,
            subscriptions: Arc::new(SubscriptionManager::new()),
        })
    }

    fn migrate(config: &StoreConfig, recorded: Manifest) -> Result<Manifest> {
        if config.version < recorded.version {
            return Err(StoreError::VersionDowngrade {
                requested: config.version,
                recorded: recorded.version,
            });
        }

        let names = dedup(
            recorded
                .collections
                .iter()
                .chain(config.collections.iter())
                .cloned(),
        );
        let added = names.len() - recorded.collections.len();
        let next = Manifest {
            version: config.version,
            collections: names,
        };

        if next != recorded {
            if config.version > recorded.version {
                info!(
                    from = recorded.version,
                    to = config.version,
                    added,
                    "migrating store"
                );
            } else {
                debug!(added, "adding configured collections");
            }
            Self::write_manifest(&config.path, &next)?;
        }

        Ok(next)
    }

    // --- Queries ---

    /// Start a query against `collection`. An unknown name is reported by the
    /// terminal call.
    pub fn from(&self, collection: &str) -> QueryBuilder<'_> {
        QueryBuilder::new(self, collection)
    }

    /// Direct access to a collection's primitives.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    /// Collection names in manifest order.
    pub fn collection_names(&self) -> &[String] {
        &self.names
    }

    // --- Subscriptions ---

    /// Create a named channel for change notifications.
    pub fn channel(&self, name: &str) -> Channel {
        Channel::new(name, Arc::clone(&self.subscriptions))
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    // --- Store Operations ---

    /// Schema version recorded for this store.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Rewrite one collection's log as a single snapshot.
    pub fn compact(&self, collection: &str) -> Result<()> {
        self.collection(collection)?.compact()
    }

    /// Compact every collection. Returns how many were compacted.
    pub fn compact_all(&self) -> Result<usize> {
        for name in &self.names {
            self.collection(name)?.compact()?;
        }
        Ok(self.names.len())
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        self.collections.values().fold(
            StoreStats {
                collection_count: self.collections.len() as u64,
                ..Default::default()
            },
            |mut stats, collection| {
                stats.document_count += collection.count() as u64;
                stats.log_size_bytes += collection.log_size();
                stats
            },
        )
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        for collection in self.collections.values() {
            collection.sync()?;
        }
        Ok(())
    }

    /// Flush everything and release the directory lock.
    pub fn close(self) -> Result<()> {
        self.sync()?;
        info!(path = %self.config.path.display(), "closed store");
        Ok(())
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Manifest ---

    fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
        let payload = rmp_serde::to_vec(manifest)?;
        let checksum = crc32fast::hash(&payload);

        let tmp_path = path.join(format!("{MANIFEST_FILE}.tmp"));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(STORE_MAGIC)?;
            file.write_all(&[STORE_FORMAT])?;
            file.write_all(&(payload.len() as u32).to_le_bytes())?;
            file.write_all(&payload)?;
            file.write_all(&checksum.to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path.join(MANIFEST_FILE))?;

        Ok(())
    }

    fn read_manifest(path: &Path) -> Result<Option<Manifest>> {
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut format = [0u8; 1];
        file.read_exact(&mut format)?;
        if format[0] != STORE_FORMAT {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                format[0]
            )));
        }

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut payload = Vec::new();
        (&mut file).take(len as u64).read_to_end(&mut payload)?;
        let mut crc_bytes = [0u8; 4];
        if payload.len() != len || file.read_exact(&mut crc_bytes).is_err() {
            return Err(StoreError::Corruption("Truncated manifest".into()));
        }
        if crc32fast::hash(&payload) != u32::from_le_bytes(crc_bytes) {
            return Err(StoreError::Corruption("Manifest checksum mismatch".into()));
        }

        Ok(Some(rmp_serde::from_slice(&payload)?))
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

fn collection_path(root: &Path, name: &str) -> PathBuf {
    root.join(COLLECTIONS_DIR).join(format!("{name}.log"))
}

/// Names become file names, so only `[A-Za-z0-9_-]` is accepted.
fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollectionName(name.to_string()))
    }
}

fn dedup(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("store"),
            collections: vec!["employees".into(), "departments".into()],
            version: 1,
            create_if_missing: true,
            sync_on_commit: false,
        }
    }

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_create_store() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(test_config(&dir)).unwrap();

        assert!(store.path().join("MANIFEST").exists());
        assert!(store.path().join("collections/employees.log").exists());
        assert!(store.path().join("collections/departments.log").exists());
        assert_eq!(store.collection_names(), &["employees", "departments"]);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_open_without_create() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            create_if_missing: false,
            ..test_config(&dir)
        };

        assert!(matches!(Store::open(config), Err(StoreError::NotInitialized)));
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let _store1 = Store::open(config.clone()).unwrap();

        // Second store should fail to acquire lock
        let result = Store::open(config);
        let err = result.err().unwrap();
        assert!(matches!(err, StoreError::Locked));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_lock_released_on_close() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        Store::open(config.clone()).unwrap().close().unwrap();
        assert!(Store::open(config).is_ok());
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let store = Store::open(config.clone()).unwrap();
            let employees = store.collection("employees").unwrap();
            employees.put(doc(json!({"id": "e1", "name": "Alice"}))).unwrap();
            employees.put(doc(json!({"id": "e2", "name": "Bob"}))).unwrap();
            employees.delete("e2").unwrap();
        }

        {
            let store = Store::open(config).unwrap();
            let employees = store.collection("employees").unwrap();
            assert_eq!(employees.count(), 1);
            assert_eq!(
                employees.get("e1").unwrap().get("name"),
                Some(&json!("Alice"))
            );
        }
    }

    #[test]
    fn test_migration_adds_collections() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let store = Store::open(config.clone()).unwrap();
            store
                .collection("employees")
                .unwrap()
                .put(doc(json!({"id": "e1"})))
                .unwrap();
        }

        let upgraded = config
            .clone()
            .with_collections(["employees", "leave_requests"])
            .with_version(2);
        {
            let store = Store::open(upgraded.clone()).unwrap();
            assert_eq!(store.version(), 2);
            assert_eq!(
                store.collection_names(),
                &["employees", "departments", "leave_requests"]
            );
            assert_eq!(store.collection("employees").unwrap().count(), 1);
            assert_eq!(store.collection("leave_requests").unwrap().count(), 0);
        }

        let result = Store::open(config);
        assert!(matches!(
            result,
            Err(StoreError::VersionDowngrade {
                requested: 1,
                recorded: 2
            })
        ));
    }

    #[test]
    fn test_same_version_creates_missing() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        drop(Store::open(config.clone()).unwrap());

        let store = Store::open(config.with_collections(["audit"])).unwrap();
        assert_eq!(store.version(), 1);
        assert!(store.collection("audit").is_ok());
        assert!(store.collection("employees").is_ok());
    }

    #[test]
    fn test_invalid_collection_name() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir).with_collections(["../escape"]);

        assert!(matches!(
            Store::open(config),
            Err(StoreError::InvalidCollectionName(_))
        ));
    }

    #[test]
    fn test_corrupt_manifest() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        drop(Store::open(config.clone()).unwrap());

        let manifest = config.path.join(MANIFEST_FILE);
        let mut bytes = fs::read(&manifest).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&manifest, bytes).unwrap();

        let err = Store::open(config).err().unwrap();
        assert!(matches!(err, StoreError::Corruption(_)));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_unknown_collection() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(test_config(&dir)).unwrap();

        assert!(matches!(
            store.collection("nope"),
            Err(StoreError::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_stats_and_compaction() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(test_config(&dir)).unwrap();
        let employees = store.collection("employees").unwrap();

        for i in 0..10 {
            employees
                .put(doc(json!({"id": format!("e{i}"), "rev": 0})))
                .unwrap();
        }
        for i in 0..10 {
            employees
                .put(doc(json!({"id": format!("e{i}"), "rev": 1})))
                .unwrap();
        }

        let before = store.stats();
        assert_eq!(before.collection_count, 2);
        assert_eq!(before.document_count, 10);

        assert_eq!(store.compact_all().unwrap(), 2);
        let after = store.stats();
        assert_eq!(after.document_count, 10);
        assert!(after.log_size_bytes < before.log_size_bytes);
    }

    #[test]
    fn test_config_from_json() {
        let config = StoreConfig::from_json_str(
            r#"{"path": "/tmp/portal", "version": 3, "collections": ["employees"]}"#,
        )
        .unwrap();

        assert_eq!(config.path, PathBuf::from("/tmp/portal"));
        assert_eq!(config.version, 3);
        assert_eq!(config.collections, vec!["employees".to_string()]);
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);

        assert!(matches!(
            StoreConfig::from_json_str("[1, 2]"),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}

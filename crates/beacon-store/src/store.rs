//! Record stores.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace, warn};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a JSON object, or a record failed to serialize.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record failed validation.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Keyed storage for one record type.
#[async_trait]
pub trait RecordStore<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Every record, keyed by id.
    async fn get_all(&self) -> Result<BTreeMap<String, T>, StoreError>;

    /// One record.
    async fn load(&self, id: &str) -> Result<Option<T>, StoreError>;

    /// Insert or replace a record.
    async fn save(&self, id: &str, record: T) -> Result<(), StoreError>;

    /// Remove a record. Returns `true` if it existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

fn check_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::InvalidRecord("empty record id".into()));
    }
    Ok(())
}

/// A store persisted as a single pretty-printed JSON object.
///
/// A missing or empty file reads as an empty store. Entries that do not
/// decode as `T` are logged and skipped on read but kept on disk until they
/// are deleted. Every write rewrites the whole file through a sibling temp
/// file and a rename, serialized by an async mutex.
pub struct JsonFileStore<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open a store at `path`. Nothing is touched until the first access.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_raw(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    fn decode(&self, id: &str, raw: Value) -> Option<T> {
        match serde_json::from_value(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), id = %id, error = %e, "Skipping invalid record");
                None
            }
        }
    }

    async fn write_raw(&self, map: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(map)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        trace!(path = %self.path.display(), records = map.len(), "Store written");
        Ok(())
    }
}

#[async_trait]
impl<T> RecordStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get_all(&self) -> Result<BTreeMap<String, T>, StoreError> {
        let raw = self.read_raw().await?;
        Ok(raw
            .into_iter()
            .filter_map(|(id, value)| self.decode(&id, value).map(|record| (id, record)))
            .collect())
    }

    async fn load(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self
            .read_raw()
            .await?
            .remove(id)
            .and_then(|value| self.decode(id, value)))
    }

    async fn save(&self, id: &str, record: T) -> Result<(), StoreError> {
        check_id(id)?;
        let value = serde_json::to_value(&record)?;
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_raw().await?;
        map.insert(id.to_owned(), value);
        self.write_raw(&map).await?;
        debug!(path = %self.path.display(), id = %id, "Record saved");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_raw().await?;
        if map.remove(id).is_none() {
            return Ok(false);
        }
        self.write_raw(&map).await?;
        debug!(path = %self.path.display(), id = %id, "Record deleted");
        Ok(true)
    }
}

/// A store that lives in memory only.
#[derive(Debug)]
pub struct MemoryStore<T> {
    records: RwLock<BTreeMap<String, T>>,
}

impl<T> MemoryStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> RecordStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get_all(&self) -> Result<BTreeMap<String, T>, StoreError> {
        Ok(self.records.read().await.clone())
    }

    async fn load(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn save(&self, id: &str, record: T) -> Result<(), StoreError> {
        check_id(id)?;
        self.records.write().await.insert(id.to_owned(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Note {
        Note { text: text.into() }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Note> = JsonFileStore::new(dir.path().join("nope.json"));

        assert!(store.get_all().await.unwrap().is_empty());
        assert_eq!(store.load("x").await.unwrap(), None);
        assert!(!store.delete("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_creates_parents_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes").join("notes.json");

        let store: JsonFileStore<Note> = JsonFileStore::new(&path);
        store.save("a", note("first")).await.unwrap();
        store.save("b", note("second")).await.unwrap();
        store.save("a", note("replaced")).await.unwrap();

        let reopened: JsonFileStore<Note> = JsonFileStore::new(&path);
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], note("replaced"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["b"]["text"], "second");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Note> = JsonFileStore::new(dir.path().join("notes.json"));

        store.save("a", note("x")).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let store: JsonFileStore<Note> = JsonFileStore::new(&path);
        assert!(matches!(store.get_all().await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn test_invalid_entry_is_skipped_and_removable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");
        std::fs::write(&path, r#"{"good": {"text": "ok"}, "bad": {"text": 7}}"#).unwrap();

        let store: JsonFileStore<Note> = JsonFileStore::new(&path);
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["good"], note("ok"));
        assert_eq!(store.load("good").await.unwrap(), Some(note("ok")));
        assert_eq!(store.load("bad").await.unwrap(), None);

        // Writes keep the entry they cannot read.
        store.save("new", note("fresh")).await.unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["bad"]["text"], 7);

        assert!(store.delete("bad").await.unwrap());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("bad").is_none());
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_trigger_without_size_does_not_block_store() {
        use crate::models::Trigger;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triggers.json");
        let contents = serde_json::json!({
            "t1": {
                "id": "t1", "name": "ding", "duration": 2.0, "maxDuration": false, "active": true,
                "item": {"id": "m1", "type": "audio", "url": "/uploads/audio/ding.mp3"},
                "volume": 0.5
            },
            "t2": {
                "id": "t2", "name": "legacy",
                "item": {"id": "m2", "type": "image", "url": "/uploads/images/cat.png"}
            }
        });
        std::fs::write(&path, contents.to_string()).unwrap();

        let store: JsonFileStore<Trigger> = JsonFileStore::new(&path);
        let all = store.get_all().await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["t1"]);
        assert_eq!(store.load("t1").await.unwrap().map(|t| t.name), Some("ding".into()));
        assert!(store.delete("t2").await.unwrap());
        assert!(!store.delete("t2").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_saves_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::<Note>::new(dir.path().join("notes.json")));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.save(&format!("n{i}"), note("x")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.get_all().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store: MemoryStore<Note> = MemoryStore::new();
        store.save("a", note("x")).await.unwrap();

        assert_eq!(store.load("a").await.unwrap(), Some(note("x")));
        assert!(store.delete("a").await.unwrap());
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(matches!(
            store.save("", note("x")).await,
            Err(StoreError::InvalidRecord(_))
        ));
    }
}

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{DisplayTarget, TargetList, TargetStore};

/// Top-level key holding the target array. Every other key in the document
/// belongs to someone else and is carried through untouched.
pub const TARGETS_KEY: &str = "targets";

type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("corrupt store document: {reason}")]
    Corrupt { raw: String, reason: String },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to serialize store document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Targets kept in a single pretty-printed JSON document on disk.
///
/// Writes go to a sibling `.tmp` file that is renamed over the original, so a
/// crash mid-write leaves either the old or the new document. A corrupt
/// document is moved aside to `<path>.corrupted-<unix millis>` and replaced
/// with an empty one. Individual records that fail to decode are skipped on
/// load and written back untouched on save.
pub struct FileTargetStore {
    path: PathBuf,
    // Serializes this process's own file I/O. Load-modify-save cycles made by
    // different callers can still interleave (last write wins).
    io: Mutex<()>,
}

impl FileTargetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file is missing or blank.
    async fn read_document(&self) -> Result<Option<Document>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };

        if raw.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(doc)) => Ok(Some(doc)),
            Ok(other) => Err(StoreError::Corrupt {
                raw,
                reason: format!("top level is {}, expected an object", json_kind(&other)),
            }),
            Err(e) => Err(StoreError::Corrupt {
                raw,
                reason: e.to_string(),
            }),
        }
    }

    async fn write_document(&self, doc: &Document) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(doc)?;
        let write_err = |source| StoreError::Write {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp = sibling(&self.path, ".tmp");
        tokio::fs::write(&tmp, body).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    /// Move a corrupt document out of the way, keeping its bytes.
    async fn quarantine(&self, raw: &str) -> Option<PathBuf> {
        let backup = sibling(
            &self.path,
            &format!(".corrupted-{}", Utc::now().timestamp_millis()),
        );
        match tokio::fs::rename(&self.path, &backup).await {
            Ok(()) => Some(backup),
            Err(e) => {
                warn!(error = %e, "could not rename corrupt store, copying instead");
                match tokio::fs::write(&backup, raw).await {
                    Ok(()) => Some(backup),
                    Err(e) => {
                        error!(error = %e, "failed to back up corrupt store");
                        None
                    }
                }
            }
        }
    }

    /// Replace whatever is on disk with a fresh empty document.
    async fn reset(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(TARGETS_KEY.into(), Value::Array(Vec::new()));
        match self.write_document(&doc).await {
            Ok(()) => info!(path = %self.path.display(), "created empty target store"),
            Err(e) => error!(error = %e, "failed to create empty target store"),
        }
        doc
    }

    /// Read the document, healing a missing or corrupt file. `None` only when
    /// the file exists but cannot be read at all; it is then left alone.
    async fn read_or_heal(&self) -> Option<Document> {
        match self.read_document().await {
            Ok(Some(doc)) => Some(doc),
            Ok(None) => Some(self.reset().await),
            Err(StoreError::Corrupt { raw, reason }) => {
                error!(path = %self.path.display(), %reason, "target store is corrupt");
                if let Some(backup) = self.quarantine(&raw).await {
                    info!(backup = %backup.display(), "backed up corrupt target store");
                }
                Some(self.reset().await)
            }
            Err(e) => {
                error!(error = %e, "target store unreadable");
                None
            }
        }
    }
}

#[async_trait]
impl TargetStore for FileTargetStore {
    async fn load(&self) -> TargetList {
        let _io = self.io.lock().await;

        let Some(mut doc) = self.read_or_heal().await else {
            return TargetList::default();
        };

        let records = match doc.get(TARGETS_KEY).cloned() {
            Some(Value::Array(records)) => records,
            Some(other) => {
                warn!(found = json_kind(&other), "target list is not an array, ignoring it");
                Vec::new()
            }
            None => {
                info!("target list missing from store, adding it");
                doc.insert(TARGETS_KEY.into(), Value::Array(Vec::new()));
                if let Err(e) = self.write_document(&doc).await {
                    error!(error = %e, "failed to add target list to store");
                }
                Vec::new()
            }
        };

        let mut targets = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<DisplayTarget>(record) {
                Ok(target) => targets.push(target),
                Err(e) => warn!(index, error = %e, "skipping malformed target record"),
            }
        }

        debug!(count = targets.len(), "loaded targets");
        TargetList { targets }
    }

    async fn save(&self, targets: &[DisplayTarget]) {
        let _io = self.io.lock().await;

        let Some(mut doc) = self.read_or_heal().await else {
            error!("not saving targets over an unreadable store");
            return;
        };

        let mut records = Vec::with_capacity(targets.len());
        for target in targets {
            match serde_json::to_value(target) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(surface = %target.id, error = %e, "failed to serialize target");
                    return;
                }
            }
        }

        let carried = undecodable_records(doc.get(TARGETS_KEY), targets);
        if !carried.is_empty() {
            debug!(count = carried.len(), "keeping target records this build cannot read");
        }
        records.extend(carried);
        doc.insert(TARGETS_KEY.into(), Value::Array(records));

        match self.write_document(&doc).await {
            Ok(()) => debug!(count = targets.len(), "saved targets"),
            Err(e) => error!(error = %e, "failed to save targets"),
        }
    }
}

/// Records in the stored list that do not decode as a [`DisplayTarget`].
/// `load` never hands them out, so a whole-list save must put them back or
/// they would be lost. A record whose `id` now belongs to a saved target has
/// been replaced and is dropped.
fn undecodable_records(stored: Option<&Value>, targets: &[DisplayTarget]) -> Vec<Value> {
    let Some(Value::Array(stored)) = stored else {
        return Vec::new();
    };
    stored
        .iter()
        .filter(|record| serde_json::from_value::<DisplayTarget>((*record).clone()).is_err())
        .filter(|record| {
            let id = record.get("id").and_then(Value::as_str);
            !targets.iter().any(|t| Some(t.id.as_str()) == id)
        })
        .cloned()
        .collect()
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::snapshot::{ServerAddress, ServerKind};
    use crate::store::{RenderOptions, SurfaceId};

    fn target(id: &str) -> DisplayTarget {
        DisplayTarget {
            id: SurfaceId::new(id),
            server: ServerAddress::new("mc.example.com", 25565, ServerKind::Java),
            render_options: RenderOptions::default(),
            last_known_name: "Example".into(),
        }
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn backups(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".corrupted-"))
            .collect()
    }

    #[tokio::test]
    async fn test_missing_file_yields_empty_and_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let store = FileTargetStore::new(&path);

        assert!(store.load().await.targets.is_empty());
        assert_eq!(read_json(&path), serde_json::json!({ "targets": [] }));
    }

    #[tokio::test]
    async fn test_blank_file_is_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "  \n").unwrap();
        let store = FileTargetStore::new(&path);

        assert!(store.load().await.targets.is_empty());
        assert!(backups(dir.path()).is_empty());
        assert_eq!(read_json(&path), serde_json::json!({ "targets": [] }));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_backed_up_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let garbage = "{ \"targets\": [ {\"id\": ";
        std::fs::write(&path, garbage).unwrap();
        let store = FileTargetStore::new(&path);

        assert_eq!(store.load().await, TargetList::default());

        let backups = backups(dir.path());
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), garbage);
        assert_eq!(read_json(&path), serde_json::json!({ "targets": [] }));
    }

    #[tokio::test]
    async fn test_non_object_document_counts_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let store = FileTargetStore::new(&path);

        assert!(store.load().await.targets.is_empty());
        assert_eq!(backups(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_save_then_load_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTargetStore::new(dir.path().join("data.json"));

        let targets = vec![target("b"), target("a"), target("c")];
        store.save(&targets).await;
        assert_eq!(store.load().await.targets, targets);
    }

    #[tokio::test]
    async fn test_save_preserves_unknown_top_level_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"targets": [], "serverSettings": {"name": "Lobby"}, "playerCountStats": {"lastUpdate": 1}}"#,
        )
        .unwrap();
        let store = FileTargetStore::new(&path);

        store.save(&[target("T1")]).await;

        let doc = read_json(&path);
        assert_eq!(doc["serverSettings"]["name"], "Lobby");
        assert_eq!(doc["playerCountStats"]["lastUpdate"], 1);
        assert_eq!(doc["targets"][0]["id"], "T1");
    }

    #[tokio::test]
    async fn test_missing_targets_key_is_added_without_touching_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"serverSettings": {"name": "Lobby"}}"#).unwrap();
        let store = FileTargetStore::new(&path);

        assert!(store.load().await.targets.is_empty());
        let doc = read_json(&path);
        assert_eq!(doc["targets"], serde_json::json!([]));
        assert_eq!(doc["serverSettings"]["name"], "Lobby");
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"targets": [
                {"id": "good", "server": {"host": "mc.example.com", "port": 25565}},
                {"id": "bad-port", "server": {"host": "mc.example.com", "port": 99999}},
                "not a record"
            ]}"#,
        )
        .unwrap();
        let store = FileTargetStore::new(&path);

        let loaded = store.load().await.targets;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, SurfaceId::new("good"));
    }

    #[tokio::test]
    async fn test_save_keeps_records_it_could_not_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"targets": [
                {"id": "good", "server": {"host": "mc.example.com", "port": 25565}},
                {"id": "future", "server": {"host": "mc.example.com", "port": 25565, "kind": "pocket"}}
            ]}"#,
        )
        .unwrap();
        let store = FileTargetStore::new(&path);

        let loaded = store.load().await.targets;
        assert_eq!(loaded.len(), 1);
        store.save(&loaded).await;

        let doc = read_json(&path);
        let ids: Vec<&str> = doc["targets"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["good", "future"]);
        assert_eq!(doc["targets"][1]["server"]["kind"], "pocket");
    }

    #[tokio::test]
    async fn test_saved_target_replaces_unreadable_record_with_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"targets": [{"id": "T1", "server": {"host": "mc.example.com", "port": 99999}}]}"#,
        )
        .unwrap();
        let store = FileTargetStore::new(&path);

        store.save(&[target("T1")]).await;

        let doc = read_json(&path);
        assert_eq!(doc["targets"].as_array().unwrap().len(), 1);
        assert_eq!(doc["targets"][0]["server"]["port"], 25565);
    }

    #[tokio::test]
    async fn test_save_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("data.json");
        let store = FileTargetStore::new(&path);

        store.save(&[target("T1")]).await;
        assert_eq!(store.load().await.targets.len(), 1);
        assert!(!sibling(&path, ".tmp").exists());
    }

    #[tokio::test]
    async fn test_unreadable_store_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be: reads fail, nothing is overwritten.
        let path = dir.path().join("data.json");
        std::fs::create_dir(&path).unwrap();
        let store = FileTargetStore::new(&path);

        assert!(store.load().await.targets.is_empty());
        store.save(&[target("T1")]).await;
        assert!(path.is_dir());
    }
}

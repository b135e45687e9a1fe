//! Local checkpoint persistence.
//!
//! Transfer records are keyed by file name and size and hold the server
//! metadata as of the last checkpoint. Reads never fail: a missing or
//! unreadable record is treated as absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chunkup_client::{Credential, Session};
use chunkup_protocol::{FileMetadata, FileStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors from persistence writes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted checkpoint of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    pub file_id: String,
    pub metadata: FileMetadata,
}

impl TransferState {
    /// Only `partial` records are offered for resume.
    pub fn is_resumable(&self) -> bool {
        self.metadata.status == FileStatus::Partial
    }
}

/// Store key for a file: `upload_<name>_<size>`.
pub fn transfer_key(name: &str, size: u64) -> String {
    format!("upload_{name}_{size}")
}

/// Key/value store for [`TransferState`] records.
pub trait TransferStore: Send + Sync {
    /// The record under `key`, or `None` if absent or unreadable.
    fn load(&self, key: &str) -> Option<TransferState>;

    fn save(&self, key: &str, state: &TransferState) -> Result<(), StoreError>;

    fn clear(&self, key: &str) -> Result<(), StoreError>;

    /// Every readable record.
    fn list(&self) -> Vec<(String, TransferState)>;

    /// Records that can be resumed.
    fn incomplete(&self) -> Vec<(String, TransferState)> {
        self.list()
            .into_iter()
            .filter(|(_, state)| state.is_resumable())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Records cached in memory and persisted to one JSON file.
///
/// Entries are kept as raw JSON so one corrupt record does not hide the
/// others.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<HashMap<String, serde_json::Value>>,
}

impl JsonFileStore {
    /// Opens the store at `path`. A missing or corrupt file starts empty.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let records = load_records(&path)?;
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let map = self.records.read().unwrap();
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} transfer record(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

impl TransferStore for JsonFileStore {
    fn load(&self, key: &str) -> Option<TransferState> {
        let value = self.records.read().unwrap().get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable transfer record");
                None
            }
        }
    }

    fn save(&self, key: &str, state: &TransferState) -> Result<(), StoreError> {
        let value = serde_json::to_value(state)?;
        self.records.write().unwrap().insert(key.to_string(), value);
        self.persist()
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.records.write().unwrap().remove(key).is_some();
        if removed {
            self.persist()?;
        }
        Ok(())
    }

    fn list(&self) -> Vec<(String, TransferState)> {
        let map = self.records.read().unwrap();
        let mut records: Vec<_> = map
            .iter()
            .filter_map(|(key, value)| {
                serde_json::from_value(value.clone())
                    .ok()
                    .map(|state| (key.clone(), state))
            })
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }
}

fn load_records(path: &Path) -> Result<HashMap<String, serde_json::Value>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    match serde_json::from_str::<HashMap<String, serde_json::Value>>(&data) {
        Ok(records) => {
            debug!("loaded {} transfer record(s) from {:?}", records.len(), path);
            Ok(records)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "transfer store is corrupt, starting empty");
            Ok(HashMap::new())
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Non-persistent store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, TransferState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferStore for MemoryStore {
    fn load(&self, key: &str) -> Option<TransferState> {
        self.records.lock().unwrap().get(key).cloned()
    }

    fn save(&self, key: &str, state: &TransferState) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), state.clone());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    fn list(&self) -> Vec<(String, TransferState)> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Persists the login credential between runs.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The stored session; anonymous if the file is missing or unreadable.
    pub fn load(&self) -> Session {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(_) => return Session::Anonymous,
        };
        match serde_json::from_str::<Credential>(&data) {
            Ok(credential) => Session::from(Some(credential).filter(|c| !c.token.is_empty())),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable credentials");
                Session::Anonymous
            }
        }
    }

    pub fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(credential)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        set_permissions_0600(&self.path);
        debug!(username = %credential.username, "credentials saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Default directory for `transfers.json` and `credentials.json`.
pub fn default_state_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("chunkup"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state(file_id: &str, status: FileStatus, next: u64) -> TransferState {
        TransferState {
            file_id: file_id.into(),
            metadata: FileMetadata {
                status,
                received_bytes: next,
                next_expected_byte: next,
                ..FileMetadata::not_uploaded(file_id, 2_500_000)
            },
        }
    }

    #[test]
    fn key_includes_name_and_size() {
        assert_eq!(transfer_key("video.mp4", 2_500_000), "upload_video.mp4_2500000");
        assert_ne!(transfer_key("a.bin", 1), transfer_key("a.bin", 2));
    }

    #[test]
    fn json_store_roundtrip_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transfers.json");

        let store = JsonFileStore::open(path.clone()).unwrap();
        assert!(store.load("k").is_none());
        let saved = state("file-1", FileStatus::Partial, 2_000_000);
        store.save("k", &saved).unwrap();

        let reopened = JsonFileStore::open(path).unwrap();
        assert_eq!(reopened.load("k"), Some(saved));

        reopened.clear("k").unwrap();
        assert!(reopened.load("k").is_none());
        assert!(reopened.list().is_empty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transfers.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(path).unwrap();
        assert!(store.load("k").is_none());
        store.save("k", &state("f", FileStatus::Partial, 1)).unwrap();
        assert!(store.load("k").is_some());
    }

    #[test]
    fn corrupt_record_is_absent_others_survive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transfers.json");
        let good = serde_json::to_value(state("good", FileStatus::Partial, 5)).unwrap();
        let doc = serde_json::json!({ "bad": { "file_id": 7 }, "good": good });
        std::fs::write(&path, doc.to_string()).unwrap();

        let store = JsonFileStore::open(path).unwrap();
        assert!(store.load("bad").is_none());
        assert_eq!(store.load("good").unwrap().file_id, "good");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn incomplete_lists_only_partial() {
        let store = MemoryStore::new();
        store.save("a", &state("a", FileStatus::Partial, 10)).unwrap();
        store.save("b", &state("b", FileStatus::Pending, 0)).unwrap();
        store.save("c", &state("c", FileStatus::Complete, 2_500_000)).unwrap();

        let incomplete = store.incomplete();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].0, "a");
    }

    #[test]
    fn credential_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let creds = CredentialStore::new(dir.path().join("nested").join("credentials.json"));
        assert_eq!(creds.load(), Session::Anonymous);

        let credential = Credential::new("tok", "admin");
        creds.save(&credential).unwrap();
        assert_eq!(creds.load(), Session::Authenticated(credential));

        creds.clear().unwrap();
        assert_eq!(creds.load(), Session::Anonymous);
        creds.clear().unwrap();
    }

    #[test]
    fn credential_store_corrupt_is_anonymous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(CredentialStore::new(path).load(), Session::Anonymous);
    }

    #[test]
    fn credential_store_empty_token_is_anonymous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"token":"","username":"admin"}"#).unwrap();
        let session = CredentialStore::new(path).load();
        assert_eq!(session, Session::Anonymous);
        assert_eq!(session.username(), None);
    }
}

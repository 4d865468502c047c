//! Stable client identity.
//!
//! The server keys chat history by the id in the socket path, so the same
//! profile must present the same token on every connection. The token lives
//! in a small key-value file next to the rest of the beach state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::BaseDirs;
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

pub const CLIENT_ID_KEY: &str = "client_id";

const TOKEN_LEN: usize = 8;
const TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid client id {0:?}: expected 1-64 characters from [A-Za-z0-9_-]")]
pub struct InvalidIdentity(pub String);

impl ClientIdentity {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let token = (0..TOKEN_LEN)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        ClientIdentity(token)
    }

    /// Ids end up in the socket path, so only path-safe characters are kept.
    pub fn parse(raw: &str) -> Result<Self, InvalidIdentity> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_ID_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(ClientIdentity(trimmed.to_owned()))
        } else {
            Err(InvalidIdentity(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Read back from durable storage.
    Stored,
    /// Generated on this call and written to storage.
    Created,
    /// Storage failed; the id lives only as long as the caller keeps it.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub id: ClientIdentity,
    pub source: IdentitySource,
}

impl ResolvedIdentity {
    pub fn is_ephemeral(&self) -> bool {
        self.source == IdentitySource::Ephemeral
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Toml(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<toml::de::Error> for StoreError {
    fn from(value: toml::de::Error) -> Self {
        StoreError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(value: toml::ser::Error) -> Self {
        StoreError::Toml(value.to_string())
    }
}

/// Durable string storage for client-side state.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-process store for tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Flat TOML table on disk, created with owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> Result<PathBuf, StoreError> {
        let base = BaseDirs::new()
            .ok_or_else(|| StoreError::Unavailable("unable to determine home directory".into()))?;
        Ok(base.home_dir().join(".beach").join("pier").join("state.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = toml::to_string_pretty(entries)?;
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(serialized.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = file.metadata()?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        entries.insert(key.to_owned(), value.to_owned());
        self.save(&entries)
    }
}

#[derive(Clone)]
pub struct IdentityStore {
    backend: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Returns the persisted id, creating and persisting one on first use.
    ///
    /// Never fails: when storage is unusable a fresh id is returned with
    /// [`IdentitySource::Ephemeral`] so callers can surface the degradation.
    pub fn get_or_create_client_id(&self) -> ResolvedIdentity {
        match self.backend.get(CLIENT_ID_KEY) {
            Ok(Some(raw)) => match ClientIdentity::parse(&raw) {
                Ok(id) => {
                    return ResolvedIdentity {
                        id,
                        source: IdentitySource::Stored,
                    }
                }
                Err(err) => {
                    warn!(
                        target: "beach_pier::identity",
                        error = %err,
                        "stored client id is unusable; replacing it"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target: "beach_pier::identity",
                    error = %err,
                    "identity storage unreadable; using an ephemeral client id"
                );
                return ResolvedIdentity {
                    id: ClientIdentity::generate(),
                    source: IdentitySource::Ephemeral,
                };
            }
        }

        let id = ClientIdentity::generate();
        match self.backend.set(CLIENT_ID_KEY, id.as_str()) {
            Ok(()) => {
                debug!(target: "beach_pier::identity", client_id = %id, "created client id");
                ResolvedIdentity {
                    id,
                    source: IdentitySource::Created,
                }
            }
            Err(err) => {
                warn!(
                    target: "beach_pier::identity",
                    error = %err,
                    "failed to persist client id; it will not survive a restart"
                );
                ResolvedIdentity {
                    id,
                    source: IdentitySource::Ephemeral,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore {
        readable: bool,
    }

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            if self.readable {
                Ok(None)
            } else {
                Err(StoreError::Unavailable("disk gone".into()))
            }
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".into()))
        }
    }

    #[test]
    fn generated_tokens_are_short_base36() {
        let id = ClientIdentity::generate();
        assert_eq!(id.as_str().len(), TOKEN_LEN);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn first_call_creates_then_reads_back() {
        let store = IdentityStore::new(Arc::new(MemoryStore::new()));
        let first = store.get_or_create_client_id();
        assert_eq!(first.source, IdentitySource::Created);
        let second = store.get_or_create_client_id();
        assert_eq!(second.source, IdentitySource::Stored);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn unreadable_storage_is_flagged_ephemeral() {
        let store = IdentityStore::new(Arc::new(BrokenStore { readable: false }));
        let first = store.get_or_create_client_id();
        let second = store.get_or_create_client_id();
        assert!(first.is_ephemeral());
        assert!(second.is_ephemeral());
    }

    #[test]
    fn unwritable_storage_is_flagged_ephemeral() {
        let store = IdentityStore::new(Arc::new(BrokenStore { readable: true }));
        assert!(store.get_or_create_client_id().is_ephemeral());
    }

    #[test]
    fn unsafe_stored_id_is_replaced() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(CLIENT_ID_KEY, "../../etc").unwrap();
        let store = IdentityStore::new(backend.clone());
        let resolved = store.get_or_create_client_id();
        assert_eq!(resolved.source, IdentitySource::Created);
        assert_eq!(
            backend.get(CLIENT_ID_KEY).unwrap().as_deref(),
            Some(resolved.id.as_str())
        );
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");

        let first = IdentityStore::new(Arc::new(FileStore::new(&path))).get_or_create_client_id();
        let second = IdentityStore::new(Arc::new(FileStore::new(&path))).get_or_create_client_id();
        assert_eq!(first.source, IdentitySource::Created);
        assert_eq!(second.source, IdentitySource::Stored);
        assert_eq!(first.id, second.id);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn file_store_keeps_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.toml"));
        store.set("theme", "dark").unwrap();
        store.set(CLIENT_ID_KEY, "abc123").unwrap();
        assert_eq!(store.get("theme").unwrap().as_deref(), Some("dark"));
        assert_eq!(store.get(CLIENT_ID_KEY).unwrap().as_deref(), Some("abc123"));
    }
}

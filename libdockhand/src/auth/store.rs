//! Credential storage abstraction for registry authentication.
//!
//! Credentials are kept in a Docker-style JSON document:
//!
//! ```json
//! {"auths": {"registry.example.com": {"auth": "dXNlcjpwYXNz"}}}
//! ```
//!
//! The store is constructed once and handed to every component that needs it.
//! A missing or corrupt file reads as "no credentials" instead of failing.

use crate::auth::encode_basic_token;
use crate::error::{DockhandError, Result};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for storing and retrieving registry credentials.
///
/// Implementations must be shareable across tasks; `save` and `remove`
/// take `&self` and persist immediately.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored `base64(username:password)` token for a registry host.
    fn lookup(&self, registry: &str) -> Option<String>;

    /// Stores credentials for a registry host.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be persisted.
    fn save(&self, registry: &str, username: &str, password: &str) -> Result<()>;

    /// Removes credentials for a registry host.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be rewritten.
    fn remove(&self, registry: &str) -> Result<()>;

    /// Lists all registry hosts with stored credentials.
    fn list(&self) -> Vec<String>;
}

/// File-based credential store using the Docker `config.json` layout.
///
/// The file is re-read on every lookup so that concurrent `login`s from other
/// processes are picked up. Writes restrict permissions to 0600 on Unix.
///
/// # Examples
///
/// ```no_run
/// use libdockhand::auth::{CredentialStore, FileCredentialStore};
/// use std::path::PathBuf;
///
/// # fn example() -> libdockhand::error::Result<()> {
/// let store = FileCredentialStore::new(PathBuf::from("/home/user/.dockhand/config.json"));
/// store.save("registry.example.com", "username", "password")?;
/// assert!(store.lookup("registry.example.com").is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    /// Path to the JSON document
    path: PathBuf,
}

impl FileCredentialStore {
    /// Creates a store backed by `path`. The file is created on first save.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Creates a store at the default per-user location (`~/.dockhand/config.json`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the home directory cannot be determined.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(default_path()?))
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, degrading to an empty one when the file is missing or malformed.
    fn load(&self) -> Map<String, Value> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Could not read credentials file");
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(document)) => document,
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "Credentials file is not a JSON object");
                Map::new()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Credentials file is not valid JSON");
                Map::new()
            }
        }
    }

    /// Writes the document with restricted permissions.
    fn write(&self, document: &Map<String, Value>) -> Result<()> {
        let path_str = self.path.display().to_string();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DockhandError::config_with_source(
                    "Failed to create credentials directory".to_string(),
                    Some(parent.display().to_string()),
                    e,
                )
            })?;
        }

        let contents = serde_json::to_string_pretty(document).map_err(|e| {
            DockhandError::config_with_source(
                "Failed to serialize credentials".to_string(),
                Some(path_str.clone()),
                e,
            )
        })?;

        fs::write(&self.path, contents).map_err(|e| {
            DockhandError::config_with_source(
                "Failed to write credentials file".to_string(),
                Some(path_str.clone()),
                e,
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, permissions).map_err(|e| {
                DockhandError::config_with_source(
                    "Failed to set credentials file permissions".to_string(),
                    Some(path_str),
                    e,
                )
            })?;
        }

        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn lookup(&self, registry: &str) -> Option<String> {
        self.load()
            .get("auths")?
            .get(registry)?
            .get("auth")?
            .as_str()
            .map(str::to_string)
    }

    fn save(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut document = self.load();
        let auths = document
            .entry("auths")
            .or_insert_with(|| Value::Object(Map::new()));
        if !auths.is_object() {
            *auths = Value::Object(Map::new());
        }
        if let Value::Object(auths) = auths {
            auths.insert(
                registry.to_string(),
                json!({ "auth": encode_basic_token(username, password) }),
            );
        }
        self.write(&document)
    }

    fn remove(&self, registry: &str) -> Result<()> {
        let mut document = self.load();
        let removed = document
            .get_mut("auths")
            .and_then(Value::as_object_mut)
            .and_then(|auths| auths.remove(registry));
        if removed.is_some() {
            self.write(&document)?;
        }
        Ok(())
    }

    fn list(&self) -> Vec<String> {
        self.load()
            .get("auths")
            .and_then(Value::as_object)
            .map(|auths| auths.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Process-local credential store. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    auths: Mutex<BTreeMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, registry: &str) -> Option<String> {
        self.auths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(registry)
            .cloned()
    }

    fn save(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        self.auths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(registry.to_string(), encode_basic_token(username, password));
        Ok(())
    }

    fn remove(&self, registry: &str) -> Result<()> {
        self.auths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(registry);
        Ok(())
    }

    fn list(&self) -> Vec<String> {
        self.auths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// Returns `~/.dockhand/config.json`.
pub fn default_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".dockhand").join("config.json"))
        .ok_or_else(|| DockhandError::config("Could not determine home directory", None))
}

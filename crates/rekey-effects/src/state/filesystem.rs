//! Filesystem shared-state store
//!
//! One file per object under a base directory, written atomically through a
//! temporary file and rename. Each file carries the object's version token and
//! a BLAKE3 checksum of its value that is verified on every read. A store-wide
//! version counter is persisted alongside so tokens keep increasing across
//! restarts.
//!
//! Conditional writes are serialized within one process. Separate processes
//! sharing a directory rely on the version check alone.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rekey_core::effects::{SharedStateStore, StateStoreError, VersionToken, Versioned};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use super::{validate_name, ChangeKind, StateChange, WatchableStore, CHANGE_CHANNEL_CAPACITY};

const OBJECT_EXTENSION: &str = "obj";
const VERSION_FILE: &str = ".version";

/// File permissions for objects; key records carry secrets.
#[cfg(unix)]
const FILE_PERMISSIONS: u32 = 0o600;

/// On-disk object envelope
#[derive(Debug, Serialize, Deserialize)]
struct ObjectEnvelope {
    name: String,
    version: VersionToken,
    /// BLAKE3 hash of the decoded value
    checksum: String,
    /// Standard base64 of the value
    value: String,
}

impl ObjectEnvelope {
    fn seal(name: &str, version: VersionToken, value: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            version,
            checksum: blake3::hash(value).to_hex().to_string(),
            value: STANDARD.encode(value),
        }
    }

    fn open(self) -> Result<(String, Versioned<Vec<u8>>), StateStoreError> {
        let value = STANDARD.decode(self.value.as_bytes()).map_err(|e| {
            StateStoreError::Backend(format!("corrupt object {}: {e}", self.name))
        })?;
        if blake3::hash(&value).to_hex().as_str() != self.checksum {
            return Err(StateStoreError::Backend(format!(
                "checksum mismatch for object {}",
                self.name
            )));
        }
        Ok((self.name, Versioned::new(self.version, value)))
    }
}

/// Filesystem-backed shared-state store
#[derive(Debug)]
pub struct FilesystemStateStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<StateChange>,
}

impl FilesystemStateStore {
    /// Open (creating if needed) a store rooted at `base_path`
    pub async fn open(base_path: impl Into<PathBuf>) -> Result<Self, StateStoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await.map_err(|e| StateStoreError::Unavailable {
            reason: format!("failed to create state directory {}: {e}", base_path.display()),
        })?;
        info!(path = %base_path.display(), "opened filesystem state store");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
            changes,
        })
    }

    /// Directory the store lives in
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{name}.{OBJECT_EXTENSION}"))
    }

    async fn read_object(&self, path: &Path) -> Result<Option<(String, Versioned<Vec<u8>>)>, StateStoreError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateStoreError::Unavailable {
                    reason: format!("failed to read {}: {e}", path.display()),
                })
            }
        };
        let envelope: ObjectEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
            StateStoreError::Backend(format!("corrupt object file {}: {e}", path.display()))
        })?;
        envelope.open().map(Some)
    }

    async fn current(&self, name: &str) -> Result<Option<Versioned<Vec<u8>>>, StateStoreError> {
        Ok(self
            .read_object(&self.object_path(name))
            .await?
            .map(|(_, object)| object))
    }

    /// Advance the persisted store-wide version counter.
    async fn next_version(&self, floor: VersionToken) -> Result<VersionToken, StateStoreError> {
        let path = self.base_path.join(VERSION_FILE);
        let persisted = match fs::read_to_string(&path).await {
            Ok(content) => content.trim().parse::<VersionToken>().map_err(|e| {
                StateStoreError::Backend(format!("corrupt version counter: {e}"))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(StateStoreError::Unavailable {
                    reason: format!("failed to read version counter: {e}"),
                })
            }
        };
        let next = persisted.max(floor) + 1;
        self.write_atomic(&path, next.to_string().as_bytes()).await?;
        Ok(next)
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), StateStoreError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = self.base_path.join(format!(".{file_name}.tmp"));
        let unavailable = |e: std::io::Error| StateStoreError::Unavailable {
            reason: format!("failed to write {}: {e}", path.display()),
        };

        let mut file = fs::File::create(&temp_path).await.map_err(unavailable)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(FILE_PERMISSIONS))
                .await
                .map_err(unavailable)?;
        }
        file.write_all(contents).await.map_err(unavailable)?;
        file.sync_all().await.map_err(unavailable)?;
        drop(file);
        fs::rename(&temp_path, path).await.map_err(unavailable)?;
        Ok(())
    }

    async fn write_object(
        &self,
        name: &str,
        floor: VersionToken,
        value: &[u8],
    ) -> Result<VersionToken, StateStoreError> {
        let version = self.next_version(floor).await?;
        let envelope = ObjectEnvelope::seal(name, version, value);
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| StateStoreError::Backend(format!("failed to encode {name}: {e}")))?;
        self.write_atomic(&self.object_path(name), &bytes).await?;
        debug!(object = name, version, "wrote object");
        Ok(version)
    }

    fn notify(&self, name: &str, kind: ChangeKind, version: VersionToken) {
        let _ = self.changes.send(StateChange {
            name: name.to_string(),
            kind,
            version,
        });
    }
}

impl WatchableStore for FilesystemStateStore {
    fn watch(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl SharedStateStore for FilesystemStateStore {
    async fn get(&self, name: &str) -> Result<Option<Versioned<Vec<u8>>>, StateStoreError> {
        validate_name(name)?;
        self.current(name).await
    }

    async fn list(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Versioned<Vec<u8>>)>, StateStoreError> {
        let unavailable = |e: std::io::Error| StateStoreError::Unavailable {
            reason: format!("failed to list {}: {e}", self.base_path.display()),
        };
        let mut entries = fs::read_dir(&self.base_path).await.map_err(unavailable)?;
        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            let Some(stem) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
            else {
                continue;
            };
            let is_object = path
                .extension()
                .is_some_and(|extension| extension == OBJECT_EXTENSION);
            if !is_object || stem.starts_with('.') || !stem.starts_with(prefix) {
                continue;
            }
            if let Some(object) = self.read_object(&path).await? {
                objects.push(object);
            }
        }
        objects.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(objects)
    }

    async fn create(&self, name: &str, value: Vec<u8>) -> Result<VersionToken, StateStoreError> {
        validate_name(name)?;
        let _guard = self.write_lock.lock().await;
        if self.current(name).await?.is_some() {
            return Err(StateStoreError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let version = self.write_object(name, 0, &value).await?;
        self.notify(name, ChangeKind::Created, version);
        Ok(version)
    }

    async fn update(
        &self,
        name: &str,
        expected: VersionToken,
        value: Vec<u8>,
    ) -> Result<VersionToken, StateStoreError> {
        validate_name(name)?;
        let _guard = self.write_lock.lock().await;
        let Some(current) = self.current(name).await? else {
            return Err(StateStoreError::NotFound {
                name: name.to_string(),
            });
        };
        if current.version != expected {
            return Err(StateStoreError::Conflict {
                name: name.to_string(),
                expected,
                actual: current.version,
            });
        }
        let version = self.write_object(name, current.version, &value).await?;
        self.notify(name, ChangeKind::Updated, version);
        Ok(version)
    }

    async fn delete(&self, name: &str, expected: VersionToken) -> Result<(), StateStoreError> {
        validate_name(name)?;
        let _guard = self.write_lock.lock().await;
        let Some(current) = self.current(name).await? else {
            return Err(StateStoreError::NotFound {
                name: name.to_string(),
            });
        };
        if current.version != expected {
            return Err(StateStoreError::Conflict {
                name: name.to_string(),
                expected,
                actual: current.version,
            });
        }
        fs::remove_file(self.object_path(name))
            .await
            .map_err(|e| StateStoreError::Unavailable {
                reason: format!("failed to delete {name}: {e}"),
            })?;
        debug!(object = name, version = expected, "deleted object");
        self.notify(name, ChangeKind::Deleted, expected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn objects_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let version = {
            let store = FilesystemStateStore::open(dir.path()).await.unwrap();
            store.create("encryption-mode", b"{}".to_vec()).await.unwrap()
        };

        let store = FilesystemStateStore::open(dir.path()).await.unwrap();
        let object = store.get("encryption-mode").await.unwrap().unwrap();
        assert_eq!(object.version, version);
        assert_eq!(object.value, b"{}");

        let next = store
            .update("encryption-mode", version, b"{\"mode\":\"aescbc\"}".to_vec())
            .await
            .unwrap();
        assert!(next > version);
    }

    #[tokio::test]
    async fn stale_versions_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStateStore::open(dir.path()).await.unwrap();
        let v1 = store.create("a", vec![1]).await.unwrap();
        let v2 = store.update("a", v1, vec![2]).await.unwrap();
        assert_matches!(
            store.update("a", v1, vec![3]).await,
            Err(StateStoreError::Conflict { actual, .. }) if actual == v2
        );
        assert_matches!(store.delete("a", v1).await, Err(StateStoreError::Conflict { .. }));
        store.delete("a", v2).await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_skips_counter_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStateStore::open(dir.path()).await.unwrap();
        store.create("key-2", vec![]).await.unwrap();
        store.create("key-1", vec![]).await.unwrap();
        store.create("other", vec![]).await.unwrap();
        std::fs::write(dir.path().join("key-3.txt"), b"noise").unwrap();

        let names: Vec<String> = store
            .list("key-")
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["key-1", "key-2"]);
    }

    #[tokio::test]
    async fn tampered_objects_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStateStore::open(dir.path()).await.unwrap();
        store.create("a", b"original".to_vec()).await.unwrap();

        let path = dir.path().join("a.obj");
        let mut envelope: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        envelope["value"] = serde_json::Value::String(STANDARD.encode(b"tampered"));
        std::fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        assert_matches!(store.get("a").await, Err(StateStoreError::Backend(_)));
    }
}

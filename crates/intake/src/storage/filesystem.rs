use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{validate_bucket, validate_key, ObjectStore};
use crate::error::StorageError;

/// Object store backed by a local directory: `<root>/<bucket>/<key>`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Opens a store rooted at an existing directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(StorageError::Unavailable(format!(
                "storage root '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

const WRITE_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Writing,
    Cancelled,
    Persisted,
}

fn lock_state(state: &Mutex<WriteState>) -> MutexGuard<'_, WriteState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held by a `put` future while its blocking write runs. Dropping it armed
/// means the caller abandoned the put: a write still in progress stops and
/// removes its temp file, and an object already renamed into place is
/// removed again.
struct AbandonedWrite {
    state: Arc<Mutex<WriteState>>,
    path: PathBuf,
    armed: bool,
}

impl Drop for AbandonedWrite {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = lock_state(&self.state);
        match *state {
            WriteState::Writing => *state = WriteState::Cancelled,
            WriteState::Persisted => match std::fs::remove_file(&self.path) {
                Ok(()) => log::info!("Removed abandoned object {}", self.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "Failed to remove abandoned object {}: {}",
                    self.path.display(),
                    e
                ),
            },
            WriteState::Cancelled => {}
        }
    }
}

/// Writes `bytes` to a hidden temp file next to `path`, then renames it into
/// place. The temp file is deleted whenever the rename does not happen. The
/// state lock is held across the final check and the rename, so a
/// cancellation either stops the rename or sees it finished.
fn write_object(path: &Path, bytes: &[u8], state: &Mutex<WriteState>) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
    std::fs::create_dir_all(parent).map_err(|e| StorageError::WriteFile {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let cancelled = || StorageError::Cancelled {
        path: path.to_path_buf(),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| StorageError::WriteFile {
            path: parent.to_path_buf(),
            source: e,
        })?;

    for chunk in bytes.chunks(WRITE_CHUNK) {
        if *lock_state(state) == WriteState::Cancelled {
            return Err(cancelled());
        }
        temp.write_all(chunk).map_err(|e| StorageError::WriteFile {
            path: temp.path().to_path_buf(),
            source: e,
        })?;
    }

    let mut state = lock_state(state);
    if *state == WriteState::Cancelled {
        return Err(cancelled());
    }
    temp.persist(path).map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    *state = WriteState::Persisted;
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        let state = Arc::new(Mutex::new(WriteState::Writing));
        let mut abandoned = AbandonedWrite {
            state: Arc::clone(&state),
            path: path.clone(),
            armed: true,
        };

        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || write_object(&target, &bytes, &state))
            .await
            .map_err(|e| StorageError::Unavailable(format!("write task failed: {}", e)));

        abandoned.armed = false;
        result?
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        validate_bucket(bucket)?;
        let bucket_dir = self.root.join(bucket);
        if !bucket_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![bucket_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries =
                tokio::fs::read_dir(&dir)
                    .await
                    .map_err(|e| StorageError::ListDirectory {
                        path: dir.clone(),
                        source: e,
                    })?;

            while let Some(entry) =
                entries
                    .next_entry()
                    .await
                    .map_err(|e| StorageError::ListDirectory {
                        path: dir.clone(),
                        source: e,
                    })?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }

                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::ListDirectory {
                        path: path.clone(),
                        source: e,
                    })?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let Ok(relative) = path.strip_prefix(&bucket_dir) else {
                        continue;
                    };
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFile { path, source: e }),
        }
    }
}

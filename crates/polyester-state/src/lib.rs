//! File-based, content-addressed state persistence: each operation's state
//! is stored under a path derived from [`polyester_core::cache_key`], so an
//! unchanged operation's prior state is found purely from its name and
//! arguments, without a separate index.

use polyester_core::State;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to derive cache key: {0}")]
    CacheKey(serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse stored state: {0}")]
    Parse(serde_json::Error),
}

/// A directory of per-operation state files, one JSON document per cache
/// key, named `<cache_key>.json` directly under the store root (the root
/// is flat, matching the upstream single-level `.polyester/state` layout).
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, op_name: &str, args: &serde_json::Value) -> Result<PathBuf, StateStoreError> {
        let key = polyester_core::cache_key(op_name, args).map_err(StateStoreError::CacheKey)?;
        Ok(self.root.join(format!("{key}.json")))
    }

    /// Loads the previously persisted state for this exact operation, or
    /// `None` if it has never run (or its cache key was pruned).
    pub fn load(&self, op_name: &str, args: &serde_json::Value) -> Result<Option<State>, StateStoreError> {
        let path = self.path_for(op_name, args)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(StateStoreError::Parse)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, op_name: &str, args: &serde_json::Value, state: &State) -> Result<(), StateStoreError> {
        let path = self.path_for(op_name, args)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(state).map_err(StateStoreError::Parse)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    /// Every cache key with a state file currently on disk.
    pub fn keys(&self) -> Result<HashSet<String>, StateStoreError> {
        let mut keys = HashSet::new();
        let dir = match std::fs::read_dir(&self.root) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        for entry in dir {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.insert(stem.to_string());
                }
            }
        }
        Ok(keys)
    }

    /// Removes every state file whose cache key is not in `active`, i.e.
    /// state left behind by operations no longer declared in the current
    /// manifest. Returns the count removed. `checksum` is never a `.json`
    /// file so `keys()` never sees it and this never touches it.
    pub fn prune(&self, active: &HashSet<String>) -> Result<usize, StateStoreError> {
        let mut removed = 0;
        for key in self.keys()? {
            if !active.contains(&key) {
                let path = self.root.join(format!("{key}.json"));
                std::fs::remove_file(path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Writes the `checksum` file: a single SHA-256 hex digest over every
    /// active cache key, sorted, newline-joined. Not used to reject a
    /// mismatched store on load; it's the on-disk integrity record spec.md
    /// describes, refreshed after every successful apply of the whole
    /// manifest.
    pub fn write_checksum(&self, active: &HashSet<String>) -> Result<(), StateStoreError> {
        std::fs::create_dir_all(&self.root)?;
        let mut sorted: Vec<&String> = active.iter().collect();
        sorted.sort();
        let joined = sorted.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("\n");
        std::fs::write(self.root.join("checksum"), polyester_core::sha256_hex(joined.as_bytes()))?;
        Ok(())
    }

    /// Reads the `checksum` file written by [`StateStore::write_checksum`],
    /// or `None` if this store has never completed a full apply.
    pub fn read_checksum(&self) -> Result<Option<String>, StateStoreError> {
        match std::fs::read_to_string(self.root.join("checksum")) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

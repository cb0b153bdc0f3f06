//! Plaintext key-value preference store.
//!
//! Backs the persisted entries the engine needs across restarts: the two
//! key seeds, the sealed PIN blob, the inactivity timeout, the last-active
//! timestamp and the night-mode preference.  Values here are either public
//! (timestamps, settings) or already ciphertext (`user_pin`); the seeds are
//! the known exception — random secrets on plain storage, kept for
//! compatibility with existing vaults (see DESIGN notes).  The store is the
//! injected seed backend for `KeyManager`, so a hardware-backed variant can
//! replace this file without touching callers.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub const KEY_PIN_SECRET_SEED: &str = "pin_secret_seed";
pub const KEY_NOTE_SECRET_SEED: &str = "note_secret_seed";
pub const KEY_USER_PIN: &str = "user_pin";
pub const KEY_INACTIVITY_TIMEOUT: &str = "inactivity_timeout_duration";
pub const KEY_LAST_ACTIVE: &str = "last_active_timestamp";
pub const KEY_NIGHT_MODE: &str = "night_mode_preference";

pub struct Prefs {
    path: PathBuf,
    map: RwLock<Map<String, Value>>,
}

impl Prefs {
    /// Load the preference file, creating an empty store if absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            Map::new()
        };
        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map
            .read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.map.write();
        map.insert(key.to_owned(), Value::String(value.to_owned()));
        self.persist(&map)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.map.read().get(key).and_then(Value::as_i64)
    }

    pub fn set_i64(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut map = self.map.write();
        map.insert(key.to_owned(), Value::from(value));
        self.persist(&map)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.map.write();
        if map.remove(key).is_some() {
            self.persist(&map)?;
        }
        Ok(())
    }

    /// Clear every entry, seeds included. Only the full data wipe calls
    /// this — after it, nothing encrypted under the old keys can come back.
    pub fn wipe(&self) -> Result<(), StoreError> {
        let mut map = self.map.write();
        map.clear();
        self.persist(&map)
    }

    /// Write-through via temp file + rename so a crash mid-write cannot
    /// leave a half-written preference file (losing a seed loses the vault).
    fn persist(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| StoreError::Prefs("preference path has no parent".into()))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, map)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Prefs(format!("persist preferences: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let prefs = Prefs::load(&path).unwrap();
        prefs.set_string(KEY_NOTE_SECRET_SEED, "c2VlZA==").unwrap();
        prefs.set_i64(KEY_INACTIVITY_TIMEOUT, 180_000).unwrap();

        let reloaded = Prefs::load(&path).unwrap();
        assert_eq!(
            reloaded.get_string(KEY_NOTE_SECRET_SEED).as_deref(),
            Some("c2VlZA==")
        );
        assert_eq!(reloaded.get_i64(KEY_INACTIVITY_TIMEOUT), Some(180_000));
    }

    #[test]
    fn remove_and_contains() {
        let dir = tempdir().unwrap();
        let prefs = Prefs::load(dir.path().join("prefs.json")).unwrap();

        prefs.set_i64(KEY_LAST_ACTIVE, 42).unwrap();
        assert!(prefs.contains(KEY_LAST_ACTIVE));

        prefs.remove(KEY_LAST_ACTIVE).unwrap();
        assert!(!prefs.contains(KEY_LAST_ACTIVE));
        // Removing again is a no-op.
        prefs.remove(KEY_LAST_ACTIVE).unwrap();
    }

    #[test]
    fn wipe_clears_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let prefs = Prefs::load(&path).unwrap();
        prefs.set_string(KEY_USER_PIN, "blob").unwrap();
        prefs.set_string(KEY_PIN_SECRET_SEED, "seed").unwrap();

        prefs.wipe().unwrap();
        assert!(!prefs.contains(KEY_USER_PIN));

        let reloaded = Prefs::load(&path).unwrap();
        assert!(!reloaded.contains(KEY_PIN_SECRET_SEED));
    }
}

//! Key manager: persisted random seeds, deterministic re-derivation.
//!
//! One 16-byte seed per key purpose, created lazily on first request and
//! persisted Base64-encoded in the preference store.  The derived key is
//! never persisted; it is recomputed from the seed (PBKDF2, scheme v1) and
//! cached in process memory.  Derivation is exclusively owned here — the
//! note store and file vault only ever ask for a finished key.

use base64::{engine::general_purpose, Engine as _};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use nv_crypto::kdf::{self, SecretKey, SEED_LEN};

use crate::error::StoreError;
use crate::prefs::{Prefs, KEY_NOTE_SECRET_SEED, KEY_PIN_SECRET_SEED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Gates the sealed PIN blob.
    Pin,
    /// Protects note content, archived files and their transient copies.
    NotesAndFiles,
}

impl KeyPurpose {
    fn seed_pref_key(self) -> &'static str {
        match self {
            KeyPurpose::Pin => KEY_PIN_SECRET_SEED,
            KeyPurpose::NotesAndFiles => KEY_NOTE_SECRET_SEED,
        }
    }
}

pub struct KeyManager {
    prefs: Arc<Prefs>,
    cache: RwLock<HashMap<KeyPurpose, SecretKey>>,
}

impl KeyManager {
    pub fn new(prefs: Arc<Prefs>) -> Self {
        Self {
            prefs,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Derive (or look up) the key for `purpose`.
    ///
    /// First call for a purpose generates and persists a fresh random seed;
    /// every later call re-derives from the stored seed, so the result is
    /// bit-identical across calls and process restarts.
    pub fn get_or_create(&self, purpose: KeyPurpose) -> Result<SecretKey, StoreError> {
        if let Some(key) = self.cache.read().get(&purpose) {
            return Ok(key.clone());
        }

        let seed = self.load_or_create_seed(purpose)?;
        let key = kdf::key_from_seed(&seed)?;
        self.cache.write().insert(purpose, key.clone());
        Ok(key)
    }

    /// Drop cached keys (lock/logout). Seeds stay persisted; the next
    /// request re-derives the same keys.
    pub fn forget_cached(&self) {
        self.cache.write().clear();
    }

    fn load_or_create_seed(&self, purpose: KeyPurpose) -> Result<Zeroizing<[u8; SEED_LEN]>, StoreError> {
        let pref_key = purpose.seed_pref_key();
        if let Some(encoded) = self.prefs.get_string(pref_key) {
            let decoded = Zeroizing::new(
                general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(nv_crypto::CryptoError::from)?,
            );
            let seed: [u8; SEED_LEN] = decoded.as_slice().try_into().map_err(|_| {
                StoreError::Crypto(nv_crypto::CryptoError::InvalidKey(format!(
                    "seed `{pref_key}` has wrong length"
                )))
            })?;
            return Ok(Zeroizing::new(seed));
        }

        debug!(purpose = ?purpose, "generating new key seed");
        let seed = kdf::generate_seed();
        self.prefs
            .set_string(pref_key, &general_purpose::STANDARD.encode(seed))?;
        Ok(Zeroizing::new(seed))
    }
}

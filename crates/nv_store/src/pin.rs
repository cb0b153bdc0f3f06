//! PIN credential gate.
//!
//! The PIN itself is never stored; what persists is an AEAD blob of the
//! PIN sealed under the Pin-purpose key, Base64 in the preference store.
//! Verification decrypts the blob and compares — a wrong PIN cannot be
//! told apart from a corrupted blob, both just fail to verify.

use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{info, warn};

use nv_crypto::aead;

use crate::error::StoreError;
use crate::keys::{KeyManager, KeyPurpose};
use crate::prefs::{Prefs, KEY_USER_PIN};

pub struct PinGate {
    prefs: Arc<Prefs>,
    keys: Arc<KeyManager>,
}

impl PinGate {
    pub fn new(prefs: Arc<Prefs>, keys: Arc<KeyManager>) -> Self {
        Self { prefs, keys }
    }

    /// First-run detection: no credential set means no gate yet.
    pub fn is_set(&self) -> bool {
        self.prefs.contains(KEY_USER_PIN)
    }

    /// Seal and store a new PIN, replacing any previous one.
    pub fn set(&self, pin: &str) -> Result<(), StoreError> {
        if pin.is_empty() {
            return Err(StoreError::Prefs("PIN must not be empty".into()));
        }
        let key = self.keys.get_or_create(KeyPurpose::Pin)?;
        let blob = aead::seal(&key, pin.as_bytes())?;
        self.prefs
            .set_string(KEY_USER_PIN, &general_purpose::STANDARD.encode(blob))?;
        info!("PIN credential updated");
        Ok(())
    }

    /// Check a candidate PIN against the stored blob.  Missing or
    /// undecryptable blobs simply fail verification.
    pub fn verify(&self, candidate: &str) -> Result<bool, StoreError> {
        let encoded = match self.prefs.get_string(KEY_USER_PIN) {
            Some(encoded) => encoded,
            None => return Ok(false),
        };
        let blob = match general_purpose::STANDARD.decode(encoded.trim()) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("stored PIN blob is not valid Base64: {e}");
                return Ok(false);
            }
        };

        let key = self.keys.get_or_create(KeyPurpose::Pin)?;
        match aead::open(&key, &blob) {
            Ok(stored) => Ok(constant_time_eq(&stored, candidate.as_bytes())),
            Err(e) => {
                warn!("stored PIN blob failed authentication: {e}");
                Ok(false)
            }
        }
    }

    /// Change the PIN after verifying the old one.  Returns false (and
    /// changes nothing) when the old PIN is wrong.
    pub fn change(&self, old: &str, new: &str) -> Result<bool, StoreError> {
        if !self.verify(old)? {
            return Ok(false);
        }
        self.set(new)?;
        Ok(true)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

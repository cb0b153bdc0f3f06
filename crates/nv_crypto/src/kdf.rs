//! Key derivation functions
//!
//! `key_from_seed` — PBKDF2-HMAC-SHA256, derives the 32-byte AES key used
//!   for notes, files and the PIN blob from a persisted 16-byte seed.
//!
//! `backup_key_from_password` — PBKDF2-HMAC-SHA256 with a higher iteration
//!   count, derives the one-time key protecting a backup archive.

use base64::{engine::general_purpose, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

pub const SEED_LEN: usize = 16;
pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Scheme v1: the seed is both the PBKDF2 password (Base64-re-encoded) and
/// the PBKDF2 salt (raw bytes). Existing ciphertext depends on this exact
/// construction; a corrected scheme must ship under a new version constant
/// with a migration, never by changing these parameters in place.
pub const KDF_SCHEME_V1_ITERATIONS: u32 = 10_000;

pub const BACKUP_KDF_ITERATIONS: u32 = 50_000;

/// 32-byte AES-256 key. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey(pub [u8; KEY_LEN]);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Derive the vault key from a persisted random seed (scheme v1).
///
/// Deterministic: the same seed always yields a bit-identical key, which is
/// what keeps historical ciphertext decryptable.
pub fn key_from_seed(seed: &[u8; SEED_LEN]) -> Result<SecretKey, CryptoError> {
    let password = Zeroizing::new(general_purpose::STANDARD.encode(seed));
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        seed,
        KDF_SCHEME_V1_ITERATIONS,
        &mut key,
    );
    Ok(SecretKey(key))
}

/// Derive a one-time backup key from a user-supplied password + random salt.
/// The salt is not secret and travels with the archive.
pub fn backup_key_from_password(
    password: &str,
    salt: &[u8; SALT_LEN],
) -> Result<SecretKey, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::KeyDerivation("empty backup password".into()));
    }
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, BACKUP_KDF_ITERATIONS, &mut key);
    Ok(SecretKey(key))
}

/// Generate a fresh random 16-byte seed (call once per key purpose; persist).
pub fn generate_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    seed
}

/// Generate a fresh random 16-byte salt for a backup export.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

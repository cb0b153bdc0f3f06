//! nv_crypto — Notevault cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Decryption failures are opaque: truncation, wrong key and tag
//!   mismatch all report the same error, never which one it was.
//!
//! # Module layout
//! - `aead`  — AES-256-GCM encrypt/decrypt, single-blob and streaming
//! - `kdf`   — PBKDF2-HMAC-SHA256 seed/password key derivation
//! - `error` — unified error type

pub mod aead;
pub mod error;
pub mod kdf;

pub use error::CryptoError;
pub use kdf::SecretKey;

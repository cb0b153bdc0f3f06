//! nv_store — Notevault encrypted note and file storage engine
//!
//! # Encryption strategy
//! SQLite does NOT natively encrypt.  We use application-level encryption:
//! - Note content is stored as an AES-256-GCM blob, base64-encoded; title,
//!   tags and timestamps stay plaintext so listing and tag search work
//!   without a key.
//! - Archived files are sealed in streaming mode into UUID-named objects;
//!   only their metadata goes in the table.
//! - Keys are derived on demand from persisted random seeds (PBKDF2) and
//!   held in memory only; backups use an independent password-derived key.
//!
//! # Module layout
//! - `prefs`    — plaintext key-value preference file (seeds, PIN blob,
//!                timeout, last-active timestamp, night mode)
//! - `keys`     — per-purpose seed management + key cache
//! - `db`       — SQLite handle + migrations
//! - `models`   — row structs and the decrypted note view
//! - `notes`    — encrypted note store with snapshot subscriptions
//! - `files`    — streaming encrypted file vault
//! - `backup`   — password-encrypted tar export/import
//! - `pin`      — PIN credential gate
//! - `session`  — inactivity lock state machine
//! - `expiry`   — per-note self-destruct scheduling
//! - `vault`    — facade wiring it all together
//! - `error`    — unified error type

pub mod backup;
pub mod db;
pub mod error;
pub mod expiry;
pub mod files;
pub mod keys;
pub mod models;
pub mod notes;
pub mod pin;
pub mod prefs;
pub mod session;
pub mod settings;
pub mod vault;

pub use db::Store;
pub use error::StoreError;
pub use models::{ArchivedFileRow, Note, NoteDraft};
pub use notes::{NoteSnapshot, NoteStore};
pub use session::{SessionGuard, SessionState};
pub use vault::{Vault, VaultConfig};

/// Current wall-clock time as epoch millis — the unit every persisted
/// timestamp in the engine uses.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

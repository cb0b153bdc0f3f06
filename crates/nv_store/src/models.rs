//! Database row models — these map to/from SQL rows.

use serde::{Deserialize, Serialize};

/// Note as it sits in the table: `content` is the Base64-encoded
/// `nonce || ciphertext || tag` blob, everything else is plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NoteRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    /// Epoch millis.
    pub created_at: i64,
    /// Epoch millis; 0 = the note never self-destructs.
    pub self_destruct_at: i64,
    /// Comma/keyword searchable, deliberately unencrypted.
    pub tags: String,
}

/// Note as the rest of the app sees it: `content` decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: i64,
    pub self_destruct_at: i64,
    pub tags: String,
}

/// Input for a new note; the store assigns the id and created_at.
#[derive(Debug, Clone)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    /// Epoch millis; 0 = none.
    pub self_destruct_at: i64,
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArchivedFileRow {
    pub id: i64,
    /// Original filename, plaintext.
    pub original_name: String,
    /// Random UUID naming the encrypted object on disk.
    pub storage_name: String,
    pub mime_type: String,
    /// Epoch millis.
    pub archived_at: i64,
}

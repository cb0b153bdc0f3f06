//! Encrypted note store.
//!
//! Maintains the illusion of a plaintext note collection over an
//! encrypted-at-rest table: `content` is sealed before any row write and
//! the decrypted view is rebuilt after every change.  A row that fails
//! authentication (corruption, key trouble) is dropped from the view and
//! logged — one bad note must never take the rest of the vault down.
//!
//! Writes serialize on an internal mutex; reads run concurrently and the
//! underlying table serializes its own access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use nv_crypto::{aead, CryptoError, SecretKey};

use crate::db::Store;
use crate::error::StoreError;
use crate::keys::{KeyManager, KeyPurpose};
use crate::models::{Note, NoteDraft, NoteRow};

/// One rebuild of the decrypted view.  Revisions increase monotonically so
/// a consumer that fired two refreshes can discard the stale result.
#[derive(Debug, Clone)]
pub struct NoteSnapshot {
    pub revision: u64,
    pub notes: Vec<Note>,
}

pub struct NoteStore {
    store: Store,
    keys: Arc<KeyManager>,
    write_lock: tokio::sync::Mutex<()>,
    subscribers: parking_lot::Mutex<Vec<mpsc::UnboundedSender<NoteSnapshot>>>,
    revision: AtomicU64,
}

impl NoteStore {
    pub fn new(store: Store, keys: Arc<KeyManager>) -> Self {
        Self {
            store,
            keys,
            write_lock: tokio::sync::Mutex::new(()),
            subscribers: parking_lot::Mutex::new(Vec::new()),
            revision: AtomicU64::new(0),
        }
    }

    /// Subscribe to decrypted snapshots.  The current view is delivered
    /// immediately; every later change delivers a fresh snapshot, in order,
    /// none skipped.
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<NoteSnapshot>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = NoteSnapshot {
            revision: self.revision.load(Ordering::SeqCst),
            notes: self.all().await?,
        };
        let _ = tx.send(snapshot);
        self.subscribers.lock().push(tx);
        Ok(rx)
    }

    /// Encrypt the draft's content and insert the row. Returns the new id.
    pub async fn insert(&self, draft: &NoteDraft) -> Result<i64, StoreError> {
        let key = self.keys.get_or_create(KeyPurpose::NotesAndFiles)?;
        let sealed = seal_content(&key, &draft.content)?;
        let created_at = crate::now_ms();

        let id = {
            let _guard = self.write_lock.lock().await;
            sqlx::query(
                "INSERT INTO notes (title, content, created_at, self_destruct_at, tags) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&draft.title)
            .bind(&sealed)
            .bind(created_at)
            .bind(draft.self_destruct_at)
            .bind(&draft.tags)
            .execute(&self.store.pool)
            .await?
            .last_insert_rowid()
        };

        debug!(note_id = id, self_destruct_at = draft.self_destruct_at, "note inserted");
        self.notify().await;
        Ok(id)
    }

    /// Re-encrypt and update an existing note.
    pub async fn update(&self, note: &Note) -> Result<(), StoreError> {
        let key = self.keys.get_or_create(KeyPurpose::NotesAndFiles)?;
        let sealed = seal_content(&key, &note.content)?;

        let affected = {
            let _guard = self.write_lock.lock().await;
            sqlx::query(
                "UPDATE notes SET title = ?, content = ?, self_destruct_at = ?, tags = ? \
                 WHERE id = ?",
            )
            .bind(&note.title)
            .bind(&sealed)
            .bind(note.self_destruct_at)
            .bind(&note.tags)
            .bind(note.id)
            .execute(&self.store.pool)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            return Err(StoreError::NotFound(format!("note {}", note.id)));
        }
        self.notify().await;
        Ok(())
    }

    /// Delete by id. Deleting a note that is already gone is a no-op —
    /// the expiry timer and the opportunistic sweep may race here.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let affected = {
            let _guard = self.write_lock.lock().await;
            sqlx::query("DELETE FROM notes WHERE id = ?")
                .bind(id)
                .execute(&self.store.pool)
                .await?
                .rows_affected()
        };

        if affected > 0 {
            debug!(note_id = id, "note deleted");
            self.notify().await;
        } else {
            debug!(note_id = id, "delete of missing note ignored");
        }
        Ok(affected > 0)
    }

    /// Fetch and decrypt a single note.  Unlike the bulk view, a decrypt
    /// failure here is the caller's problem and propagates.
    pub async fn get(&self, id: i64) -> Result<Option<Note>, StoreError> {
        let row = sqlx::query_as::<_, NoteRow>("SELECT * FROM notes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.store.pool)
            .await?;

        match row {
            Some(row) => {
                let key = self.keys.get_or_create(KeyPurpose::NotesAndFiles)?;
                let content = open_content(&key, &row.content).map_err(StoreError::Crypto)?;
                Ok(Some(decrypted(row, content)))
            }
            None => Ok(None),
        }
    }

    /// The full decrypted view, newest first.
    pub async fn all(&self) -> Result<Vec<Note>, StoreError> {
        let rows = sqlx::query_as::<_, NoteRow>("SELECT * FROM notes ORDER BY created_at DESC")
            .fetch_all(&self.store.pool)
            .await?;
        Ok(self.decrypt_rows(rows))
    }

    /// Substring match against the plaintext `tags` column only — content
    /// is never searchable without full decryption.
    pub async fn search_tags(&self, query: &str) -> Result<Vec<Note>, StoreError> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query_as::<_, NoteRow>(
            "SELECT * FROM notes WHERE tags LIKE ? ORDER BY created_at DESC",
        )
        .bind(pattern)
        .fetch_all(&self.store.pool)
        .await?;
        Ok(self.decrypt_rows(rows))
    }

    /// Purge every note whose self-destruct time has passed.  Idempotent:
    /// a second sweep with the same clock deletes nothing and is fine.
    pub async fn cleanup_expired(&self, now_ms: i64) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<i64> = {
            let _guard = self.write_lock.lock().await;
            let rows = sqlx::query_as::<_, (i64,)>(
                "SELECT id FROM notes WHERE self_destruct_at > 0 AND self_destruct_at <= ?",
            )
            .bind(now_ms)
            .fetch_all(&self.store.pool)
            .await?;
            let ids: Vec<i64> = rows.into_iter().map(|(id,)| id).collect();

            for id in &ids {
                sqlx::query("DELETE FROM notes WHERE id = ?")
                    .bind(id)
                    .execute(&self.store.pool)
                    .await?;
            }
            ids
        };

        if ids.is_empty() {
            debug!("expiry sweep found nothing to purge");
        } else {
            info!(count = ids.len(), "purged expired notes");
            self.notify().await;
        }
        Ok(ids)
    }

    /// Ids and fire-times of every note still scheduled to self-destruct.
    /// Pure SQL — works even for rows whose content no longer decrypts.
    pub async fn pending_expiries(&self) -> Result<Vec<(i64, i64)>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT id, self_destruct_at FROM notes WHERE self_destruct_at > 0",
        )
        .fetch_all(&self.store.pool)
        .await?;
        Ok(rows)
    }

    /// Remove every note.  Full-wipe path; needs no key.
    pub async fn delete_all(&self) -> Result<(), StoreError> {
        {
            let _guard = self.write_lock.lock().await;
            sqlx::query("DELETE FROM notes")
                .execute(&self.store.pool)
                .await?;
        }
        self.notify().await;
        Ok(())
    }

    /// Replace every note with the given plaintext set, re-encrypted under
    /// the local key.  Backup import path.
    pub(crate) async fn replace_all(&self, notes: &[Note]) -> Result<(), StoreError> {
        let key = self.keys.get_or_create(KeyPurpose::NotesAndFiles)?;

        {
            let _guard = self.write_lock.lock().await;
            sqlx::query("DELETE FROM notes")
                .execute(&self.store.pool)
                .await?;
            for note in notes {
                let sealed = seal_content(&key, &note.content)?;
                // Ids come from the snapshot so an imported set is
                // identical to the exported one.
                sqlx::query(
                    "INSERT INTO notes (id, title, content, created_at, self_destruct_at, tags) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(note.id)
                .bind(&note.title)
                .bind(&sealed)
                .bind(note.created_at)
                .bind(note.self_destruct_at)
                .bind(&note.tags)
                .execute(&self.store.pool)
                .await?;
            }
        }

        self.notify().await;
        Ok(())
    }

    /// Decrypt a batch of rows, dropping (and logging) the ones that fail.
    /// The key is derived once for the whole batch.
    fn decrypt_rows(&self, rows: Vec<NoteRow>) -> Vec<Note> {
        let key = match self.keys.get_or_create(KeyPurpose::NotesAndFiles) {
            Ok(key) => key,
            Err(e) => {
                error!("note key unavailable, decrypted view left empty: {e}");
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter_map(|row| match open_content(&key, &row.content) {
                Ok(content) => Some(decrypted(row, content)),
                Err(e) => {
                    warn!(note_id = row.id, "dropping undecryptable note from view: {e}");
                    None
                }
            })
            .collect()
    }

    async fn notify(&self) {
        let notes = match self.all().await {
            Ok(notes) => notes,
            Err(e) => {
                error!("failed to rebuild decrypted view: {e}");
                return;
            }
        };
        let snapshot = NoteSnapshot {
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
            notes,
        };
        self.subscribers
            .lock()
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

fn decrypted(row: NoteRow, content: String) -> Note {
    Note {
        id: row.id,
        title: row.title,
        content,
        created_at: row.created_at,
        self_destruct_at: row.self_destruct_at,
        tags: row.tags,
    }
}

fn seal_content(key: &SecretKey, content: &str) -> Result<String, StoreError> {
    let blob = aead::seal(key, content.as_bytes())?;
    Ok(general_purpose::STANDARD.encode(blob))
}

fn open_content(key: &SecretKey, encoded: &str) -> Result<String, CryptoError> {
    let blob = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| CryptoError::Authentication)?;
    let plain = aead::open(key, &blob)?;
    String::from_utf8(plain.to_vec()).map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::Prefs;
    use tempfile::tempdir;

    async fn store_in(dir: &std::path::Path) -> NoteStore {
        let prefs = Arc::new(Prefs::load(dir.join("prefs.json")).unwrap());
        let keys = Arc::new(KeyManager::new(prefs));
        let store = Store::open_in_memory().await.unwrap();
        NoteStore::new(store, keys)
    }

    fn draft(title: &str, content: &str) -> NoteDraft {
        NoteDraft {
            title: title.into(),
            content: content.into(),
            self_destruct_at: 0,
            tags: String::new(),
        }
    }

    #[tokio::test]
    async fn insert_encrypts_content_at_rest() {
        let dir = tempdir().unwrap();
        let notes = store_in(dir.path()).await;

        let id = notes.insert(&draft("groceries", "eggs and milk")).await.unwrap();

        let row = sqlx::query_as::<_, NoteRow>("SELECT * FROM notes WHERE id = ?")
            .bind(id)
            .fetch_one(&notes.store.pool)
            .await
            .unwrap();
        assert_eq!(row.title, "groceries");
        assert_ne!(row.content, "eggs and milk");
        assert!(!row.content.contains("eggs"));

        let note = notes.get(id).await.unwrap().unwrap();
        assert_eq!(note.content, "eggs and milk");
    }

    #[tokio::test]
    async fn update_roundtrips_and_missing_note_errors() {
        let dir = tempdir().unwrap();
        let notes = store_in(dir.path()).await;

        let id = notes.insert(&draft("n", "v1")).await.unwrap();
        let mut note = notes.get(id).await.unwrap().unwrap();
        note.content = "v2".into();
        note.tags = "work".into();
        notes.update(&note).await.unwrap();

        let fetched = notes.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "v2");
        assert_eq!(fetched.tags, "work");

        note.id = 9999;
        assert!(matches!(
            notes.update(&note).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_row_is_dropped_not_fatal() {
        let dir = tempdir().unwrap();
        let notes = store_in(dir.path()).await;

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(notes.insert(&draft(&format!("note {i}"), "body")).await.unwrap());
        }

        // Corrupt one row's ciphertext directly in the table.
        sqlx::query("UPDATE notes SET content = ? WHERE id = ?")
            .bind(general_purpose::STANDARD.encode(vec![0u8; 40]))
            .bind(ids[2])
            .execute(&notes.store.pool)
            .await
            .unwrap();

        let view = notes.all().await.unwrap();
        assert_eq!(view.len(), 4);
        assert!(view.iter().all(|n| n.id != ids[2]));
    }

    #[tokio::test]
    async fn tag_search_matches_substring_only_on_tags() {
        let dir = tempdir().unwrap();
        let notes = store_in(dir.path()).await;

        let mut tagged = draft("a", "contains finance words");
        tagged.tags = "personal,finance".into();
        notes.insert(&tagged).await.unwrap();
        notes.insert(&draft("b", "finance")).await.unwrap();

        let hits = notes.search_tags("finan").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "a");
    }

    #[tokio::test]
    async fn expiry_sweep_is_idempotent() {
        let dir = tempdir().unwrap();
        let notes = store_in(dir.path()).await;

        let mut doomed = draft("doomed", "gone soon");
        doomed.self_destruct_at = 1_000;
        let doomed_id = notes.insert(&doomed).await.unwrap();

        let mut future = draft("later", "still here");
        future.self_destruct_at = 5_000;
        notes.insert(&future).await.unwrap();
        notes.insert(&draft("keeper", "no expiry")).await.unwrap();

        let purged = notes.cleanup_expired(2_000).await.unwrap();
        assert_eq!(purged, vec![doomed_id]);

        let purged_again = notes.cleanup_expired(2_000).await.unwrap();
        assert!(purged_again.is_empty());

        assert_eq!(notes.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_ordered_snapshots() {
        let dir = tempdir().unwrap();
        let notes = Arc::new(store_in(dir.path()).await);

        let mut rx = notes.subscribe().await.unwrap();
        let initial = rx.recv().await.unwrap();
        assert!(initial.notes.is_empty());

        notes.insert(&draft("one", "1")).await.unwrap();
        notes.insert(&draft("two", "2")).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.notes.len(), 1);
        assert_eq!(second.notes.len(), 2);
        assert!(second.revision > first.revision);
    }
}

//! Encrypted file vault.
//!
//! Moves bytes from an arbitrary input stream into an encrypted object on
//! durable storage, and back out to a transient decrypted copy for viewing.
//! Objects are named by random UUID under a fixed directory; decrypted
//! temporaries live in a separate cache directory as
//! `<uuid>_decrypted.<ext>` and exist only until the next purge.
//!
//! Failure discipline: the metadata row is inserted only after the object
//! is fully written, and any mid-stream failure unlinks the partial output
//! — no orphan ciphertext, no half-decrypted temporaries.

use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use nv_crypto::aead;

use crate::db::Store;
use crate::error::StoreError;
use crate::keys::{KeyManager, KeyPurpose};
use crate::models::ArchivedFileRow;

pub struct FileVault {
    store: Store,
    keys: Arc<KeyManager>,
    objects_dir: PathBuf,
    temp_dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileVault {
    pub fn new(
        store: Store,
        keys: Arc<KeyManager>,
        objects_dir: PathBuf,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            keys,
            objects_dir,
            temp_dir,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Directory holding the encrypted objects (backup copies them verbatim).
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Stream `reader` through the cipher into a new encrypted object and
    /// record its metadata.  The row exists only if the object is complete.
    pub async fn archive<R>(
        &self,
        reader: R,
        original_name: &str,
        mime_type: &str,
    ) -> Result<ArchivedFileRow, StoreError>
    where
        R: Read + Send + 'static,
    {
        let key = self.keys.get_or_create(KeyPurpose::NotesAndFiles)?;
        let storage_name = Uuid::new_v4().to_string();
        std::fs::create_dir_all(&self.objects_dir)?;
        let object_path = self.objects_dir.join(&storage_name);

        let write_path = object_path.clone();
        let sealed = tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut reader = reader;
            let file = std::fs::File::create(&write_path)?;
            let mut writer = BufWriter::new(file);
            aead::seal_stream(&key, &mut reader, &mut writer)?;
            writer
                .into_inner()
                .map_err(|e| StoreError::Io(e.into_error()))?
                .sync_all()?;
            Ok(())
        })
        .await
        .map_err(join_error)?;

        if let Err(e) = sealed {
            warn!(name = original_name, "archive failed, removing partial object: {e}");
            let _ = std::fs::remove_file(&object_path);
            return Err(e);
        }

        let archived_at = crate::now_ms();
        let inserted = {
            let _guard = self.write_lock.lock().await;
            sqlx::query(
                "INSERT INTO archived_files (original_name, storage_name, mime_type, archived_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(original_name)
            .bind(&storage_name)
            .bind(mime_type)
            .bind(archived_at)
            .execute(&self.store.pool)
            .await
        };

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) => {
                let _ = std::fs::remove_file(&object_path);
                return Err(e.into());
            }
        };

        debug!(name = original_name, storage = %storage_name, "file archived");
        Ok(ArchivedFileRow {
            id,
            original_name: original_name.to_owned(),
            storage_name,
            mime_type: mime_type.to_owned(),
            archived_at,
        })
    }

    /// Decrypt an archived object into a transient file and return its
    /// path.  The partial temporary is removed on any failure.
    pub async fn materialize(&self, record: &ArchivedFileRow) -> Result<PathBuf, StoreError> {
        let src = self.objects_dir.join(&record.storage_name);
        if !src.exists() {
            return Err(StoreError::NotFound(format!(
                "encrypted object {}",
                record.storage_name
            )));
        }

        let key = self.keys.get_or_create(KeyPurpose::NotesAndFiles)?;
        std::fs::create_dir_all(&self.temp_dir)?;
        let dest = self.temp_dir.join(temp_name(record));

        let write_dest = dest.clone();
        let opened = tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut reader = BufReader::new(std::fs::File::open(&src)?);
            let file = std::fs::File::create(&write_dest)?;
            let mut writer = BufWriter::new(file);
            aead::open_stream(&key, &mut reader, &mut writer)?;
            Ok(())
        })
        .await
        .map_err(join_error)?;

        if let Err(e) = opened {
            warn!(storage = %record.storage_name, "materialize failed, removing partial copy: {e}");
            let _ = std::fs::remove_file(&dest);
            return Err(e);
        }

        debug!(storage = %record.storage_name, path = %dest.display(), "file materialized");
        Ok(dest)
    }

    /// Remove the encrypted object and its metadata row.  A missing object
    /// is tolerated — the row is the source of truth being retired.
    pub async fn delete(&self, record: &ArchivedFileRow) -> Result<(), StoreError> {
        let object_path = self.objects_dir.join(&record.storage_name);
        match std::fs::remove_file(&object_path) {
            Ok(()) => debug!(storage = %record.storage_name, "encrypted object removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(storage = %record.storage_name, "encrypted object already gone")
            }
            Err(e) => return Err(e.into()),
        }

        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM archived_files WHERE id = ?")
            .bind(record.id)
            .execute(&self.store.pool)
            .await?;
        Ok(())
    }

    /// All metadata rows, newest first.  Metadata is plaintext; no key
    /// involved.
    pub async fn all_metadata(&self) -> Result<Vec<ArchivedFileRow>, StoreError> {
        let rows = sqlx::query_as::<_, ArchivedFileRow>(
            "SELECT * FROM archived_files ORDER BY archived_at DESC",
        )
        .fetch_all(&self.store.pool)
        .await?;
        Ok(rows)
    }

    /// Delete every previously materialized temporary.  Safe to call at
    /// any time, including when none exist.
    pub fn purge_temporaries(&self) {
        let entries = match std::fs::read_dir(&self.temp_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => debug!(path = %entry.path().display(), "temporary removed"),
                Err(e) => warn!(path = %entry.path().display(), "cannot remove temporary: {e}"),
            }
        }
    }

    /// Replace all metadata rows (backup import path). Objects are copied
    /// separately by the backup service.
    pub(crate) async fn replace_all_metadata(
        &self,
        rows: &[ArchivedFileRow],
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM archived_files")
            .execute(&self.store.pool)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO archived_files (id, original_name, storage_name, mime_type, archived_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(row.id)
            .bind(&row.original_name)
            .bind(&row.storage_name)
            .bind(&row.mime_type)
            .bind(row.archived_at)
            .execute(&self.store.pool)
            .await?;
        }
        Ok(())
    }
}

fn temp_name(record: &ArchivedFileRow) -> String {
    match file_extension(&record.original_name) {
        Some(ext) => format!("{}_decrypted.{ext}", record.storage_name),
        None => format!("{}_decrypted", record.storage_name),
    }
}

fn file_extension(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

fn join_error(e: tokio::task::JoinError) -> StoreError {
    StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::Prefs;
    use std::io::Cursor;
    use tempfile::tempdir;

    async fn vault_in(dir: &std::path::Path) -> FileVault {
        let prefs = Arc::new(Prefs::load(dir.join("prefs.json")).unwrap());
        let keys = Arc::new(KeyManager::new(prefs));
        let store = Store::open_in_memory().await.unwrap();
        FileVault::new(
            store,
            keys,
            dir.join("encrypted_files"),
            dir.join("temp_decrypted_files"),
        )
    }

    #[tokio::test]
    async fn archive_then_materialize_roundtrip() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path()).await;
        let payload: Vec<u8> = (0..200_000).map(|i| (i % 256) as u8).collect();

        let record = vault
            .archive(Cursor::new(payload.clone()), "photo.jpg", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(record.original_name, "photo.jpg");

        // On-disk object is ciphertext, not the payload.
        let on_disk = std::fs::read(dir.path().join("encrypted_files").join(&record.storage_name))
            .unwrap();
        assert_ne!(on_disk, payload);

        let temp = vault.materialize(&record).await.unwrap();
        assert!(temp.file_name().unwrap().to_str().unwrap().ends_with("_decrypted.jpg"));
        assert_eq!(std::fs::read(&temp).unwrap(), payload);
    }

    #[tokio::test]
    async fn corrupted_object_fails_and_leaves_no_temporary() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path()).await;

        let record = vault
            .archive(Cursor::new(vec![5u8; 10_000]), "doc.pdf", "application/pdf")
            .await
            .unwrap();

        let object = dir.path().join("encrypted_files").join(&record.storage_name);
        let mut bytes = std::fs::read(&object).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&object, bytes).unwrap();

        assert!(vault.materialize(&record).await.is_err());

        let temp_dir = dir.path().join("temp_decrypted_files");
        let leftovers: Vec<_> = std::fs::read_dir(&temp_dir)
            .map(|rd| rd.flatten().collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn failed_archive_leaves_no_orphan_object() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path()).await;

        struct FailingReader(usize);
        impl Read for FailingReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0 == 0 {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "source died"));
                }
                let n = buf.len().min(self.0);
                self.0 -= n;
                buf[..n].fill(0xAB);
                Ok(n)
            }
        }

        // Fails mid-way through the second chunk.
        let result = vault
            .archive(FailingReader(100_000), "broken.bin", "application/octet-stream")
            .await;
        assert!(result.is_err());

        let objects: Vec<_> = std::fs::read_dir(dir.path().join("encrypted_files"))
            .map(|rd| rd.flatten().collect())
            .unwrap_or_default();
        assert!(objects.is_empty(), "partial encrypted object was left behind");
        assert!(vault.all_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_temporaries_is_safe_and_thorough() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path()).await;

        // Nothing materialized yet, directory absent: still fine.
        vault.purge_temporaries();

        let record = vault
            .archive(Cursor::new(b"secret".to_vec()), "a.txt", "text/plain")
            .await
            .unwrap();
        let temp = vault.materialize(&record).await.unwrap();
        assert!(temp.exists());

        vault.purge_temporaries();
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn delete_removes_object_and_row() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path()).await;

        let record = vault
            .archive(Cursor::new(b"bye".to_vec()), "b.txt", "text/plain")
            .await
            .unwrap();
        let object = dir.path().join("encrypted_files").join(&record.storage_name);
        assert!(object.exists());

        vault.delete(&record).await.unwrap();
        assert!(!object.exists());
        assert!(vault.all_metadata().await.unwrap().is_empty());

        // Second delete: object and row both gone, still no error.
        vault.delete(&record).await.unwrap();
    }
}

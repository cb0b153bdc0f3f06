//! Password-encrypted backup export and import.
//!
//! Archive layout (tar, named entries):
//!   salt.enc            — raw 16-byte KDF salt (plaintext; needed to
//!                         re-derive the key on import)
//!   notes.enc           — AEAD blob of the JSON note snapshot
//!   files_metadata.enc  — AEAD blob of the JSON file-metadata snapshot
//!   archived_files/<uuid> — verbatim copies of the already-encrypted
//!                         file objects (each itself nonce-prefixed)
//!
//! The backup key is derived from the user's backup password with its own
//! KDF parameters, independent of the app unlock key.  Note content enters
//! the manifest plaintext — it is read through the decrypted view — and is
//! re-encrypted wholesale under the backup key.
//!
//! The archive is assembled in a scoped temp workspace and only copied to
//! the caller's sink once complete, so a failed export can never leave a
//! sink that looks like a valid archive.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use nv_crypto::{aead, kdf};

use crate::error::StoreError;
use crate::files::FileVault;
use crate::models::{ArchivedFileRow, Note};
use crate::notes::NoteStore;

const ENTRY_SALT: &str = "salt.enc";
const ENTRY_NOTES: &str = "notes.enc";
const ENTRY_FILES_METADATA: &str = "files_metadata.enc";
const ENTRY_OBJECTS_DIR: &str = "archived_files";

pub struct BackupService {
    notes: Arc<NoteStore>,
    files: Arc<FileVault>,
    write_lock: tokio::sync::Mutex<()>,
}

impl BackupService {
    pub fn new(notes: Arc<NoteStore>, files: Arc<FileVault>) -> Self {
        Self {
            notes,
            files,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Export the whole vault into `sink`, encrypted under `password`.
    pub async fn export<W>(&self, password: &str, sink: W) -> Result<(), StoreError>
    where
        W: Write + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;

        let notes = self.notes.all().await?;
        let files = self.files.all_metadata().await?;
        let objects_dir = self.files.objects_dir().to_path_buf();
        let password = password.to_owned();

        tokio::task::spawn_blocking(move || {
            export_blocking(&password, &notes, &files, &objects_dir, sink)
        })
        .await
        .map_err(join_error)??;

        info!("backup export complete");
        Ok(())
    }

    /// Import an archive produced by [`export`], replacing local state.
    ///
    /// The whole archive is read and authenticated before anything local is
    /// touched: a wrong password fails with `BackupAuthentication` and
    /// leaves the vault exactly as it was.
    pub async fn import<R>(&self, password: &str, source: R) -> Result<(), StoreError>
    where
        R: Read + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;

        let password = password.to_owned();
        let parsed =
            tokio::task::spawn_blocking(move || parse_archive(&password, source))
                .await
                .map_err(join_error)??;

        // Everything decrypted and parsed; now it is safe to mutate.
        self.notes.replace_all(&parsed.notes).await?;
        self.files.replace_all_metadata(&parsed.files).await?;

        let objects_dir = self.files.objects_dir().to_path_buf();
        tokio::task::spawn_blocking(move || install_objects(parsed.objects, &objects_dir))
            .await
            .map_err(join_error)??;

        info!(
            notes = parsed.notes.len(),
            files = parsed.files.len(),
            "backup import complete"
        );
        Ok(())
    }
}

fn export_blocking<W: Write>(
    password: &str,
    notes: &[Note],
    files: &[ArchivedFileRow],
    objects_dir: &Path,
    mut sink: W,
) -> Result<(), StoreError> {
    let salt = kdf::generate_salt();
    let key = kdf::backup_key_from_password(password, &salt)?;

    // Scoped workspace: dropped (and deleted) on every exit path.
    let workspace = tempfile::tempdir()?;
    let archive_path = workspace.path().join("backup.tar");
    {
        let file = File::create(&archive_path)?;
        let mut builder = tar::Builder::new(BufWriter::new(file));

        append_bytes(&mut builder, ENTRY_SALT, &salt)?;

        let notes_blob = aead::seal(&key, &serde_json::to_vec(notes)?)?;
        append_bytes(&mut builder, ENTRY_NOTES, &notes_blob)?;

        let files_blob = aead::seal(&key, &serde_json::to_vec(files)?)?;
        append_bytes(&mut builder, ENTRY_FILES_METADATA, &files_blob)?;

        // The file objects are already ciphertext; copy them verbatim.
        if objects_dir.is_dir() {
            for entry in std::fs::read_dir(objects_dir)? {
                let entry = entry?;
                if entry.path().is_file() {
                    let name = format!(
                        "{ENTRY_OBJECTS_DIR}/{}",
                        entry.file_name().to_string_lossy()
                    );
                    builder.append_path_with_name(entry.path(), name)?;
                }
            }
        }

        let mut inner = builder.into_inner()?;
        inner.flush()?;
    }

    // Archive fully assembled; only now touch the caller's sink.
    let mut archive = File::open(&archive_path)?;
    std::io::copy(&mut archive, &mut sink)?;
    sink.flush()?;
    Ok(())
}

struct ParsedBackup {
    notes: Vec<Note>,
    files: Vec<ArchivedFileRow>,
    /// Extracted encrypted objects, still in their temp workspace.
    objects: tempfile::TempDir,
}

fn parse_archive<R: Read>(password: &str, source: R) -> Result<ParsedBackup, StoreError> {
    let mut archive = tar::Archive::new(source);
    let workspace = tempfile::tempdir()?;

    let mut salt: Option<[u8; kdf::SALT_LEN]> = None;
    let mut notes_blob: Option<Vec<u8>> = None;
    let mut files_blob: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();

        match name.as_str() {
            ENTRY_SALT => {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                salt = Some(
                    buf.as_slice()
                        .try_into()
                        .map_err(|_| StoreError::BackupAuthentication)?,
                );
            }
            ENTRY_NOTES => {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                notes_blob = Some(buf);
            }
            ENTRY_FILES_METADATA => {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                files_blob = Some(buf);
            }
            other => {
                if let Some(object) = other.strip_prefix("archived_files/") {
                    // Only the final component counts — an archive cannot
                    // write outside the workspace.
                    let file_name = Path::new(object)
                        .file_name()
                        .ok_or(StoreError::BackupAuthentication)?;
                    let dest = workspace.path().join(file_name);
                    let mut out = File::create(&dest)?;
                    std::io::copy(&mut entry, &mut out)?;
                } else {
                    warn!(entry = other, "ignoring unknown backup entry");
                }
            }
        }
    }

    let salt = salt.ok_or(StoreError::BackupAuthentication)?;
    let notes_blob = notes_blob.ok_or(StoreError::BackupAuthentication)?;
    let files_blob = files_blob.ok_or(StoreError::BackupAuthentication)?;

    let key = kdf::backup_key_from_password(password, &salt)
        .map_err(|_| StoreError::BackupAuthentication)?;

    // Wrong password and corrupted manifest are indistinguishable by design.
    let notes_json =
        aead::open(&key, &notes_blob).map_err(|_| StoreError::BackupAuthentication)?;
    let files_json =
        aead::open(&key, &files_blob).map_err(|_| StoreError::BackupAuthentication)?;

    let notes: Vec<Note> = serde_json::from_slice(&notes_json)?;
    let files: Vec<ArchivedFileRow> = serde_json::from_slice(&files_json)?;

    Ok(ParsedBackup {
        notes,
        files,
        objects: workspace,
    })
}

/// Swap the extracted objects into place, clearing whatever was there.
fn install_objects(extracted: tempfile::TempDir, objects_dir: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(objects_dir)?;
    for entry in std::fs::read_dir(objects_dir)? {
        let entry = entry?;
        if entry.path().is_file() {
            std::fs::remove_file(entry.path())?;
        }
    }
    for entry in std::fs::read_dir(extracted.path())? {
        let entry = entry?;
        if entry.path().is_file() {
            let dest = objects_dir.join(entry.file_name());
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn append_bytes<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<(), StoreError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o600);
    header.set_cksum();
    builder.append_data(&mut header, name, bytes)?;
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> StoreError {
    StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

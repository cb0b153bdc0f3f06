//! Vault facade: wires the engine together.
//!
//! Owns the single database handle and passes it to each store at
//! construction.  Note saves feed the expiry scheduler, the lock timer
//! feeds the session guard, and opening the vault runs the opportunistic
//! housekeeping (expired-note sweep, temporary purge, timer re-arm).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::backup::BackupService;
use crate::db::Store;
use crate::error::StoreError;
use crate::expiry::{ExpiryScheduler, TokioExpiryTimer};
use crate::files::FileVault;
use crate::keys::KeyManager;
use crate::models::{Note, NoteDraft};
use crate::notes::NoteStore;
use crate::pin::PinGate;
use crate::prefs::Prefs;
use crate::session::{SessionGuard, TokioLockTimer};
use crate::settings::Settings;

pub struct VaultConfig {
    /// Durable storage: database, preference file, encrypted objects.
    pub data_dir: PathBuf,
    /// Transient storage: decrypted temporaries.
    pub cache_dir: PathBuf,
}

pub struct Vault {
    pub prefs: Arc<Prefs>,
    pub keys: Arc<KeyManager>,
    pub notes: Arc<NoteStore>,
    pub files: Arc<FileVault>,
    pub backup: BackupService,
    pub pin: PinGate,
    pub settings: Settings,
    pub session: Arc<SessionGuard>,
    expiry: ExpiryScheduler,
}

impl Vault {
    pub async fn open(config: VaultConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.cache_dir)?;

        let prefs = Arc::new(Prefs::load(config.data_dir.join("prefs.json"))?);
        let keys = Arc::new(KeyManager::new(prefs.clone()));
        let store = Store::open(&config.data_dir.join("notevault.db")).await?;

        let notes = Arc::new(NoteStore::new(store.clone(), keys.clone()));
        let files = Arc::new(FileVault::new(
            store,
            keys.clone(),
            config.data_dir.join("encrypted_files"),
            config.cache_dir.join("temp_decrypted_files"),
        ));
        let backup = BackupService::new(notes.clone(), files.clone());
        let pin = PinGate::new(prefs.clone(), keys.clone());
        let settings = Settings::new(prefs.clone());

        let lock_timer = TokioLockTimer::new();
        let session = Arc::new(SessionGuard::new(
            prefs.clone(),
            lock_timer.clone(),
            pin.is_set(),
        ));
        {
            let session = Arc::downgrade(&session);
            let keys = keys.clone();
            lock_timer.set_on_fire(move || {
                if let Some(session) = session.upgrade() {
                    session.timer_fired();
                }
                keys.forget_cached();
            });
        }

        let expiry_timer = TokioExpiryTimer::new({
            let notes = notes.clone();
            move |note_id| {
                let notes = notes.clone();
                tokio::spawn(async move {
                    if let Err(e) = notes.delete(note_id).await {
                        warn!(note_id, "self-destruct delete failed: {e}");
                    }
                });
            }
        });
        let expiry = ExpiryScheduler::new(expiry_timer);

        let vault = Self {
            prefs,
            keys,
            notes,
            files,
            backup,
            pin,
            settings,
            session,
            expiry,
        };

        // Opportunistic housekeeping: purge what expired while we were
        // gone, drop stale decrypted copies, re-arm the surviving timers.
        let now = crate::now_ms();
        vault.notes.cleanup_expired(now).await?;
        vault.files.purge_temporaries();
        let pending = vault.notes.pending_expiries().await?;
        vault.expiry.rearm_all(pending);

        Ok(vault)
    }

    // ── Notes, with expiry wiring ───────────────────────────────────────

    pub async fn save_note(&self, draft: &NoteDraft) -> Result<i64, StoreError> {
        let id = self.notes.insert(draft).await?;
        self.expiry.note_saved(id, draft.self_destruct_at);
        Ok(id)
    }

    pub async fn update_note(&self, note: &Note) -> Result<(), StoreError> {
        self.notes.update(note).await?;
        self.expiry.note_saved(note.id, note.self_destruct_at);
        Ok(())
    }

    pub async fn delete_note(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = self.notes.delete(id).await?;
        self.expiry.note_deleted(id);
        Ok(deleted)
    }

    // ── Session ─────────────────────────────────────────────────────────

    /// PIN path of the unlock gate.
    pub fn unlock_with_pin(&self, pin: &str) -> Result<bool, StoreError> {
        if self.pin.verify(pin)? {
            self.session.user_activity(crate::now_ms());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Biometric path: the platform prompt is an external collaborator
    /// that already verified the user; we only record the outcome.
    pub fn unlock_verified(&self) {
        self.session.user_activity(crate::now_ms());
    }

    pub fn lock(&self) {
        self.session.lock();
        self.keys.forget_cached();
    }

    // ── Wipe ────────────────────────────────────────────────────────────

    /// Full data wipe: rows, encrypted objects, temporaries, preferences —
    /// seeds included, so nothing sealed under the old keys survives.
    pub async fn wipe(&self) -> Result<(), StoreError> {
        for record in self.files.all_metadata().await? {
            self.files.delete(&record).await?;
        }
        self.notes.delete_all().await?;
        self.files.purge_temporaries();
        self.prefs.wipe()?;
        self.keys.forget_cached();
        self.session.lock();
        Ok(())
    }
}

//! Session guard: inactivity lock state machine.
//!
//! A plain state machine decoupled from any UI framework.  The UI layer is
//! an external caller reporting two lifecycle events (`foreground`,
//! `background`) plus user activity; a single-shot lock timer fires the
//! third input.  The guard gates access to the vault but knows nothing
//! about encryption.
//!
//! The in-memory timer and the persisted `last_active_timestamp` must
//! agree: if the process dies while backgrounded, `is_expired` recomputes
//! the verdict purely from the persisted timestamp and the wall clock.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::prefs::{Prefs, KEY_LAST_ACTIVE};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Locked,
    Unlocked { last_active_ms: i64 },
}

/// Single-shot lock timer capability.  Re-arming cancels and replaces,
/// never stacks.
pub trait LockTimer: Send + Sync {
    fn arm(&self, timeout_ms: i64);
    fn cancel(&self);
}

struct Inner {
    state: SessionState,
    foreground_refs: u32,
}

pub struct SessionGuard {
    prefs: Arc<Prefs>,
    settings: Settings,
    timer: Arc<dyn LockTimer>,
    inner: Mutex<Inner>,
    expired_handler: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl SessionGuard {
    /// Cold-start state is `Locked` whenever a credential exists; before
    /// any credential is set there is nothing to gate, so the session
    /// starts unlocked.
    pub fn new(prefs: Arc<Prefs>, timer: Arc<dyn LockTimer>, credential_set: bool) -> Self {
        let state = if credential_set {
            SessionState::Locked
        } else {
            SessionState::Unlocked {
                last_active_ms: crate::now_ms(),
            }
        };
        Self {
            settings: Settings::new(prefs.clone()),
            prefs,
            timer,
            inner: Mutex::new(Inner {
                state,
                foreground_refs: 0,
            }),
            expired_handler: Mutex::new(None),
        }
    }

    /// Handler invoked when the lock timer fires (UI forces re-auth).
    pub fn set_expired_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.expired_handler.lock() = Some(Box::new(handler));
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state(), SessionState::Locked)
    }

    /// App became visible.  An unlocked session that sat in the background
    /// past the timeout locks here; otherwise the pending lock timer is
    /// simply disarmed.
    pub fn foreground(&self, now_ms: i64) -> SessionState {
        let mut inner = self.inner.lock();
        inner.foreground_refs += 1;
        if inner.foreground_refs == 1 {
            self.timer.cancel();
        }

        if let SessionState::Unlocked { last_active_ms } = inner.state {
            if now_ms - last_active_ms > self.settings.inactivity_timeout_ms() {
                info!("inactivity timeout elapsed while backgrounded, locking");
                inner.state = SessionState::Locked;
            }
            self.clear_last_active();
        }
        inner.state
    }

    /// App went to the background.  Persists the last-active timestamp and
    /// arms the lock timer so expiry is detected both by the timer (process
    /// alive) and by the timestamp (process restarted).
    pub fn background(&self, now_ms: i64) -> SessionState {
        let mut inner = self.inner.lock();
        inner.foreground_refs = inner.foreground_refs.saturating_sub(1);

        if inner.foreground_refs == 0 {
            if let SessionState::Unlocked { .. } = inner.state {
                inner.state = SessionState::Unlocked {
                    last_active_ms: now_ms,
                };
                if let Err(e) = self.prefs.set_i64(KEY_LAST_ACTIVE, now_ms) {
                    warn!("cannot persist last-active timestamp: {e}");
                }
                self.timer.arm(self.settings.inactivity_timeout_ms());
                debug!("backgrounded, lock timer armed");
            }
        }
        inner.state
    }

    /// User interaction or a successful re-authentication: unlock and
    /// reset the inactivity clock.
    pub fn user_activity(&self, now_ms: i64) -> SessionState {
        let mut inner = self.inner.lock();
        inner.state = SessionState::Unlocked {
            last_active_ms: now_ms,
        };
        self.timer.cancel();
        self.clear_last_active();
        inner.state
    }

    /// The armed timer elapsed while backgrounded.
    pub fn timer_fired(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Locked;
        }
        info!("session expired, locked");
        if let Some(handler) = self.expired_handler.lock().as_ref() {
            handler();
        }
    }

    /// Explicit logout.
    pub fn lock(&self) {
        let mut inner = self.inner.lock();
        inner.state = SessionState::Locked;
        self.timer.cancel();
        self.clear_last_active();
    }

    /// Computable purely from the persisted timestamp and the wall clock —
    /// the in-memory timer need not have survived a process restart.
    /// No persisted timestamp means the session never backgrounded
    /// unlocked, so nothing expired.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.prefs.get_i64(KEY_LAST_ACTIVE) {
            Some(last_active) if last_active > 0 => {
                now_ms - last_active > self.settings.inactivity_timeout_ms()
            }
            _ => false,
        }
    }

    fn clear_last_active(&self) {
        if let Err(e) = self.prefs.remove(KEY_LAST_ACTIVE) {
            warn!("cannot clear last-active timestamp: {e}");
        }
    }
}

/// Real single-shot timer over tokio.  Must be constructed inside a
/// runtime; `arm` replaces any pending timer.
pub struct TokioLockTimer {
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    on_fire: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl TokioLockTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handle: Mutex::new(None),
            on_fire: Mutex::new(None),
        })
    }

    pub fn set_on_fire(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.on_fire.lock() = Some(Arc::new(f));
    }
}

impl LockTimer for TokioLockTimer {
    fn arm(&self, timeout_ms: i64) {
        self.cancel();
        let on_fire = self.on_fire.lock().clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(timeout_ms.max(0) as u64)).await;
            if let Some(f) = on_fire {
                f();
            }
        });
        *self.handle.lock() = Some(handle);
    }

    fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

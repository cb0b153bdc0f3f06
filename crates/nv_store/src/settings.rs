//! Typed settings over the preference store.

use std::sync::Arc;

use crate::error::StoreError;
use crate::prefs::{Prefs, KEY_INACTIVITY_TIMEOUT, KEY_NIGHT_MODE};

pub const DEFAULT_INACTIVITY_TIMEOUT_MINUTES: i64 = 3;

/// Persisted as 0/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NightMode {
    #[default]
    FollowSystem,
    Light,
    Dark,
}

impl NightMode {
    fn from_pref(value: i64) -> Self {
        match value {
            1 => NightMode::Light,
            2 => NightMode::Dark,
            _ => NightMode::FollowSystem,
        }
    }

    fn to_pref(self) -> i64 {
        match self {
            NightMode::FollowSystem => 0,
            NightMode::Light => 1,
            NightMode::Dark => 2,
        }
    }
}

pub struct Settings {
    prefs: Arc<Prefs>,
}

impl Settings {
    pub fn new(prefs: Arc<Prefs>) -> Self {
        Self { prefs }
    }

    /// Inactivity timeout in millis; stored value is floored to 1 ms so a
    /// zero setting means "lock immediately", never "lock never".
    pub fn inactivity_timeout_ms(&self) -> i64 {
        self.prefs
            .get_i64(KEY_INACTIVITY_TIMEOUT)
            .unwrap_or(DEFAULT_INACTIVITY_TIMEOUT_MINUTES * 60 * 1000)
            .max(1)
    }

    pub fn set_inactivity_timeout_minutes(&self, minutes: i64) -> Result<(), StoreError> {
        let millis = (minutes * 60 * 1000).max(1);
        self.prefs.set_i64(KEY_INACTIVITY_TIMEOUT, millis)
    }

    pub fn inactivity_timeout_minutes(&self) -> i64 {
        let millis = self.inactivity_timeout_ms();
        if millis == 1 {
            return 0;
        }
        millis / (60 * 1000)
    }

    pub fn night_mode(&self) -> NightMode {
        self.prefs
            .get_i64(KEY_NIGHT_MODE)
            .map(NightMode::from_pref)
            .unwrap_or_default()
    }

    pub fn set_night_mode(&self, mode: NightMode) -> Result<(), StoreError> {
        self.prefs.set_i64(KEY_NIGHT_MODE, mode.to_pref())
    }
}

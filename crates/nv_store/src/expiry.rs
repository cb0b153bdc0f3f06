//! Scheduled note self-destruction.
//!
//! The deferred timer is an injected capability so the engine is testable
//! with a fake scheduler and portable across timer backends (an OS alarm
//! service in the app, tokio tasks here).  Timers are single-shot:
//! re-scheduling an id cancels and replaces, cancelling an unknown id is a
//! no-op, and a fire for an already-deleted note deletes nothing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Deferred-timer capability: deliver `note_id` back at-or-after `fire_at_ms`.
pub trait ExpiryTimer: Send + Sync {
    /// Replaces any prior schedule for the same id.
    fn schedule(&self, note_id: i64, fire_at_ms: i64);
    /// No-op when nothing is scheduled for the id.
    fn cancel(&self, note_id: i64);
}

/// Wires note saves and deletions to the timer capability.
pub struct ExpiryScheduler {
    timer: Arc<dyn ExpiryTimer>,
}

impl ExpiryScheduler {
    pub fn new(timer: Arc<dyn ExpiryTimer>) -> Self {
        Self { timer }
    }

    /// Called at note-save time: a positive self-destruct timestamp arms
    /// (or re-arms) the timer, zero clears any pending one.
    pub fn note_saved(&self, note_id: i64, self_destruct_at_ms: i64) {
        if self_destruct_at_ms > 0 {
            debug!(note_id, fire_at = self_destruct_at_ms, "self-destruct scheduled");
            self.timer.schedule(note_id, self_destruct_at_ms);
        } else {
            self.timer.cancel(note_id);
        }
    }

    pub fn note_deleted(&self, note_id: i64) {
        self.timer.cancel(note_id);
    }

    /// Re-arm every still-pending self-destruct after a restart (the
    /// opportunistic sweep has already purged the overdue ones).
    pub fn rearm_all<I>(&self, pending: I)
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        for (note_id, fire_at_ms) in pending {
            self.note_saved(note_id, fire_at_ms);
        }
    }
}

/// Tokio-backed timer: one sleeping task per pending id.  Must be used
/// inside a runtime.  Delivery is best-effort "at or after" — a delayed
/// fire still finds the purge path idempotent.
pub struct TokioExpiryTimer {
    tasks: Mutex<HashMap<i64, tokio::task::JoinHandle<()>>>,
    on_fire: Arc<dyn Fn(i64) + Send + Sync>,
}

impl TokioExpiryTimer {
    pub fn new(on_fire: impl Fn(i64) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            on_fire: Arc::new(on_fire),
        })
    }
}

impl ExpiryTimer for TokioExpiryTimer {
    fn schedule(&self, note_id: i64, fire_at_ms: i64) {
        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.remove(&note_id) {
            previous.abort();
        }

        let delay_ms = (fire_at_ms - crate::now_ms()).max(0) as u64;
        if delay_ms == 0 {
            warn!(note_id, "self-destruct time already past, firing immediately");
        }
        let on_fire = self.on_fire.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            on_fire(note_id);
        });
        tasks.insert(note_id, handle);
    }

    fn cancel(&self, note_id: i64) {
        if let Some(handle) = self.tasks.lock().remove(&note_id) {
            handle.abort();
            debug!(note_id, "self-destruct cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeTimer {
        scheduled: Mutex<HashMap<i64, i64>>,
        cancelled: Mutex<Vec<i64>>,
    }

    impl ExpiryTimer for FakeTimer {
        fn schedule(&self, note_id: i64, fire_at_ms: i64) {
            self.scheduled.lock().insert(note_id, fire_at_ms);
        }
        fn cancel(&self, note_id: i64) {
            self.scheduled.lock().remove(&note_id);
            self.cancelled.lock().push(note_id);
        }
    }

    #[test]
    fn save_with_expiry_schedules_and_reschedule_replaces() {
        let timer = Arc::new(FakeTimer::default());
        let scheduler = ExpiryScheduler::new(timer.clone());

        scheduler.note_saved(7, 10_000);
        scheduler.note_saved(7, 20_000);

        let scheduled = timer.scheduled.lock();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[&7], 20_000);
    }

    #[test]
    fn save_without_expiry_cancels() {
        let timer = Arc::new(FakeTimer::default());
        let scheduler = ExpiryScheduler::new(timer.clone());

        scheduler.note_saved(3, 10_000);
        scheduler.note_saved(3, 0);

        assert!(timer.scheduled.lock().is_empty());
        assert_eq!(timer.cancelled.lock().as_slice(), &[3]);
    }

    #[test]
    fn cancel_of_unknown_id_is_noop() {
        let timer = Arc::new(FakeTimer::default());
        let scheduler = ExpiryScheduler::new(timer.clone());
        scheduler.note_deleted(42);
        assert_eq!(timer.cancelled.lock().as_slice(), &[42]);
    }

    #[test]
    fn rearm_all_schedules_every_pending_entry() {
        let timer = Arc::new(FakeTimer::default());
        let scheduler = ExpiryScheduler::new(timer.clone());

        scheduler.rearm_all(vec![(1, 5_000), (2, 6_000), (3, 0)]);

        let scheduled = timer.scheduled.lock();
        assert_eq!(scheduled.len(), 2);
        assert_eq!(scheduled[&1], 5_000);
        assert_eq!(scheduled[&2], 6_000);
    }

    #[tokio::test]
    async fn tokio_timer_fires_once_and_cancel_stops_it() {
        let fired: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = fired.clone();
        let timer = TokioExpiryTimer::new(move |id| sink.lock().push(id));

        timer.schedule(1, crate::now_ms() + 20);
        timer.schedule(2, crate::now_ms() + 500);
        timer.cancel(2);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(fired.lock().as_slice(), &[1]);
    }
}

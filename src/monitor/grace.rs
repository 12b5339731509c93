use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::events::SessionKey;

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

type TimerTable = Arc<Mutex<HashMap<SessionKey, PendingTimer>>>;

/// Delayed, cancellable "offline" determination per session key.
///
/// At most one timer is pending per key. A timer only runs its callback after
/// removing its own entry under the table lock, so once `disarm` returns the
/// disarmed timer can no longer fire. Dropping the table cancels everything.
pub struct GraceTimers {
    period: Duration,
    timers: TimerTable,
    next_generation: AtomicU64,
}

impl GraceTimers {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Starts the grace timer for `key`, cancelling any timer already pending for it
    pub fn arm<F, Fut>(&self, key: SessionKey, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let period = self.period;
        let task_key = key.clone();

        let mut table = lock(&self.timers);

        let handle = tokio::spawn(async move {
            sleep(period).await;

            let fired = {
                let mut table = lock(&timers);
                match table.get(&task_key) {
                    Some(pending) if pending.generation == generation => {
                        table.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };

            if fired {
                tracing::debug!(session = %task_key, "Grace period expired");
                on_expire().await;
            }
        });

        if let Some(previous) = table.insert(key.clone(), PendingTimer { generation, handle }) {
            previous.handle.abort();
            tracing::debug!(session = %key, "Re-armed grace timer");
        } else {
            tracing::debug!(
                session = %key,
                grace_secs = period.as_secs(),
                "Armed grace timer"
            );
        }
    }

    /// Cancels the pending timer for `key`; returns false when none was pending
    pub fn disarm(&self, key: &SessionKey) -> bool {
        let removed = lock(&self.timers).remove(key);
        match removed {
            Some(pending) => {
                pending.handle.abort();
                tracing::debug!(session = %key, "Disarmed grace timer");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &SessionKey) -> bool {
        lock(&self.timers).contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Cancels every timer belonging to `exam_id`
    pub fn disarm_exam(&self, exam_id: &str) -> usize {
        let mut table = lock(&self.timers);
        let keys: Vec<SessionKey> = table
            .keys()
            .filter(|key| key.exam_id == exam_id)
            .cloned()
            .collect();

        for key in &keys {
            if let Some(pending) = table.remove(key) {
                pending.handle.abort();
            }
        }

        keys.len()
    }

    pub fn cancel_all(&self) -> usize {
        let mut table = lock(&self.timers);
        let count = table.len();
        for (_, pending) in table.drain() {
            pending.handle.abort();
        }
        count
    }
}

impl Drop for GraceTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn lock(timers: &Mutex<HashMap<SessionKey, PendingTimer>>) -> MutexGuard<'_, HashMap<SessionKey, PendingTimer>> {
    // A panicking callback never holds the lock, so the table stays consistent
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::domain::{EntityKey, EntityRef};
use tokio::{runtime::Handle, time::Instant};
use tracing::{debug, warn};

use crate::reconciler::{Reconcile, ReconcileOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleMode {
    /// Direct user actions: run at once, no coalescing.
    Immediate,
    /// Bulk and indirect triggers: trailing-edge debounce per entity.
    #[default]
    Debounced,
}

struct PendingReconcile {
    entity: EntityRef,
    deadline: Instant,
}

enum Due {
    Gone,
    Wait(Instant),
    Ready(EntityRef),
}

type PendingMap = Arc<Mutex<HashMap<EntityKey, PendingReconcile>>>;

pub struct DebouncedScheduler {
    target: Arc<dyn Reconcile>,
    window: Duration,
    pending: PendingMap,
}

impl DebouncedScheduler {
    pub fn new(target: Arc<dyn Reconcile>, window: Duration) -> Self {
        Self {
            target,
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn schedule(&self, entity: &EntityRef, mode: ScheduleMode) {
        match mode {
            ScheduleMode::Immediate => {
                if let Err(err) = self.run_now(entity).await {
                    warn!(entity = %entity, error = %err, "reach: reconciliation failed");
                }
            }
            ScheduleMode::Debounced => {
                self.schedule_debounced(entity);
            }
        }
    }

    pub async fn run_now(&self, entity: &EntityRef) -> anyhow::Result<ReconcileOutcome> {
        self.target.reconcile(entity).await
    }

    /// Starts or pushes back the trailing timer for `entity`. Returns false
    /// when nothing could be scheduled.
    pub fn schedule_debounced(&self, entity: &EntityRef) -> bool {
        let entity = &self.target.canonical_ref(entity);
        let Some(key) = entity.key() else {
            debug!(entity = %entity, "reach: no stable key; not scheduling");
            return false;
        };
        let deadline = Instant::now() + self.window;

        {
            let mut pending = lock(&self.pending);
            if let Some(existing) = pending.get_mut(&key) {
                existing.deadline = deadline;
                existing.entity = *entity;
                return true;
            }
            pending.insert(
                key,
                PendingReconcile {
                    entity: *entity,
                    deadline,
                },
            );
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(entity = %key, "reach: no async runtime; dropping scheduled reconciliation");
            lock(&self.pending).remove(&key);
            return false;
        };

        let pending = self.pending.clone();
        let target = self.target.clone();
        runtime.spawn(async move {
            let entity = loop {
                match take_if_due(&pending, &key) {
                    Due::Gone => return,
                    Due::Wait(deadline) => tokio::time::sleep_until(deadline).await,
                    Due::Ready(entity) => break entity,
                }
            };

            if let Err(err) = target.reconcile(&entity).await {
                warn!(entity = %key, error = %err, "reach: debounced reconciliation failed");
            }
        });
        true
    }

    pub fn canonical_ref(&self, entity: &EntityRef) -> EntityRef {
        self.target.canonical_ref(entity)
    }

    /// Drops a pending timer, used when the entity itself is deleted.
    pub fn forget(&self, key: &EntityKey) {
        lock(&self.pending).remove(key);
    }

    pub fn is_pending(&self, key: &EntityKey) -> bool {
        lock(&self.pending).contains_key(key)
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

fn take_if_due(pending: &PendingMap, key: &EntityKey) -> Due {
    let mut pending = lock(pending);
    let Some(deadline) = pending.get(key).map(|entry| entry.deadline) else {
        return Due::Gone;
    };
    if deadline > Instant::now() {
        return Due::Wait(deadline);
    }
    pending
        .remove(key)
        .map_or(Due::Gone, |entry| Due::Ready(entry.entity))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;

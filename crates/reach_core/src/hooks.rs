use std::sync::Arc;

use host_integration::ChangeObserver;
use shared::{
    domain::{EntityKey, EntityRef},
    protocol::ChangeEvent,
};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::{
    catalog::StatusId,
    enforcer::EnforcementGuards,
    reconciler::EntityLocks,
    scheduler::{DebouncedScheduler, ScheduleMode},
};

/// Maps host change notifications onto scheduler requests.
pub struct HookRouter {
    scheduler: Arc<DebouncedScheduler>,
    guards: EnforcementGuards,
    locks: EntityLocks,
}

impl HookRouter {
    pub fn new(
        scheduler: Arc<DebouncedScheduler>,
        guards: EnforcementGuards,
        locks: EntityLocks,
    ) -> Self {
        Self {
            scheduler,
            guards,
            locks,
        }
    }

    pub fn mode_for(event: &ChangeEvent) -> Option<ScheduleMode> {
        match event {
            ChangeEvent::ItemCreated { .. }
            | ChangeEvent::ItemUpdated { .. }
            | ChangeEvent::ItemDeleted { .. }
            | ChangeEvent::EntityCreated { .. }
            | ChangeEvent::EntityUpdated { .. }
            | ChangeEvent::RefreshRequested { .. } => Some(ScheduleMode::Debounced),
            ChangeEvent::EffectCreated { status, .. } | ChangeEvent::EffectDeleted { status, .. } => {
                status
                    .as_deref()
                    .and_then(StatusId::parse)
                    .map(|_| ScheduleMode::Immediate)
            }
            ChangeEvent::EntityDeleted { .. } => None,
        }
    }

    fn prune(&self, entity: &EntityRef) {
        // The store may no longer resolve a deleted entity, so drop both forms.
        let mut keys: Vec<EntityKey> = [entity.key(), self.scheduler.canonical_ref(entity).key()]
            .into_iter()
            .flatten()
            .collect();
        keys.dedup();
        for key in keys {
            self.scheduler.forget(&key);
            self.locks.forget(&key);
            debug!(entity = %key, "reach: pruned deleted entity");
        }
    }

    fn spawn_immediate(&self, entity: EntityRef) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(entity = %entity, "reach: no async runtime; dropping immediate reconciliation");
            return;
        };
        let scheduler = self.scheduler.clone();
        runtime.spawn(async move {
            scheduler.schedule(&entity, ScheduleMode::Immediate).await;
        });
    }
}

impl ChangeObserver for HookRouter {
    fn on_change(&self, event: &ChangeEvent) {
        let entity = *event.entity();

        if matches!(event, ChangeEvent::EntityDeleted { .. }) {
            self.prune(&entity);
            return;
        }

        let Some(mode) = Self::mode_for(event) else {
            trace!(entity = %entity, "reach: event without catalog status ignored");
            return;
        };

        match mode {
            ScheduleMode::Debounced => {
                self.scheduler.schedule_debounced(&entity);
            }
            ScheduleMode::Immediate => {
                let entity = self.scheduler.canonical_ref(&entity);
                let Some(key) = entity.key() else {
                    return;
                };
                let own_write = marker_change(event).is_some_and(|(status, active)| {
                    self.guards.is_own_write(&key, status, active)
                });
                if own_write {
                    trace!(entity = %key, "reach: marker change from enforcement suppressed");
                    return;
                }
                self.spawn_immediate(entity);
            }
        }
    }
}

fn marker_change(event: &ChangeEvent) -> Option<(StatusId, bool)> {
    let (status, active) = match event {
        ChangeEvent::EffectCreated { status, .. } => (status, true),
        ChangeEvent::EffectDeleted { status, .. } => (status, false),
        _ => return None,
    };
    status
        .as_deref()
        .and_then(StatusId::parse)
        .map(|status| (status, active))
}

#[cfg(test)]
#[path = "tests/hooks_tests.rs"]
mod tests;

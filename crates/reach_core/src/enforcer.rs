use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::Result;
use host_integration::{DocumentStore, RefreshRequestor};
use shared::domain::{EntityKey, EntityRef};
use tracing::{debug, warn};

use crate::{catalog::StatusId, error::ReachError};

/// Entities currently inside an exclusivity pass, with the target each pass
/// is applying. Change hooks consult this so the enforcer's own marker writes
/// do not schedule another pass.
#[derive(Clone, Default)]
pub struct EnforcementGuards {
    active: Arc<Mutex<HashMap<EntityKey, Vec<Option<StatusId>>>>>,
}

impl EnforcementGuards {
    pub fn enter(&self, key: EntityKey, target: Option<StatusId>) -> EnforcingGuard {
        self.lock().entry(key).or_default().push(target);
        EnforcingGuard {
            guards: self.clone(),
            key,
            target,
        }
    }

    pub fn is_enforcing(&self, key: &EntityKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Whether a running pass on `key` would itself make this marker change:
    /// activating its target or deactivating anything else.
    pub fn is_own_write(&self, key: &EntityKey, status: StatusId, active: bool) -> bool {
        self.lock().get(key).is_some_and(|targets| {
            targets
                .iter()
                .any(|target| (*target == Some(status)) == active)
        })
    }

    fn release(&self, key: &EntityKey, target: Option<StatusId>) {
        let mut active = self.lock();
        if let Some(targets) = active.get_mut(key) {
            if let Some(index) = targets.iter().position(|entry| *entry == target) {
                targets.swap_remove(index);
            }
            if targets.is_empty() {
                active.remove(key);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityKey, Vec<Option<StatusId>>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Released on drop, including early returns and panics.
pub struct EnforcingGuard {
    guards: EnforcementGuards,
    key: EntityKey,
    target: Option<StatusId>,
}

impl Drop for EnforcingGuard {
    fn drop(&mut self) {
        self.guards.release(&self.key, self.target);
    }
}

pub struct ExclusivityEnforcer {
    store: Arc<dyn DocumentStore>,
    refresh: Arc<dyn RefreshRequestor>,
    guards: EnforcementGuards,
}

impl ExclusivityEnforcer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        refresh: Arc<dyn RefreshRequestor>,
        guards: EnforcementGuards,
    ) -> Self {
        Self {
            store,
            refresh,
            guards,
        }
    }

    /// Leaves exactly `target` (or nothing) active among the catalog statuses,
    /// then asks the presentation layer to redraw. Returns whether any marker
    /// changed.
    pub async fn apply_exclusive(&self, entity: &EntityRef, target: Option<StatusId>) -> Result<bool> {
        let key = entity.key().ok_or(ReachError::MissingKey(*entity))?;

        let changed = {
            let _guard = self.guards.enter(key, target);
            let mut changed = false;

            // Deactivate first so no observer sees two catalog markers at once.
            for status in StatusId::ALL.into_iter().filter(|status| Some(*status) != target) {
                changed |= self.set_marker(entity, status, false).await?;
            }
            if let Some(status) = target {
                changed |= self.set_marker(entity, status, true).await?;
            }
            changed
        };

        debug!(
            entity = %entity,
            target = target.map(StatusId::as_str).unwrap_or("-"),
            changed,
            "reach: exclusive state applied"
        );
        self.request_refresh(entity).await;
        Ok(changed)
    }

    async fn set_marker(&self, entity: &EntityRef, status: StatusId, active: bool) -> Result<bool> {
        let changed = self
            .store
            .set_status_active(entity, status.as_str(), active)
            .await
            .map_err(|source| ReachError::Marker {
                entity: *entity,
                status,
                active,
                source,
            })?;
        Ok(changed)
    }

    async fn request_refresh(&self, entity: &EntityRef) {
        if let Err(err) = self.refresh.request_refresh(entity).await {
            warn!(entity = %entity, error = %err, "reach: presentation refresh failed");
        }
    }
}

#[cfg(test)]
#[path = "tests/enforcer_tests.rs"]
mod tests;

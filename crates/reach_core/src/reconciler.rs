use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Result;
use async_trait::async_trait;
use host_integration::{DocumentStore, SessionInfo, SettingsStore};
use shared::domain::{ActorKind, EntityKey, EntityRef, EntitySnapshot};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::{
    authority::is_authoritative,
    calculator::compute_reach,
    catalog::StatusId,
    config::SHOW_REACH_ONE_KEY,
    enforcer::ExclusivityEnforcer,
    overrides::{OverrideRecord, OverrideStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingKey,
    EntityGone,
    NotAuthoritative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    /// `no_reach` was active and kept.
    Terminal,
    Override(StatusId),
    Automatic {
        reach: u8,
        status: Option<StatusId>,
    },
}

impl ReconcileOutcome {
    pub fn status(&self) -> Option<StatusId> {
        match self {
            ReconcileOutcome::Skipped(_) => None,
            ReconcileOutcome::Terminal => Some(StatusId::NoReach),
            ReconcileOutcome::Override(status) => Some(*status),
            ReconcileOutcome::Automatic { status, .. } => *status,
        }
    }
}

#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, entity: &EntityRef) -> Result<ReconcileOutcome>;

    /// Form of `entity` that registries key on. Two refs for one entity must
    /// map to the same value.
    fn canonical_ref(&self, entity: &EntityRef) -> EntityRef {
        *entity
    }
}

/// One async mutex per entity so passes for the same entity never overlap,
/// whether they came from the debounce timer or an immediate trigger.
#[derive(Clone, Default)]
pub struct EntityLocks {
    inner: Arc<Mutex<HashMap<EntityKey, Arc<AsyncMutex<()>>>>>,
}

impl EntityLocks {
    pub fn lock_for(&self, key: EntityKey) -> Arc<AsyncMutex<()>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }

    pub fn forget(&self, key: &EntityKey) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    session: Arc<dyn SessionInfo>,
    settings: Arc<dyn SettingsStore>,
    overrides: OverrideStore,
    enforcer: Arc<ExclusivityEnforcer>,
    locks: EntityLocks,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn SessionInfo>,
        settings: Arc<dyn SettingsStore>,
        enforcer: Arc<ExclusivityEnforcer>,
        locks: EntityLocks,
    ) -> Self {
        Self {
            overrides: OverrideStore::new(store.clone()),
            store,
            session,
            settings,
            enforcer,
            locks,
        }
    }

    pub async fn run(&self, entity: &EntityRef) -> Result<ReconcileOutcome> {
        let entity = &self.store.canonical_ref(entity);
        let Some(key) = entity.key() else {
            debug!(entity = %entity, "reach: no stable key; skipping");
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingKey));
        };

        let lock = self.locks.lock_for(key);
        let _held = lock.lock().await;
        self.run_locked(entity, key).await
    }

    async fn run_locked(&self, entity: &EntityRef, key: EntityKey) -> Result<ReconcileOutcome> {
        let Some(snapshot) = self.store.entity(entity).await? else {
            debug!(entity = %key, "reach: entity gone; skipping");
            return Ok(ReconcileOutcome::Skipped(SkipReason::EntityGone));
        };

        if !is_authoritative(&snapshot, &self.session.snapshot()) {
            debug!(entity = %key, "reach: not authoritative; skipping");
            return Ok(ReconcileOutcome::Skipped(SkipReason::NotAuthoritative));
        }

        let entity = &snapshot.entity;
        let manual = self.valid_override(&snapshot).await?;

        let terminal = StatusId::ALL
            .into_iter()
            .find(|status| status.is_terminal() && snapshot.has_status(status.as_str()));
        if let Some(status) = terminal {
            self.enforce(entity, key, Some(status)).await?;
            return Ok(ReconcileOutcome::Terminal);
        }

        if let Some(status) = manual {
            self.enforce(entity, key, Some(status)).await?;
            return Ok(ReconcileOutcome::Override(status));
        }

        let reach = compute_reach(&snapshot);
        let show_reach_one = self.settings.get_bool(SHOW_REACH_ONE_KEY, false);
        let status = StatusId::for_reach(reach, show_reach_one);
        self.enforce(entity, key, status).await?;
        Ok(ReconcileOutcome::Automatic { reach, status })
    }

    /// Returns the override to honour, clearing any record that no longer
    /// holds: a PC entity, a status outside the catalog, or a status that is
    /// not active anymore.
    async fn valid_override(&self, snapshot: &EntitySnapshot) -> Result<Option<StatusId>> {
        let entity = &snapshot.entity;
        let record: OverrideRecord = self.overrides.get(entity).await?;
        if !record.is_recorded() {
            return Ok(None);
        }

        let valid = match snapshot.kind {
            ActorKind::Npc if record.manually_set => record
                .catalog_status()
                .filter(|status| snapshot.has_status(status.as_str())),
            _ => None,
        };

        if valid.is_none() {
            debug!(
                entity = %entity,
                status = record.status_id.as_deref().unwrap_or("-"),
                "reach: stale override"
            );
            self.overrides.clear(entity).await?;
        }
        Ok(valid)
    }

    async fn enforce(
        &self,
        entity: &EntityRef,
        key: EntityKey,
        target: Option<StatusId>,
    ) -> Result<()> {
        if self.enforcer.apply_exclusive(entity, target).await? {
            info!(
                entity = %key,
                status = target.map(StatusId::as_str).unwrap_or("-"),
                "reach: status updated"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, entity: &EntityRef) -> Result<ReconcileOutcome> {
        self.run(entity).await
    }

    fn canonical_ref(&self, entity: &EntityRef) -> EntityRef {
        self.store.canonical_ref(entity)
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;

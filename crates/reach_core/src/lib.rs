use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use host_integration::{
    ChangeBus, DocumentStore, RefreshRequestor, SessionInfo, SettingsStore,
};
use shared::domain::{ActorKind, EntityRef};
use tracing::{error, info, warn};

pub mod authority;
pub mod calculator;
pub mod catalog;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod hooks;
pub mod overrides;
pub mod reconciler;
pub mod scheduler;

pub use catalog::{StatusId, MAX_REACH, MODULE_ID};
pub use config::{EngineConfig, SHOW_REACH_ONE_KEY};
pub use hooks::HookRouter;
pub use overrides::OverrideRecord;
pub use reconciler::{ReconcileOutcome, SkipReason};
pub use scheduler::ScheduleMode;

use authority::can_modify;
use enforcer::{EnforcementGuards, ExclusivityEnforcer};
use overrides::OverrideStore;
use reconciler::{EntityLocks, Reconciler};
use scheduler::DebouncedScheduler;

/// Everything the engine needs from its host.
#[derive(Clone)]
pub struct HostCollaborators {
    pub store: Arc<dyn DocumentStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub session: Arc<dyn SessionInfo>,
    pub refresh: Arc<dyn RefreshRequestor>,
}

impl HostCollaborators {
    /// Uses one value for every role, as in-process hosts usually do.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: DocumentStore + SettingsStore + SessionInfo + RefreshRequestor + 'static,
    {
        Self {
            store: host.clone(),
            settings: host.clone(),
            session: host.clone(),
            refresh: host,
        }
    }
}

pub struct ReachEngine {
    host: HostCollaborators,
    overrides: OverrideStore,
    enforcer: Arc<ExclusivityEnforcer>,
    reconciler: Arc<Reconciler>,
    scheduler: Arc<DebouncedScheduler>,
    router: Arc<HookRouter>,
    locks: EntityLocks,
}

impl ReachEngine {
    pub fn new(host: HostCollaborators, config: EngineConfig) -> Self {
        let guards = EnforcementGuards::default();
        let locks = EntityLocks::default();
        let enforcer = Arc::new(ExclusivityEnforcer::new(
            host.store.clone(),
            host.refresh.clone(),
            guards.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            host.store.clone(),
            host.session.clone(),
            host.settings.clone(),
            enforcer.clone(),
            locks.clone(),
        ));
        let scheduler = Arc::new(DebouncedScheduler::new(
            reconciler.clone(),
            config.debounce_window,
        ));
        let router = Arc::new(HookRouter::new(scheduler.clone(), guards, locks.clone()));

        Self {
            overrides: OverrideStore::new(host.store.clone()),
            host,
            enforcer,
            reconciler,
            scheduler,
            router,
            locks,
        }
    }

    /// Subscribes the engine's hook router to a change bus.
    pub fn attach(&self, bus: &dyn ChangeBus) {
        bus.subscribe(self.router.clone());
    }

    pub fn router(&self) -> Arc<HookRouter> {
        self.router.clone()
    }

    pub fn scheduler(&self) -> Arc<DebouncedScheduler> {
        self.scheduler.clone()
    }

    pub async fn reconcile_now(&self, entity: &EntityRef) -> Result<ReconcileOutcome> {
        self.reconciler.run(entity).await
    }

    pub async fn schedule(&self, entity: &EntityRef, mode: ScheduleMode) {
        self.scheduler.schedule(entity, mode).await;
    }

    /// Bulk rescan after the scene becomes ready. Returns how many entities
    /// were scheduled.
    pub async fn rescan_all(&self) -> Result<usize> {
        let entities = self
            .host
            .store
            .entities()
            .await
            .context("failed to list entities for rescan")?;
        let mut scheduled = 0;
        for entity in &entities {
            if self.scheduler.schedule_debounced(entity) {
                scheduled += 1;
            }
        }
        info!(scheduled, "reach: rescan scheduled");
        Ok(scheduled)
    }

    /// Reconciles every known entity right away, without debouncing.
    pub async fn reconcile_all(&self) -> Result<Vec<(EntityRef, ReconcileOutcome)>> {
        let entities = self
            .host
            .store
            .entities()
            .await
            .context("failed to list entities for reconciliation")?;
        let outcomes = join_all(entities.iter().map(|entity| self.reconciler.run(entity))).await;

        let mut results = Vec::with_capacity(entities.len());
        for (entity, outcome) in entities.into_iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => results.push((entity, outcome)),
                Err(err) => warn!(entity = %entity, error = %err, "reach: reconciliation failed"),
            }
        }
        Ok(results)
    }

    pub async fn override_for(&self, entity: &EntityRef) -> Result<OverrideRecord> {
        self.overrides.get(entity).await
    }

    /// HUD click on a catalog status. Never fails; errors are logged here.
    pub async fn handle_status_click(&self, entity: &EntityRef, status: StatusId) {
        if let Err(err) = self.try_status_click(entity, status).await {
            error!(entity = %entity, status = %status, error = %err, "reach: status click failed");
        }
    }

    async fn try_status_click(&self, entity: &EntityRef, status: StatusId) -> Result<()> {
        let entity = &self.host.store.canonical_ref(entity);
        let Some(key) = entity.key() else {
            return Ok(());
        };

        let entity = {
            let lock = self.locks.lock_for(key);
            let _held = lock.lock().await;

            let Some(snapshot) = self.host.store.entity(entity).await? else {
                return Ok(());
            };
            if !can_modify(&snapshot, &self.host.session.snapshot()) {
                warn!(entity = %key, status = %status, "reach: click ignored; user may not modify entity");
                return Ok(());
            }

            let entity = snapshot.entity;
            let is_npc = snapshot.kind == ActorKind::Npc;
            if snapshot.has_status(status.as_str()) {
                self.enforcer.apply_exclusive(&entity, None).await?;
                if is_npc {
                    self.overrides.clear(&entity).await?;
                }
            } else {
                // Activate before recording so the override is never seen as stale.
                self.enforcer.apply_exclusive(&entity, Some(status)).await?;
                if is_npc {
                    self.overrides.set(&entity, status).await?;
                }
            }
            entity
        };

        self.scheduler
            .run_now(&entity)
            .await
            .context("reconciliation after status click failed")?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

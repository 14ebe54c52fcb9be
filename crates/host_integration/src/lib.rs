use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{BackingDocument, EntityRef, EntitySnapshot, SessionSnapshot},
    protocol::ChangeEvent,
};
use tracing::debug;

/// Entity and document access provided by the host.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current state of an entity, or `None` if the host no longer knows it.
    async fn entity(&self, entity: &EntityRef) -> anyhow::Result<Option<EntitySnapshot>>;
    async fn entities(&self) -> anyhow::Result<Vec<EntityRef>>;
    /// Reads the flag scope stored on a backing document.
    async fn read_flags(&self, document: BackingDocument, scope: &str)
        -> anyhow::Result<Option<Value>>;
    /// Merges `patch` into the flag scope in one update.
    async fn write_flags(
        &self,
        document: BackingDocument,
        scope: &str,
        patch: Value,
    ) -> anyhow::Result<()>;
    /// Toggles one status marker. Returns whether anything changed.
    async fn set_status_active(
        &self,
        entity: &EntityRef,
        status: &str,
        active: bool,
    ) -> anyhow::Result<bool>;

    /// The host's own form of `entity`, carrying its durable id when the host
    /// knows one. Refs naming the same entity must come back equal here.
    fn canonical_ref(&self, entity: &EntityRef) -> EntityRef {
        *entity
    }
}

/// Key/value world settings.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
    fn has(&self, key: &str) -> bool;

    fn get_bool(&self, key: &str, fallback: bool) -> bool {
        if !self.has(key) {
            return fallback;
        }
        self.get(key).and_then(|value| value.as_bool()).unwrap_or(fallback)
    }
}

pub trait SessionInfo: Send + Sync {
    fn snapshot(&self) -> SessionSnapshot;
}

#[async_trait]
pub trait RefreshRequestor: Send + Sync {
    async fn request_refresh(&self, entity: &EntityRef) -> anyhow::Result<()>;
}

/// Synchronous hook invoked by the host for every change notification.
pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

pub trait ChangeBus: Send + Sync {
    fn subscribe(&self, observer: Arc<dyn ChangeObserver>);
}

pub struct NoopRefresh;

#[async_trait]
impl RefreshRequestor for NoopRefresh {
    async fn request_refresh(&self, entity: &EntityRef) -> anyhow::Result<()> {
        debug!(entity = %entity, "refresh: no presentation layer attached");
        Ok(())
    }
}

/// Session source for hosts without presence data; never yields a local user.
pub struct MissingSession;

impl SessionInfo for MissingSession {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::default()
    }
}

pub struct MissingDocumentStore;

#[async_trait]
impl DocumentStore for MissingDocumentStore {
    async fn entity(&self, _entity: &EntityRef) -> anyhow::Result<Option<EntitySnapshot>> {
        Ok(None)
    }

    async fn entities(&self) -> anyhow::Result<Vec<EntityRef>> {
        Ok(Vec::new())
    }

    async fn read_flags(
        &self,
        document: BackingDocument,
        _scope: &str,
    ) -> anyhow::Result<Option<Value>> {
        Err(anyhow!("document store unavailable for {document}"))
    }

    async fn write_flags(
        &self,
        document: BackingDocument,
        _scope: &str,
        _patch: Value,
    ) -> anyhow::Result<()> {
        Err(anyhow!("document store unavailable for {document}"))
    }

    async fn set_status_active(
        &self,
        entity: &EntityRef,
        _status: &str,
        _active: bool,
    ) -> anyhow::Result<bool> {
        Err(anyhow!("document store unavailable for {entity}"))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

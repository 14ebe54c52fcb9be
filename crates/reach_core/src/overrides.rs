use std::sync::Arc;

use anyhow::Result;
use host_integration::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::domain::EntityRef;
use tracing::{info, warn};

use crate::{
    catalog::{StatusId, MODULE_ID},
    error::ReachError,
};

/// Manual status choice persisted in the module's flag scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    #[serde(default, rename = "overrideStatus")]
    pub status_id: Option<String>,
    #[serde(default, rename = "manuallySet")]
    pub manually_set: bool,
}

impl OverrideRecord {
    pub fn is_recorded(&self) -> bool {
        self.manually_set || self.status_id.is_some()
    }

    pub fn catalog_status(&self) -> Option<StatusId> {
        self.status_id.as_deref().and_then(StatusId::parse)
    }
}

#[derive(Clone)]
pub struct OverrideStore {
    store: Arc<dyn DocumentStore>,
}

impl OverrideStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, entity: &EntityRef) -> Result<OverrideRecord> {
        let document = entity.backing_document();
        let raw = self
            .store
            .read_flags(document, MODULE_ID)
            .await
            .map_err(|source| ReachError::OverrideRead { document, source })?;

        let Some(raw) = raw else {
            return Ok(OverrideRecord::default());
        };
        match serde_json::from_value(raw) {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(entity = %entity, %document, error = %err, "reach: unreadable override flags; ignoring");
                Ok(OverrideRecord::default())
            }
        }
    }

    pub async fn set(&self, entity: &EntityRef, status: StatusId) -> Result<()> {
        let document = entity.backing_document();
        self.store
            .write_flags(
                document,
                MODULE_ID,
                json!({ "overrideStatus": status.as_str(), "manuallySet": true }),
            )
            .await
            .map_err(|source| ReachError::OverrideWrite { document, source })?;
        info!(entity = %entity, %document, status = %status, "reach: manual override recorded");
        Ok(())
    }

    /// Clears both fields in a single update.
    pub async fn clear(&self, entity: &EntityRef) -> Result<()> {
        let document = entity.backing_document();
        self.store
            .write_flags(
                document,
                MODULE_ID,
                json!({ "overrideStatus": null, "manuallySet": false }),
            )
            .await
            .map_err(|source| ReachError::OverrideWrite { document, source })?;
        info!(entity = %entity, %document, "reach: manual override cleared");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/overrides_tests.rs"]
mod tests;

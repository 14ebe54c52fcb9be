use shared::domain::{BackingDocument, EntityRef};
use thiserror::Error;

use crate::catalog::StatusId;

#[derive(Debug, Error)]
pub enum ReachError {
    #[error("entity {0} has no stable key")]
    MissingKey(EntityRef),
    #[error("failed to read override flags from {document}: {source}")]
    OverrideRead {
        document: BackingDocument,
        source: anyhow::Error,
    },
    #[error("failed to write override flags to {document}: {source}")]
    OverrideWrite {
        document: BackingDocument,
        source: anyhow::Error,
    },
    #[error("failed to set {status} to {active} on {entity}: {source}")]
    Marker {
        entity: EntityRef,
        status: StatusId,
        active: bool,
        source: anyhow::Error,
    },
}

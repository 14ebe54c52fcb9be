use serde::{Deserialize, Serialize};

use crate::domain::{EffectId, EntityRef, ItemId};

/// Notifications delivered by the host's change bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChangeEvent {
    ItemCreated {
        entity: EntityRef,
        item_id: ItemId,
    },
    ItemUpdated {
        entity: EntityRef,
        item_id: ItemId,
    },
    ItemDeleted {
        entity: EntityRef,
        item_id: ItemId,
    },
    EntityCreated {
        entity: EntityRef,
    },
    EntityUpdated {
        entity: EntityRef,
    },
    EntityDeleted {
        entity: EntityRef,
    },
    EffectCreated {
        entity: EntityRef,
        effect_id: EffectId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    EffectDeleted {
        entity: EntityRef,
        effect_id: EffectId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    RefreshRequested {
        entity: EntityRef,
    },
}

impl ChangeEvent {
    pub fn entity(&self) -> &EntityRef {
        match self {
            ChangeEvent::ItemCreated { entity, .. }
            | ChangeEvent::ItemUpdated { entity, .. }
            | ChangeEvent::ItemDeleted { entity, .. }
            | ChangeEvent::EntityCreated { entity }
            | ChangeEvent::EntityUpdated { entity }
            | ChangeEvent::EntityDeleted { entity }
            | ChangeEvent::EffectCreated { entity, .. }
            | ChangeEvent::EffectDeleted { entity, .. }
            | ChangeEvent::RefreshRequested { entity } => entity,
        }
    }
}

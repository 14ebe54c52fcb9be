use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ActorId);
id_newtype!(PlacementId);
id_newtype!(ItemId);
id_newtype!(EffectId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Pc,
    Npc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Player,
    Trusted,
    Assistant,
    Gamemaster,
}

impl Role {
    /// Assistant and full game masters may write any entity.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Assistant | Role::Gamemaster)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub system: Value,
}

impl Item {
    /// Resolves a `/system/...` JSON pointer; anything else is absent.
    pub fn lookup(&self, pointer: &str) -> Option<&Value> {
        match pointer.strip_prefix("/system") {
            Some("") => Some(&self.system),
            Some(rest) if rest.starts_with('/') => self.system.pointer(rest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectMarker {
    pub id: EffectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "link", rename_all = "snake_case")]
pub enum ActorLink {
    Linked,
    Synthetic { placement_id: PlacementId },
}

/// Where an entity's flag bag is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "document", content = "id", rename_all = "snake_case")]
pub enum BackingDocument {
    Canonical(ActorId),
    PerPlacement(PlacementId),
}

impl fmt::Display for BackingDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackingDocument::Canonical(id) => write!(f, "actor:{id}"),
            BackingDocument::PerPlacement(id) => write!(f, "placement:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub actor_id: ActorId,
    pub link: ActorLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
}

impl EntityRef {
    pub fn linked(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            link: ActorLink::Linked,
            uuid: None,
        }
    }

    pub fn synthetic(actor_id: ActorId, placement_id: PlacementId) -> Self {
        Self {
            actor_id,
            link: ActorLink::Synthetic { placement_id },
            uuid: None,
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn placement_id(&self) -> Option<PlacementId> {
        match self.link {
            ActorLink::Linked => None,
            ActorLink::Synthetic { placement_id } => Some(placement_id),
        }
    }

    /// Synthetic actors keep their flags on the placement record; writing them
    /// to the canonical actor would not persist.
    pub fn backing_document(&self) -> BackingDocument {
        match self.link {
            ActorLink::Linked => BackingDocument::Canonical(self.actor_id),
            ActorLink::Synthetic { placement_id } => BackingDocument::PerPlacement(placement_id),
        }
    }

    pub fn key(&self) -> Option<EntityKey> {
        EntityKey::resolve(self)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.link {
            ActorLink::Linked => write!(f, "actor:{}", self.actor_id),
            ActorLink::Synthetic { placement_id } => {
                write!(f, "actor:{}@placement:{placement_id}", self.actor_id)
            }
        }
    }
}

/// Stable registry key for an entity: the durable uuid when there is one,
/// the local ids otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Durable(Uuid),
    Local {
        actor_id: ActorId,
        placement_id: Option<PlacementId>,
    },
}

impl EntityKey {
    pub fn resolve(entity: &EntityRef) -> Option<Self> {
        if let Some(uuid) = entity.uuid.filter(|uuid| !uuid.is_nil()) {
            return Some(EntityKey::Durable(uuid));
        }

        let placement_id = entity.placement_id();
        if entity.actor_id.0 <= 0 || placement_id.is_some_and(|id| id.0 <= 0) {
            return None;
        }

        Some(EntityKey::Local {
            actor_id: entity.actor_id,
            placement_id,
        })
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Durable(uuid) => write!(f, "{uuid}"),
            EntityKey::Local {
                actor_id,
                placement_id: None,
            } => write!(f, "local:{actor_id}"),
            EntityKey::Local {
                actor_id,
                placement_id: Some(placement_id),
            } => write!(f, "local:{actor_id}@{placement_id}"),
        }
    }
}

/// Read-only view of an entity at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub entity: EntityRef,
    pub name: String,
    pub kind: ActorKind,
    pub items: Vec<Item>,
    pub effects: Vec<EffectMarker>,
    pub owners: BTreeSet<UserId>,
}

impl EntitySnapshot {
    pub fn has_status(&self, status: &str) -> bool {
        self.effects
            .iter()
            .any(|effect| effect.status.as_deref() == Some(status))
    }

    pub fn active_statuses(&self) -> impl Iterator<Item = &str> {
        self.effects.iter().filter_map(|effect| effect.status.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub local_user_id: Option<UserId>,
    pub users: Vec<SessionUser>,
}

impl SessionSnapshot {
    pub fn local_user(&self) -> Option<&SessionUser> {
        let local = self.local_user_id?;
        self.users.iter().find(|user| user.id == local)
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;

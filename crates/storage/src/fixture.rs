use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use shared::domain::{ActorId, ActorKind, Item, ItemId, PlacementId, SessionUser, UserId};

use crate::{MemoryWorld, StoreError};

/// Declarative description of a world, usually read from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorldFixture {
    #[serde(default)]
    pub local_user: Option<UserId>,
    #[serde(default)]
    pub users: Vec<SessionUser>,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub actors: Vec<ActorSeed>,
    #[serde(default)]
    pub placements: Vec<PlacementSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorSeed {
    #[serde(default)]
    pub id: Option<ActorId>,
    #[serde(default)]
    pub name: String,
    pub kind: ActorKind,
    #[serde(default)]
    pub owners: Vec<UserId>,
    #[serde(default)]
    pub items: Vec<ItemSeed>,
    /// Status markers active when the actor is created.
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub flags: Map<String, Value>,
}

impl ActorSeed {
    pub fn new(name: impl Into<String>, kind: ActorKind) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind,
            owners: Vec::new(),
            items: Vec::new(),
            statuses: Vec::new(),
            flags: Map::new(),
        }
    }

    pub fn owned_by(mut self, user_id: UserId) -> Self {
        self.owners.push(user_id);
        self
    }

    pub fn with_item(mut self, item: ItemSeed) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.statuses.push(status.into());
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemSeed {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub system: Value,
}

impl ItemSeed {
    pub fn new(name: impl Into<String>, item_type: impl Into<String>, system: Value) -> Self {
        Self {
            name: name.into(),
            item_type: item_type.into(),
            system,
        }
    }

    pub(crate) fn into_item(self, id: ItemId) -> Item {
        Item {
            id,
            name: self.name,
            item_type: self.item_type,
            system: self.system,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacementSeed {
    #[serde(default)]
    pub id: Option<PlacementId>,
    pub actor: ActorId,
    #[serde(default = "default_linked")]
    pub linked: bool,
}

fn default_linked() -> bool {
    true
}

impl WorldFixture {
    pub(crate) fn apply(self, world: &MemoryWorld) -> Result<(), StoreError> {
        for user in self.users {
            world.upsert_user(user);
        }
        world.set_local_user(self.local_user);

        for (key, value) in self.settings {
            world.register_setting(&key, value);
        }

        for actor in self.actors {
            world.insert_actor(actor)?;
        }

        for placement in self.placements {
            world.place_actor(placement.actor, placement.id, placement.linked)?;
        }

        Ok(())
    }
}

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use host_integration::{
    ChangeBus, ChangeObserver, DocumentStore, RefreshRequestor, SessionInfo, SettingsStore,
};
use serde_json::{Map, Value};
use shared::{
    domain::{
        ActorId, ActorKind, BackingDocument, EffectId, EffectMarker, EntityRef, EntitySnapshot,
        Item, ItemId, PlacementId, SessionSnapshot, SessionUser, UserId,
    },
    error::HostException,
    protocol::ChangeEvent,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

mod fixture;

pub use fixture::{ActorSeed, ItemSeed, PlacementSeed, WorldFixture};

const EVENT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),
    #[error("actor {0} already exists")]
    DuplicateActor(ActorId),
    #[error("unknown placement {0}")]
    UnknownPlacement(PlacementId),
    #[error("placement {0} already exists")]
    DuplicatePlacement(PlacementId),
    #[error("entity {0} is not present in the world")]
    UnknownEntity(EntityRef),
    #[error("unknown item {item_id} on {entity}")]
    UnknownItem { entity: EntityRef, item_id: ItemId },
    #[error("setting '{0}' is not registered")]
    UnknownSetting(String),
    #[error("flag patch for '{0}' must be an object")]
    InvalidFlagPatch(String),
}

impl From<StoreError> for HostException {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::InvalidFlagPatch(_) => HostException::new(
                shared::error::ErrorCode::Validation,
                value.to_string(),
            ),
            other => HostException::not_found(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct ActorData {
    uuid: Uuid,
    name: String,
    kind: ActorKind,
    owners: BTreeSet<UserId>,
    items: Vec<Item>,
    effects: Vec<EffectMarker>,
    flags: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct PlacementRecord {
    actor_id: ActorId,
    uuid: Uuid,
    /// Present only for unlinked placements, which carry their own actor copy.
    synthetic: Option<ActorData>,
}

#[derive(Debug, Default)]
struct WorldState {
    actors: BTreeMap<ActorId, ActorData>,
    placements: BTreeMap<PlacementId, PlacementRecord>,
    next_actor_id: i64,
    next_placement_id: i64,
    next_item_id: i64,
    next_effect_id: i64,
}

impl WorldState {
    fn actor_data(&self, entity: &EntityRef) -> Option<&ActorData> {
        match entity.placement_id() {
            None => self.actors.get(&entity.actor_id),
            Some(placement_id) => self
                .placements
                .get(&placement_id)
                .filter(|placement| placement.actor_id == entity.actor_id)
                .and_then(|placement| placement.synthetic.as_ref()),
        }
    }

    fn actor_data_mut(&mut self, entity: &EntityRef) -> Result<&mut ActorData, StoreError> {
        let data = match entity.placement_id() {
            None => self.actors.get_mut(&entity.actor_id),
            Some(placement_id) => self
                .placements
                .get_mut(&placement_id)
                .filter(|placement| placement.actor_id == entity.actor_id)
                .and_then(|placement| placement.synthetic.as_mut()),
        };
        data.ok_or(StoreError::UnknownEntity(*entity))
    }

    fn flags_mut(&mut self, document: BackingDocument) -> Result<&mut Map<String, Value>, StoreError> {
        match document {
            BackingDocument::Canonical(actor_id) => self
                .actors
                .get_mut(&actor_id)
                .map(|actor| &mut actor.flags)
                .ok_or(StoreError::UnknownActor(actor_id)),
            BackingDocument::PerPlacement(placement_id) => self
                .placements
                .get_mut(&placement_id)
                .and_then(|placement| placement.synthetic.as_mut())
                .map(|data| &mut data.flags)
                .ok_or(StoreError::UnknownPlacement(placement_id)),
        }
    }

    fn flags(&self, document: BackingDocument) -> Result<&Map<String, Value>, StoreError> {
        match document {
            BackingDocument::Canonical(actor_id) => self
                .actors
                .get(&actor_id)
                .map(|actor| &actor.flags)
                .ok_or(StoreError::UnknownActor(actor_id)),
            BackingDocument::PerPlacement(placement_id) => self
                .placements
                .get(&placement_id)
                .and_then(|placement| placement.synthetic.as_ref())
                .map(|data| &data.flags)
                .ok_or(StoreError::UnknownPlacement(placement_id)),
        }
    }

    fn entity_for_document(&self, document: BackingDocument) -> Option<EntityRef> {
        match document {
            BackingDocument::Canonical(actor_id) => self
                .actors
                .get(&actor_id)
                .map(|actor| EntityRef::linked(actor_id).with_uuid(actor.uuid)),
            BackingDocument::PerPlacement(placement_id) => {
                self.placements.get(&placement_id).map(|placement| {
                    EntityRef::synthetic(placement.actor_id, placement_id)
                        .with_uuid(placement.uuid)
                })
            }
        }
    }

    fn entity_refs(&self) -> Vec<EntityRef> {
        let linked = self
            .actors
            .iter()
            .map(|(actor_id, actor)| EntityRef::linked(*actor_id).with_uuid(actor.uuid));
        let synthetic = self
            .placements
            .iter()
            .filter(|(_, placement)| placement.synthetic.is_some())
            .map(|(placement_id, placement)| {
                EntityRef::synthetic(placement.actor_id, *placement_id).with_uuid(placement.uuid)
            });
        linked.chain(synthetic).collect()
    }

    fn stamp(&self, entity: &EntityRef) -> EntityRef {
        let uuid = match entity.placement_id() {
            None => self.actors.get(&entity.actor_id).map(|actor| actor.uuid),
            Some(placement_id) => self.placements.get(&placement_id).map(|p| p.uuid),
        };
        match uuid {
            Some(uuid) => entity.with_uuid(uuid),
            None => *entity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub entity: EntityRef,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SessionState {
    local_user_id: Option<UserId>,
    users: Vec<SessionUser>,
}

#[derive(Debug, Default)]
struct RefreshState {
    log: Vec<RefreshRecord>,
    failing: bool,
}

/// In-process host: documents, settings, session roster and change bus.
pub struct MemoryWorld {
    state: RwLock<WorldState>,
    settings: RwLock<HashMap<String, Value>>,
    session: RwLock<SessionState>,
    refreshes: Mutex<RefreshState>,
    observers: RwLock<Vec<Arc<dyn ChangeObserver>>>,
    events: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorld {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_FEED_CAPACITY);
        Self {
            state: RwLock::new(WorldState {
                next_actor_id: 1,
                next_placement_id: 1,
                next_item_id: 1,
                next_effect_id: 1,
                ..WorldState::default()
            }),
            settings: RwLock::new(HashMap::new()),
            session: RwLock::new(SessionState::default()),
            refreshes: Mutex::new(RefreshState::default()),
            observers: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn from_fixture(fixture: WorldFixture) -> Result<Self, StoreError> {
        let world = Self::new();
        fixture.apply(&world)?;
        Ok(world)
    }

    /// Feed of every change the world emits, for passive listeners.
    pub fn events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn insert_actor(&self, seed: ActorSeed) -> Result<EntityRef, StoreError> {
        let entity = {
            let mut state = write(&self.state);
            let actor_id = match seed.id {
                Some(id) if state.actors.contains_key(&id) => {
                    return Err(StoreError::DuplicateActor(id))
                }
                Some(id) => id,
                None => ActorId(state.next_actor_id),
            };
            state.next_actor_id = state.next_actor_id.max(actor_id.0 + 1);

            let items = seed
                .items
                .into_iter()
                .map(|item| {
                    let id = ItemId(state.next_item_id);
                    state.next_item_id += 1;
                    item.into_item(id)
                })
                .collect();
            let effects = seed
                .statuses
                .into_iter()
                .map(|status| {
                    let id = EffectId(state.next_effect_id);
                    state.next_effect_id += 1;
                    EffectMarker {
                        id,
                        status: Some(status),
                    }
                })
                .collect();

            let uuid = Uuid::new_v4();
            state.actors.insert(
                actor_id,
                ActorData {
                    uuid,
                    name: seed.name,
                    kind: seed.kind,
                    owners: seed.owners.into_iter().collect(),
                    items,
                    effects,
                    flags: seed.flags,
                },
            );
            EntityRef::linked(actor_id).with_uuid(uuid)
        };

        self.emit(ChangeEvent::EntityCreated { entity });
        Ok(entity)
    }

    /// Places an actor. Unlinked placements get their own copy of the actor
    /// and become a separate synthetic entity.
    pub fn place_actor(
        &self,
        actor_id: ActorId,
        placement_id: Option<PlacementId>,
        linked: bool,
    ) -> Result<EntityRef, StoreError> {
        let entity = {
            let mut state = write(&self.state);
            let actor = state
                .actors
                .get(&actor_id)
                .cloned()
                .ok_or(StoreError::UnknownActor(actor_id))?;
            let placement_id = match placement_id {
                Some(id) if state.placements.contains_key(&id) => {
                    return Err(StoreError::DuplicatePlacement(id))
                }
                Some(id) => id,
                None => PlacementId(state.next_placement_id),
            };
            state.next_placement_id = state.next_placement_id.max(placement_id.0 + 1);

            let actor_uuid = actor.uuid;
            let uuid = Uuid::new_v4();
            let synthetic = (!linked).then(|| ActorData {
                uuid,
                flags: Map::new(),
                ..actor
            });
            state.placements.insert(
                placement_id,
                PlacementRecord {
                    actor_id,
                    uuid,
                    synthetic,
                },
            );

            if linked {
                EntityRef::linked(actor_id).with_uuid(actor_uuid)
            } else {
                EntityRef::synthetic(actor_id, placement_id).with_uuid(uuid)
            }
        };

        self.emit(ChangeEvent::EntityCreated { entity });
        Ok(entity)
    }

    pub fn delete_actor(&self, actor_id: ActorId) -> Result<(), StoreError> {
        let removed = {
            let mut state = write(&self.state);
            let actor = state
                .actors
                .remove(&actor_id)
                .ok_or(StoreError::UnknownActor(actor_id))?;
            let mut removed = vec![EntityRef::linked(actor_id).with_uuid(actor.uuid)];
            state.placements.retain(|placement_id, placement| {
                if placement.actor_id != actor_id {
                    return true;
                }
                if placement.synthetic.is_some() {
                    removed.push(
                        EntityRef::synthetic(actor_id, *placement_id).with_uuid(placement.uuid),
                    );
                }
                false
            });
            removed
        };

        for entity in removed {
            self.emit(ChangeEvent::EntityDeleted { entity });
        }
        Ok(())
    }

    pub fn add_item(&self, entity: &EntityRef, seed: ItemSeed) -> Result<ItemId, StoreError> {
        let (entity, item_id) = {
            let mut state = write(&self.state);
            let item_id = ItemId(state.next_item_id);
            state.next_item_id += 1;
            state.actor_data_mut(entity)?.items.push(seed.into_item(item_id));
            (state.stamp(entity), item_id)
        };

        self.emit(ChangeEvent::ItemCreated { entity, item_id });
        Ok(item_id)
    }

    pub fn update_item(
        &self,
        entity: &EntityRef,
        item_id: ItemId,
        system: Value,
    ) -> Result<(), StoreError> {
        let entity = {
            let mut state = write(&self.state);
            let item = state
                .actor_data_mut(entity)?
                .items
                .iter_mut()
                .find(|item| item.id == item_id)
                .ok_or(StoreError::UnknownItem {
                    entity: *entity,
                    item_id,
                })?;
            item.system = system;
            state.stamp(entity)
        };

        self.emit(ChangeEvent::ItemUpdated { entity, item_id });
        Ok(())
    }

    pub fn remove_item(&self, entity: &EntityRef, item_id: ItemId) -> Result<(), StoreError> {
        let entity = {
            let mut state = write(&self.state);
            let items = &mut state.actor_data_mut(entity)?.items;
            let before = items.len();
            items.retain(|item| item.id != item_id);
            if items.len() == before {
                return Err(StoreError::UnknownItem {
                    entity: *entity,
                    item_id,
                });
            }
            state.stamp(entity)
        };

        self.emit(ChangeEvent::ItemDeleted { entity, item_id });
        Ok(())
    }

    /// Adds a marker the way any other actor (a player, a macro) would.
    pub fn add_effect(
        &self,
        entity: &EntityRef,
        status: Option<&str>,
    ) -> Result<EffectId, StoreError> {
        let (entity, effect_id) = {
            let mut state = write(&self.state);
            let effect_id = EffectId(state.next_effect_id);
            state.next_effect_id += 1;
            state.actor_data_mut(entity)?.effects.push(EffectMarker {
                id: effect_id,
                status: status.map(str::to_string),
            });
            (state.stamp(entity), effect_id)
        };

        self.emit(ChangeEvent::EffectCreated {
            entity,
            effect_id,
            status: status.map(str::to_string),
        });
        Ok(effect_id)
    }

    pub fn remove_effect(&self, entity: &EntityRef, effect_id: EffectId) -> Result<(), StoreError> {
        let (entity, removed) = {
            let mut state = write(&self.state);
            let effects = &mut state.actor_data_mut(entity)?.effects;
            let Some(index) = effects.iter().position(|effect| effect.id == effect_id) else {
                return Ok(());
            };
            let removed = effects.remove(index);
            (state.stamp(entity), removed)
        };

        self.emit(ChangeEvent::EffectDeleted {
            entity,
            effect_id,
            status: removed.status,
        });
        Ok(())
    }

    pub fn request_presentation_refresh(&self, entity: &EntityRef) {
        let entity = read(&self.state).stamp(entity);
        self.emit(ChangeEvent::RefreshRequested { entity });
    }

    /// Looks up an entity by ids and returns a ref carrying its durable uuid.
    pub fn entity_ref(&self, actor_id: ActorId, placement_id: Option<PlacementId>) -> Option<EntityRef> {
        let state = read(&self.state);
        let entity = match placement_id {
            None => EntityRef::linked(actor_id),
            Some(placement_id) => {
                let placement = state.placements.get(&placement_id)?;
                if placement.synthetic.is_none() {
                    EntityRef::linked(placement.actor_id)
                } else {
                    EntityRef::synthetic(placement.actor_id, placement_id)
                }
            }
        };
        state.actor_data(&entity).map(|_| state.stamp(&entity))
    }

    pub fn statuses(&self, entity: &EntityRef) -> Vec<String> {
        read(&self.state)
            .actor_data(entity)
            .map(|data| {
                data.effects
                    .iter()
                    .filter_map(|effect| effect.status.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn flag_scope(&self, document: BackingDocument, scope: &str) -> Option<Value> {
        read(&self.state)
            .flags(document)
            .ok()
            .and_then(|flags| flags.get(scope).cloned())
    }

    pub fn register_setting(&self, key: &str, default: Value) {
        write(&self.settings).entry(key.to_string()).or_insert(default);
    }

    pub fn set_local_user(&self, user_id: Option<UserId>) {
        write(&self.session).local_user_id = user_id;
    }

    pub fn upsert_user(&self, user: SessionUser) {
        let mut session = write(&self.session);
        match session.users.iter_mut().find(|existing| existing.id == user.id) {
            Some(existing) => *existing = user,
            None => session.users.push(user),
        }
    }

    pub fn set_user_active(&self, user_id: UserId, active: bool) {
        if let Some(user) = write(&self.session)
            .users
            .iter_mut()
            .find(|user| user.id == user_id)
        {
            user.active = active;
        }
    }

    pub fn refresh_log(&self) -> Vec<RefreshRecord> {
        lock(&self.refreshes).log.clone()
    }

    pub fn refresh_count(&self, entity: &EntityRef) -> usize {
        lock(&self.refreshes)
            .log
            .iter()
            .filter(|record| {
                record.entity.actor_id == entity.actor_id
                    && record.entity.placement_id() == entity.placement_id()
            })
            .count()
    }

    /// Makes every following refresh request fail, as a detached canvas would.
    pub fn fail_refreshes(&self, failing: bool) {
        lock(&self.refreshes).failing = failing;
    }

    fn emit(&self, event: ChangeEvent) {
        debug!(?event, "world: change");
        let observers = read(&self.observers).clone();
        for observer in observers {
            observer.on_change(&event);
        }
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl DocumentStore for MemoryWorld {
    async fn entity(&self, entity: &EntityRef) -> Result<Option<EntitySnapshot>> {
        let state = read(&self.state);
        Ok(state.actor_data(entity).map(|data| EntitySnapshot {
            entity: state.stamp(entity),
            name: data.name.clone(),
            kind: data.kind,
            items: data.items.clone(),
            effects: data.effects.clone(),
            owners: data.owners.clone(),
        }))
    }

    async fn entities(&self) -> Result<Vec<EntityRef>> {
        Ok(read(&self.state).entity_refs())
    }

    async fn read_flags(&self, document: BackingDocument, scope: &str) -> Result<Option<Value>> {
        let state = read(&self.state);
        let flags = state.flags(document).map_err(HostException::from)?;
        Ok(flags.get(scope).cloned())
    }

    async fn write_flags(&self, document: BackingDocument, scope: &str, patch: Value) -> Result<()> {
        let Value::Object(patch) = patch else {
            return Err(HostException::from(StoreError::InvalidFlagPatch(scope.to_string())).into());
        };

        let entity = {
            let mut state = write(&self.state);
            let flags = state.flags_mut(document).map_err(HostException::from)?;
            let slot = flags
                .entry(scope.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(existing) = slot {
                for (key, value) in patch {
                    existing.insert(key, value);
                }
            }
            state.entity_for_document(document)
        };

        if let Some(entity) = entity {
            self.emit(ChangeEvent::EntityUpdated { entity });
        }
        Ok(())
    }

    async fn set_status_active(&self, entity: &EntityRef, status: &str, active: bool) -> Result<bool> {
        let mut emitted = Vec::new();
        {
            let mut state = write(&self.state);
            let stamped = state.stamp(entity);
            let next_effect_id = EffectId(state.next_effect_id);
            let data = state.actor_data_mut(entity).map_err(HostException::from)?;
            let present = data
                .effects
                .iter()
                .any(|effect| effect.status.as_deref() == Some(status));

            if active && !present {
                data.effects.push(EffectMarker {
                    id: next_effect_id,
                    status: Some(status.to_string()),
                });
                state.next_effect_id += 1;
                emitted.push(ChangeEvent::EffectCreated {
                    entity: stamped,
                    effect_id: next_effect_id,
                    status: Some(status.to_string()),
                });
            } else if !active && present {
                data.effects.retain(|effect| {
                    if effect.status.as_deref() != Some(status) {
                        return true;
                    }
                    emitted.push(ChangeEvent::EffectDeleted {
                        entity: stamped,
                        effect_id: effect.id,
                        status: effect.status.clone(),
                    });
                    false
                });
            }
        }

        let changed = !emitted.is_empty();
        for event in emitted {
            self.emit(event);
        }
        Ok(changed)
    }

    fn canonical_ref(&self, entity: &EntityRef) -> EntityRef {
        read(&self.state).stamp(entity)
    }
}

impl SettingsStore for MemoryWorld {
    fn get(&self, key: &str) -> Option<Value> {
        read(&self.settings).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut settings = write(&self.settings);
        let Some(slot) = settings.get_mut(key) else {
            return Err(HostException::from(StoreError::UnknownSetting(key.to_string())).into());
        };
        *slot = value;
        Ok(())
    }

    fn has(&self, key: &str) -> bool {
        read(&self.settings).contains_key(key)
    }
}

impl SessionInfo for MemoryWorld {
    fn snapshot(&self) -> SessionSnapshot {
        let session = read(&self.session);
        SessionSnapshot {
            local_user_id: session.local_user_id,
            users: session.users.clone(),
        }
    }
}

#[async_trait]
impl RefreshRequestor for MemoryWorld {
    async fn request_refresh(&self, entity: &EntityRef) -> Result<()> {
        let mut refreshes = lock(&self.refreshes);
        if refreshes.failing {
            return Err(HostException::unavailable(format!("no canvas presentation for {entity}")).into());
        }
        refreshes.log.push(RefreshRecord {
            entity: *entity,
            requested_at: Utc::now(),
        });
        Ok(())
    }
}

impl ChangeBus for MemoryWorld {
    fn subscribe(&self, observer: Arc<dyn ChangeObserver>) {
        write(&self.observers).push(observer);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

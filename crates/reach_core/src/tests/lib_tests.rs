use super::*;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::domain::{BackingDocument, EntitySnapshot, PlacementId, Role};
use storage::{ActorSeed, MemoryWorld};

use crate::test_support::{engine_for, npc_attack, weapon, world_with_local, LOCAL_USER};

/// Reads through to the world but refuses every marker write.
struct ReadOnlyMarkers(Arc<MemoryWorld>);

#[async_trait]
impl DocumentStore for ReadOnlyMarkers {
    async fn entity(&self, entity: &EntityRef) -> Result<Option<EntitySnapshot>> {
        self.0.entity(entity).await
    }

    async fn entities(&self) -> Result<Vec<EntityRef>> {
        self.0.entities().await
    }

    async fn read_flags(&self, document: BackingDocument, scope: &str) -> Result<Option<Value>> {
        self.0.read_flags(document, scope).await
    }

    async fn write_flags(&self, document: BackingDocument, scope: &str, patch: Value) -> Result<()> {
        self.0.write_flags(document, scope, patch).await
    }

    async fn set_status_active(&self, entity: &EntityRef, status: &str, _active: bool) -> Result<bool> {
        anyhow::bail!("marker {status} on {entity} is read-only")
    }

    fn canonical_ref(&self, entity: &EntityRef) -> EntityRef {
        self.0.canonical_ref(entity)
    }
}

/// Marker writes that take a while, counting how many are in flight at once.
struct SlowMarkers {
    world: Arc<MemoryWorld>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowMarkers {
    fn new(world: Arc<MemoryWorld>) -> Arc<Self> {
        Arc::new(Self {
            world,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for SlowMarkers {
    async fn entity(&self, entity: &EntityRef) -> Result<Option<EntitySnapshot>> {
        self.world.entity(entity).await
    }

    async fn entities(&self) -> Result<Vec<EntityRef>> {
        self.world.entities().await
    }

    async fn read_flags(&self, document: BackingDocument, scope: &str) -> Result<Option<Value>> {
        self.world.read_flags(document, scope).await
    }

    async fn write_flags(&self, document: BackingDocument, scope: &str, patch: Value) -> Result<()> {
        self.world.write_flags(document, scope, patch).await
    }

    async fn set_status_active(&self, entity: &EntityRef, status: &str, active: bool) -> Result<bool> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let changed = self.world.set_status_active(entity, status, active).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        changed
    }

    fn canonical_ref(&self, entity: &EntityRef) -> EntityRef {
        self.world.canonical_ref(entity)
    }
}

fn slow_engine(world: &Arc<MemoryWorld>) -> (ReachEngine, Arc<SlowMarkers>) {
    let store = SlowMarkers::new(world.clone());
    let host = HostCollaborators {
        store: store.clone(),
        ..HostCollaborators::from_host(world.clone())
    };
    (ReachEngine::new(host, EngineConfig::default()), store)
}

/// The same linked actor, once with its durable id and once without.
fn both_forms(world: &MemoryWorld, entity: &EntityRef) -> (EntityRef, EntityRef) {
    let bare = EntityRef::linked(entity.actor_id);
    let stamped = world.canonical_ref(&bare);
    assert_ne!(bare, stamped);
    assert_ne!(bare.key(), stamped.key());
    (stamped, bare)
}

#[tokio::test]
async fn npc_click_records_an_override_that_reconciliation_keeps() {
    let world = world_with_local(Role::Gamemaster);
    let entity = world
        .insert_actor(ActorSeed::new("Pict Shaman", ActorKind::Npc).with_item(npc_attack(1)))
        .expect("actor");
    let engine = engine_for(&world);

    engine.handle_status_click(&entity, StatusId::Reach2).await;

    assert_eq!(world.statuses(&entity), vec!["reach_2".to_string()]);
    let record = engine.override_for(&entity).await.expect("override");
    assert!(record.manually_set);
    assert_eq!(record.catalog_status(), Some(StatusId::Reach2));

    let outcome = engine.reconcile_now(&entity).await.expect("reconcile");
    assert_eq!(outcome, ReconcileOutcome::Override(StatusId::Reach2));
}

#[tokio::test]
async fn clicking_the_active_npc_status_toggles_it_off() {
    let world = world_with_local(Role::Gamemaster);
    let entity = world
        .insert_actor(ActorSeed::new("Pict Shaman", ActorKind::Npc).with_item(npc_attack(1)))
        .expect("actor");
    let engine = engine_for(&world);

    engine.handle_status_click(&entity, StatusId::Reach3).await;
    engine.handle_status_click(&entity, StatusId::Reach3).await;

    assert!(world.statuses(&entity).is_empty());
    assert!(!engine.override_for(&entity).await.expect("override").is_recorded());
}

#[tokio::test]
async fn pc_click_is_replaced_by_the_computed_status() {
    let world = world_with_local(Role::Gamemaster);
    let entity = world
        .insert_actor(ActorSeed::new("Conan", ActorKind::Pc).with_item(weapon(2, true)))
        .expect("actor");
    let engine = engine_for(&world);

    engine.handle_status_click(&entity, StatusId::Reach3).await;

    assert_eq!(world.statuses(&entity), vec!["reach_2".to_string()]);
    assert!(!engine.override_for(&entity).await.expect("override").is_recorded());
}

#[tokio::test]
async fn pc_no_reach_click_sticks() {
    let world = world_with_local(Role::Gamemaster);
    let entity = world
        .insert_actor(
            ActorSeed::new("Conan", ActorKind::Pc)
                .with_item(weapon(2, true))
                .with_status("reach_2"),
        )
        .expect("actor");
    let engine = engine_for(&world);

    engine.handle_status_click(&entity, StatusId::NoReach).await;

    assert_eq!(world.statuses(&entity), vec!["no_reach".to_string()]);
    let outcome = engine.reconcile_now(&entity).await.expect("reconcile");
    assert_eq!(outcome, ReconcileOutcome::Terminal);
}

#[tokio::test]
async fn owner_can_click_their_own_npc() {
    let world = world_with_local(Role::Player);
    let entity = world
        .insert_actor(
            ActorSeed::new("Hound", ActorKind::Npc)
                .owned_by(LOCAL_USER)
                .with_item(npc_attack(1)),
        )
        .expect("actor");
    let engine = engine_for(&world);

    engine.handle_status_click(&entity, StatusId::Reach2).await;

    assert_eq!(world.statuses(&entity), vec!["reach_2".to_string()]);
}

#[tokio::test]
async fn clicks_from_players_without_ownership_are_ignored() {
    let world = world_with_local(Role::Player);
    let entity = world
        .insert_actor(ActorSeed::new("Thulsa", ActorKind::Npc).with_item(npc_attack(2)))
        .expect("actor");
    let engine = engine_for(&world);

    engine.handle_status_click(&entity, StatusId::Reach3).await;

    assert!(world.statuses(&entity).is_empty());
    assert!(!engine.override_for(&entity).await.expect("override").is_recorded());
    assert_eq!(world.refresh_count(&entity), 0);
}

#[tokio::test]
async fn failed_marker_writes_are_logged_not_raised() {
    let world = world_with_local(Role::Gamemaster);
    let entity = world
        .insert_actor(ActorSeed::new("Golem", ActorKind::Npc).with_item(npc_attack(2)))
        .expect("actor");
    let host = HostCollaborators {
        store: Arc::new(ReadOnlyMarkers(world.clone())),
        ..HostCollaborators::from_host(world.clone())
    };
    let engine = ReachEngine::new(host, EngineConfig::default());

    engine.handle_status_click(&entity, StatusId::Reach2).await;
    assert!(world.statuses(&entity).is_empty());

    let err = engine.reconcile_now(&entity).await.expect_err("marker write fails");
    assert!(format!("{err:#}").contains("read-only"));
}

#[tokio::test]
async fn synthetic_token_click_stays_on_the_placement() {
    let world = world_with_local(Role::Gamemaster);
    let actor = world
        .insert_actor(ActorSeed::new("Pict", ActorKind::Npc).with_item(npc_attack(1)))
        .expect("actor");
    let token = world
        .place_actor(actor.actor_id, Some(PlacementId(30)), false)
        .expect("token");
    let engine = engine_for(&world);

    engine.handle_status_click(&token, StatusId::Reach3).await;

    assert_eq!(world.statuses(&token), vec!["reach_3".to_string()]);
    assert!(world.statuses(&actor).is_empty());
    assert!(engine.override_for(&token).await.expect("token").is_recorded());
    assert!(!engine.override_for(&actor).await.expect("actor").is_recorded());
}

#[tokio::test]
async fn reconcile_all_covers_every_entity() {
    let world = world_with_local(Role::Gamemaster);
    let pc = world
        .insert_actor(ActorSeed::new("Conan", ActorKind::Pc).with_item(weapon(3, true)))
        .expect("pc");
    let npc = world
        .insert_actor(ActorSeed::new("Pict", ActorKind::Npc).with_item(npc_attack(2)))
        .expect("npc");
    let engine = engine_for(&world);

    let results = engine.reconcile_all().await.expect("reconcile all");

    assert_eq!(results.len(), 2);
    assert_eq!(world.statuses(&pc), vec!["reach_3".to_string()]);
    assert_eq!(world.statuses(&npc), vec!["reach_2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn rescan_schedules_each_entity_once() {
    let world = world_with_local(Role::Gamemaster);
    let pc = world
        .insert_actor(ActorSeed::new("Conan", ActorKind::Pc).with_item(weapon(2, true)))
        .expect("pc");
    world
        .insert_actor(ActorSeed::new("Pict", ActorKind::Npc).with_item(npc_attack(3)))
        .expect("npc");
    let engine = engine_for(&world);

    assert_eq!(engine.rescan_all().await.expect("rescan"), 2);
    assert_eq!(engine.scheduler().pending_len(), 2);
    assert!(world.statuses(&pc).is_empty());

    tokio::time::advance(Duration::from_millis(150)).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }

    assert_eq!(engine.scheduler().pending_len(), 0);
    assert_eq!(world.statuses(&pc), vec!["reach_2".to_string()]);
    assert_eq!(world.refresh_count(&pc), 1);
}

#[tokio::test(start_paused = true)]
async fn attached_engine_reacts_to_item_changes() {
    let world = world_with_local(Role::Gamemaster);
    world.set(SHOW_REACH_ONE_KEY, json!(true)).expect("setting");
    let entity = world
        .insert_actor(ActorSeed::new("Conan", ActorKind::Pc))
        .expect("actor");
    let engine = engine_for(&world);
    engine.attach(world.as_ref());

    world.add_item(&entity, weapon(1, true)).expect("item");
    tokio::time::advance(Duration::from_millis(150)).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }

    assert_eq!(world.statuses(&entity), vec!["reach_1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn passes_through_either_ref_form_never_overlap() {
    let world = world_with_local(Role::Gamemaster);
    let entity = world
        .insert_actor(ActorSeed::new("Conan", ActorKind::Pc).with_item(weapon(2, true)))
        .expect("actor");
    let (engine, store) = slow_engine(&world);
    let (stamped, bare) = both_forms(&world, &entity);

    let (first, second) = tokio::join!(engine.reconcile_now(&stamped), engine.reconcile_now(&bare));
    first.expect("stamped pass");
    second.expect("bare pass");

    assert_eq!(store.peak(), 1);
    assert_eq!(world.statuses(&entity), vec!["reach_2".to_string()]);
    assert_eq!(world.refresh_count(&entity), 2);
}

#[tokio::test(start_paused = true)]
async fn immediate_pass_and_due_timer_run_one_after_the_other() {
    let world = world_with_local(Role::Gamemaster);
    let entity = world
        .insert_actor(ActorSeed::new("Conan", ActorKind::Pc).with_item(weapon(3, true)))
        .expect("actor");
    let (engine, store) = slow_engine(&world);
    let (stamped, bare) = both_forms(&world, &entity);
    let scheduler = engine.scheduler();

    assert!(scheduler.schedule_debounced(&bare));
    assert!(scheduler.schedule_debounced(&stamped));
    assert_eq!(scheduler.pending_len(), 1);

    // The timer comes due while the immediate pass is still writing markers.
    tokio::time::advance(Duration::from_millis(95)).await;
    engine.schedule(&stamped, ScheduleMode::Immediate).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.peak(), 1);
    assert_eq!(scheduler.pending_len(), 0);
    assert_eq!(world.statuses(&entity), vec!["reach_3".to_string()]);
    assert_eq!(world.refresh_count(&entity), 2);
}

#[tokio::test(start_paused = true)]
async fn click_and_pass_on_different_ref_forms_never_overlap() {
    let world = world_with_local(Role::Gamemaster);
    let entity = world
        .insert_actor(ActorSeed::new("Pict", ActorKind::Npc).with_item(npc_attack(1)))
        .expect("actor");
    let (engine, store) = slow_engine(&world);
    let (stamped, bare) = both_forms(&world, &entity);

    let (_, pass) = tokio::join!(
        engine.handle_status_click(&bare, StatusId::Reach3),
        engine.reconcile_now(&stamped)
    );

    assert_eq!(pass.expect("pass"), ReconcileOutcome::Override(StatusId::Reach3));
    assert_eq!(store.peak(), 1);
    assert_eq!(world.statuses(&entity), vec!["reach_3".to_string()]);
}

use std::sync::Arc;

use serde_json::json;
use shared::domain::{Role, SessionUser, UserId};
use storage::{ItemSeed, MemoryWorld};

use crate::{EngineConfig, HostCollaborators, ReachEngine, SHOW_REACH_ONE_KEY};

pub(crate) const LOCAL_USER: UserId = UserId(1);

pub(crate) fn world_with_local(role: Role) -> Arc<MemoryWorld> {
    let world = Arc::new(MemoryWorld::new());
    world.upsert_user(SessionUser {
        id: LOCAL_USER,
        name: "local".into(),
        role,
        active: true,
    });
    world.set_local_user(Some(LOCAL_USER));
    world.register_setting(SHOW_REACH_ONE_KEY, json!(false));
    world
}

pub(crate) fn engine_for(world: &Arc<MemoryWorld>) -> ReachEngine {
    ReachEngine::new(
        HostCollaborators::from_host(world.clone()),
        EngineConfig::default(),
    )
}

pub(crate) fn weapon(range: i64, equipped: bool) -> ItemSeed {
    ItemSeed::new(
        format!("weapon-{range}"),
        "weapon",
        json!({ "range": range, "equipped": equipped }),
    )
}

pub(crate) fn npc_attack(range: i64) -> ItemSeed {
    ItemSeed::new(format!("attack-{range}"), "npcattack", json!({ "range": range }))
}

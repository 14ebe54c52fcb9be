use serde_json::Value;
use shared::domain::{ActorKind, EntitySnapshot, Item};

use crate::catalog::MAX_REACH;

pub const RANGE_POINTER: &str = "/system/range";

/// Places older item data may keep the equipped indicator, in priority order.
/// The first pointer that resolves decides, even when it holds `null`.
pub const EQUIPPED_PROBES: &[&str] = &["/system/equipped", "/system/isEquipped", "/system/equip"];

const PC_ITEM_TYPES: &[&str] = &["weapon"];
const NPC_ITEM_TYPES: &[&str] = &["npcattack", "weapon"];

pub fn compute_reach(entity: &EntitySnapshot) -> u8 {
    let best = match entity.kind {
        ActorKind::Pc => entity
            .items
            .iter()
            .filter(|item| PC_ITEM_TYPES.contains(&item.item_type.as_str()) && is_equipped(item))
            .map(item_range)
            .fold(0.0, f64::max),
        ActorKind::Npc => entity
            .items
            .iter()
            .filter(|item| NPC_ITEM_TYPES.contains(&item.item_type.as_str()))
            .map(item_range)
            .filter(|range| *range > 0.0)
            .fold(0.0, f64::max),
    };
    clamp_reach(best)
}

pub fn is_equipped(item: &Item) -> bool {
    EQUIPPED_PROBES
        .iter()
        .find_map(|pointer| item.lookup(pointer))
        .is_some_and(|value| *value == Value::Bool(true))
}

pub fn item_range(item: &Item) -> f64 {
    let raw = match item.lookup(RANGE_POINTER) {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.filter(|range| range.is_finite()).unwrap_or(0.0)
}

pub fn clamp_reach(raw: f64) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    raw.clamp(0.0, f64::from(MAX_REACH)) as u8
}

#[cfg(test)]
#[path = "tests/calculator_tests.rs"]
mod tests;

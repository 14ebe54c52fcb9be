use std::fmt;

use serde::{Deserialize, Serialize};

/// Flag scope and settings namespace owned by this engine.
pub const MODULE_ID: &str = "reach-status";

/// Highest reach that has its own marker; larger values clamp to it.
pub const MAX_REACH: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusId {
    #[serde(rename = "reach_1")]
    Reach1,
    #[serde(rename = "reach_2")]
    Reach2,
    #[serde(rename = "reach_3")]
    Reach3,
    #[serde(rename = "no_reach")]
    NoReach,
}

impl StatusId {
    pub const ALL: [StatusId; 4] = [
        StatusId::Reach1,
        StatusId::Reach2,
        StatusId::Reach3,
        StatusId::NoReach,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusId::Reach1 => "reach_1",
            StatusId::Reach2 => "reach_2",
            StatusId::Reach3 => "reach_3",
            StatusId::NoReach => "no_reach",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }

    pub fn is_terminal(self) -> bool {
        self == StatusId::NoReach
    }

    /// Marker for an already clamped reach value. Reach 1 only gets a marker
    /// when the world opted into showing it.
    pub fn for_reach(reach: u8, show_reach_one: bool) -> Option<Self> {
        match reach.min(MAX_REACH) {
            0 => None,
            1 => show_reach_one.then_some(StatusId::Reach1),
            2 => Some(StatusId::Reach2),
            _ => Some(StatusId::Reach3),
        }
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;

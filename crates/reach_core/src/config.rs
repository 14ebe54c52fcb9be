use std::time::Duration;

/// World setting that allows the `reach_1` marker to be shown.
pub const SHOW_REACH_ONE_KEY: &str = "reach-status.showReachOne";

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub debounce_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
        }
    }
}

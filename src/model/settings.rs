//! User-facing settings persisted under the `settings` key.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default auto-refresh period, in milliseconds.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub dark_mode: bool,
    /// Auto-refresh period in milliseconds.
    pub refresh_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            refresh_interval: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

impl Settings {
    /// The auto-refresh period, never shorter than one second.
    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_interval.max(1_000))
    }
}

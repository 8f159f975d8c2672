use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::key::BoundsKey;

/// Tunables for the map screen's fetchers and live timelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeodataConfig {
    /// Quiet period applied to viewport and search input before a network read.
    pub quiet_period_ms: u64,
    /// Entries kept per fetcher cache before FIFO eviction.
    pub cache_max_entries: usize,
    /// Decimal places kept when rounding bounds into cache keys.
    pub bounds_precision: u32,
    pub search_limit: u32,
    /// Wait before reopening a dropped live subscription.
    pub resubscribe_delay_ms: u64,
}

impl Default for GeodataConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 300,
            cache_max_entries: 10,
            bounds_precision: BoundsKey::DEFAULT_PRECISION,
            search_limit: 20,
            resubscribe_delay_ms: 2_000,
        }
    }
}

impl GeodataConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }

    pub fn bounds_key(&self) -> BoundsKey {
        BoundsKey::new(self.bounds_precision)
    }
}

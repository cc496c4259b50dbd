use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pricing::PricingTable;

/// Tuning for run admission and dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Worker pool width: probe calls in flight at once for one run.
    pub max_parallel_probes: usize,
    /// Upper bound for a single provider call.
    pub probe_timeout: Duration,
    /// Wall-clock budget of one `run` invocation. Once spent, no new items
    /// are claimed and the run is left `processing` for a later resume.
    pub invocation_budget: Duration,
    /// Items claimed from the store per round trip.
    pub claim_slice: u32,
    /// Largest subject set accepted for one run.
    pub max_items_per_run: usize,
    pub pricing: PricingTable,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_parallel_probes: 8,
            probe_timeout: Duration::from_secs(20),
            invocation_budget: Duration::from_secs(30),
            claim_slice: 16,
            max_items_per_run: 1_000,
            pricing: PricingTable::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousekeeperConfig {
    /// How often the server sweeps for stale runs.
    pub interval: Duration,
    /// Runs whose heartbeat is older than this are force-finalized.
    pub stale_run_after: Duration,
    /// Idle runs with pending items are picked up again after this long.
    pub resume_idle_after: Duration,
}

impl Default for HousekeeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_run_after: Duration::from_secs(30 * 60),
            resume_idle_after: Duration::from_secs(2 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_invocation_fits_one_short_lived_call() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.invocation_budget, Duration::from_secs(30));
        assert!(config.probe_timeout < config.invocation_budget);
        let housekeeper = HousekeeperConfig::default();
        assert!(housekeeper.stale_run_after > config.invocation_budget);
        assert!(housekeeper.resume_idle_after > config.invocation_budget);
        assert!(housekeeper.resume_idle_after < housekeeper.stale_run_after);
    }
}

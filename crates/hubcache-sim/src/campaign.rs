//! Campaign runner for deterministic simulation campaigns.
//!
//! Executes many seeds with the same parameters, collecting pass/fail
//! results and identifying the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use hubcache_core::{CacheConfig, ConsistencyMode};
use serde::{Deserialize, Serialize};

use crate::network::FaultConfig;
use crate::oracle::InvariantViolation;
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Campaign-level configuration: which seeds to run and the simulation
/// parameters shared by all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g., `0..100`.
    pub seed_range: Range<u64>,
    pub rounds: u64,
    pub actions_per_round: u8,
    pub repository_count: usize,
    pub page_size: u32,
    pub consistency: ConsistencyMode,
    pub patch_watcher_count: bool,
    pub fault: FaultConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            rounds: sim.rounds,
            actions_per_round: sim.actions_per_round,
            repository_count: sim.repository_count,
            page_size: sim.page_size,
            consistency: sim.consistency,
            patch_watcher_count: sim.patch_watcher_count,
            fault: sim.fault,
        }
    }
}

impl CampaignConfig {
    /// Take page size and reconciliation settings from a loaded cache
    /// config, keeping everything else.
    #[must_use]
    pub fn with_cache_config(self, cache: &CacheConfig) -> Self {
        Self {
            page_size: cache.pagination.page_size,
            consistency: cache.reconcile.consistency,
            patch_watcher_count: cache.reconcile.patch_watcher_count,
            ..self
        }
    }

    /// Build a [`SimulationConfig`] for a specific seed.
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            rounds: self.rounds,
            actions_per_round: self.actions_per_round,
            repository_count: self.repository_count,
            page_size: self.page_size,
            consistency: self.consistency,
            patch_watcher_count: self.patch_watcher_count,
            fault: self.fault,
        }
    }

    /// Validate configuration before running.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

/// Failure details for a single seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that exercised a stale, conflicting, or failed response.
    pub interesting_states_reached: usize,
    /// Seeds whose cache drifted from the server before the final refetch.
    pub seeds_with_drift: usize,
}

impl CampaignReport {
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
        seeds_with_drift: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let result = replay_seed(seed, config)?;

        if result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }
        if result.drift > 0 {
            report.seeds_with_drift += 1;
        }

        if result.oracle.passed {
            report.seeds_passed += 1;
        } else {
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: result
                    .oracle
                    .violations
                    .iter()
                    .map(format_violation)
                    .collect(),
            });
        }
    }

    tracing::info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        interesting = report.interesting_states_reached,
        drifted = report.seeds_with_drift,
        "campaign finished"
    );
    Ok(report)
}

/// Replay a single seed with its full trace for debugging.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<SimulationResult> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    simulator.run()
}

/// Format an invariant violation into a human-readable string.
#[must_use]
pub fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::NegativeCounter {
            key,
            counter,
            value,
        } => {
            format!(
                "NegativeCounter: {key} {} = {value}",
                counter.field()
            )
        }
        InvariantViolation::OverlappingFetchMore { connection } => {
            format!(
                "OverlappingFetchMore: second fetch-more issued for {connection}"
            )
        }
        InvariantViolation::ConnectionDiverged {
            connection,
            cached,
            expected,
        } => {
            format!(
                "ConnectionDiverged: {connection} holds {cached:?}, server lists {expected:?}"
            )
        }
        InvariantViolation::StaleAfterRefetch {
            key,
            field,
            cached,
            server,
        } => {
            format!(
                "StaleAfterRefetch: {key} {field} cached={cached} server={server}"
            )
        }
        InvariantViolation::MissingEntity { key } => format!("MissingEntity: {key} is not cached"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubcache_core::EntityKey;

    #[test]
    fn campaign_config_default_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn campaign_config_empty_seed_range_rejected() {
        let config = CampaignConfig {
            seed_range: 5..5,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn campaign_config_zero_rounds_rejected() {
        let config = CampaignConfig {
            rounds: 0,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sim_config_for_seed_uses_correct_seed() {
        let config = CampaignConfig::default();
        assert_eq!(config.sim_config_for_seed(42).seed, 42);
    }

    #[test]
    fn cache_config_overrides_reconcile_settings() {
        let mut cache = CacheConfig::default();
        cache.pagination.page_size = 2;
        cache.reconcile.consistency = ConsistencyMode::Strict;
        let config = CampaignConfig::default().with_cache_config(&cache);
        assert_eq!(config.page_size, 2);
        assert_eq!(config.consistency, ConsistencyMode::Strict);
        assert_eq!(config.seed_range, 0..100);
    }

    #[test]
    fn small_campaign_passes_and_hits_fault_paths() {
        let config = CampaignConfig {
            seed_range: 0..20,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign runs");
        assert_eq!(report.seeds_run, 20);
        assert!(report.all_passed(), "{:?}", report.failures);
        assert_eq!(report.first_failure, None);
        assert!(report.interesting_states_reached > 0);
    }

    #[test]
    fn replay_is_deterministic() {
        let config = CampaignConfig::default();
        let a = replay_seed(7, &config).expect("replay");
        let b = replay_seed(7, &config).expect("replay");
        assert_eq!(a.trace, b.trace);
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn violations_format_with_context() {
        let key = EntityKey::repository("R_0").expect("valid");
        let text = format_violation(&InvariantViolation::StaleAfterRefetch {
            key,
            field: "stargazers.totalCount",
            cached: "6".into(),
            server: "5".into(),
        });
        assert_eq!(
            text,
            "StaleAfterRefetch: Repository:R_0 stargazers.totalCount cached=6 server=5"
        );
    }
}

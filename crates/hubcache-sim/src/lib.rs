//! hubcache-sim: deterministic simulation of a viewer clicking through
//! repositories over a faulty network.
//!
//! One seed drives everything: the generated server state, which buttons
//! the viewer presses, how long each response takes, and which requests
//! fail. Responses can arrive late, out of order, or not at all, which is
//! exactly the situation the cache's tickets and generations exist for.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for configuration and run failures;
//!   invariant failures are data ([`oracle::InvariantViolation`]), not errors.
//! - **Logging**: `tracing` macros; the binary installs the subscriber.

pub mod campaign;
pub mod network;
pub mod oracle;
pub mod rng;
pub mod server;
pub mod viewer;

use anyhow::{Result, bail};
use hubcache_core::{ConsistencyMode, FetchKind, NetworkError, Reconciler};
use serde::{Deserialize, Serialize};

use crate::network::{FaultConfig, SimulatedNetwork};
use crate::oracle::{CacheOracle, FetchMoreGuard, InvariantViolation, OracleResult};
use crate::rng::DeterministicRng;
use crate::server::SimulatedServer;
use crate::viewer::{Request, Response, Viewer, ViewerStats};

/// Parameters of one simulated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub rounds: u64,
    /// UI actions the viewer takes per round.
    pub actions_per_round: u8,
    pub repository_count: usize,
    pub page_size: u32,
    pub consistency: ConsistencyMode,
    pub patch_watcher_count: bool,
    pub fault: FaultConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            rounds: 40,
            actions_per_round: 2,
            repository_count: 3,
            page_size: 5,
            consistency: ConsistencyMode::LastWriteWins,
            patch_watcher_count: true,
            fault: FaultConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if a parameter would make the run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.repository_count == 0 {
            bail!("repository_count must be > 0");
        }
        if self.page_size == 0 {
            bail!("page_size must be > 0");
        }
        Ok(())
    }
}

/// One step of the simulation, for replay output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventKind {
    Send { request: String, delay_rounds: u8 },
    Deliver { response: String, failed: bool },
    Reordered { count: usize },
    Quiesced { drift: usize },
    Refetched,
}

/// Outcome of one seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    pub stats: ViewerStats,
    /// Fields where the cache disagreed with the server once every response
    /// was delivered, before the final refetch.
    pub drift: usize,
    pub oracle: OracleResult,
    /// Whether a stale, conflicting, or failed response was exercised.
    pub interesting_state_reached: bool,
}

/// Runs one seed end to end.
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    server: SimulatedServer,
    network: SimulatedNetwork<Response>,
    viewer: Viewer,
    guard: FetchMoreGuard,
    trace: Vec<TraceEvent>,
    violations: Vec<InvariantViolation>,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the generated server data
    /// cannot be normalized.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let mut rng = DeterministicRng::new(config.seed);
        let server = SimulatedServer::generate(config.repository_count, &mut rng);
        let reconciler = Reconciler::new(config.consistency, config.patch_watcher_count);
        let mut viewer = Viewer::new(reconciler);
        viewer.bootstrap(&server.list_repositories(), config.page_size)?;

        Ok(Self {
            config,
            rng,
            server,
            network: SimulatedNetwork::new(config.fault),
            viewer,
            guard: FetchMoreGuard::new(),
            trace: Vec::new(),
            violations: Vec::new(),
        })
    }

    /// Run every round, drain the network, refetch, and check invariants.
    ///
    /// # Errors
    ///
    /// Reserved for internal failures; invariant violations are reported in
    /// [`SimulationResult::oracle`].
    pub fn run(&mut self) -> Result<SimulationResult> {
        tracing::debug!(seed = self.config.seed, mode = ?self.config.consistency, "simulation starting");

        for round in 0..self.config.rounds {
            for _ in 0..self.config.actions_per_round {
                if let Some(request) = self.viewer.act(&mut self.rng) {
                    self.dispatch(request, round);
                }
            }

            let outcome = self.network.deliver_ready(round, &mut self.rng);
            if outcome.reordered {
                self.trace.push(TraceEvent {
                    round,
                    kind: TraceEventKind::Reordered {
                        count: outcome.delivered.len(),
                    },
                });
            }
            for response in outcome.delivered {
                self.deliver(response, round);
            }
        }

        let last_round = self.config.rounds;
        for response in self.network.drain() {
            self.deliver(response, last_round);
        }
        self.record(CacheOracle::check_connections(
            self.viewer.issue_lists(),
            self.viewer.connections(),
            &self.server,
        ));

        let drift = CacheOracle::drift(self.viewer.store(), &self.server);
        self.trace.push(TraceEvent {
            round: last_round,
            kind: TraceEventKind::Quiesced { drift },
        });
        if drift > 0 {
            tracing::debug!(seed = self.config.seed, drift, "cache drifted before refetch");
        }

        self.viewer.refetch(&self.server.list_repositories());
        self.trace.push(TraceEvent {
            round: last_round,
            kind: TraceEventKind::Refetched,
        });
        let converged = CacheOracle::check_converged(self.viewer.store(), &self.server);
        self.record(converged);

        let stats = self.viewer.stats();
        let oracle = OracleResult {
            passed: self.violations.is_empty(),
            violations: std::mem::take(&mut self.violations),
        };
        if !oracle.passed {
            tracing::warn!(seed = self.config.seed, violations = oracle.violations.len(), "invariants violated");
        }

        Ok(SimulationResult {
            seed: self.config.seed,
            trace: std::mem::take(&mut self.trace),
            stats,
            drift,
            oracle,
            interesting_state_reached: stats.interesting(),
        })
    }

    fn dispatch(&mut self, request: Request, round: u64) {
        let label;
        let response = match request {
            Request::Mutation { ticket, id } => {
                label = format!("{} {}", ticket.op(), ticket.key());
                let result = if self.network.fails_request(&mut self.rng) {
                    Err(NetworkError::new("request failed"))
                } else {
                    let payload = self.server.mutate(ticket.op(), &id);
                    self.respond(payload, "node not found")
                };
                Response::Mutation { ticket, result }
            }
            Request::Issues(page) => {
                let ticket = &page.ticket;
                label = format!("issues {} after={:?}", ticket.key(), ticket.after());
                if ticket.kind() == FetchKind::More {
                    let checked = self.guard.issued(ticket.key(), ticket.generation());
                    self.record(checked);
                }
                let result = if self.network.fails_request(&mut self.rng) {
                    Err(NetworkError::new("request failed"))
                } else {
                    let response = self.server.issues(&page.query);
                    self.respond(Some(response), "unreachable")
                };
                Response::Issues {
                    ticket: page.ticket,
                    result,
                }
            }
            Request::Repositories => {
                label = "repositories".to_string();
                let result = if self.network.fails_request(&mut self.rng) {
                    Err(NetworkError::new("request failed"))
                } else {
                    let nodes = self.server.list_repositories();
                    self.respond(Some(nodes), "unreachable")
                };
                Response::Repositories(result)
            }
        };

        let delay_rounds = self.network.send(response, round, &mut self.rng);
        tracing::trace!(round, request = %label, delay_rounds, "request sent");
        self.trace.push(TraceEvent {
            round,
            kind: TraceEventKind::Send {
                request: label,
                delay_rounds,
            },
        });
    }

    /// Turn a server answer into what the viewer will see, losing it with
    /// the configured probability.
    fn respond<T>(&mut self, answer: Option<T>, missing: &str) -> Result<T, NetworkError> {
        let answer = answer.ok_or_else(|| NetworkError::new(missing))?;
        if self.network.loses_response(&mut self.rng) {
            return Err(NetworkError::new("response lost"));
        }
        Ok(answer)
    }

    fn deliver(&mut self, response: Response, round: u64) {
        let failed = match &response {
            Response::Mutation { result, .. } => result.is_err(),
            Response::Issues { result, ticket } => {
                if ticket.kind() == FetchKind::More {
                    self.guard.settled(ticket.key(), ticket.generation());
                }
                result.is_err()
            }
            Response::Repositories(result) => result.is_err(),
        };
        self.trace.push(TraceEvent {
            round,
            kind: TraceEventKind::Deliver {
                response: response.label(),
                failed,
            },
        });

        self.viewer.receive(response);
        self.record(CacheOracle::check_counters(self.viewer.store()));
    }

    fn record(&mut self, result: OracleResult) {
        self.violations.extend(result.violations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(config: SimulationConfig) -> SimulationResult {
        let mut sim = Simulator::new(config).expect("valid config");
        sim.run().expect("run")
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SimulationConfig {
            rounds: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(config).is_err());
    }

    #[test]
    fn same_seed_same_trace() {
        let config = SimulationConfig {
            seed: 17,
            ..SimulationConfig::default()
        };
        assert_eq!(run(config), run(config));
    }

    #[test]
    fn fault_free_run_never_drifts() {
        for seed in 0..20 {
            let result = run(SimulationConfig {
                seed,
                actions_per_round: 1,
                fault: FaultConfig::none(),
                ..SimulationConfig::default()
            });
            assert!(
                result.oracle.passed,
                "seed {seed}: {:?}",
                result.oracle.violations
            );
            assert_eq!(result.drift, 0, "seed {seed}");
            assert_eq!(result.stats.stale_dropped, 0);
            assert_eq!(result.stats.network_errors, 0);
        }
    }

    #[test]
    fn faulty_runs_still_converge_after_refetch() {
        for seed in 0..30 {
            let result = run(SimulationConfig {
                seed,
                fault: FaultConfig {
                    max_delay_rounds: 4,
                    request_failure_percent: 10,
                    response_loss_percent: 10,
                    reorder_rate_percent: 50,
                },
                ..SimulationConfig::default()
            });
            assert!(
                result.oracle.passed,
                "seed {seed}: {:?}",
                result.oracle.violations
            );
        }
    }

    #[test]
    fn strict_mode_converges_too() {
        for seed in 0..30 {
            let result = run(SimulationConfig {
                seed,
                consistency: ConsistencyMode::Strict,
                ..SimulationConfig::default()
            });
            assert!(
                result.oracle.passed,
                "seed {seed}: {:?}",
                result.oracle.violations
            );
        }
    }
}

use std::collections::BTreeSet;

use hubcache_core::{
    ConnectionCache, ConnectionKey, EntityKey, EntityStore, IssueList, StarCountFragment,
    WatchFragment, read_typed,
};

use crate::server::SimulatedServer;

// ── Core result types ─────────────────────────────────────────────────────────

/// Oracle result for an invariant check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    const fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

/// Which aggregate counter of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Stargazers,
    Watchers,
}

impl Counter {
    #[must_use]
    pub const fn field(self) -> &'static str {
        match self {
            Self::Stargazers => "stargazers.totalCount",
            Self::Watchers => "watchers.totalCount",
        }
    }
}

/// Diagnostic information for a single failed invariant check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A cached counter dropped below zero.
    NegativeCounter {
        key: EntityKey,
        counter: Counter,
        value: i64,
    },

    /// A second fetch-more was issued for a connection generation while one
    /// was still in flight.
    OverlappingFetchMore { connection: ConnectionKey },

    /// A settled connection is not a prefix of the server's filtered list.
    ConnectionDiverged {
        connection: ConnectionKey,
        cached: Vec<String>,
        expected: Vec<String>,
    },

    /// After quiescence and a full refetch the cache still disagrees with
    /// the server.
    StaleAfterRefetch {
        key: EntityKey,
        field: &'static str,
        cached: String,
        server: String,
    },

    /// A repository the server knows about is not cached at all.
    MissingEntity { key: EntityKey },
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Invariant checks over a viewer's cache.
///
/// # Invariants checked
///
/// 1. **Non-negative counters** (`check_counters`) at every step.
/// 2. **No overlapping fetch-more** (`FetchMoreGuard`) at every request.
/// 3. **Connections are server prefixes** (`check_connections`) once settled.
/// 4. **Convergence** (`check_converged`) after quiescence and a refetch.
pub struct CacheOracle;

impl CacheOracle {
    /// Every cached star and watcher counter is `>= 0`.
    #[must_use]
    pub fn check_counters(store: &EntityStore) -> OracleResult {
        let mut violations = Vec::new();

        for key in store.keys() {
            if let Some(stars) = read_typed::<StarCountFragment>(store, key)
                .ok()
                .filter(|stars| stars.total_count < 0)
            {
                violations.push(InvariantViolation::NegativeCounter {
                    key: key.clone(),
                    counter: Counter::Stargazers,
                    value: stars.total_count,
                });
            }
            if let Some(watch) = read_typed::<WatchFragment>(store, key)
                .ok()
                .filter(|watch| watch.total_count < 0)
            {
                violations.push(InvariantViolation::NegativeCounter {
                    key: key.clone(),
                    counter: Counter::Watchers,
                    value: watch.total_count,
                });
            }
        }

        OracleResult::from_violations(violations)
    }

    /// Every connection not currently loading holds exactly the first
    /// `len` issues the server would list under the same filter.
    #[must_use]
    pub fn check_connections<'a>(
        lists: impl IntoIterator<Item = &'a IssueList>,
        connections: &ConnectionCache,
        server: &SimulatedServer,
    ) -> OracleResult {
        let mut violations = Vec::new();

        for list in lists {
            let Some(state) = list.filter().issue_state() else {
                continue;
            };
            let key = ConnectionKey::issues(list.repository().clone(), state);
            if connections.is_loading(&key) {
                continue;
            }
            let Some(connection) = connections.get(&key) else {
                continue;
            };
            let Some(repo) = server.repository(list.repository().id()) else {
                continue;
            };

            let cached: Vec<String> = connection
                .nodes()
                .map(|node| node.id().to_string())
                .collect();
            let expected: Vec<String> = repo
                .issue_ids(state)
                .take(cached.len())
                .map(str::to_string)
                .collect();

            if cached != expected {
                violations.push(InvariantViolation::ConnectionDiverged {
                    connection: key,
                    cached,
                    expected,
                });
            }
        }

        OracleResult::from_violations(violations)
    }

    /// Cached star and watch fragments equal the server's for every
    /// repository.
    #[must_use]
    pub fn check_converged(store: &EntityStore, server: &SimulatedServer) -> OracleResult {
        OracleResult::from_violations(Self::divergence(store, server))
    }

    /// Number of counter/flag fields where the cache disagrees with the
    /// server. Reported as drift before the final refetch.
    #[must_use]
    pub fn drift(store: &EntityStore, server: &SimulatedServer) -> usize {
        Self::divergence(store, server).len()
    }

    fn divergence(store: &EntityStore, server: &SimulatedServer) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for repo in server.repositories() {
            let Ok(key) = EntityKey::repository(&repo.id) else {
                continue;
            };
            let (Ok(stars), Ok(watch)) = (
                read_typed::<StarCountFragment>(store, &key),
                read_typed::<WatchFragment>(store, &key),
            ) else {
                violations.push(InvariantViolation::MissingEntity { key });
                continue;
            };

            let mut compare = |field: &'static str, cached: String, server: String| {
                if cached != server {
                    violations.push(InvariantViolation::StaleAfterRefetch {
                        key: key.clone(),
                        field,
                        cached,
                        server,
                    });
                }
            };
            compare(
                Counter::Stargazers.field(),
                stars.total_count.to_string(),
                repo.stargazers.to_string(),
            );
            compare(
                "viewerHasStarred",
                stars.viewer_has_starred.to_string(),
                repo.viewer_has_starred.to_string(),
            );
            compare(
                Counter::Watchers.field(),
                watch.total_count.to_string(),
                repo.watchers.to_string(),
            );
            compare(
                "viewerSubscription",
                watch
                    .viewer_subscription
                    .map_or_else(|| "null".to_string(), |s| s.to_string()),
                repo.viewer_subscription.to_string(),
            );
        }

        violations
    }
}

/// Tracks fetch-more requests in flight per connection generation.
#[derive(Debug, Clone, Default)]
pub struct FetchMoreGuard {
    in_flight: BTreeSet<(ConnectionKey, u64)>,
}

impl FetchMoreGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issued fetch-more; a violation if one is already in flight
    /// for the same generation.
    pub fn issued(&mut self, key: &ConnectionKey, generation: u64) -> OracleResult {
        if self.in_flight.insert((key.clone(), generation)) {
            OracleResult::pass()
        } else {
            OracleResult::from_violations(vec![InvariantViolation::OverlappingFetchMore {
                connection: key.clone(),
            }])
        }
    }

    pub fn settled(&mut self, key: &ConnectionKey, generation: u64) {
        self.in_flight.remove(&(key.clone(), generation));
    }
}

//! The simulated client session: one entity store, its connections, the
//! reconciler, and an issue list per repository.
//!
//! The viewer decides what to click from its *cached* view, exactly like a
//! UI would: the star button reads the cached `viewerHasStarred`, the watch
//! button the cached subscription.

use std::collections::BTreeMap;

use hubcache_core::api::{IssuesResponse, MutationOp, RepositoryNode, SubscriptionState};
use hubcache_core::normalize::write_repository;
use hubcache_core::{
    CacheError, ConnectionCache, EntityKey, EntityStore, FetchOutcome, FetchTicket, IssueList,
    IssuePageRequest, MutationTicket, NetworkError, ReconcileOutcome, Reconciler,
    StarCountFragment, WatchFragment, read_typed,
};
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;
use crate::server::MutationPayload;

/// A request on its way to the server.
#[derive(Debug, Clone)]
pub enum Request {
    Mutation { ticket: MutationTicket, id: String },
    Issues(IssuePageRequest),
    Repositories,
}

/// A response on its way back to the viewer.
#[derive(Debug, Clone)]
pub enum Response {
    Mutation {
        ticket: MutationTicket,
        result: Result<MutationPayload, NetworkError>,
    },
    Issues {
        ticket: FetchTicket,
        result: Result<IssuesResponse, NetworkError>,
    },
    Repositories(Result<Vec<RepositoryNode>, NetworkError>),
}

impl Response {
    /// Short label for traces.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Mutation { ticket, .. } => format!("{} {}", ticket.op(), ticket.key()),
            Self::Issues { ticket, .. } => {
                format!("issues {} after={:?}", ticket.key(), ticket.after())
            }
            Self::Repositories(_) => "repositories".to_string(),
        }
    }
}

/// Counters of what happened to the responses the viewer received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerStats {
    pub mutations_issued: usize,
    pub mutations_applied: usize,
    pub pages_requested: usize,
    pub pages_merged: usize,
    pub stale_dropped: usize,
    pub version_conflicts: usize,
    pub not_found: usize,
    pub network_errors: usize,
    pub fetch_more_blocked: usize,
    pub refetches: usize,
}

impl ViewerStats {
    /// Whether the run exercised at least one race or failure path.
    #[must_use]
    pub const fn interesting(&self) -> bool {
        self.stale_dropped > 0 || self.version_conflicts > 0 || self.network_errors > 0
    }
}

#[derive(Debug)]
pub struct Viewer {
    store: EntityStore,
    connections: ConnectionCache,
    reconciler: Reconciler,
    lists: BTreeMap<EntityKey, IssueList>,
    refetch_requested: bool,
    stats: ViewerStats,
}

impl Viewer {
    #[must_use]
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            store: EntityStore::new(),
            connections: ConnectionCache::new(),
            reconciler,
            lists: BTreeMap::new(),
            refetch_requested: false,
            stats: ViewerStats::default(),
        }
    }

    /// Normalize the initial repository list and create an issue list for
    /// every repository in it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] for a repository with an empty id.
    pub fn bootstrap(
        &mut self,
        repositories: &[RepositoryNode],
        page_size: u32,
    ) -> Result<(), CacheError> {
        for node in repositories {
            let key = write_repository(&mut self.store, node)?;
            let owner = node
                .owner
                .as_ref()
                .map_or_else(String::new, |o| o.login.clone());
            let list = IssueList::new(owner, node.name.clone(), key.clone(), page_size);
            self.lists.insert(key, list);
        }
        Ok(())
    }

    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    #[must_use]
    pub const fn connections(&self) -> &ConnectionCache {
        &self.connections
    }

    pub fn issue_lists(&self) -> impl Iterator<Item = &IssueList> {
        self.lists.values()
    }

    #[must_use]
    pub const fn stats(&self) -> ViewerStats {
        self.stats
    }

    /// Pick one UI action and return the request it issues, if any.
    pub fn act(&mut self, rng: &mut DeterministicRng) -> Option<Request> {
        if std::mem::take(&mut self.refetch_requested) {
            self.stats.refetches += 1;
            return Some(Request::Repositories);
        }

        let keys: Vec<EntityKey> = self.lists.keys().cloned().collect();
        let key = rng.pick(&keys)?.clone();

        match rng.next_bounded(4) {
            0 => self.toggle_star(key),
            1 => self.toggle_watch(key),
            2 => self.advance_filter(&key),
            _ => self.fetch_more(&key),
        }
    }

    fn toggle_star(&mut self, key: EntityKey) -> Option<Request> {
        let current: StarCountFragment = read_typed(&self.store, &key).ok()?;
        let op = if current.viewer_has_starred {
            MutationOp::RemoveStar
        } else {
            MutationOp::AddStar
        };
        Some(self.mutation(key, op, current.id))
    }

    fn toggle_watch(&mut self, key: EntityKey) -> Option<Request> {
        let current: WatchFragment = read_typed(&self.store, &key).ok()?;
        let watching = current
            .viewer_subscription
            .is_some_and(SubscriptionState::is_watching);
        let op = if watching {
            MutationOp::Unsubscribe
        } else {
            MutationOp::Subscribe
        };
        Some(self.mutation(key, op, current.id))
    }

    fn mutation(&mut self, key: EntityKey, op: MutationOp, id: String) -> Request {
        let ticket = self.reconciler.begin(&self.store, key, op);
        self.stats.mutations_issued += 1;
        Request::Mutation { ticket, id }
    }

    fn advance_filter(&mut self, key: &EntityKey) -> Option<Request> {
        let list = self.lists.get_mut(key)?;
        let request = list.advance(&mut self.connections)?;
        self.stats.pages_requested += 1;
        Some(Request::Issues(request))
    }

    fn fetch_more(&mut self, key: &EntityKey) -> Option<Request> {
        let list = self.lists.get(key)?;
        match list.fetch_more(&mut self.connections) {
            Ok(request) => {
                self.stats.pages_requested += 1;
                Some(Request::Issues(request))
            }
            Err(CacheError::FetchInFlight(_)) => {
                self.stats.fetch_more_blocked += 1;
                None
            }
            Err(_) => None,
        }
    }

    /// Fold a delivered response into the cache.
    pub fn receive(&mut self, response: Response) {
        match response {
            Response::Mutation { ticket, result } => self.receive_mutation(ticket, result),
            Response::Issues { ticket, result } => {
                let merged =
                    IssueList::receive(&mut self.store, &mut self.connections, &ticket, result);
                match merged {
                    Ok(FetchOutcome::Merged { .. }) => self.stats.pages_merged += 1,
                    Ok(FetchOutcome::Stale) => self.stats.stale_dropped += 1,
                    Ok(FetchOutcome::Unchanged) => {}
                    Err(e) => self.record_error(&e),
                }
            }
            Response::Repositories(Ok(nodes)) => self.refetch(&nodes),
            Response::Repositories(Err(e)) => {
                self.stats.network_errors += 1;
                tracing::warn!(error = %e, "repository refetch failed");
                self.refetch_requested = true;
            }
        }
    }

    fn receive_mutation(
        &mut self,
        ticket: MutationTicket,
        result: Result<MutationPayload, NetworkError>,
    ) {
        let outcome = match result {
            Ok(MutationPayload::Star(starrable)) => {
                self.reconciler
                    .complete_star(&mut self.store, ticket, Ok(starrable))
            }
            Ok(MutationPayload::Subscription(subscribable)) => {
                self.reconciler
                    .complete_subscription(&mut self.store, ticket, Ok(subscribable))
            }
            Err(e) if ticket.op().is_star() => {
                self.reconciler
                    .complete_star(&mut self.store, ticket, Err(e))
            }
            Err(e) => self
                .reconciler
                .complete_subscription(&mut self.store, ticket, Err(e)),
        };

        match outcome {
            Ok(ReconcileOutcome::Applied { .. }) => self.stats.mutations_applied += 1,
            Ok(ReconcileOutcome::Stale) => self.stats.stale_dropped += 1,
            Err(e) => self.record_error(&e),
        }
    }

    fn record_error(&mut self, error: &CacheError) {
        match error {
            CacheError::VersionConflict { .. } => {
                self.stats.version_conflicts += 1;
                self.refetch_requested = true;
            }
            CacheError::NotFound(_) => self.stats.not_found += 1,
            CacheError::Network(_) => self.stats.network_errors += 1,
            other => tracing::warn!(code = %other.code(), error = %other, "unexpected cache error"),
        }
    }

    /// Overwrite cached repositories with authoritative nodes.
    pub fn refetch(&mut self, nodes: &[RepositoryNode]) {
        for node in nodes {
            if let Err(e) = write_repository(&mut self.store, node) {
                tracing::warn!(id = %node.id, error = %e, "skipping malformed repository");
            }
        }
    }
}

//! Mutation reconciliation.
//!
//! After a mutation succeeds, the cache has to reflect it without refetching
//! the lists the entity appears in. Two strategies are used:
//!
//! - **Cache patch** (add/remove star): the response only echoes
//!   `viewerHasStarred`, so the star counter is derived locally. The current
//!   [`StarCountFragment`] is read, adjusted by ±1 when the flag flips, and
//!   written back. If the entity is not cached the patch is skipped and
//!   [`CacheError::NotFound`] is reported; nothing is created.
//! - **Pass-through** (subscribe/unsubscribe): the response's
//!   `viewerSubscription` is written as-is onto the cached entity. When
//!   watcher patching is enabled, the watcher counter is adjusted the same
//!   way the star counter is. An uncached entity is reported as
//!   [`CacheError::NotFound`] and left absent, so a later star patch on the
//!   same key degrades the same way instead of meeting a partial entity.
//!
//! A cached entity missing the fragment a patch needs (it was normalized
//! from a selection without the counter) is treated like an absent one.
//!
//! A successful response that does not flip the flag (the viewer already
//! starred the repository) leaves the counter alone.
//!
//! # In-flight tracking
//!
//! [`Reconciler::begin`] hands out a [`MutationTicket`] per issued mutation.
//! Tickets are numbered per `(entity, operation)`; once a newer ticket has
//! been applied, completions of older ones are dropped as stale. In
//! [`ConsistencyMode::Strict`] a completion is also rejected with
//! [`CacheError::VersionConflict`] if the entity was written after the
//! ticket was issued; [`ConsistencyMode::LastWriteWins`] applies it anyway.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::api::{MutationOp, Starrable, Subscribable, SubscriptionState};
use crate::config::ReconcileConfig;
use crate::error::{CacheError, NetworkError};
use crate::fragment::{
    Fragment, StarCountFragment, WatchFragment, read_typed, write_typed, write_typed_if_version,
};
use crate::model::{EntityKey, Value, Version, fields};
use crate::store::EntityStore;

/// How completions that raced with other writes are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyMode {
    /// Apply every non-stale completion; the last response to arrive wins.
    #[default]
    LastWriteWins,
    /// Reject completions whose entity changed since the mutation was issued.
    Strict,
}

/// A mutation that has been issued but not yet completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationTicket {
    key: EntityKey,
    op: MutationOp,
    generation: u64,
    observed: Option<Version>,
}

impl MutationTicket {
    #[must_use]
    pub const fn key(&self) -> &EntityKey {
        &self.key
    }

    #[must_use]
    pub const fn op(&self) -> MutationOp {
        self.op
    }

    /// Entity version when the mutation was issued (`None` if not cached).
    #[must_use]
    pub const fn observed(&self) -> Option<Version> {
        self.observed
    }
}

/// Result of applying a mutation response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The response was written; `delta` is the counter adjustment (0 when
    /// the flag did not flip or no counter was patched).
    Applied { version: Version, delta: i64 },
    /// A newer completion for the same entity and operation already landed.
    Stale,
}

impl ReconcileOutcome {
    /// Counter adjustment of an applied response; `None` when stale.
    #[must_use]
    pub const fn delta(self) -> Option<i64> {
        match self {
            Self::Applied { delta, .. } => Some(delta),
            Self::Stale => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

const fn flip_delta(before: bool, after: bool) -> i64 {
    match (before, after) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    }
}

fn next_star_count(current: StarCountFragment, starrable: &Starrable) -> (StarCountFragment, i64) {
    let delta = flip_delta(current.viewer_has_starred, starrable.viewer_has_starred);
    let next = StarCountFragment {
        id: current.id,
        total_count: current.total_count.saturating_add(delta).max(0),
        viewer_has_starred: starrable.viewer_has_starred,
    };
    (next, delta)
}

/// Read a patchable fragment, folding a missing field into `NotFound`.
fn read_patchable<F: Fragment>(
    store: &EntityStore,
    key: &EntityKey,
    patch: &'static str,
) -> Result<F, CacheError> {
    read_typed(store, key).map_err(|e| {
        tracing::warn!(%key, patch, error = %e, "skipping counter patch");
        match e {
            CacheError::ShapeMismatch { problem, .. } if problem == "missing" => {
                CacheError::NotFound(key.clone())
            }
            e => e,
        }
    })
}

fn read_star_count(store: &EntityStore, key: &EntityKey) -> Result<StarCountFragment, CacheError> {
    read_patchable(store, key, "star count")
}

/// Apply an add/remove star response with the cache-patch strategy.
///
/// # Errors
///
/// Returns [`CacheError::NotFound`] (logged, nothing written) if the
/// starrable is not cached or is cached without its star counter, and
/// [`CacheError::ShapeMismatch`] if a cached counter has the wrong type.
pub fn patch_star_count(
    store: &mut EntityStore,
    starrable: &Starrable,
) -> Result<ReconcileOutcome, CacheError> {
    let key = EntityKey::repository(&starrable.id)?;
    let current = read_star_count(store, &key)?;
    let (next, delta) = next_star_count(current, starrable);
    let version = write_typed(store, &key, &next)?;
    tracing::debug!(%key, delta, total = next.total_count, "star count patched");
    Ok(ReconcileOutcome::Applied { version, delta })
}

/// Apply an update-subscription response with the pass-through strategy.
///
/// `viewerSubscription` is written onto the cached entity. With
/// `patch_watchers`, a cached watcher counter is adjusted when the viewer
/// starts or stops watching.
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] if the response id is empty and
/// [`CacheError::NotFound`] (logged, nothing written) if the subscribable
/// is not cached.
pub fn apply_subscription(
    store: &mut EntityStore,
    subscribable: &Subscribable,
    patch_watchers: bool,
) -> Result<ReconcileOutcome, CacheError> {
    let key = EntityKey::repository(&subscribable.id)?;
    if !store.contains(&key) {
        tracing::warn!(%key, "skipping subscription write for uncached entity");
        return Err(CacheError::NotFound(key));
    }

    let previous = if patch_watchers {
        match read_typed::<WatchFragment>(store, &key) {
            Ok(watch) => Some(watch),
            Err(e @ CacheError::ShapeMismatch { .. }) => {
                tracing::debug!(%key, error = %e, "no watcher count to patch");
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    let watching_after = subscribable
        .viewer_subscription
        .is_some_and(SubscriptionState::is_watching);

    if let Some(previous) = previous {
        let watching_before = previous
            .viewer_subscription
            .is_some_and(SubscriptionState::is_watching);
        let delta = flip_delta(watching_before, watching_after);
        let next = WatchFragment {
            id: previous.id,
            total_count: previous.total_count.saturating_add(delta).max(0),
            viewer_subscription: subscribable.viewer_subscription,
        };
        let version = write_typed(store, &key, &next)?;
        tracing::debug!(%key, delta, total = next.total_count, "watcher count patched");
        return Ok(ReconcileOutcome::Applied { version, delta });
    }

    let state = subscribable
        .viewer_subscription
        .map(SubscriptionState::as_str);
    let version = store.write(
        &key,
        fields([
            ("id", Value::from(subscribable.id.as_str())),
            ("viewerSubscription", Value::from(state)),
        ]),
    );
    Ok(ReconcileOutcome::Applied { version, delta: 0 })
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Tracks issued mutations and applies their responses.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    mode: ConsistencyMode,
    patch_watcher_count: bool,
    next_generation: u64,
    applied: HashMap<(EntityKey, MutationOp), u64>,
    pending: HashMap<(EntityKey, MutationOp), usize>,
}

impl Reconciler {
    #[must_use]
    pub fn new(mode: ConsistencyMode, patch_watcher_count: bool) -> Self {
        Self {
            mode,
            patch_watcher_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.consistency, config.patch_watcher_count)
    }

    #[must_use]
    pub const fn mode(&self) -> ConsistencyMode {
        self.mode
    }

    /// Register a mutation about to be sent for `key`.
    pub fn begin(&mut self, store: &EntityStore, key: EntityKey, op: MutationOp) -> MutationTicket {
        self.next_generation += 1;
        *self.pending.entry((key.clone(), op)).or_default() += 1;
        let observed = store.version(&key);
        tracing::debug!(%key, %op, generation = self.next_generation, "mutation issued");
        MutationTicket {
            key,
            op,
            generation: self.next_generation,
            observed,
        }
    }

    /// Whether any mutation for `key` is still awaiting its response.
    #[must_use]
    pub fn in_flight(&self, key: &EntityKey) -> bool {
        self.pending
            .iter()
            .any(|((pending_key, _), count)| pending_key == key && *count > 0)
    }

    /// Apply the response of an add/remove star mutation.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Network`] if `result` is a transport failure.
    /// - [`CacheError::NotFound`] if the repository is not cached.
    /// - [`CacheError::VersionConflict`] in strict mode when the entity
    ///   changed since the ticket was issued.
    pub fn complete_star(
        &mut self,
        store: &mut EntityStore,
        ticket: MutationTicket,
        result: Result<Starrable, NetworkError>,
    ) -> Result<ReconcileOutcome, CacheError> {
        let Some(starrable) = self.settle(&ticket, result)? else {
            return Ok(ReconcileOutcome::Stale);
        };

        let key = EntityKey::repository(&starrable.id)?;
        let current = read_star_count(store, &key)?;
        let (next, delta) = next_star_count(current, &starrable);

        let version = match (self.mode, ticket.observed) {
            (ConsistencyMode::LastWriteWins, _) => write_typed(store, &key, &next)?,
            (ConsistencyMode::Strict, Some(expected)) => {
                write_typed_if_version(store, &key, &next, expected).inspect_err(|e| {
                    tracing::warn!(%key, op = %ticket.op, error = %e, "rejecting racing star response");
                })?
            }
            (ConsistencyMode::Strict, None) => {
                let actual = store.version(&key).unwrap_or_default();
                tracing::warn!(%key, op = %ticket.op, "entity appeared after star was issued");
                return Err(CacheError::VersionConflict {
                    key,
                    expected: Version::ZERO,
                    actual,
                });
            }
        };

        self.applied
            .insert((ticket.key, ticket.op), ticket.generation);
        tracing::debug!(%key, delta, total = next.total_count, "star count patched");
        Ok(ReconcileOutcome::Applied { version, delta })
    }

    /// Apply the response of an update-subscription mutation.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Network`] if `result` is a transport failure.
    /// - [`CacheError::VersionConflict`] in strict mode when the entity
    ///   changed since the ticket was issued.
    pub fn complete_subscription(
        &mut self,
        store: &mut EntityStore,
        ticket: MutationTicket,
        result: Result<Subscribable, NetworkError>,
    ) -> Result<ReconcileOutcome, CacheError> {
        let Some(subscribable) = self.settle(&ticket, result)? else {
            return Ok(ReconcileOutcome::Stale);
        };

        if self.mode == ConsistencyMode::Strict {
            let actual = store.version(&ticket.key);
            if actual != ticket.observed {
                tracing::warn!(key = %ticket.key, op = %ticket.op, "rejecting racing subscription response");
                return Err(CacheError::VersionConflict {
                    key: ticket.key,
                    expected: ticket.observed.unwrap_or_default(),
                    actual: actual.unwrap_or_default(),
                });
            }
        }

        let outcome = apply_subscription(store, &subscribable, self.patch_watcher_count)?;
        self.applied
            .insert((ticket.key, ticket.op), ticket.generation);
        Ok(outcome)
    }

    /// Retire the ticket and decide whether its payload should be applied.
    ///
    /// `Ok(None)` means stale.
    fn settle<T>(
        &mut self,
        ticket: &MutationTicket,
        result: Result<T, NetworkError>,
    ) -> Result<Option<T>, CacheError> {
        let slot = (ticket.key.clone(), ticket.op);
        if let Some(count) = self.pending.get_mut(&slot) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(&slot);
            }
        }

        let payload = result.inspect_err(|e| {
            tracing::warn!(key = %ticket.key, op = %ticket.op, error = %e, "mutation failed");
        })?;

        if self
            .applied
            .get(&slot)
            .is_some_and(|&latest| latest > ticket.generation)
        {
            tracing::debug!(key = %ticket.key, op = %ticket.op, generation = ticket.generation, "dropping stale mutation response");
            return Ok(None);
        }
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::insert_path;

    fn repo_key() -> EntityKey {
        EntityKey::repository("R1").expect("valid")
    }

    fn seeded(stars: i64, starred: bool) -> EntityStore {
        let mut store = EntityStore::new();
        let mut repo = fields([
            ("id", Value::from("R1")),
            ("viewerHasStarred", Value::Bool(starred)),
            ("viewerSubscription", Value::from("UNSUBSCRIBED")),
        ]);
        insert_path(&mut repo, "stargazers.totalCount", Value::Int(stars));
        insert_path(&mut repo, "watchers.totalCount", Value::Int(1));
        store.write(&repo_key(), repo);
        store
    }

    fn starrable(starred: bool) -> Starrable {
        Starrable {
            id: "R1".into(),
            viewer_has_starred: starred,
        }
    }

    fn stars(store: &EntityStore) -> StarCountFragment {
        read_typed(store, &repo_key()).expect("cached")
    }

    #[test]
    fn star_increments_and_sets_flag() {
        let mut store = seeded(5, false);
        let outcome = patch_star_count(&mut store, &starrable(true)).expect("patched");
        assert_eq!(outcome.delta(), Some(1));
        assert_eq!(stars(&store).total_count, 6);
        assert!(stars(&store).viewer_has_starred);
    }

    #[test]
    fn unstar_mirrors_star() {
        let mut store = seeded(6, true);
        patch_star_count(&mut store, &starrable(false)).expect("patched");
        assert_eq!(
            stars(&store),
            StarCountFragment {
                id: "R1".into(),
                total_count: 5,
                viewer_has_starred: false,
            }
        );
    }

    #[test]
    fn repeated_star_does_not_double_count() {
        let mut store = seeded(5, false);
        patch_star_count(&mut store, &starrable(true)).expect("first");
        let outcome = patch_star_count(&mut store, &starrable(true)).expect("second");
        assert_eq!(outcome.delta(), Some(0));
        assert_eq!(stars(&store).total_count, 6);
    }

    #[test]
    fn counter_never_goes_negative() {
        let mut store = seeded(0, true);
        patch_star_count(&mut store, &starrable(false)).expect("patched");
        assert_eq!(stars(&store).total_count, 0);
    }

    #[test]
    fn counter_saturates_at_max() {
        let mut store = seeded(i64::MAX, false);
        let outcome = patch_star_count(&mut store, &starrable(true)).expect("patched");
        assert_eq!(outcome.delta(), Some(1));
        assert_eq!(stars(&store).total_count, i64::MAX);
        assert!(stars(&store).viewer_has_starred);
    }

    #[test]
    fn star_on_uncached_entity_creates_nothing() {
        let mut store = EntityStore::new();
        let err = patch_star_count(&mut store, &starrable(true)).expect_err("absent");
        assert_eq!(err, CacheError::NotFound(repo_key()));
        assert!(store.is_empty());
    }

    #[test]
    fn star_on_entity_without_counter_is_not_found() {
        let mut store = EntityStore::new();
        store.write(&repo_key(), fields([("id", "R1"), ("name", "hubcache")]));
        let err = patch_star_count(&mut store, &starrable(true)).expect_err("no counter");
        assert_eq!(err, CacheError::NotFound(repo_key()));
        assert!(err.is_degraded());
        let entity = store.read(&repo_key()).expect("cached");
        assert_eq!(entity.get("viewerHasStarred"), None);
    }

    #[test]
    fn subscription_passes_through_and_patches_watchers() {
        let mut store = seeded(5, false);
        let sub = Subscribable {
            id: "R1".into(),
            viewer_subscription: Some(SubscriptionState::Subscribed),
        };
        let outcome = apply_subscription(&mut store, &sub, true).expect("applied");
        assert_eq!(outcome.delta(), Some(1));

        let watch: WatchFragment = read_typed(&store, &repo_key()).expect("cached");
        assert_eq!(watch.total_count, 2);
        assert_eq!(
            watch.viewer_subscription,
            Some(SubscriptionState::Subscribed)
        );
    }

    #[test]
    fn subscription_without_watcher_patch_only_writes_state() {
        let mut store = seeded(5, false);
        let sub = Subscribable {
            id: "R1".into(),
            viewer_subscription: Some(SubscriptionState::Subscribed),
        };
        apply_subscription(&mut store, &sub, false).expect("applied");
        let watch: WatchFragment = read_typed(&store, &repo_key()).expect("cached");
        assert_eq!(watch.total_count, 1);
        assert_eq!(
            watch.viewer_subscription,
            Some(SubscriptionState::Subscribed)
        );
    }

    #[test]
    fn watcher_counter_saturates_at_max() {
        let mut store = seeded(5, false);
        let full = WatchFragment {
            id: "R1".into(),
            total_count: i64::MAX,
            viewer_subscription: Some(SubscriptionState::Unsubscribed),
        };
        write_typed(&mut store, &repo_key(), &full).expect("seed");
        let sub = Subscribable {
            id: "R1".into(),
            viewer_subscription: Some(SubscriptionState::Subscribed),
        };
        let outcome = apply_subscription(&mut store, &sub, true).expect("applied");
        assert_eq!(outcome.delta(), Some(1));
        let watch: WatchFragment = read_typed(&store, &repo_key()).expect("cached");
        assert_eq!(watch.total_count, i64::MAX);
    }

    #[test]
    fn subscription_for_uncached_entity_creates_nothing() {
        let mut store = EntityStore::new();
        let sub = Subscribable {
            id: "R1".into(),
            viewer_subscription: Some(SubscriptionState::Ignored),
        };
        let err = apply_subscription(&mut store, &sub, true).expect_err("absent");
        assert_eq!(err, CacheError::NotFound(repo_key()));
        assert!(store.is_empty());
    }

    #[test]
    fn star_after_uncached_subscription_degrades_to_not_found() {
        let mut store = EntityStore::new();
        let mut reconciler = Reconciler::new(ConsistencyMode::LastWriteWins, true);

        let subscribe = reconciler.begin(&store, repo_key(), MutationOp::Subscribe);
        let sub = Subscribable {
            id: "R1".into(),
            viewer_subscription: Some(SubscriptionState::Subscribed),
        };
        let err = reconciler
            .complete_subscription(&mut store, subscribe, Ok(sub))
            .expect_err("absent");
        assert_eq!(err, CacheError::NotFound(repo_key()));

        let star = reconciler.begin(&store, repo_key(), MutationOp::AddStar);
        let err = reconciler
            .complete_star(&mut store, star, Ok(starrable(true)))
            .expect_err("absent");
        assert_eq!(err, CacheError::NotFound(repo_key()));
        assert!(err.is_degraded());
        assert!(store.is_empty());
        assert!(!reconciler.in_flight(&repo_key()));
    }

    #[test]
    fn older_completion_after_newer_is_stale() {
        let mut store = seeded(5, false);
        let mut reconciler = Reconciler::new(ConsistencyMode::LastWriteWins, true);

        let first = reconciler.begin(&store, repo_key(), MutationOp::AddStar);
        let second = reconciler.begin(&store, repo_key(), MutationOp::AddStar);
        assert!(reconciler.in_flight(&repo_key()));

        reconciler
            .complete_star(&mut store, second, Ok(starrable(true)))
            .expect("second");
        let outcome = reconciler
            .complete_star(&mut store, first, Ok(starrable(true)))
            .expect("first");
        assert_eq!(outcome, ReconcileOutcome::Stale);
        assert!(!reconciler.in_flight(&repo_key()));
        assert_eq!(stars(&store).total_count, 6);
    }

    #[test]
    fn failed_newer_completion_does_not_block_older() {
        let mut store = seeded(5, false);
        let mut reconciler = Reconciler::default();

        let first = reconciler.begin(&store, repo_key(), MutationOp::AddStar);
        let second = reconciler.begin(&store, repo_key(), MutationOp::AddStar);

        let err = reconciler
            .complete_star(&mut store, second, Err(NetworkError::new("reset")))
            .expect_err("network");
        assert!(matches!(err, CacheError::Network(_)));
        reconciler
            .complete_star(&mut store, first, Ok(starrable(true)))
            .expect("first applies");
        assert_eq!(stars(&store).total_count, 6);
    }

    #[test]
    fn last_write_wins_applies_racing_responses() {
        let mut store = seeded(5, false);
        let mut reconciler = Reconciler::new(ConsistencyMode::LastWriteWins, true);

        let star = reconciler.begin(&store, repo_key(), MutationOp::AddStar);
        let unstar = reconciler.begin(&store, repo_key(), MutationOp::RemoveStar);

        reconciler
            .complete_star(&mut store, star, Ok(starrable(true)))
            .expect("star");
        reconciler
            .complete_star(&mut store, unstar, Ok(starrable(false)))
            .expect("unstar");
        assert_eq!(stars(&store).total_count, 5);
        assert!(!stars(&store).viewer_has_starred);
    }

    #[test]
    fn strict_mode_rejects_response_after_interleaved_write() {
        let mut store = seeded(5, false);
        let mut reconciler = Reconciler::new(ConsistencyMode::Strict, true);

        let star = reconciler.begin(&store, repo_key(), MutationOp::AddStar);
        let unstar = reconciler.begin(&store, repo_key(), MutationOp::RemoveStar);

        reconciler
            .complete_star(&mut store, star, Ok(starrable(true)))
            .expect("first lands");
        let err = reconciler
            .complete_star(&mut store, unstar, Ok(starrable(false)))
            .expect_err("raced");
        assert!(matches!(err, CacheError::VersionConflict { .. }));
        assert!(err.is_degraded());
        assert_eq!(stars(&store).total_count, 6);
    }

    #[test]
    fn strict_subscription_rejects_interleaved_write() {
        let mut store = seeded(5, false);
        let mut reconciler = Reconciler::new(ConsistencyMode::Strict, true);
        let ticket = reconciler.begin(&store, repo_key(), MutationOp::Subscribe);
        store.write(&repo_key(), fields([("name", "renamed")]));

        let err = reconciler
            .complete_subscription(
                &mut store,
                ticket,
                Ok(Subscribable {
                    id: "R1".into(),
                    viewer_subscription: Some(SubscriptionState::Subscribed),
                }),
            )
            .expect_err("raced");
        assert!(matches!(err, CacheError::VersionConflict { .. }));
    }

    #[test]
    fn from_config_takes_consistency_mode() {
        let config = ReconcileConfig {
            consistency: ConsistencyMode::Strict,
            ..ReconcileConfig::default()
        };
        assert_eq!(
            Reconciler::from_config(&config).mode(),
            ConsistencyMode::Strict
        );
    }

    #[test]
    fn consistency_mode_uses_kebab_case() {
        let mode: ConsistencyMode = serde_json::from_str("\"last-write-wins\"").expect("decode");
        assert_eq!(mode, ConsistencyMode::LastWriteWins);
        assert_eq!(
            serde_json::to_string(&ConsistencyMode::Strict).expect("encode"),
            "\"strict\""
        );
    }
}

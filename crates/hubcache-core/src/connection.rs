//! Per-list connection slots with loading guards and generations.
//!
//! Each list field instance (parent entity + field + filter) owns one slot
//! in the [`ConnectionCache`]. A slot tracks the accumulated [`Connection`],
//! whether a fetch is pending, and a generation number.
//!
//! Fetches are split in two halves because the transport is asynchronous:
//!
//! 1. [`ConnectionCache::begin_load`] / [`ConnectionCache::begin_fetch_more`]
//!    mark the slot as loading and hand back a [`FetchTicket`] carrying the
//!    `after` cursor to request.
//! 2. [`ConnectionCache::complete`] takes the ticket and the transport
//!    result, clears the loading flag, and merges the page.
//!
//! Generations are drawn from a cache-wide counter. Resetting or discarding
//! a slot retires its generation, so a response that arrives for a slot the
//! user has since navigated away from is recognized as stale and dropped.

use std::collections::BTreeMap;
use std::fmt;

use crate::api::IssueState;
use crate::error::{CacheError, NetworkError};
use crate::model::EntityKey;
use crate::pagination::{Connection, merge_page};

/// Identity of one list field instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub parent: EntityKey,
    pub field: String,
    pub filter: String,
}

impl ConnectionKey {
    #[must_use]
    pub fn new(parent: EntityKey, field: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            parent,
            field: field.into(),
            filter: filter.into(),
        }
    }

    /// `issues(states: [state])` under a repository.
    #[must_use]
    pub fn issues(repository: EntityKey, state: IssueState) -> Self {
        Self::new(repository, "issues", format!("states:{state}"))
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.parent, self.field, self.filter)
    }
}

/// Whether a ticket loads a fresh first page or continues an existing list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Initial,
    More,
}

/// Proof that a fetch was started for a slot; redeemed by
/// [`ConnectionCache::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: ConnectionKey,
    generation: u64,
    kind: FetchKind,
    after: Option<String>,
}

impl FetchTicket {
    #[must_use]
    pub const fn key(&self) -> &ConnectionKey {
        &self.key
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn kind(&self) -> FetchKind {
        self.kind
    }

    /// Cursor to send as `after` (`None` for a first page).
    #[must_use]
    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }
}

/// What [`ConnectionCache::complete`] did with a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Edges were appended.
    Merged { added: usize, has_next_page: bool },
    /// The page was absent or empty; the connection is unchanged.
    Unchanged,
    /// The slot was reset or discarded while the fetch was in flight.
    Stale,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    connection: Connection,
    loading: bool,
    generation: u64,
}

/// All live connections of a session.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCache {
    slots: BTreeMap<ConnectionKey, Slot>,
    next_generation: u64,
}

impl ConnectionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn fresh_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Replace the slot for `key` with an empty, loading connection.
    ///
    /// Any fetch still in flight for the old slot becomes stale.
    pub fn begin_load(&mut self, key: ConnectionKey) -> FetchTicket {
        let generation = self.fresh_generation();
        tracing::debug!(connection = %key, generation, "loading first page");
        self.slots.insert(
            key.clone(),
            Slot {
                connection: Connection::default(),
                loading: true,
                generation,
            },
        );
        FetchTicket {
            key,
            generation,
            kind: FetchKind::Initial,
            after: None,
        }
    }

    /// Replace the slot for `key` with an already-fetched first page.
    pub fn reset(&mut self, key: ConnectionKey, first_page: Connection) {
        let generation = self.fresh_generation();
        tracing::debug!(connection = %key, generation, edges = first_page.len(), "connection reset");
        self.slots.insert(
            key,
            Slot {
                connection: first_page,
                loading: false,
                generation,
            },
        );
    }

    /// Start a follow-up fetch after the slot's end cursor.
    ///
    /// # Errors
    ///
    /// - [`CacheError::UnknownConnection`] if no slot exists for `key`.
    /// - [`CacheError::FetchInFlight`] if a fetch is already pending for it.
    /// - [`CacheError::NoNextPage`] if the last page reported no next page.
    pub fn begin_fetch_more(&mut self, key: &ConnectionKey) -> Result<FetchTicket, CacheError> {
        let slot = self
            .slots
            .get_mut(key)
            .ok_or_else(|| CacheError::UnknownConnection(key.to_string()))?;

        if slot.loading {
            return Err(CacheError::FetchInFlight(key.to_string()));
        }
        let Some(after) = slot.connection.next_cursor().map(str::to_string) else {
            return Err(CacheError::NoNextPage(key.to_string()));
        };

        slot.loading = true;
        tracing::debug!(connection = %key, %after, "fetching more");
        Ok(FetchTicket {
            key: key.clone(),
            generation: slot.generation,
            kind: FetchKind::More,
            after: Some(after),
        })
    }

    /// Finish the fetch identified by `ticket`.
    ///
    /// A network failure clears the loading flag and leaves the edges as
    /// they were, so the same page can be requested again.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Network`] when `result` is a transport failure
    /// for a live slot.
    pub fn complete(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Option<Connection>, NetworkError>,
    ) -> Result<FetchOutcome, CacheError> {
        let Some(slot) = self
            .slots
            .get_mut(&ticket.key)
            .filter(|slot| slot.generation == ticket.generation)
        else {
            tracing::warn!(connection = %ticket.key, generation = ticket.generation, "dropping stale page");
            return Ok(FetchOutcome::Stale);
        };

        slot.loading = false;
        let page = result.inspect_err(|e| {
            tracing::warn!(connection = %ticket.key, error = %e, "page fetch failed");
        })?;

        let before = slot.connection.len();
        let previous = std::mem::take(&mut slot.connection);
        slot.connection = merge_page(previous, page);
        let added = slot.connection.len() - before;

        if added == 0 {
            return Ok(FetchOutcome::Unchanged);
        }
        Ok(FetchOutcome::Merged {
            added,
            has_next_page: slot.connection.page_info.has_next_page,
        })
    }

    #[must_use]
    pub fn get(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.slots.get(key).map(|slot| &slot.connection)
    }

    #[must_use]
    pub fn is_loading(&self, key: &ConnectionKey) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.loading)
    }

    /// Drop the slot for `key`; in-flight fetches for it become stale.
    pub fn discard(&mut self, key: &ConnectionKey) -> bool {
        let removed = self.slots.remove(key).is_some();
        if removed {
            tracing::debug!(connection = %key, "connection discarded");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConnectionKey> {
        self.slots.keys()
    }
}

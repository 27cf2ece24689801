//! Issue visibility filter and the issue list built on it.
//!
//! The filter cycles `None -> Open -> Closed -> None`, one step per user
//! action. `None` means the list is hidden: no query is issued and no
//! connection exists. Entering `Open` or `Closed` throws away whatever
//! connection the previous state had and starts a fresh one, so cycling
//! back to `Open` later never reuses old edges.

use serde::{Deserialize, Serialize};

use crate::api::{IssueState, IssuesQuery, IssuesResponse};
use crate::connection::{ConnectionCache, ConnectionKey, FetchOutcome, FetchTicket};
use crate::error::{CacheError, NetworkError};
use crate::model::EntityKey;
use crate::normalize::write_issue_page;
use crate::pagination::Connection;
use crate::store::EntityStore;

/// Which issues, if any, are shown for a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueFilter {
    #[default]
    None,
    Open,
    Closed,
}

impl IssueFilter {
    /// The state one user action moves to.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::None => Self::Open,
            Self::Open => Self::Closed,
            Self::Closed => Self::None,
        }
    }

    /// Query variable for this state, `None` when the list is hidden.
    #[must_use]
    pub const fn issue_state(self) -> Option<IssueState> {
        match self {
            Self::None => None,
            Self::Open => Some(IssueState::Open),
            Self::Closed => Some(IssueState::Closed),
        }
    }

    #[must_use]
    pub const fn is_shown(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Label of the control that advances out of this state.
    #[must_use]
    pub const fn transition_label(self) -> &'static str {
        match self {
            Self::None => "Show Open Issues",
            Self::Open => "Show Closed Issues",
            Self::Closed => "Hide Issues",
        }
    }
}

/// A pending request for one page of issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuePageRequest {
    pub ticket: FetchTicket,
    pub query: IssuesQuery,
}

/// The issue list of one repository: coordinates, filter, and page size.
///
/// Connection state lives in the shared [`ConnectionCache`]; this type only
/// decides which slot is live and what to ask the server for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueList {
    repository_owner: String,
    repository_name: String,
    repository: EntityKey,
    filter: IssueFilter,
    page_size: u32,
}

impl IssueList {
    #[must_use]
    pub fn new(
        repository_owner: impl Into<String>,
        repository_name: impl Into<String>,
        repository: EntityKey,
        page_size: u32,
    ) -> Self {
        Self {
            repository_owner: repository_owner.into(),
            repository_name: repository_name.into(),
            repository,
            filter: IssueFilter::None,
            page_size,
        }
    }

    #[must_use]
    pub const fn filter(&self) -> IssueFilter {
        self.filter
    }

    #[must_use]
    pub const fn repository(&self) -> &EntityKey {
        &self.repository
    }

    /// Connection key for the current filter, `None` while hidden.
    #[must_use]
    pub fn connection_key(&self) -> Option<ConnectionKey> {
        let state = self.filter.issue_state()?;
        Some(ConnectionKey::issues(self.repository.clone(), state))
    }

    /// The issues loaded so far under the current filter.
    #[must_use]
    pub fn connection<'c>(&self, connections: &'c ConnectionCache) -> Option<&'c Connection> {
        self.connection_key().and_then(|key| connections.get(&key))
    }

    /// Advance the filter one step.
    ///
    /// The previous state's connection is discarded. When the new state
    /// shows issues, a fresh first-page request is returned.
    pub fn advance(&mut self, connections: &mut ConnectionCache) -> Option<IssuePageRequest> {
        if let Some(old) = self.connection_key() {
            connections.discard(&old);
        }

        self.filter = self.filter.next();
        tracing::debug!(repository = %self.repository, filter = ?self.filter, "issue filter advanced");

        let state = self.filter.issue_state()?;
        let key = ConnectionKey::issues(self.repository.clone(), state);
        let ticket = connections.begin_load(key);
        Some(self.request(state, ticket))
    }

    /// Ask for the page after the current end cursor.
    ///
    /// # Errors
    ///
    /// - [`CacheError::UnknownConnection`] while the list is hidden.
    /// - Errors of [`ConnectionCache::begin_fetch_more`] otherwise.
    pub fn fetch_more(
        &self,
        connections: &mut ConnectionCache,
    ) -> Result<IssuePageRequest, CacheError> {
        let Some(state) = self.filter.issue_state() else {
            let hidden = format!("{}.issues(hidden)", self.repository);
            return Err(CacheError::UnknownConnection(hidden));
        };
        let key = ConnectionKey::issues(self.repository.clone(), state);
        let ticket = connections.begin_fetch_more(&key)?;
        Ok(self.request(state, ticket))
    }

    /// Normalize a response into the store and merge it into its connection.
    ///
    /// Issue entities are written even when the page turns out to be stale;
    /// they are keyed by id, so the write is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Network`] for transport failures and
    /// [`CacheError::InvalidKey`] for malformed issue ids.
    pub fn receive(
        store: &mut EntityStore,
        connections: &mut ConnectionCache,
        ticket: &FetchTicket,
        response: Result<IssuesResponse, NetworkError>,
    ) -> Result<FetchOutcome, CacheError> {
        let page = match response {
            Ok(IssuesResponse {
                repository: Some(repository),
            }) => match write_issue_page(store, &repository.issues) {
                Ok(page) => Ok(Some(page)),
                Err(e) => {
                    connections.complete(ticket, Ok(None))?;
                    return Err(e);
                }
            },
            Ok(IssuesResponse { repository: None }) => Ok(None),
            Err(e) => Err(e),
        };
        connections.complete(ticket, page)
    }

    fn request(&self, issue_state: IssueState, ticket: FetchTicket) -> IssuePageRequest {
        let query = IssuesQuery {
            repository_owner: self.repository_owner.clone(),
            repository_name: self.repository_name.clone(),
            issue_state,
            cursor: ticket.after().map(str::to_string),
            first: self.page_size,
        };
        IssuePageRequest { ticket, query }
    }
}

//! hubcache-core: a normalized client-side cache for a repository/issue
//! GraphQL API.
//!
//! Query responses are normalized into an [`EntityStore`] keyed by
//! `"<TypeName>:<id>"`. Paginated list fields live in a [`ConnectionCache`]
//! and grow through [`merge_page`]. Mutation responses are folded back into
//! the store by the [`Reconciler`] without refetching lists, and the issue
//! list of a repository is driven by the [`IssueFilter`] state machine.
//!
//! # Conventions
//!
//! - **Errors**: library operations return [`CacheError`]; config loading
//!   returns `anyhow::Result`.
//! - **Logging**: `tracing` macros (`debug!` for writes and merges, `warn!`
//!   for skipped patches and dropped completions).
//! - **Asynchrony**: every request is a begin/complete pair with a ticket.
//!   Nothing in this crate blocks or spawns.

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod fragment;
pub mod model;
pub mod normalize;
pub mod pagination;
pub mod reconcile;
pub mod store;

pub use config::{CacheConfig, PaginationConfig, ReconcileConfig, load_config};
pub use connection::{ConnectionCache, ConnectionKey, FetchKind, FetchOutcome, FetchTicket};
pub use error::{CacheError, ErrorCode, NetworkError};
pub use filter::{IssueFilter, IssueList, IssuePageRequest};
pub use fragment::{
    Fragment, Shape, StarCountFragment, WatchFragment, read_fragment, read_typed, write_fragment,
    write_fragment_if_version, write_typed, write_typed_if_version,
};
pub use model::{Entity, EntityKey, Fields, Value, Version};
pub use pagination::{Connection, Edge, PageInfo, merge_page};
pub use reconcile::{ConsistencyMode, MutationTicket, ReconcileOutcome, Reconciler};
pub use store::{EntityStore, ObserverId};

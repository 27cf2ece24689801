use std::fmt;

use crate::model::{EntityKey, ParseKeyError, Version};

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    EntityNotFound,
    ShapeMismatch,
    InvalidKey,
    VersionConflict,
    FetchInFlight,
    NoNextPage,
    UnknownConnection,
    NetworkFailure,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::EntityNotFound => "E2001",
            Self::ShapeMismatch => "E2002",
            Self::InvalidKey => "E2003",
            Self::VersionConflict => "E3001",
            Self::FetchInFlight => "E3002",
            Self::NoNextPage => "E3003",
            Self::UnknownConnection => "E3004",
            Self::NetworkFailure => "E5001",
        }
    }

    /// Short human-facing summary for logs and error displays.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::EntityNotFound => "Entity not found in cache",
            Self::ShapeMismatch => "Fragment shape mismatch",
            Self::InvalidKey => "Invalid entity key",
            Self::VersionConflict => "Entity changed since mutation was issued",
            Self::FetchInFlight => "Fetch already in flight",
            Self::NoNextPage => "Connection has no next page",
            Self::UnknownConnection => "Connection not loaded",
            Self::NetworkFailure => "Network request failed",
        }
    }

    /// Optional remediation hint for the caller.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::EntityNotFound => Some("Query the entity before patching it."),
            Self::ShapeMismatch => Some("Include every field the fragment requires."),
            Self::InvalidKey => Some("Keys use the form <TypeName>:<id>."),
            Self::VersionConflict => Some("Refetch the entity to pick up the server value."),
            Self::FetchInFlight => Some("Wait for the pending page before requesting another."),
            Self::NoNextPage | Self::NetworkFailure => None,
            Self::UnknownConnection => Some("Load the first page before fetching more."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Transport failure reported by whoever executes queries and mutations.
///
/// The cache never retries; the error is handed back to the caller for display.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("network error: {message}")]
pub struct NetworkError {
    pub message: String,
}

impl NetworkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors returned by the entity store and the layers built on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// No entity is cached under the key.
    #[error("entity {0} not found")]
    NotFound(EntityKey),

    /// The data does not satisfy the fragment's field set.
    #[error("fragment {shape} on {key}: field '{field}' is {problem}")]
    ShapeMismatch {
        shape: &'static str,
        key: EntityKey,
        field: String,
        problem: &'static str,
    },

    #[error(transparent)]
    InvalidKey(#[from] ParseKeyError),

    /// A conditional write found a newer version than the one it was based on.
    #[error("entity {key} is at version {actual}, expected {expected}")]
    VersionConflict {
        key: EntityKey,
        expected: Version,
        actual: Version,
    },

    /// A fetch-more was requested while one is pending for the same connection.
    #[error("fetch already in flight for {0}")]
    FetchInFlight(String),

    #[error("connection {0} has no next page")]
    NoNextPage(String),

    #[error("connection {0} is not loaded")]
    UnknownConnection(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl CacheError {
    /// Map this error to its stable code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::EntityNotFound,
            Self::ShapeMismatch { .. } => ErrorCode::ShapeMismatch,
            Self::InvalidKey(_) => ErrorCode::InvalidKey,
            Self::VersionConflict { .. } => ErrorCode::VersionConflict,
            Self::FetchInFlight(_) => ErrorCode::FetchInFlight,
            Self::NoNextPage(_) => ErrorCode::NoNextPage,
            Self::UnknownConnection(_) => ErrorCode::UnknownConnection,
            Self::Network(_) => ErrorCode::NetworkFailure,
        }
    }

    /// Whether the cache is left stale-but-valid rather than broken.
    ///
    /// Callers show the cached value and move on for these.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::VersionConflict { .. } | Self::Network(_)
        )
    }
}

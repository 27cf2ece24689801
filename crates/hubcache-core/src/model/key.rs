use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Type name used for repository entities.
pub const REPOSITORY: &str = "Repository";

/// Type name used for issue entities.
pub const ISSUE: &str = "Issue";

/// Globally unique cache identity of one remote object: `<TypeName>:<id>`.
///
/// The id part may itself contain `:`; parsing splits at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey {
    type_name: String,
    id: String,
}

impl EntityKey {
    /// Build a key from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`ParseKeyError`] if either part is empty or the type name
    /// contains `:`.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Result<Self, ParseKeyError> {
        let type_name = type_name.into();
        let id = id.into();

        if type_name.is_empty() || type_name.contains(':') {
            return Err(ParseKeyError {
                input: format!("{type_name}:{id}"),
                reason: "type name must be non-empty and must not contain ':'",
            });
        }
        if id.is_empty() {
            return Err(ParseKeyError {
                input: format!("{type_name}:"),
                reason: "id must be non-empty",
            });
        }

        Ok(Self { type_name, id })
    }

    /// Key for a `Repository` node id.
    ///
    /// # Errors
    ///
    /// Returns [`ParseKeyError`] if `id` is empty.
    pub fn repository(id: impl Into<String>) -> Result<Self, ParseKeyError> {
        Self::new(REPOSITORY, id)
    }

    /// Key for an `Issue` node id.
    ///
    /// # Errors
    ///
    /// Returns [`ParseKeyError`] if `id` is empty.
    pub fn issue(id: impl Into<String>) -> Result<Self, ParseKeyError> {
        Self::new(ISSUE, id)
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

impl FromStr for EntityKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((type_name, id)) = s.split_once(':') else {
            return Err(ParseKeyError {
                input: s.to_string(),
                reason: "expected <TypeName>:<id>",
            });
        };
        Self::new(type_name, id)
    }
}

impl TryFrom<String> for EntityKey {
    type Error = ParseKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

/// Error returned when an entity key cannot be parsed or built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKeyError {
    pub input: String,
    pub reason: &'static str,
}

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entity key '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseKeyError {}

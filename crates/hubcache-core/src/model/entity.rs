use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::{Fields, Value, lookup};

/// Store-wide monotonic write stamp.
///
/// Every effective write takes the next value of the store clock, so a
/// larger version on the same key always means a later write.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The last-known normalized field set of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    fields: Fields,
    version: Version,
}

impl Entity {
    #[must_use]
    pub const fn fields(&self) -> &Fields {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Dotted-path lookup, e.g. `"stargazers.totalCount"`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup(&self.fields, path)
    }

    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    pub(crate) const fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Merge `partial` into this entity field by field.
    ///
    /// Fields absent from `partial` are kept. A field present in `partial`
    /// replaces the stored value wholesale, nested records included.
    /// Returns `true` if any stored value changed.
    pub(crate) fn merge_fields(&mut self, partial: Fields) -> bool {
        let mut changed = false;
        for (name, value) in partial {
            if self.fields.get(&name) != Some(&value) {
                self.fields.insert(name, value);
                changed = true;
            }
        }
        changed
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::key::EntityKey;

/// Field name to value mapping: the body of an entity or of a nested record.
pub type Fields = BTreeMap<String, Value>;

/// A normalized field value.
///
/// Nested objects that have their own identity are stored as [`Value::Ref`];
/// objects without one (an owner's login/url pair, a total count) are stored
/// inline as [`Value::Record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Ref(EntityKey),
    Record(Fields),
    List(Vec<Self>),
}

impl Value {
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_ref_key(&self) -> Option<&EntityKey> {
        match self {
            Self::Ref(key) => Some(key),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_record(&self) -> Option<&Fields> {
        match self {
            Self::Record(fields) => Some(fields),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<EntityKey> for Value {
    fn from(value: EntityKey) -> Self {
        Self::Ref(value)
    }
}

impl From<Fields> for Value {
    fn from(value: Fields) -> Self {
        Self::Record(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Look up a dotted field path (`"stargazers.totalCount"`) inside `fields`.
#[must_use]
pub fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => fields.get(path),
        Some((head, rest)) => fields.get(head)?.as_record().and_then(|r| lookup(r, rest)),
    }
}

/// Insert `value` at a dotted field path, creating intermediate records.
///
/// A non-record value sitting on an intermediate segment is replaced.
pub fn insert_path(fields: &mut Fields, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = fields
                .entry(head.to_string())
                .or_insert_with(|| Value::Record(Fields::new()));
            if !matches!(slot, Value::Record(_)) {
                *slot = Value::Record(Fields::new());
            }
            if let Value::Record(inner) = slot {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Build a [`Fields`] map from `(name, value)` pairs.
#[must_use]
pub fn fields<I, K, V>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_one_record_level() {
        let mut f = fields([("id", Value::from("R1"))]);
        f.insert(
            "stargazers".to_string(),
            Value::Record(fields([("totalCount", 5_i64)])),
        );

        assert_eq!(lookup(&f, "id"), Some(&Value::from("R1")));
        assert_eq!(lookup(&f, "stargazers.totalCount"), Some(&Value::Int(5)));
        assert_eq!(lookup(&f, "stargazers.missing"), None);
        assert_eq!(lookup(&f, "id.nested"), None);
    }

    #[test]
    fn insert_path_creates_and_replaces_records() {
        let mut f = fields([("watchers", Value::Int(3))]);
        insert_path(&mut f, "watchers.totalCount", Value::Int(4));
        insert_path(&mut f, "stargazers.totalCount", Value::Int(9));

        assert_eq!(lookup(&f, "watchers.totalCount"), Some(&Value::Int(4)));
        assert_eq!(lookup(&f, "stargazers.totalCount"), Some(&Value::Int(9)));
    }

    #[test]
    fn option_maps_to_null() {
        assert!(Value::from(None::<String>).is_null());
        assert_eq!(Value::from(Some("Rust")), Value::from("Rust"));
    }
}

//! Fragment reads and writes against the entity store.
//!
//! A fragment is a named slice of one entity's fields. Callers that only
//! care about a star counter never need the full repository shape: they ask
//! for [`StarCountFragment`] by key and write it back the same way.
//!
//! Two layers are provided:
//!
//! - [`read_fragment`] / [`write_fragment`] work on a runtime [`Shape`]
//!   (a list of dotted field paths) and plain [`Fields`].
//! - [`read_typed`] / [`write_typed`] work on a typed record implementing
//!   [`Fragment`], which maps itself to and from its shape.
//!
//! Writes are validated against the shape before touching the store: a
//! missing or unexpected field is a [`CacheError::ShapeMismatch`] and
//! nothing is written.

use crate::api::SubscriptionState;
use crate::error::CacheError;
use crate::model::{EntityKey, Fields, Value, Version, insert_path, lookup};
use crate::store::EntityStore;

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// Named set of required field paths.
///
/// Paths are dotted one level deep at most in practice
/// (`"stargazers.totalCount"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    name: &'static str,
    fields: &'static [&'static str],
}

impl Shape {
    #[must_use]
    pub const fn new(name: &'static str, fields: &'static [&'static str]) -> Self {
        Self { name, fields }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    fn mismatch(&self, key: &EntityKey, field: &str, problem: &'static str) -> CacheError {
        CacheError::ShapeMismatch {
            shape: self.name,
            key: key.clone(),
            field: field.to_string(),
            problem,
        }
    }

    /// Check that `data` carries exactly this shape's fields.
    fn validate(&self, key: &EntityKey, data: &Fields) -> Result<(), CacheError> {
        if let Some(path) = self.fields.iter().find(|p| lookup(data, p).is_none()) {
            return Err(self.mismatch(key, path, "missing"));
        }

        for (name, value) in data {
            if self.fields.contains(&name.as_str()) {
                continue;
            }
            let prefix = format!("{name}.");
            let nested: Vec<&str> = self
                .fields
                .iter()
                .filter_map(|p| p.strip_prefix(prefix.as_str()))
                .collect();
            if nested.is_empty() {
                return Err(self.mismatch(key, name, "not part of the fragment"));
            }
            let Some(record) = value.as_record() else {
                return Err(self.mismatch(key, name, "not a record"));
            };
            if let Some(extra) = record.keys().find(|k| !nested.contains(&k.as_str())) {
                return Err(self.mismatch(
                    key,
                    &format!("{name}.{extra}"),
                    "not part of the fragment",
                ));
            }
        }

        Ok(())
    }

    fn value<'f>(
        &self,
        key: &EntityKey,
        fields: &'f Fields,
        path: &str,
    ) -> Result<&'f Value, CacheError> {
        lookup(fields, path)
            .ok_or_else(|| self.mismatch(key, path, "missing"))
    }

    /// Typed accessor used by [`Fragment::from_fields`] implementations.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ShapeMismatch`] if the path is absent or not a string.
    pub fn str_at<'f>(
        &self,
        key: &EntityKey,
        fields: &'f Fields,
        path: &str,
    ) -> Result<&'f str, CacheError> {
        self.value(key, fields, path)?
            .as_str()
            .ok_or_else(|| self.mismatch(key, path, "not a string"))
    }

    /// # Errors
    ///
    /// Returns [`CacheError::ShapeMismatch`] if the path is absent or not an integer.
    pub fn int_at(&self, key: &EntityKey, fields: &Fields, path: &str) -> Result<i64, CacheError> {
        self.value(key, fields, path)?
            .as_int()
            .ok_or_else(|| self.mismatch(key, path, "not an integer"))
    }

    /// # Errors
    ///
    /// Returns [`CacheError::ShapeMismatch`] if the path is absent or not a boolean.
    pub fn bool_at(
        &self,
        key: &EntityKey,
        fields: &Fields,
        path: &str,
    ) -> Result<bool, CacheError> {
        self.value(key, fields, path)?
            .as_bool()
            .ok_or_else(|| self.mismatch(key, path, "not a boolean"))
    }
}

// ---------------------------------------------------------------------------
// Untyped access
// ---------------------------------------------------------------------------

/// Read the fields of `shape` from the entity under `key`.
///
/// The result holds only the shape's paths, nested the same way they are
/// stored.
///
/// # Errors
///
/// Returns [`CacheError::NotFound`] if the key is not cached and
/// [`CacheError::ShapeMismatch`] if the entity lacks one of the paths.
pub fn read_fragment(
    store: &EntityStore,
    key: &EntityKey,
    shape: &Shape,
) -> Result<Fields, CacheError> {
    let entity = store.read(key)?;
    let mut out = Fields::new();
    for path in shape.fields() {
        let value = shape.value(key, entity.fields(), path)?;
        insert_path(&mut out, path, value.clone());
    }
    Ok(out)
}

/// Validate `data` against `shape`, then merge it into the entity.
///
/// # Errors
///
/// Returns [`CacheError::ShapeMismatch`] if `data` is missing a path of the
/// shape or carries a field outside it. Nothing is written on error.
pub fn write_fragment(
    store: &mut EntityStore,
    key: &EntityKey,
    shape: &Shape,
    data: Fields,
) -> Result<Version, CacheError> {
    shape.validate(key, &data)?;
    tracing::trace!(%key, shape = shape.name(), "writing fragment");
    Ok(store.write(key, data))
}

/// [`write_fragment`], conditional on the entity still being at `expected`.
///
/// # Errors
///
/// As [`write_fragment`], plus [`CacheError::NotFound`] and
/// [`CacheError::VersionConflict`] from [`EntityStore::write_if_version`].
pub fn write_fragment_if_version(
    store: &mut EntityStore,
    key: &EntityKey,
    shape: &Shape,
    data: Fields,
    expected: Version,
) -> Result<Version, CacheError> {
    shape.validate(key, &data)?;
    store.write_if_version(key, data, expected)
}

// ---------------------------------------------------------------------------
// Typed access
// ---------------------------------------------------------------------------

/// A typed record bound to one [`Shape`].
pub trait Fragment: Sized {
    const SHAPE: Shape;

    /// Decode from the fields returned by [`read_fragment`] for [`Self::SHAPE`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ShapeMismatch`] if a field has the wrong type.
    fn from_fields(key: &EntityKey, fields: &Fields) -> Result<Self, CacheError>;

    /// Encode into exactly the paths of [`Self::SHAPE`].
    fn to_fields(&self) -> Fields;
}

/// Read a typed fragment.
///
/// # Errors
///
/// See [`read_fragment`] and [`Fragment::from_fields`].
pub fn read_typed<F: Fragment>(store: &EntityStore, key: &EntityKey) -> Result<F, CacheError> {
    let fields = read_fragment(store, key, &F::SHAPE)?;
    F::from_fields(key, &fields)
}

/// Write a typed fragment.
///
/// # Errors
///
/// See [`write_fragment`].
pub fn write_typed<F: Fragment>(
    store: &mut EntityStore,
    key: &EntityKey,
    fragment: &F,
) -> Result<Version, CacheError> {
    write_fragment(store, key, &F::SHAPE, fragment.to_fields())
}

/// Write a typed fragment only if the entity is still at `expected`.
///
/// # Errors
///
/// See [`write_fragment_if_version`].
pub fn write_typed_if_version<F: Fragment>(
    store: &mut EntityStore,
    key: &EntityKey,
    fragment: &F,
    expected: Version,
) -> Result<Version, CacheError> {
    write_fragment_if_version(store, key, &F::SHAPE, fragment.to_fields(), expected)
}

// ---------------------------------------------------------------------------
// Fragments used by the reconciler
// ---------------------------------------------------------------------------

/// Star counter slice of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarCountFragment {
    pub id: String,
    pub total_count: i64,
    pub viewer_has_starred: bool,
}

impl Fragment for StarCountFragment {
    const SHAPE: Shape = Shape::new(
        "StarCount",
        &["id", "stargazers.totalCount", "viewerHasStarred"],
    );

    fn from_fields(key: &EntityKey, fields: &Fields) -> Result<Self, CacheError> {
        let shape = Self::SHAPE;
        Ok(Self {
            id: shape.str_at(key, fields, "id")?.to_string(),
            total_count: shape.int_at(key, fields, "stargazers.totalCount")?,
            viewer_has_starred: shape.bool_at(key, fields, "viewerHasStarred")?,
        })
    }

    fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        insert_path(&mut fields, "id", Value::from(self.id.as_str()));
        insert_path(
            &mut fields,
            "stargazers.totalCount",
            Value::Int(self.total_count),
        );
        insert_path(
            &mut fields,
            "viewerHasStarred",
            Value::Bool(self.viewer_has_starred),
        );
        fields
    }
}

/// Watcher counter slice of a repository.
///
/// `viewer_subscription` is `None` when the server returned `null`
/// (anonymous viewer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFragment {
    pub id: String,
    pub total_count: i64,
    pub viewer_subscription: Option<SubscriptionState>,
}

impl Fragment for WatchFragment {
    const SHAPE: Shape = Shape::new(
        "Watch",
        &["id", "watchers.totalCount", "viewerSubscription"],
    );

    fn from_fields(key: &EntityKey, fields: &Fields) -> Result<Self, CacheError> {
        let shape = Self::SHAPE;
        let invalid = || shape.mismatch(key, "viewerSubscription", "not a subscription state");
        let viewer_subscription = match shape.value(key, fields, "viewerSubscription")? {
            Value::Null => None,
            Value::Str(raw) => Some(raw.parse::<SubscriptionState>().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        };

        Ok(Self {
            id: shape.str_at(key, fields, "id")?.to_string(),
            total_count: shape.int_at(key, fields, "watchers.totalCount")?,
            viewer_subscription,
        })
    }

    fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        insert_path(&mut fields, "id", Value::from(self.id.as_str()));
        insert_path(
            &mut fields,
            "watchers.totalCount",
            Value::Int(self.total_count),
        );
        insert_path(
            &mut fields,
            "viewerSubscription",
            Value::from(self.viewer_subscription.map(SubscriptionState::as_str)),
        );
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fields;

    fn repo_key() -> EntityKey {
        EntityKey::repository("R1").expect("valid key")
    }

    fn seeded_store() -> EntityStore {
        let mut store = EntityStore::new();
        let mut repo = fields([
            ("id", Value::from("R1")),
            ("name", Value::from("hubcache")),
            ("viewerHasStarred", Value::Bool(false)),
            ("viewerSubscription", Value::from("UNSUBSCRIBED")),
        ]);
        insert_path(&mut repo, "stargazers.totalCount", Value::Int(5));
        insert_path(&mut repo, "watchers.totalCount", Value::Int(2));
        store.write(&repo_key(), repo);
        store
    }

    #[test]
    fn read_projects_only_shape_fields() {
        let store = seeded_store();
        let got = read_fragment(&store, &repo_key(), &StarCountFragment::SHAPE).expect("read");

        assert_eq!(got.len(), 3);
        assert!(!got.contains_key("name"));
        assert_eq!(lookup(&got, "stargazers.totalCount"), Some(&Value::Int(5)));
    }

    #[test]
    fn read_absent_key_is_not_found() {
        let store = EntityStore::new();
        let err = read_typed::<StarCountFragment>(&store, &repo_key()).expect_err("absent");
        assert_eq!(err, CacheError::NotFound(repo_key()));
    }

    #[test]
    fn read_entity_missing_path_is_shape_mismatch() {
        let mut store = EntityStore::new();
        store.write(&repo_key(), fields([("id", "R1")]));
        let err = read_typed::<StarCountFragment>(&store, &repo_key()).expect_err("partial");
        let CacheError::ShapeMismatch { field, .. } = &err else {
            panic!("expected a shape mismatch, got {err:?}");
        };
        assert_eq!(field, "stargazers.totalCount");
    }

    #[test]
    fn write_missing_required_field_writes_nothing() {
        let mut store = seeded_store();
        let before = store.version(&repo_key());
        let data = fields([
            ("id", Value::from("R1")),
            ("viewerHasStarred", Value::Bool(true)),
        ]);

        let err = write_fragment(&mut store, &repo_key(), &StarCountFragment::SHAPE, data)
            .expect_err("missing count");
        let CacheError::ShapeMismatch { problem, .. } = err else {
            panic!("expected a shape mismatch, got {err:?}");
        };
        assert_eq!(problem, "missing");
        assert_eq!(store.version(&repo_key()), before);
    }

    #[test]
    fn write_rejects_fields_outside_shape() {
        let mut store = seeded_store();
        let mut data = StarCountFragment {
            id: "R1".into(),
            total_count: 6,
            viewer_has_starred: true,
        }
        .to_fields();
        insert_path(&mut data, "stargazers.edges", Value::List(Vec::new()));

        let err = write_fragment(&mut store, &repo_key(), &StarCountFragment::SHAPE, data)
            .expect_err("extra nested field");
        let CacheError::ShapeMismatch { field, .. } = &err else {
            panic!("expected a shape mismatch, got {err:?}");
        };
        assert_eq!(field, "stargazers.edges");
    }

    #[test]
    fn typed_round_trip_merges_over_existing_fields() {
        let mut store = seeded_store();
        let written = StarCountFragment {
            id: "R1".into(),
            total_count: 6,
            viewer_has_starred: true,
        };
        write_typed(&mut store, &repo_key(), &written).expect("write");

        let read: StarCountFragment = read_typed(&store, &repo_key()).expect("read");
        assert_eq!(read, written);
        let entity = store.read(&repo_key()).expect("cached");
        assert_eq!(entity.get("name"), Some(&Value::from("hubcache")));
        assert_eq!(entity.lookup("watchers.totalCount"), Some(&Value::Int(2)));
    }

    #[test]
    fn watch_fragment_decodes_subscription_state() {
        let store = seeded_store();
        let watch: WatchFragment = read_typed(&store, &repo_key()).expect("read");
        assert_eq!(watch.total_count, 2);
        assert_eq!(
            watch.viewer_subscription,
            Some(SubscriptionState::Unsubscribed)
        );
    }

    #[test]
    fn watch_fragment_accepts_null_subscription() {
        let mut store = seeded_store();
        store.write(&repo_key(), fields([("viewerSubscription", Value::Null)]));
        let watch: WatchFragment = read_typed(&store, &repo_key()).expect("read");
        assert_eq!(watch.viewer_subscription, None);
    }

    #[test]
    fn conditional_typed_write_rejects_stale_version() {
        let mut store = seeded_store();
        let observed = store.version(&repo_key()).expect("cached");
        store.write(&repo_key(), fields([("name", "renamed")]));

        let fragment = StarCountFragment {
            id: "R1".into(),
            total_count: 6,
            viewer_has_starred: true,
        };
        let err = write_typed_if_version(&mut store, &repo_key(), &fragment, observed)
            .expect_err("stale");
        assert_eq!(err.code(), crate::error::ErrorCode::VersionConflict);
    }
}

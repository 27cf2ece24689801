//! Normalized data model: entity keys, field values, and versioned entities.

pub mod entity;
pub mod key;
pub mod value;

pub use entity::{Entity, Version};
pub use key::{EntityKey, ISSUE, ParseKeyError, REPOSITORY};
pub use value::{Fields, Value, fields, insert_path, lookup};

//! Shared types for the snapdiff versioning engine.
//!
//! # Invariants
//! - An [`Entity`] is pure configuration: built once per object type, shared
//!   by reference, compared by its type tag only.
//! - An [`ObjId`] is stable for the lifetime of a logical object and is always
//!   extracted through [`Entity::extract_id`].

mod entity;
mod error;
mod path;
mod types;

pub use entity::Entity;
pub use error::ModelError;
pub use path::FieldPath;
pub use types::{predecessor, successor, value_kind, Creator, ObjId, RecordId, Timestamp};

use crate::{FieldPath, ObjId};

/// Errors raised by the pure object model: identifier extraction and shape checks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid field path {path:?}")]
    InvalidPath { path: String },

    #[error("malformed {entity} object: {reason} (id path `{path}`)")]
    MalformedObject {
        entity: String,
        path: FieldPath,
        reason: String,
    },

    #[error("type mismatch for {entity} {obj_id} at `{path}`: expected {expected}, found {found}")]
    TypeMismatch {
        entity: String,
        obj_id: ObjId,
        path: FieldPath,
        expected: String,
        found: String,
    },
}

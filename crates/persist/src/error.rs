use snapdiff_common::{Entity, ModelError, ObjId, RecordId, Timestamp};
use snapdiff_kernel::RecordKind;

/// Result type for storage port operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for engine operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors raised by storage adapters.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} for {entity} {obj_id} rejected: timestamp {timestamp} already recorded")]
    DuplicateTimestamp {
        kind: RecordKind,
        entity: String,
        obj_id: ObjId,
        timestamp: Timestamp,
    },
    #[error("{kind} already persisted with id {id}")]
    AlreadyPersisted { kind: RecordKind, id: RecordId },
    #[error("unknown entity type {0:?}")]
    UnknownEntity(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors surfaced by the versioning engine.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// `MalformedObject` or `TypeMismatch`.
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("no {kind} for {entity} {obj_id} at or before {timestamp}")]
    NotFound {
        kind: RecordKind,
        entity: String,
        obj_id: ObjId,
        timestamp: Timestamp,
    },

    #[error("corrupt history for {entity} {obj_id} at {timestamp}: {reason}")]
    CorruptHistory {
        entity: String,
        obj_id: ObjId,
        timestamp: Timestamp,
        reason: String,
    },

    #[error("storage failure for {entity} {obj_id}: {source}")]
    Storage {
        entity: String,
        obj_id: ObjId,
        #[source]
        source: StorageError,
    },
}

impl HistoryError {
    /// Whether this is the expected "nothing recorded yet" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn corrupt(
        entity: &Entity,
        obj_id: &ObjId,
        timestamp: Timestamp,
        reason: impl Into<String>,
    ) -> Self {
        Self::CorruptHistory {
            entity: entity.name().to_owned(),
            obj_id: obj_id.clone(),
            timestamp,
            reason: reason.into(),
        }
    }
}

/// Attach the object a storage call was made for.
pub trait WithObject<T> {
    fn with_object(self, entity: &Entity, obj_id: &ObjId) -> HistoryResult<T>;
}

impl<T> WithObject<T> for StorageResult<T> {
    fn with_object(self, entity: &Entity, obj_id: &ObjId) -> HistoryResult<T> {
        self.map_err(|source| HistoryError::Storage {
            entity: entity.name().to_owned(),
            obj_id: obj_id.clone(),
            source,
        })
    }
}

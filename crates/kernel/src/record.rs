use serde_json::Value;
use snapdiff_common::{Creator, Entity, ModelError, ObjId, RecordId, Timestamp};
use std::fmt;
use std::sync::Arc;

use crate::Op;

/// Metadata shared by snapshots and diffs.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Storage identifier; `None` until the record is persisted.
    pub id: Option<RecordId>,
    pub obj_id: ObjId,
    pub entity: Arc<Entity>,
    pub creator: Creator,
    pub timestamp: Timestamp,
}

impl Metadata {
    pub fn new(obj_id: ObjId, entity: Arc<Entity>, creator: Creator, timestamp: Timestamp) -> Self {
        Self {
            id: None,
            obj_id,
            entity,
            creator,
            timestamp,
        }
    }
}

/// A complete, self-sufficient capture of an object at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub meta: Metadata,
    pub obj: Value,
}

impl Snapshot {
    pub fn new(meta: Metadata, obj: Value) -> Self {
        Self { meta, obj }
    }

    /// Capture `obj`, taking its identifier from the entity's id path.
    pub fn capture(
        obj: Value,
        entity: Arc<Entity>,
        creator: Creator,
        timestamp: Timestamp,
    ) -> Result<Self, ModelError> {
        let obj_id = entity.extract_id(&obj)?;
        Ok(Self::new(Metadata::new(obj_id, entity, creator, timestamp), obj))
    }

    /// The same snapshot with its storage identifier set.
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.meta.id = Some(id);
        self
    }

    pub fn id(&self) -> Option<RecordId> {
        self.meta.id
    }

    pub fn obj_id(&self) -> &ObjId {
        &self.meta.obj_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.meta.timestamp
    }
}

/// The minimal delta from one state of an object to its next state.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    pub meta: Metadata,
    pub ops: Vec<Op>,
}

impl Diff {
    pub fn new(meta: Metadata, ops: Vec<Op>) -> Self {
        Self { meta, ops }
    }

    /// The same diff with its storage identifier set.
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.meta.id = Some(id);
        self
    }

    pub fn id(&self) -> Option<RecordId> {
        self.meta.id
    }

    pub fn obj_id(&self) -> &ObjId {
        &self.meta.obj_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.meta.timestamp
    }

    /// Whether the diff carries no changes.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Which of the two history collections a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Snapshot,
    Diff,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => f.write_str("snapshot"),
            Self::Diff => f.write_str("diff"),
        }
    }
}

/// A history entry of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Snapshot(Snapshot),
    Diff(Diff),
}

impl Record {
    pub fn meta(&self) -> &Metadata {
        match self {
            Self::Snapshot(s) => &s.meta,
            Self::Diff(d) => &d.meta,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Snapshot(_) => RecordKind::Snapshot,
            Self::Diff(_) => RecordKind::Diff,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.meta().timestamp
    }

    pub fn with_id(self, id: RecordId) -> Self {
        match self {
            Self::Snapshot(s) => Self::Snapshot(s.with_id(id)),
            Self::Diff(d) => Self::Diff(d.with_id(id)),
        }
    }
}

impl From<Snapshot> for Record {
    fn from(snapshot: Snapshot) -> Self {
        Self::Snapshot(snapshot)
    }
}

impl From<Diff> for Record {
    fn from(diff: Diff) -> Self {
        Self::Diff(diff)
    }
}

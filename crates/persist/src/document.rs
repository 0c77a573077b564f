use serde::{Deserialize, Serialize};
use serde_json::Value;
use snapdiff_common::{Creator, Entity, ObjId, RecordId, Timestamp};
use snapdiff_kernel::{Diff, Metadata, Op, Record, Snapshot};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{StorageError, StorageResult};

/// Entity descriptors known to an adapter, by type tag.
///
/// Stored records carry only the tag; decoding resolves it here.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<Entity>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one with the same tag.
    pub fn with(mut self, entity: Arc<Entity>) -> Self {
        self.register(entity);
        self
    }

    pub fn register(&mut self, entity: Arc<Entity>) {
        self.entities.insert(entity.name().to_owned(), entity);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Entity>> {
        self.entities.get(name).cloned()
    }

    fn resolve(&self, name: &str) -> StorageResult<Arc<Entity>> {
        self.get(name)
            .ok_or_else(|| StorageError::UnknownEntity(name.to_owned()))
    }
}

/// Metadata columns of a stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMetadata {
    pub obj_id: ObjId,
    pub entity: String,
    pub creator: Creator,
    pub timestamp: Timestamp,
}

/// Serialized body of a stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Full object state of a snapshot.
    Obj(Value),
    /// Field-level ops of a diff.
    Ops(Vec<Op>),
}

/// On-disk form of a snapshot or diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub metadata: StoredMetadata,
    pub payload: Payload,
}

impl StoredRecord {
    /// Encode a record that has been assigned its id.
    pub fn new(id: RecordId, record: &Record) -> Self {
        let meta = record.meta();
        let payload = match record {
            Record::Snapshot(s) => Payload::Obj(s.obj.clone()),
            Record::Diff(d) => Payload::Ops(d.ops.clone()),
        };
        Self {
            id,
            metadata: StoredMetadata {
                obj_id: meta.obj_id.clone(),
                entity: meta.entity.name().to_owned(),
                creator: meta.creator.clone(),
                timestamp: meta.timestamp,
            },
            payload,
        }
    }

    /// Decode into a kernel record, resolving the entity tag.
    pub fn into_record(self, registry: &EntityRegistry) -> StorageResult<Record> {
        let entity = registry.resolve(&self.metadata.entity)?;
        let meta = Metadata {
            id: Some(self.id),
            obj_id: self.metadata.obj_id,
            entity,
            creator: self.metadata.creator,
            timestamp: self.metadata.timestamp,
        };
        Ok(match self.payload {
            Payload::Obj(obj) => Record::Snapshot(Snapshot::new(meta, obj)),
            Payload::Ops(ops) => Record::Diff(Diff::new(meta, ops)),
        })
    }
}

use async_trait::async_trait;
use snapdiff_common::{Entity, ObjId, RecordId, Timestamp};
use snapdiff_kernel::{Diff, Metadata, RecordKind, Snapshot};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::RwLock;

use crate::{StorageError, StorageResult, StorageStrategy};

/// Partition key: entity type tag and object id.
pub(crate) type Key = (String, ObjId);

pub(crate) fn key_of(entity: &Entity, obj_id: &ObjId) -> Key {
    (entity.name().to_owned(), obj_id.clone())
}

/// History and current-state records, partitioned per object and ordered by
/// timestamp inside each partition.
#[derive(Debug, Default)]
pub(crate) struct Partitions {
    snapshots: HashMap<Key, BTreeMap<Timestamp, Snapshot>>,
    diffs: HashMap<Key, BTreeMap<Timestamp, Diff>>,
    current: HashMap<Key, Snapshot>,
}

impl Partitions {
    /// Check that a new history record may be appended.
    pub(crate) fn admit(&self, kind: RecordKind, meta: &Metadata) -> StorageResult<()> {
        if let Some(id) = meta.id {
            return Err(StorageError::AlreadyPersisted { kind, id });
        }
        if self.occupied(meta) {
            return Err(StorageError::DuplicateTimestamp {
                kind,
                entity: meta.entity.name().to_owned(),
                obj_id: meta.obj_id.clone(),
                timestamp: meta.timestamp,
            });
        }
        Ok(())
    }

    /// Whether a history record of the same object already sits at this timestamp.
    pub(crate) fn occupied(&self, meta: &Metadata) -> bool {
        let key = key_of(&meta.entity, &meta.obj_id);
        self.snapshots
            .get(&key)
            .is_some_and(|p| p.contains_key(&meta.timestamp))
            || self
                .diffs
                .get(&key)
                .is_some_and(|p| p.contains_key(&meta.timestamp))
    }

    pub(crate) fn put_snapshot(&mut self, snapshot: Snapshot) {
        let key = key_of(&snapshot.meta.entity, &snapshot.meta.obj_id);
        self.snapshots
            .entry(key)
            .or_default()
            .insert(snapshot.timestamp(), snapshot);
    }

    pub(crate) fn put_diff(&mut self, diff: Diff) {
        let key = key_of(&diff.meta.entity, &diff.meta.obj_id);
        self.diffs
            .entry(key)
            .or_default()
            .insert(diff.timestamp(), diff);
    }

    /// Id the current-state record of this object has, or will get.
    pub(crate) fn current_id(&self, meta: &Metadata) -> RecordId {
        self.current
            .get(&key_of(&meta.entity, &meta.obj_id))
            .and_then(Snapshot::id)
            .unwrap_or_default()
    }

    pub(crate) fn put_current(&mut self, snapshot: Snapshot) {
        let key = key_of(&snapshot.meta.entity, &snapshot.meta.obj_id);
        self.current.insert(key, snapshot);
    }

    pub(crate) fn current(&self, key: &Key) -> Option<Snapshot> {
        self.current.get(key).cloned()
    }

    pub(crate) fn snapshot_before(&self, key: &Key, timestamp: Timestamp) -> Option<Snapshot> {
        self.snapshots
            .get(key)
            .and_then(|p| p.range(..timestamp).next_back())
            .map(|(_, s)| s.clone())
    }

    pub(crate) fn diff_before(&self, key: &Key, timestamp: Timestamp) -> Option<Diff> {
        self.diffs
            .get(key)
            .and_then(|p| p.range(..timestamp).next_back())
            .map(|(_, d)| d.clone())
    }

    pub(crate) fn diffs_between(
        &self,
        key: &Key,
        after: Timestamp,
        before: Timestamp,
    ) -> Vec<Diff> {
        if after >= before {
            return Vec::new();
        }
        self.diffs
            .get(key)
            .map(|p| {
                p.range((Bound::Excluded(after), Bound::Excluded(before)))
                    .map(|(_, d)| d.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        (
            self.snapshots.values().map(BTreeMap::len).sum(),
            self.diffs.values().map(BTreeMap::len).sum(),
            self.current.len(),
        )
    }
}

/// In-process storage adapter.
///
/// Reference implementation of the port: every partition is a `BTreeMap`
/// ordered by timestamp, which gives the indexed "latest before" lookup.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Partitions>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of history snapshots stored.
    pub async fn snapshot_count(&self) -> usize {
        self.inner.read().await.counts().0
    }

    /// Number of history diffs stored.
    pub async fn diff_count(&self) -> usize {
        self.inner.read().await.counts().1
    }

    /// Number of current-state records.
    pub async fn current_count(&self) -> usize {
        self.inner.read().await.counts().2
    }
}

#[async_trait]
impl StorageStrategy for MemoryStorage {
    async fn insert_snapshot(&self, snapshot: Snapshot) -> StorageResult<Snapshot> {
        let mut inner = self.inner.write().await;
        inner.admit(RecordKind::Snapshot, &snapshot.meta)?;
        let stored = snapshot.with_id(RecordId::new());
        inner.put_snapshot(stored.clone());
        tracing::debug!(
            entity = stored.meta.entity.name(),
            obj_id = %stored.meta.obj_id,
            timestamp = %stored.timestamp(),
            "stored snapshot"
        );
        Ok(stored)
    }

    async fn upsert_snapshot(&self, snapshot: Snapshot) -> StorageResult<Snapshot> {
        let mut inner = self.inner.write().await;
        let id = inner.current_id(&snapshot.meta);
        let stored = snapshot.with_id(id);
        inner.put_current(stored.clone());
        tracing::debug!(
            entity = stored.meta.entity.name(),
            obj_id = %stored.meta.obj_id,
            timestamp = %stored.timestamp(),
            "stored current state"
        );
        Ok(stored)
    }

    async fn insert_diff(&self, diff: Diff) -> StorageResult<Diff> {
        let mut inner = self.inner.write().await;
        inner.admit(RecordKind::Diff, &diff.meta)?;
        let stored = diff.with_id(RecordId::new());
        inner.put_diff(stored.clone());
        tracing::debug!(
            entity = stored.meta.entity.name(),
            obj_id = %stored.meta.obj_id,
            timestamp = %stored.timestamp(),
            ops = stored.ops.len(),
            "stored diff"
        );
        Ok(stored)
    }

    async fn find_latest_snapshot_before(
        &self,
        id: &ObjId,
        timestamp: Timestamp,
        entity: &Entity,
    ) -> StorageResult<Option<Snapshot>> {
        Ok(self
            .inner
            .read()
            .await
            .snapshot_before(&key_of(entity, id), timestamp))
    }

    async fn find_latest_diff_before(
        &self,
        id: &ObjId,
        timestamp: Timestamp,
        entity: &Entity,
    ) -> StorageResult<Option<Diff>> {
        Ok(self
            .inner
            .read()
            .await
            .diff_before(&key_of(entity, id), timestamp))
    }

    async fn find_current(&self, id: &ObjId, entity: &Entity) -> StorageResult<Option<Snapshot>> {
        Ok(self.inner.read().await.current(&key_of(entity, id)))
    }

    async fn find_diffs_between(
        &self,
        id: &ObjId,
        after: Timestamp,
        before: Timestamp,
        entity: &Entity,
    ) -> StorageResult<Vec<Diff>> {
        Ok(self
            .inner
            .read()
            .await
            .diffs_between(&key_of(entity, id), after, before))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use snapdiff_common::Creator;
    use snapdiff_kernel::{ArrayDiff, Op};
    use std::sync::Arc;

    fn order() -> Arc<Entity> {
        Arc::new(Entity::new("order", "id").unwrap())
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap()
    }

    fn meta(obj_id: &str, minute: u32) -> Metadata {
        Metadata::new(obj_id.into(), order(), Creator::new("ann", "test"), at(minute))
    }

    fn snapshot(obj_id: &str, minute: u32, total: i64) -> Snapshot {
        Snapshot::new(meta(obj_id, minute), json!({"id": obj_id, "total": total}))
    }

    fn diff(obj_id: &str, minute: u32) -> Diff {
        Diff::new(
            meta(obj_id, minute),
            vec![Op::Array {
                path: "tags".parse().unwrap(),
                entries: vec![ArrayDiff::new(0, "x")],
            }],
        )
    }

    #[tokio::test]
    async fn insert_assigns_fresh_ids() {
        let store = MemoryStorage::new();
        let a = store.insert_snapshot(snapshot("o-1", 0, 1)).await.unwrap();
        let b = store.insert_diff(diff("o-1", 1)).await.unwrap();
        assert!(a.id().is_some());
        assert!(b.id().is_some());
        assert_ne!(a.id(), b.id());
        assert_eq!(store.snapshot_count().await, 1);
        assert_eq!(store.diff_count().await, 1);
    }

    #[tokio::test]
    async fn already_persisted_is_rejected() {
        let store = MemoryStorage::new();
        let stored = store.insert_snapshot(snapshot("o-1", 0, 1)).await.unwrap();
        let err = store.insert_snapshot(stored).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyPersisted { .. }));
    }

    #[tokio::test]
    async fn duplicate_timestamp_across_collections_is_rejected() {
        let store = MemoryStorage::new();
        store.insert_snapshot(snapshot("o-1", 5, 1)).await.unwrap();
        let err = store.insert_diff(diff("o-1", 5)).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateTimestamp { .. }));
        let err = store.insert_snapshot(snapshot("o-1", 5, 2)).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateTimestamp { .. }));
        // Other objects are independent.
        store.insert_diff(diff("o-2", 5)).await.unwrap();
    }

    #[tokio::test]
    async fn latest_before_is_strict() {
        let store = MemoryStorage::new();
        let entity = order();
        let id = ObjId::from("o-1");
        store.insert_snapshot(snapshot("o-1", 0, 1)).await.unwrap();
        store.insert_snapshot(snapshot("o-1", 10, 2)).await.unwrap();

        let found = store
            .find_latest_snapshot_before(&id, at(10), &entity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.timestamp(), at(0));

        let found = store
            .find_latest_snapshot_before(&id, at(11), &entity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.timestamp(), at(10));

        assert!(store
            .find_latest_snapshot_before(&id, at(0), &entity)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lookups_are_partitioned_by_entity() {
        let store = MemoryStorage::new();
        store.insert_diff(diff("o-1", 3)).await.unwrap();
        let invoice = Entity::new("invoice", "id").unwrap();
        assert!(store
            .find_latest_diff_before(&"o-1".into(), at(30), &invoice)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn diffs_between_excludes_both_ends() {
        let store = MemoryStorage::new();
        for minute in [1, 2, 3, 4] {
            store.insert_diff(diff("o-1", minute)).await.unwrap();
        }
        let found = store
            .find_diffs_between(&"o-1".into(), at(1), at(4), &order())
            .await
            .unwrap();
        let minutes: Vec<_> = found.iter().map(|d| d.timestamp()).collect();
        assert_eq!(minutes, vec![at(2), at(3)]);
        assert!(store
            .find_diffs_between(&"o-1".into(), at(4), at(4), &order())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn upsert_keeps_one_current_record_and_last_payload_wins() {
        let store = MemoryStorage::new();
        let first = store.upsert_snapshot(snapshot("o-1", 0, 1)).await.unwrap();
        let second = store.upsert_snapshot(snapshot("o-1", 1, 2)).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(store.current_count().await, 1);
        assert_eq!(store.snapshot_count().await, 0);

        let current = store
            .find_current(&"o-1".into(), &order())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.obj["total"], json!(2));
    }
}

use async_trait::async_trait;
use snapdiff_common::{Entity, ObjId, Timestamp};
use snapdiff_kernel::{Diff, Snapshot};

use crate::StorageResult;

/// Persistence port of the versioning engine.
///
/// Adapters are constructed explicitly and handed to the engine; the engine
/// never knows which backend sits behind this trait. Every operation either
/// succeeds or returns a [`crate::StorageError`]; nothing is dropped silently
/// and nothing is retried here.
///
/// Implementations:
/// - [`crate::MemoryStorage`]: in-process reference adapter
/// - [`crate::FileStorage`]: directory of CBOR + zstd records with a hash chain
#[async_trait]
pub trait StorageStrategy: Send + Sync {
    /// Append a snapshot to history. Returns it with a fresh id.
    async fn insert_snapshot(&self, snapshot: Snapshot) -> StorageResult<Snapshot>;

    /// Write or replace the current-state record of the snapshot's object.
    ///
    /// Matched by entity and `obj_id`, never by timestamp. A replaced record
    /// keeps its id; the latest payload wins.
    async fn upsert_snapshot(&self, snapshot: Snapshot) -> StorageResult<Snapshot>;

    /// Append a diff to history. Returns it with a fresh id.
    async fn insert_diff(&self, diff: Diff) -> StorageResult<Diff>;

    /// The snapshot of `id` with the greatest timestamp strictly before `timestamp`.
    async fn find_latest_snapshot_before(
        &self,
        id: &ObjId,
        timestamp: Timestamp,
        entity: &Entity,
    ) -> StorageResult<Option<Snapshot>>;

    /// The diff of `id` with the greatest timestamp strictly before `timestamp`.
    async fn find_latest_diff_before(
        &self,
        id: &ObjId,
        timestamp: Timestamp,
        entity: &Entity,
    ) -> StorageResult<Option<Diff>>;

    /// The current-state record written by [`Self::upsert_snapshot`].
    async fn find_current(&self, id: &ObjId, entity: &Entity) -> StorageResult<Option<Snapshot>>;

    /// Diffs of `id` with `after < timestamp < before`, ascending.
    ///
    /// The default walks backwards from `before` one diff at a time; adapters
    /// with an ordered index should answer it with a single range scan.
    async fn find_diffs_between(
        &self,
        id: &ObjId,
        after: Timestamp,
        before: Timestamp,
        entity: &Entity,
    ) -> StorageResult<Vec<Diff>> {
        let mut diffs = Vec::new();
        let mut bound = before;
        while let Some(diff) = self.find_latest_diff_before(id, bound, entity).await? {
            if diff.timestamp() <= after {
                break;
            }
            bound = diff.timestamp();
            diffs.push(diff);
        }
        diffs.reverse();
        Ok(diffs)
    }
}

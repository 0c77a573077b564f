use serde_json::Value;
use snapdiff_common::{predecessor, successor, Entity, ObjId, Timestamp};
use snapdiff_kernel::{apply_ops, Metadata, Record, RecordKind};
use std::sync::Arc;
use tracing::Instrument;

use crate::{HistoryError, HistoryResult, StorageStrategy, WithObject};

/// Rebuilds the state of an object as of a past instant from the nearest
/// snapshot and the diffs that follow it.
///
/// Holds no state besides the injected storage handle, so one instance can
/// serve any number of concurrent reads.
pub struct Reconstructor<S: ?Sized> {
    storage: Arc<S>,
}

impl<S: ?Sized> Clone for Reconstructor<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: StorageStrategy + ?Sized> Reconstructor<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The state of object `id` as of `timestamp`, inclusive.
    ///
    /// Fails with [`HistoryError::NotFound`] when the object has no snapshot
    /// at or before `timestamp`, and with [`HistoryError::CorruptHistory`]
    /// when a diff does not fit the state it follows.
    pub async fn state_at(
        &self,
        id: &ObjId,
        timestamp: Timestamp,
        entity: &Entity,
    ) -> HistoryResult<Value> {
        let span =
            tracing::debug_span!("state_at", entity = entity.name(), obj_id = %id, %timestamp);
        self.replay(id, timestamp, entity).instrument(span).await
    }

    async fn replay(
        &self,
        id: &ObjId,
        timestamp: Timestamp,
        entity: &Entity,
    ) -> HistoryResult<Value> {
        let bound = successor(timestamp);
        let snapshot = self
            .storage
            .find_latest_snapshot_before(id, bound, entity)
            .await
            .with_object(entity, id)?
            .ok_or_else(|| HistoryError::NotFound {
                kind: RecordKind::Snapshot,
                entity: entity.name().to_owned(),
                obj_id: id.clone(),
                timestamp,
            })?;
        check_owner(&snapshot.meta, id, entity)?;
        let base = snapshot.timestamp();

        // A diff sharing the snapshot's instant cannot be ordered against it.
        if let Some(tied) = self
            .storage
            .find_latest_diff_before(id, successor(base), entity)
            .await
            .with_object(entity, id)?
        {
            if tied.timestamp() == base {
                tracing::warn!(
                    obj_id = %id,
                    timestamp = %base,
                    "snapshot and diff share a timestamp"
                );
                return Err(HistoryError::corrupt(
                    entity,
                    id,
                    base,
                    "a snapshot and a diff share this timestamp",
                ));
            }
        }

        let diffs = self
            .storage
            .find_diffs_between(id, base, bound, entity)
            .await
            .with_object(entity, id)?;

        let mut state = snapshot.obj;
        let mut cursor = base;
        for diff in &diffs {
            check_owner(&diff.meta, id, entity)?;
            let at = diff.timestamp();
            if at <= cursor || at > timestamp {
                tracing::warn!(
                    obj_id = %id,
                    timestamp = %at,
                    cursor = %cursor,
                    "diff out of order"
                );
                return Err(HistoryError::corrupt(
                    entity,
                    id,
                    at,
                    format!("diff is out of order after {cursor}"),
                ));
            }
            apply_ops(&mut state, &diff.ops).map_err(|e| {
                tracing::warn!(obj_id = %id, timestamp = %at, error = %e, "diff does not apply");
                HistoryError::corrupt(entity, id, at, e.to_string())
            })?;
            cursor = at;
        }
        tracing::debug!(snapshot = %base, diffs = diffs.len(), "reconstructed state");
        Ok(state)
    }

    /// History records of object `id` with `from <= timestamp <= to`, in order.
    pub async fn history(
        &self,
        id: &ObjId,
        entity: &Entity,
        from: Timestamp,
        to: Timestamp,
    ) -> HistoryResult<Vec<Record>> {
        if from > to {
            return Ok(Vec::new());
        }
        let bound = successor(to);
        let mut records: Vec<Record> = Vec::new();

        let mut cursor = bound;
        while let Some(snapshot) = self
            .storage
            .find_latest_snapshot_before(id, cursor, entity)
            .await
            .with_object(entity, id)?
        {
            if snapshot.timestamp() < from {
                break;
            }
            cursor = snapshot.timestamp();
            records.push(snapshot.into());
        }

        let diffs = self
            .storage
            .find_diffs_between(id, predecessor(from), bound, entity)
            .await
            .with_object(entity, id)?;
        records.extend(diffs.into_iter().map(Record::from));
        records.sort_by_key(Record::timestamp);
        Ok(records)
    }
}

fn check_owner(meta: &Metadata, id: &ObjId, entity: &Entity) -> HistoryResult<()> {
    if &meta.obj_id != id || *meta.entity != *entity {
        return Err(HistoryError::corrupt(
            entity,
            id,
            meta.timestamp,
            format!("record belongs to {} {}", meta.entity.name(), meta.obj_id),
        ));
    }
    Ok(())
}

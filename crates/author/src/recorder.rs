use serde_json::Value;
use snapdiff_common::{Creator, Entity, ModelError, ObjId, Timestamp};
use snapdiff_kernel::{Diff, Differ, Snapshot};
use snapdiff_persist::{HistoryError, HistoryResult, Reconstructor, StorageStrategy, WithObject};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::RecorderConfig;

/// Errors from the write path.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("{entity} {obj_id}: version at {timestamp} is not after the latest at {latest}")]
    OutOfOrder {
        entity: String,
        obj_id: ObjId,
        timestamp: Timestamp,
        latest: Timestamp,
    },
}

impl From<ModelError> for RecordError {
    fn from(e: ModelError) -> Self {
        Self::History(HistoryError::Model(e))
    }
}

/// What [`Recorder::record`] wrote to history.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Snapshot(Snapshot),
    Diff(Diff),
    /// The new version equals the previous one; nothing was written.
    Unchanged,
}

/// Last recorded version of an object, handed from one queued write to the next.
#[derive(Debug)]
struct Tip {
    timestamp: Timestamp,
    state: Value,
    diffs_since_snapshot: u32,
}

type Key = (String, ObjId);
type Slot = Arc<tokio::sync::Mutex<Option<Tip>>>;
type Slots = Mutex<HashMap<Key, Slot>>;

/// Claim on the slot of one object. The slot leaves the map when the last
/// claim on it is dropped.
struct Lease<'a> {
    slots: &'a Slots,
    key: Key,
    slot: Slot,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in this lease, one in the map.
        let idle = Arc::strong_count(&self.slot) == 2
            && slots.get(&self.key).is_some_and(|held| Arc::ptr_eq(held, &self.slot));
        if idle {
            slots.remove(&self.key);
        }
    }
}

/// Serializes writes per object and turns successive versions into
/// snapshots and diffs.
///
/// Writes to one object run one at a time; writes to different objects run
/// concurrently. The recorder assumes it is the only writer of the objects it
/// records. An object is held in memory only while writes to it are queued;
/// the first write after it goes idle reloads its tip from storage.
pub struct Recorder<S: ?Sized> {
    storage: Arc<S>,
    reconstructor: Reconstructor<S>,
    config: RecorderConfig,
    slots: Slots,
}

impl<S: StorageStrategy + ?Sized> Recorder<S> {
    pub fn new(storage: Arc<S>, config: RecorderConfig) -> Self {
        Self {
            reconstructor: Reconstructor::new(Arc::clone(&storage)),
            storage,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn reconstructor(&self) -> &Reconstructor<S> {
        &self.reconstructor
    }

    /// Record `next` as the version of its object at `timestamp`.
    #[tracing::instrument(
        skip_all,
        fields(entity = entity.name(), obj_id = tracing::field::Empty, %timestamp)
    )]
    pub async fn record(
        &self,
        entity: &Arc<Entity>,
        next: Value,
        creator: Creator,
        timestamp: Timestamp,
    ) -> Result<Recorded, RecordError> {
        let obj_id = entity.extract_id(&next)?;
        tracing::Span::current().record("obj_id", obj_id.as_str());

        let lease = self.lease(entity, &obj_id);
        let mut guard = lease.slot.lock().await;
        let tip = match guard.take() {
            Some(tip) => Some(tip),
            None => self.load(entity, &obj_id).await?,
        };

        let Some(tip) = tip else {
            let first =
                Snapshot::capture(next.clone(), Arc::clone(entity), creator.clone(), timestamp)?;
            let snapshot = self
                .storage
                .insert_snapshot(first)
                .await
                .with_object(entity, &obj_id)?;
            tracing::debug!("recorded first version as snapshot");
            *guard = Some(Tip {
                timestamp,
                state: next.clone(),
                diffs_since_snapshot: 0,
            });
            self.upsert_current(entity, &obj_id, next, creator, timestamp).await?;
            return Ok(Recorded::Snapshot(snapshot));
        };

        if timestamp <= tip.timestamp {
            tracing::warn!(latest = %tip.timestamp, "rejected out-of-order version");
            let latest = tip.timestamp;
            *guard = Some(tip);
            return Err(RecordError::OutOfOrder {
                entity: entity.name().to_owned(),
                obj_id,
                timestamp,
                latest,
            });
        }

        let diff = Differ::compute(
            Some(&tip.state),
            &next,
            entity,
            creator.clone(),
            timestamp,
            obj_id.clone(),
        );
        let diff = match diff {
            Ok(diff) => diff,
            Err(e) => {
                *guard = Some(tip);
                return Err(e.into());
            }
        };
        if diff.is_empty() && self.config.skip_empty_diffs {
            tracing::debug!("unchanged, nothing recorded");
            *guard = Some(tip);
            return Ok(Recorded::Unchanged);
        }

        let since = tip.diffs_since_snapshot;
        let (recorded, diffs_since_snapshot) = if self.config.snapshot_due(since) {
            let full =
                Snapshot::capture(next.clone(), Arc::clone(entity), creator.clone(), timestamp)?;
            let snapshot = self
                .storage
                .insert_snapshot(full)
                .await
                .with_object(entity, &obj_id)?;
            tracing::debug!(after_diffs = since, "recorded periodic snapshot");
            (Recorded::Snapshot(snapshot), 0)
        } else {
            let diff = self
                .storage
                .insert_diff(diff)
                .await
                .with_object(entity, &obj_id)?;
            tracing::debug!(ops = diff.ops.len(), "recorded diff");
            (Recorded::Diff(diff), since.saturating_add(1))
        };
        *guard = Some(Tip {
            timestamp,
            state: next.clone(),
            diffs_since_snapshot,
        });
        self.upsert_current(entity, &obj_id, next, creator, timestamp).await?;
        Ok(recorded)
    }

    /// Record the state of `obj_id` as of `to` as a new version at `timestamp`.
    pub async fn revert(
        &self,
        entity: &Arc<Entity>,
        obj_id: &ObjId,
        to: Timestamp,
        creator: Creator,
        timestamp: Timestamp,
    ) -> Result<Recorded, RecordError> {
        let past = self.reconstructor.state_at(obj_id, to, entity).await?;
        tracing::debug!(entity = entity.name(), %obj_id, %to, "reverting");
        self.record(entity, past, creator, timestamp).await
    }

    /// The current-state snapshot of `obj_id`, if one has been written.
    pub async fn current(
        &self,
        entity: &Entity,
        obj_id: &ObjId,
    ) -> HistoryResult<Option<Snapshot>> {
        self.storage
            .find_current(obj_id, entity)
            .await
            .with_object(entity, obj_id)
    }

    fn lease(&self, entity: &Entity, obj_id: &ObjId) -> Lease<'_> {
        let key = (entity.name().to_owned(), obj_id.clone());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = Arc::clone(slots.entry(key.clone()).or_default());
        Lease {
            slots: &self.slots,
            key,
            slot,
        }
    }

    /// Rebuild the tip of an object from storage. `None` when it has no
    /// snapshot yet.
    async fn load(&self, entity: &Entity, obj_id: &ObjId) -> HistoryResult<Option<Tip>> {
        let end = Timestamp::MAX_UTC;
        let Some(snapshot) = self
            .storage
            .find_latest_snapshot_before(obj_id, end, entity)
            .await
            .with_object(entity, obj_id)?
        else {
            return Ok(None);
        };
        let diffs = self
            .storage
            .find_diffs_between(obj_id, snapshot.timestamp(), end, entity)
            .await
            .with_object(entity, obj_id)?;
        let timestamp = diffs.last().map_or(snapshot.timestamp(), Diff::timestamp);
        let state = self.reconstructor.state_at(obj_id, timestamp, entity).await?;
        tracing::debug!(%obj_id, %timestamp, diffs = diffs.len(), "loaded tip from storage");
        Ok(Some(Tip {
            timestamp,
            state,
            diffs_since_snapshot: u32::try_from(diffs.len()).unwrap_or(u32::MAX),
        }))
    }

    async fn upsert_current(
        &self,
        entity: &Arc<Entity>,
        obj_id: &ObjId,
        state: Value,
        creator: Creator,
        timestamp: Timestamp,
    ) -> HistoryResult<()> {
        if !self.config.maintain_current {
            return Ok(());
        }
        let current = Snapshot::capture(state, Arc::clone(entity), creator, timestamp)?;
        self.storage
            .upsert_snapshot(current)
            .await
            .with_object(entity, obj_id)?;
        Ok(())
    }
}

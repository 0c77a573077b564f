//! File-backed storage adapter.
//!
//! Layout inside the store directory:
//! ```text
//! store.meta.json              - schema version and record counters
//! snapshots/
//!   000001.snapshot.cbor.zst   - one CBOR+zstd history snapshot per file
//! diffs/
//!   000001.diff.cbor.zst       - one CBOR+zstd history diff per file
//! current/
//!   <sha256>.current.cbor.zst  - current-state record, replaced on upsert
//! integrity/
//!   manifest.json              - hash chain over every history file
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use snapdiff_common::{Entity, ObjId, RecordId, Timestamp};
use snapdiff_kernel::{Diff, Record, RecordKind, Snapshot};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::memory::{key_of, Partitions};
use crate::{EntityRegistry, StorageError, StorageResult, StorageStrategy, StoredRecord};

/// Current on-disk schema version.
const STORE_SCHEMA_VERSION: u32 = 1;

const META_FILE: &str = "store.meta.json";
const SNAPSHOT_DIR: &str = "snapshots";
const DIFF_DIR: &str = "diffs";
const CURRENT_DIR: &str = "current";
const INTEGRITY_DIR: &str = "integrity";
const MANIFEST_FILE: &str = "manifest.json";

/// Metadata stored in `store.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub snapshot_count: u32,
    pub diff_count: u32,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Integrity manifest tracking every history file in a hash chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug)]
struct State {
    meta: StoreMeta,
    manifest: IntegrityManifest,
    index: Partitions,
}

/// Directory-backed storage adapter.
///
/// Every history record is written once to its own file and chained into the
/// integrity manifest. An in-memory index, rebuilt on [`FileStorage::open`],
/// answers the lookups.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    registry: EntityRegistry,
    state: RwLock<State>,
}

impl FileStorage {
    /// Open or create a store at the given path.
    ///
    /// Fails closed on a schema version mismatch, a file whose hash does not
    /// match the manifest, or a record whose entity is not registered.
    pub async fn open(path: impl AsRef<Path>, registry: EntityRegistry) -> StorageResult<Self> {
        let root = path.as_ref().to_path_buf();
        for dir in [SNAPSHOT_DIR, DIFF_DIR, CURRENT_DIR, INTEGRITY_DIR] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }

        let meta_path = root.join(META_FILE);
        let manifest_path = root.join(INTEGRITY_DIR).join(MANIFEST_FILE);

        let (meta, manifest) = if tokio::fs::try_exists(&meta_path).await? {
            let meta: StoreMeta = serde_json::from_slice(&tokio::fs::read(&meta_path).await?)?;
            if meta.schema_version != STORE_SCHEMA_VERSION {
                return Err(StorageError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: STORE_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if tokio::fs::try_exists(&manifest_path).await? {
                serde_json::from_slice(&tokio::fs::read(&manifest_path).await?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                schema_version: STORE_SCHEMA_VERSION,
                snapshot_count: 0,
                diff_count: 0,
            };
            let manifest = IntegrityManifest::default();
            tokio::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?).await?;
            tokio::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?).await?;
            (meta, manifest)
        };

        let mut index = Partitions::default();
        for entry in &manifest.entries {
            let data = tokio::fs::read(history_path(&root, &entry.filename)).await?;
            check_hash(&entry.sha256, &data)?;
            let record = decode(&data)?.into_record(&registry)?;
            let meta = record.meta();
            if index.occupied(meta) {
                return Err(StorageError::IntegrityMismatch {
                    expected: format!(
                        "one record for {} {} at {}",
                        meta.entity.name(),
                        meta.obj_id,
                        meta.timestamp
                    ),
                    actual: format!("second record in {}", entry.filename),
                });
            }
            match record {
                Record::Snapshot(s) => index.put_snapshot(s),
                Record::Diff(d) => index.put_diff(d),
            }
        }

        let mut current = tokio::fs::read_dir(root.join(CURRENT_DIR)).await?;
        while let Some(file) = current.next_entry().await? {
            let data = tokio::fs::read(file.path()).await?;
            match decode(&data)?.into_record(&registry)? {
                Record::Snapshot(s) => index.put_current(s),
                Record::Diff(_) => {
                    return Err(StorageError::CborDecode(format!(
                        "{} holds a diff, expected a current-state snapshot",
                        file.path().display()
                    )));
                }
            }
        }

        tracing::info!(
            root = %root.display(),
            history_files = manifest.entries.len(),
            "opened file storage"
        );

        Ok(Self {
            root,
            registry,
            state: RwLock::new(State {
                meta,
                manifest,
                index,
            }),
        })
    }

    /// Get the path to the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The entity descriptors this store decodes with.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// A copy of the current metadata.
    pub async fn meta(&self) -> StoreMeta {
        self.state.read().await.meta.clone()
    }

    /// Verify every history file against the manifest hash chain.
    pub async fn verify_integrity(&self) -> StorageResult<()> {
        let state = self.state.read().await;
        let mut prev_hash: Option<String> = None;
        for entry in &state.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StorageError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }
            let data = tokio::fs::read(history_path(&self.root, &entry.filename)).await?;
            check_hash(&entry.sha256, &data)?;
            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    /// Encode `record`, write it as the next history file and chain it.
    ///
    /// `state` keeps its counters and manifest unless both the record file
    /// and the updated metadata reach the disk. A record file left behind by
    /// a failed save is removed.
    async fn append(&self, state: &mut State, record: &Record, id: RecordId) -> StorageResult<()> {
        let compressed = encode(&StoredRecord::new(id, record))?;
        let mut meta = state.meta.clone();
        let (dir, seq, suffix) = match record.kind() {
            RecordKind::Snapshot => {
                meta.snapshot_count += 1;
                (SNAPSHOT_DIR, meta.snapshot_count, "snapshot")
            }
            RecordKind::Diff => {
                meta.diff_count += 1;
                (DIFF_DIR, meta.diff_count, "diff")
            }
        };
        let filename = format!("{seq:06}.{suffix}.cbor.zst");
        let path = self.root.join(dir).join(&filename);
        let sha256 = sha256_hex(&compressed);
        let prev_hash = state.manifest.entries.last().map(|e| e.sha256.clone());

        tokio::fs::write(&path, &compressed).await?;
        state.manifest.entries.push(ManifestEntry {
            filename,
            sha256,
            prev_hash,
        });
        if let Err(e) = self.save(&meta, &state.manifest).await {
            state.manifest.entries.pop();
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    path = %path.display(),
                    error = %cleanup,
                    "orphaned record file left behind"
                );
            }
            tracing::warn!(path = %path.display(), error = %e, "history write rolled back");
            return Err(e);
        }
        state.meta = meta;
        Ok(())
    }

    async fn save(&self, meta: &StoreMeta, manifest: &IntegrityManifest) -> StorageResult<()> {
        tokio::fs::write(self.root.join(META_FILE), serde_json::to_vec_pretty(meta)?).await?;
        tokio::fs::write(
            self.root.join(INTEGRITY_DIR).join(MANIFEST_FILE),
            serde_json::to_vec_pretty(manifest)?,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageStrategy for FileStorage {
    async fn insert_snapshot(&self, snapshot: Snapshot) -> StorageResult<Snapshot> {
        let mut state = self.state.write().await;
        state.index.admit(RecordKind::Snapshot, &snapshot.meta)?;
        let id = RecordId::new();
        let stored = snapshot.with_id(id);
        self.append(&mut state, &Record::from(stored.clone()), id).await?;
        state.index.put_snapshot(stored.clone());
        tracing::debug!(
            obj_id = %stored.meta.obj_id,
            timestamp = %stored.timestamp(),
            "wrote snapshot"
        );
        Ok(stored)
    }

    async fn upsert_snapshot(&self, snapshot: Snapshot) -> StorageResult<Snapshot> {
        let mut state = self.state.write().await;
        let id = state.index.current_id(&snapshot.meta);
        let stored = snapshot.with_id(id);
        let compressed = encode(&StoredRecord::new(id, &Record::from(stored.clone())))?;
        let filename = format!(
            "{}.current.cbor.zst",
            sha256_hex(format!("{}\0{}", stored.meta.entity.name(), stored.meta.obj_id).as_bytes())
        );
        tokio::fs::write(self.root.join(CURRENT_DIR).join(filename), &compressed).await?;
        state.index.put_current(stored.clone());
        tracing::debug!(
            obj_id = %stored.meta.obj_id,
            timestamp = %stored.timestamp(),
            "wrote current state"
        );
        Ok(stored)
    }

    async fn insert_diff(&self, diff: Diff) -> StorageResult<Diff> {
        let mut state = self.state.write().await;
        state.index.admit(RecordKind::Diff, &diff.meta)?;
        let id = RecordId::new();
        let stored = diff.with_id(id);
        self.append(&mut state, &Record::from(stored.clone()), id).await?;
        state.index.put_diff(stored.clone());
        tracing::debug!(
            obj_id = %stored.meta.obj_id,
            timestamp = %stored.timestamp(),
            "wrote diff"
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
            .state
            .read()
            .await
            .index
            .snapshot_before(&key_of(entity, id), timestamp))
    }

    async fn find_latest_diff_before(
        &self,
        id: &ObjId,
        timestamp: Timestamp,
        entity: &Entity,
    ) -> StorageResult<Option<Diff>> {
        Ok(self
            .state
            .read()
            .await
            .index
            .diff_before(&key_of(entity, id), timestamp))
    }

    async fn find_current(&self, id: &ObjId, entity: &Entity) -> StorageResult<Option<Snapshot>> {
        Ok(self.state.read().await.index.current(&key_of(entity, id)))
    }

    async fn find_diffs_between(
        &self,
        id: &ObjId,
        after: Timestamp,
        before: Timestamp,
        entity: &Entity,
    ) -> StorageResult<Vec<Diff>> {
        Ok(self
            .state
            .read()
            .await
            .index
            .diffs_between(&key_of(entity, id), after, before))
    }
}

fn history_path(root: &Path, filename: &str) -> PathBuf {
    if filename.contains(".snapshot.") {
        root.join(SNAPSHOT_DIR).join(filename)
    } else {
        root.join(DIFF_DIR).join(filename)
    }
}

fn check_hash(expected: &str, data: &[u8]) -> StorageResult<()> {
    let actual = sha256_hex(data);
    if actual != expected {
        return Err(StorageError::IntegrityMismatch {
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(())
}

fn encode(doc: &StoredRecord) -> StorageResult<Vec<u8>> {
    let mut cbor = Vec::new();
    ciborium::into_writer(doc, &mut cbor).map_err(|e| StorageError::CborEncode(e.to_string()))?;
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(&cbor)?;
    Ok(encoder.finish()?)
}

fn decode(data: &[u8]) -> StorageResult<StoredRecord> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut cbor = Vec::new();
    decoder.read_to_end(&mut cbor)?;
    ciborium::from_reader(cbor.as_slice()).map_err(|e| StorageError::CborDecode(e.to_string()))
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use snapdiff_common::Creator;
    use snapdiff_kernel::{ArrayDiff, Metadata, Op};
    use std::sync::Arc;

    fn order() -> Arc<Entity> {
        Arc::new(Entity::new("order", "id").unwrap())
    }

    fn registry() -> EntityRegistry {
        EntityRegistry::new().with(order())
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap()
    }

    fn meta(minute: u32) -> Metadata {
        Metadata::new("o-1".into(), order(), Creator::new("ann", "test"), at(minute))
    }

    fn tagged_diff(minute: u32) -> Diff {
        Diff::new(
            meta(minute),
            vec![Op::Array {
                path: "tags".parse().unwrap(),
                entries: vec![ArrayDiff::new(1, "x")],
            }],
        )
    }

    #[tokio::test]
    async fn open_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStorage::open(tmp.path().join("history"), registry()).await.unwrap();
        let meta = store.meta().await;
        assert_eq!(meta.schema_version, STORE_SCHEMA_VERSION);
        assert_eq!(meta.snapshot_count, 0);
        assert_eq!(meta.diff_count, 0);
        for dir in [SNAPSHOT_DIR, DIFF_DIR, CURRENT_DIR, INTEGRITY_DIR] {
            assert!(store.root().join(dir).is_dir());
        }
    }

    #[tokio::test]
    async fn reopen_preserves_history_and_current_state() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        let inserted = {
            let store = FileStorage::open(&path, registry()).await.unwrap();
            store
                .insert_snapshot(Snapshot::new(meta(0), json!({"id": "o-1", "tags": ["a", "b"]})))
                .await
                .unwrap();
            let current = json!({"id": "o-1", "tags": ["a", "x", "b"]});
            store
                .upsert_snapshot(Snapshot::new(meta(1), current))
                .await
                .unwrap();
            store.insert_diff(tagged_diff(1)).await.unwrap()
        };

        let store = FileStorage::open(&path, registry()).await.unwrap();
        let id = ObjId::from("o-1");
        let diff = store
            .find_latest_diff_before(&id, at(2), &order())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(diff, inserted);
        let snapshot = store
            .find_latest_snapshot_before(&id, at(2), &order())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.obj, json!({"id": "o-1", "tags": ["a", "b"]}));
        let current = store.find_current(&id, &order()).await.unwrap().unwrap();
        assert_eq!(current.obj["tags"], json!(["a", "x", "b"]));
        assert_eq!(store.meta().await.diff_count, 1);
        store.verify_integrity().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_timestamp_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStorage::open(tmp.path(), registry()).await.unwrap();
        store.insert_diff(tagged_diff(3)).await.unwrap();
        let err = store.insert_diff(tagged_diff(3)).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateTimestamp { .. }));
        assert_eq!(store.meta().await.diff_count, 1);
    }

    #[tokio::test]
    async fn integrity_fail_closed_on_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        {
            let store = FileStorage::open(&path, registry()).await.unwrap();
            store.insert_diff(tagged_diff(1)).await.unwrap();
            store.verify_integrity().await.unwrap();
        }

        let diff_path = path.join(DIFF_DIR).join("000001.diff.cbor.zst");
        let mut data = std::fs::read(&diff_path).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&diff_path, &data).unwrap();

        assert!(matches!(
            FileStorage::open(&path, registry()).await,
            Err(StorageError::IntegrityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn unregistered_entity_fails_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        {
            let store = FileStorage::open(&path, registry()).await.unwrap();
            store.insert_diff(tagged_diff(1)).await.unwrap();
        }
        assert!(matches!(
            FileStorage::open(&path, EntityRegistry::new()).await,
            Err(StorageError::UnknownEntity(_))
        ));
    }

    #[tokio::test]
    async fn schema_mismatch_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        FileStorage::open(&path, registry()).await.unwrap();

        let meta_path = path.join(META_FILE);
        let mut meta: StoreMeta =
            serde_json::from_slice(&std::fs::read(&meta_path).unwrap()).unwrap();
        meta.schema_version = 999;
        std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta).unwrap()).unwrap();

        match FileStorage::open(&path, registry()).await {
            Err(StorageError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, STORE_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }
    #[tokio::test]
    async fn failed_save_rolls_back_and_retry_writes_once() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        let store = FileStorage::open(&path, registry()).await.unwrap();

        // A directory in place of the meta file makes every save fail.
        let meta_path = path.join(META_FILE);
        std::fs::remove_file(&meta_path).unwrap();
        std::fs::create_dir(&meta_path).unwrap();

        let err = store.insert_diff(tagged_diff(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!path.join(DIFF_DIR).join("000001.diff.cbor.zst").exists());
        assert_eq!(store.meta().await.diff_count, 0);

        std::fs::remove_dir(&meta_path).unwrap();
        store.insert_diff(tagged_diff(1)).await.unwrap();
        let err = store.insert_diff(tagged_diff(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateTimestamp { .. }));
        drop(store);

        let manifest_path = path.join(INTEGRITY_DIR).join(MANIFEST_FILE);
        let manifest: IntegrityManifest =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.entries.len(), 1);

        let store = FileStorage::open(&path, registry()).await.unwrap();
        store.verify_integrity().await.unwrap();
        assert_eq!(store.meta().await.diff_count, 1);
    }

    #[tokio::test]
    async fn two_records_at_one_timestamp_fail_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        {
            let store = FileStorage::open(&path, registry()).await.unwrap();
            store.insert_diff(tagged_diff(1)).await.unwrap();
        }

        let diffs = path.join(DIFF_DIR);
        std::fs::copy(
            diffs.join("000001.diff.cbor.zst"),
            diffs.join("000002.diff.cbor.zst"),
        )
        .unwrap();
        let manifest_path = path.join(INTEGRITY_DIR).join(MANIFEST_FILE);
        let mut manifest: IntegrityManifest =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        let first = manifest.entries[0].clone();
        manifest.entries.push(ManifestEntry {
            filename: "000002.diff.cbor.zst".into(),
            sha256: first.sha256.clone(),
            prev_hash: Some(first.sha256),
        });
        std::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();

        assert!(matches!(
            FileStorage::open(&path, registry()).await,
            Err(StorageError::IntegrityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn diff_in_current_dir_fails_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        FileStorage::open(&path, registry()).await.unwrap();

        let record = Record::from(tagged_diff(1));
        let stray = encode(&StoredRecord::new(RecordId::new(), &record)).unwrap();
        std::fs::write(path.join(CURRENT_DIR).join("stray.current.cbor.zst"), stray).unwrap();

        assert!(matches!(
            FileStorage::open(&path, registry()).await,
            Err(StorageError::CborDecode(_))
        ));
    }
}

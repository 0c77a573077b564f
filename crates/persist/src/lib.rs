//! Persistence for the versioning engine: the storage port, its adapters, and
//! point-in-time reconstruction on top of it.
//!
//! # Invariants
//! - History is append-only. Only the current-state snapshot is ever replaced.
//! - No two history records of one object share a timestamp.
//! - `find_latest_*_before` use a strict `<` bound.
//! - Reconstruction reads only records at or before the query instant, so
//!   concurrent later writes never change its result.

mod document;
mod error;
mod memory;
mod reconstruct;
mod strategy;
mod store;

pub use document::{EntityRegistry, Payload, StoredMetadata, StoredRecord};
pub use error::{HistoryError, HistoryResult, StorageError, StorageResult, WithObject};
pub use memory::MemoryStorage;
pub use reconstruct::Reconstructor;
pub use strategy::StorageStrategy;
pub use store::{FileStorage, IntegrityManifest, ManifestEntry, StoreMeta};

//! Versioning kernel: snapshot and diff values, the structural differ, and the
//! patch applier that replays diffs.
//!
//! # Invariants
//! - Everything here is synchronous and pure; no I/O, no shared mutable state.
//! - `apply_ops(prev, Differ::compute(prev, next).ops) == next` for any two
//!   compatible objects.
//! - Arrays are diffed positionally after skipping the common prefix and
//!   suffix. There is no move detection; a reorder is a run of `Modified`.

pub mod differ;
pub mod op;
pub mod patch;
pub mod record;

pub use differ::{diff_arrays, Differ};
pub use op::{ArrayDiff, ArrayOp, Assigned, ElementValue, Op};
pub use patch::{apply_ops, PatchError};
pub use record::{Diff, Metadata, Record, RecordKind, Snapshot};

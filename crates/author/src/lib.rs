//! Write path of the versioning engine.
//!
//! # Invariants
//! - At most one compute + insert sequence is in flight per object.
//! - Every recorded version is either a snapshot or a diff against the
//!   version before it; history is never rewritten, a revert is a new version.
//! - The first version of an object is always a snapshot.

mod config;
mod recorder;
#[cfg(test)]
mod test_logging;

pub use config::{ConfigError, RecorderConfig};
pub use recorder::{RecordError, Recorded, Recorder};

use serde_json::{Map, Value};
use snapdiff_common::{value_kind, FieldPath};

use crate::{ArrayDiff, ArrayOp, Assigned, ElementValue, Op};

/// Errors from applying ops to a state they were not computed against.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("path `{path}` does not exist")]
    MissingPath { path: FieldPath },

    #[error("cannot remove absent field `{path}`")]
    MissingField { path: FieldPath },

    #[error("`{path}` is a {found}, expected {expected}")]
    WrongKind {
        path: FieldPath,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{operation:?} index {index} out of range for `{path}` (len {len})")]
    IndexOutOfRange {
        path: FieldPath,
        operation: ArrayOp,
        index: usize,
        len: usize,
    },

    #[error("{operation:?} entry at index {index} of `{path}` carries a nested patch")]
    UnexpectedPatch {
        path: FieldPath,
        operation: ArrayOp,
        index: usize,
    },
}

/// Apply `ops` to `target` in order.
///
/// The inverse of [`crate::Differ::compute`]: assignments write or remove a
/// key under an existing parent object, array entries insert, replace or
/// delete by position. Stops at the first op that does not fit the state.
pub fn apply_ops(target: &mut Value, ops: &[Op]) -> Result<(), PatchError> {
    for op in ops {
        match op {
            Op::Assign { path, value } => assign(target, path, value)?,
            Op::Array { path, entries } => {
                let items = match lookup_mut(target, path.segments(), path)? {
                    Value::Array(items) => items,
                    other => {
                        return Err(PatchError::WrongKind {
                            path: path.clone(),
                            expected: "array",
                            found: value_kind(other),
                        })
                    }
                };
                apply_entries(items, entries, path)?;
            }
        }
    }
    Ok(())
}

fn assign(target: &mut Value, path: &FieldPath, value: &Assigned) -> Result<(), PatchError> {
    let Some((parent, key)) = path.split_last() else {
        return match value {
            Assigned::Value(v) => {
                *target = v.clone();
                Ok(())
            }
            Assigned::Absent => Err(PatchError::MissingField { path: path.clone() }),
        };
    };
    let map = object_mut(lookup_mut(target, parent, path)?, path)?;
    match value {
        Assigned::Value(v) => {
            map.insert(key.to_owned(), v.clone());
        }
        Assigned::Absent => {
            map.remove(key)
                .ok_or_else(|| PatchError::MissingField { path: path.clone() })?;
        }
    }
    Ok(())
}

fn lookup_mut<'a>(
    target: &'a mut Value,
    segments: &[String],
    full: &FieldPath,
) -> Result<&'a mut Value, PatchError> {
    let mut current = target;
    for segment in segments {
        current = object_mut(current, full)?
            .get_mut(segment)
            .ok_or_else(|| PatchError::MissingPath { path: full.clone() })?;
    }
    Ok(current)
}

fn object_mut<'a>(
    value: &'a mut Value,
    path: &FieldPath,
) -> Result<&'a mut Map<String, Value>, PatchError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PatchError::WrongKind {
            path: path.clone(),
            expected: "object",
            found: value_kind(other),
        }),
    }
}

fn apply_entries(
    items: &mut Vec<Value>,
    entries: &[ArrayDiff],
    path: &FieldPath,
) -> Result<(), PatchError> {
    // Removed indices address the source array; shift by what is already gone.
    let mut removed = 0usize;
    for entry in entries {
        let out_of_range = |len: usize| PatchError::IndexOutOfRange {
            path: path.clone(),
            operation: entry.operation,
            index: entry.index,
            len,
        };
        match entry.operation {
            ArrayOp::Added => {
                if entry.index > items.len() {
                    return Err(out_of_range(items.len()));
                }
                items.insert(entry.index, whole(entry, path)?.clone());
            }
            ArrayOp::Removed => {
                let at = entry
                    .index
                    .checked_sub(removed)
                    .filter(|at| *at < items.len())
                    .ok_or_else(|| out_of_range(items.len()))?;
                items.remove(at);
                removed += 1;
            }
            ArrayOp::Modified => {
                let len = items.len();
                let slot = items.get_mut(entry.index).ok_or_else(|| out_of_range(len))?;
                match &entry.value {
                    ElementValue::Whole(v) => *slot = v.clone(),
                    ElementValue::Patch(ops) => apply_ops(slot, ops)?,
                }
            }
        }
    }
    Ok(())
}

fn whole<'a>(entry: &'a ArrayDiff, path: &FieldPath) -> Result<&'a Value, PatchError> {
    entry.whole().ok_or_else(|| PatchError::UnexpectedPatch {
        path: path.clone(),
        operation: entry.operation,
        index: entry.index,
    })
}

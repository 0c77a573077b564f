use serde_json::{Map, Value};
use snapdiff_common::{value_kind, Creator, Entity, FieldPath, ModelError, ObjId, Timestamp};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::{ArrayDiff, Assigned, Diff, Metadata, Op};

/// Computes the structural diff between two states of the same object.
pub struct Differ;

impl Differ {
    /// Diff `previous` against `next`.
    ///
    /// `previous == None` describes the first version: every top-level field
    /// of `next` becomes an assignment. An unchanged object yields a diff with
    /// no ops; callers decide whether to persist it.
    pub fn compute(
        previous: Option<&Value>,
        next: &Value,
        entity: &Arc<Entity>,
        creator: Creator,
        timestamp: Timestamp,
        obj_id: ObjId,
    ) -> Result<Diff, ModelError> {
        let walk = Walk {
            entity: entity.name(),
            obj_id: &obj_id,
        };

        let next_map = walk.top_level(next)?;
        walk.check_id(entity, next)?;
        let empty = Map::new();
        let prev_map = match previous {
            Some(prev) => {
                let map = walk.top_level(prev)?;
                walk.check_id(entity, prev)?;
                map
            }
            None => &empty,
        };

        let mut ops = Vec::new();
        walk.objects(&FieldPath::root(), prev_map, next_map, &mut ops)?;
        tracing::trace!(entity = entity.name(), %obj_id, ops = ops.len(), "computed diff");

        Ok(Diff::new(
            Metadata::new(obj_id, Arc::clone(entity), creator, timestamp),
            ops,
        ))
    }
}

/// Diff two arrays positionally.
///
/// The common prefix and suffix are skipped. In the remaining window,
/// positions present on both sides that differ are `Modified`, the tail of
/// `next` is `Added` and the tail of `previous` is `Removed`, all ascending.
pub fn diff_arrays(previous: &[Value], next: &[Value]) -> Vec<ArrayDiff> {
    let prefix = previous
        .iter()
        .zip(next)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = previous.len().min(next.len()) - prefix;
    let suffix = previous
        .iter()
        .rev()
        .zip(next.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let old = &previous[prefix..previous.len() - suffix];
    let new = &next[prefix..next.len() - suffix];
    let shared = old.len().min(new.len());

    let mut entries = Vec::new();
    for (offset, (before, after)) in old.iter().zip(new).enumerate() {
        if before != after {
            entries.push(modified_entry(prefix + offset, before, after));
        }
    }
    for (offset, added) in new.iter().enumerate().skip(shared) {
        entries.push(ArrayDiff::new(prefix + offset, added.clone()));
    }
    for (offset, removed) in old.iter().enumerate().skip(shared) {
        entries.push(ArrayDiff::removed(prefix + offset, removed.clone()));
    }
    entries
}

fn modified_entry(index: usize, before: &Value, after: &Value) -> ArrayDiff {
    if let (Value::Object(b), Value::Object(a)) = (before, after) {
        // Elements carry no identifier of their own, so shape errors inside
        // an element fall back to replacing it whole.
        let mut ops = Vec::new();
        if walk_elements(b, a, &mut ops) {
            return ArrayDiff::patched(index, ops);
        }
    }
    ArrayDiff::modified(index, after.clone())
}

fn walk_elements(
    before: &Map<String, Value>,
    after: &Map<String, Value>,
    ops: &mut Vec<Op>,
) -> bool {
    let obj_id = ObjId::new("");
    let walk = Walk {
        entity: "element",
        obj_id: &obj_id,
    };
    walk.objects(&FieldPath::root(), before, after, ops).is_ok()
}

/// Error context for one field walk.
struct Walk<'a> {
    entity: &'a str,
    obj_id: &'a ObjId,
}

impl Walk<'_> {
    fn top_level<'v>(&self, value: &'v Value) -> Result<&'v Map<String, Value>, ModelError> {
        match value {
            Value::Object(map) => Ok(map),
            other => Err(self.mismatch(FieldPath::root(), "object", value_kind(other))),
        }
    }

    fn check_id(&self, entity: &Entity, value: &Value) -> Result<(), ModelError> {
        let found = entity.extract_id(value)?;
        if &found != self.obj_id {
            return Err(self.mismatch(
                entity.id_path().clone(),
                format!("id {}", self.obj_id),
                format!("id {found}"),
            ));
        }
        Ok(())
    }

    fn objects(
        &self,
        path: &FieldPath,
        previous: &Map<String, Value>,
        next: &Map<String, Value>,
        ops: &mut Vec<Op>,
    ) -> Result<(), ModelError> {
        let keys: BTreeSet<&String> = previous.keys().chain(next.keys()).collect();
        for key in keys {
            let child = path.child(key.as_str());
            match (previous.get(key), next.get(key)) {
                (Some(_), None) => ops.push(Op::Assign {
                    path: child,
                    value: Assigned::Absent,
                }),
                (None, Some(added)) => ops.push(Op::Assign {
                    path: child,
                    value: Assigned::Value(added.clone()),
                }),
                (Some(before), Some(after)) if before == after => {}
                (Some(Value::Object(before)), Some(Value::Object(after))) => {
                    self.objects(&child, before, after, ops)?;
                }
                (Some(Value::Array(before)), Some(Value::Array(after))) => {
                    let entries = diff_arrays(before, after);
                    if !entries.is_empty() {
                        ops.push(Op::Array {
                            path: child,
                            entries,
                        });
                    }
                }
                (Some(before), Some(after)) => {
                    if !compatible(before, after) {
                        return Err(self.mismatch(child, value_kind(before), value_kind(after)));
                    }
                    ops.push(Op::Assign {
                        path: child,
                        value: Assigned::Value(after.clone()),
                    });
                }
                (None, None) => {}
            }
        }
        Ok(())
    }

    fn mismatch(
        &self,
        path: FieldPath,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> ModelError {
        ModelError::TypeMismatch {
            entity: self.entity.to_owned(),
            obj_id: self.obj_id.clone(),
            path,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Null is compatible with anything; otherwise objects, arrays and scalars
/// only replace values of their own shape.
fn compatible(before: &Value, after: &Value) -> bool {
    #[derive(PartialEq)]
    enum Shape {
        Object,
        Array,
        Scalar,
    }
    fn shape(v: &Value) -> Option<Shape> {
        match v {
            Value::Null => None,
            Value::Object(_) => Some(Shape::Object),
            Value::Array(_) => Some(Shape::Array),
            _ => Some(Shape::Scalar),
        }
    }
    match (shape(before), shape(after)) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

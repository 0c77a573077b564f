use serde::{Deserialize, Serialize};
use serde_json::Value;
use snapdiff_common::FieldPath;

/// A single field-level change inside a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Set the field at `path`, or remove it when the value is [`Assigned::Absent`].
    Assign { path: FieldPath, value: Assigned },
    /// Positional changes to the array at `path`, ordered by index ascending.
    Array {
        path: FieldPath,
        entries: Vec<ArrayDiff>,
    },
}

impl Op {
    pub fn path(&self) -> &FieldPath {
        match self {
            Self::Assign { path, .. } | Self::Array { path, .. } => path,
        }
    }
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assigned {
    Value(Value),
    /// The field no longer exists.
    Absent,
}

/// Kind of positional change within an array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayOp {
    #[default]
    Added,
    Removed,
    Modified,
}

/// Payload of an array entry: a whole element, or the nested field ops that
/// turn the previous element (an object) into the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementValue {
    Whole(Value),
    Patch(Vec<Op>),
}

/// One positional change within an array field.
///
/// `index` is the position in the target array for `Added` and `Modified`,
/// and the position in the source array for `Removed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayDiff {
    pub index: usize,
    pub value: ElementValue,
    pub operation: ArrayOp,
}

impl ArrayDiff {
    /// An `Added` entry carrying `value`.
    pub fn new(index: usize, value: impl Into<Value>) -> Self {
        Self::with_operation(index, value, ArrayOp::default())
    }

    pub fn with_operation(index: usize, value: impl Into<Value>, operation: ArrayOp) -> Self {
        Self {
            index,
            value: ElementValue::Whole(value.into()),
            operation,
        }
    }

    pub fn removed(index: usize, previous: impl Into<Value>) -> Self {
        Self::with_operation(index, previous, ArrayOp::Removed)
    }

    pub fn modified(index: usize, value: impl Into<Value>) -> Self {
        Self::with_operation(index, value, ArrayOp::Modified)
    }

    /// A `Modified` entry whose element is patched field by field.
    pub fn patched(index: usize, ops: Vec<Op>) -> Self {
        Self {
            index,
            value: ElementValue::Patch(ops),
            operation: ArrayOp::Modified,
        }
    }

    /// The whole element value, if this entry carries one.
    pub fn whole(&self) -> Option<&Value> {
        match &self.value {
            ElementValue::Whole(v) => Some(v),
            ElementValue::Patch(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn array_diff_defaults_to_added() {
        let entry = ArrayDiff::new(3, "asdf");
        assert_eq!(entry.index, 3);
        assert_eq!(entry.whole(), Some(&json!("asdf")));
        assert_eq!(entry.operation, ArrayOp::Added);
    }

    #[test]
    fn patched_entry_has_no_whole_value() {
        let entry = ArrayDiff::patched(
            0,
            vec![Op::Assign {
                path: FieldPath::parse("qty").unwrap(),
                value: Assigned::Value(json!(2)),
            }],
        );
        assert_eq!(entry.operation, ArrayOp::Modified);
        assert!(entry.whole().is_none());
    }

    #[test]
    fn op_json_shape() {
        let op = Op::Assign {
            path: FieldPath::parse("a.b").unwrap(),
            value: Assigned::Absent,
        };
        let encoded = serde_json::to_value(&op).unwrap();
        assert_eq!(
            encoded,
            json!({"op": "assign", "path": ["a", "b"], "value": "absent"})
        );
        let decoded: Op = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, op);
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};

use crate::{value_kind, FieldPath, ModelError, ObjId};

/// Descriptor of a versioned object type.
///
/// Carries the type tag stored alongside every record and the location of the
/// object's stable identifier. Two descriptors are equal when their type tags
/// are equal; the id path is configuration, not identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    name: String,
    id_path: FieldPath,
}

impl Entity {
    /// Create a descriptor from a type tag and a dotted id path.
    pub fn new(name: impl Into<String>, id_path: &str) -> Result<Self, ModelError> {
        Ok(Self::with_path(name, FieldPath::parse(id_path)?))
    }

    pub fn with_path(name: impl Into<String>, id_path: FieldPath) -> Self {
        Self {
            name: name.into(),
            id_path,
        }
    }

    /// The type tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_path(&self) -> &FieldPath {
        &self.id_path
    }

    /// Extract the stable identifier of `obj`.
    ///
    /// Strings are taken as-is and numbers in their JSON text form. Anything
    /// else, an empty string, or a path that does not resolve is a
    /// [`ModelError::MalformedObject`].
    pub fn extract_id(&self, obj: &Value) -> Result<ObjId, ModelError> {
        let malformed = |reason: String| ModelError::MalformedObject {
            entity: self.name.clone(),
            path: self.id_path.clone(),
            reason,
        };
        match self.id_path.resolve(obj) {
            Some(Value::String(s)) if !s.is_empty() => Ok(ObjId::new(s.clone())),
            Some(Value::String(_)) => Err(malformed("identifier is an empty string".into())),
            Some(Value::Number(n)) => Ok(ObjId::new(n.to_string())),
            Some(other) => Err(malformed(format!(
                "identifier is a {}, expected a string or number",
                value_kind(other)
            ))),
            None => Err(malformed("identifier path does not resolve".into())),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_string_id() {
        let entity = Entity::new("order", "id").unwrap();
        let id = entity.extract_id(&json!({"id": "o-1", "total": 3})).unwrap();
        assert_eq!(id.as_str(), "o-1");
    }

    #[test]
    fn extract_nested_numeric_id() {
        let entity = Entity::new("user", "meta.uid").unwrap();
        let id = entity.extract_id(&json!({"meta": {"uid": 42}})).unwrap();
        assert_eq!(id.as_str(), "42");
    }

    #[test]
    fn missing_id_is_malformed() {
        let entity = Entity::new("order", "id").unwrap();
        let err = entity.extract_id(&json!({"total": 3})).unwrap_err();
        assert!(matches!(err, ModelError::MalformedObject { .. }));
    }

    #[test]
    fn non_scalar_id_is_malformed() {
        let entity = Entity::new("order", "id").unwrap();
        let malformed = [
            json!({"id": {"a": 1}}),
            json!({"id": [1]}),
            json!({"id": null}),
            json!({"id": ""}),
        ];
        for bad in malformed {
            assert!(matches!(
                entity.extract_id(&bad),
                Err(ModelError::MalformedObject { .. })
            ));
        }
    }

    #[test]
    fn equality_uses_type_tag_only() {
        let a = Entity::new("order", "id").unwrap();
        let b = Entity::new("order", "meta.id").unwrap();
        let c = Entity::new("invoice", "id").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

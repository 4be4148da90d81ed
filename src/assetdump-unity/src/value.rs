//! Decoded object fields
//!
//! Objects read through a type tree become a tree of [`Field`]s mirroring
//! the type tree's shape.

use std::fmt;

/// Reference to an object, relative to the file that holds the reference
///
/// `file_id` 0 is the referencing file itself, `n > 0` is entry `n - 1` of
/// that file's external table. A `path_id` of 0 is the null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub file_id: i32,
    pub path_id: i64,
}

impl ObjectRef {
    pub fn new(file_id: i32, path_id: i64) -> Self {
        Self { file_id, path_id }
    }

    pub fn is_null(&self) -> bool {
        self.path_id == 0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{file: {}, path: {}}}", self.file_id, self.path_id)
    }
}

/// Decoded value of a single type tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Field>),
    Struct(Vec<Field>),
}

/// Named, typed value
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub type_name: String,
    pub value: Value,
}

impl Field {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value,
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, "string", Value::String(value.into()))
    }

    pub fn int(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, "int", Value::Int(value as i64))
    }

    pub fn structure(
        name: impl Into<String>,
        type_name: impl Into<String>,
        children: Vec<Field>,
    ) -> Self {
        Self::new(name, type_name, Value::Struct(children))
    }

    pub fn array(name: impl Into<String>, type_name: impl Into<String>, elements: Vec<Field>) -> Self {
        Self::new(name, type_name, Value::Array(elements))
    }

    /// `PPtr<T>` structure with `m_FileID` and `m_PathID`
    pub fn pptr(name: impl Into<String>, target: &str, reference: ObjectRef) -> Self {
        Self::structure(
            name,
            format!("PPtr<{}>", target),
            vec![
                Field::int("m_FileID", reference.file_id),
                Field::new("m_PathID", "SInt64", Value::Int(reference.path_id)),
            ],
        )
    }

    /// Child of a structure by field name
    pub fn get(&self, name: &str) -> Option<&Field> {
        match &self.value {
            Value::Struct(children) => children.iter().find(|c| c.name == name),
            _ => None,
        }
    }

    /// Structure members or array elements
    pub fn children(&self) -> &[Field] {
        match &self.value {
            Value::Struct(children) | Value::Array(children) => children,
            _ => &[],
        }
    }

    pub fn elements(&self) -> Option<&[Field]> {
        match &self.value {
            Value::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            Value::Bool(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Bool(v) => Some(v),
            Value::Int(v) => Some(v != 0),
            Value::UInt(v) => Some(v != 0),
            _ => None,
        }
    }

    /// Interpret this field as an object reference
    pub fn as_object_ref(&self) -> Option<ObjectRef> {
        let file_id = self.get("m_FileID")?.as_i64()?;
        let path_id = self.get("m_PathID")?.as_i64()?;
        Some(ObjectRef {
            file_id: i32::try_from(file_id).ok()?,
            path_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pptr_roundtrip() {
        let field = Field::pptr("m_Script", "MonoScript", ObjectRef::new(1, -42));
        assert_eq!(field.type_name, "PPtr<MonoScript>");
        assert_eq!(field.as_object_ref(), Some(ObjectRef::new(1, -42)));
    }

    #[test]
    fn test_get_and_children() {
        let field = Field::structure(
            "Base",
            "MonoScript",
            vec![
                Field::string("m_Name", "Player"),
                Field::string("m_ClassName", "PlayerController"),
            ],
        );
        assert_eq!(field.get("m_ClassName").and_then(Field::as_str), Some("PlayerController"));
        assert!(field.get("m_Namespace").is_none());
        assert_eq!(field.children().len(), 2);
        assert!(field.elements().is_none());
    }

    #[test]
    fn test_not_a_reference() {
        let field = Field::string("m_Name", "x");
        assert!(field.as_object_ref().is_none());
        assert!(ObjectRef::new(0, 0).is_null());
    }
}

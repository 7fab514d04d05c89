//! Runtime values shared by the expression tree and the command tree

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{PrimitiveKind, TypeUsage};

/// A literal or captured runtime value.
///
/// Structured captures (an object whose fields a predicate reads) are held as
/// ordered field maps so serialization stays deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The model type of the value, used when a funcletized sub-expression
    /// becomes a constant command tree node.
    pub fn type_usage(&self) -> TypeUsage {
        match self {
            Value::Null => TypeUsage::Null,
            Value::Bool(_) => TypeUsage::Primitive(PrimitiveKind::Bool),
            Value::Int(_) => TypeUsage::Primitive(PrimitiveKind::Int64),
            Value::Float(_) => TypeUsage::Primitive(PrimitiveKind::Float64),
            Value::String(_) => TypeUsage::Primitive(PrimitiveKind::String),
            Value::Object(fields) => TypeUsage::Row(
                fields
                    .iter()
                    .map(|(name, value)| crate::types::FieldType {
                        name: name.clone(),
                        ty: value.type_usage(),
                    })
                    .collect(),
            ),
        }
    }

    /// Short display form for printed trees: `Int64 42`, `String "x"`, `Null`.
    pub fn display(&self) -> String {
        match self {
            Value::Null => "Null".to_string(),
            Value::Bool(b) => format!("Bool {}", b),
            Value::Int(i) => format!("Int64 {}", i),
            Value::Float(f) => format!("Float64 {}", f),
            Value::String(s) => format!("String {:?}", s),
            Value::Object(_) => format!("{} <record>", self.type_usage().describe()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

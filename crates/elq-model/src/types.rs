//! Type system for the object-relational model

use serde::{Deserialize, Serialize};

/// Store-level primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
}

impl PrimitiveKind {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "Bool",
            PrimitiveKind::Int32 => "Int32",
            PrimitiveKind::Int64 => "Int64",
            PrimitiveKind::Float64 => "Float64",
            PrimitiveKind::String => "String",
        }
    }
}

/// A resolved type attached to every expression and command tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeUsage {
    Primitive(PrimitiveKind),
    Enum { name: String, underlying: PrimitiveKind },
    Entity(String),
    Row(Vec<FieldType>),
    Collection(Box<TypeUsage>),
    /// The type of an untyped null literal.
    Null,
}

/// Named field of a row (record) type, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldType {
    pub name: String,
    pub ty: TypeUsage,
}

impl TypeUsage {
    pub fn collection(element: TypeUsage) -> TypeUsage {
        TypeUsage::Collection(Box::new(element))
    }

    pub fn row<S: Into<String>>(fields: Vec<(S, TypeUsage)>) -> TypeUsage {
        TypeUsage::Row(
            fields
                .into_iter()
                .map(|(name, ty)| FieldType { name: name.into(), ty })
                .collect(),
        )
    }

    /// True for the types a store cast can produce or consume.
    pub fn is_primitive_or_enum(&self) -> bool {
        matches!(self, TypeUsage::Primitive(_) | TypeUsage::Enum { .. })
    }

    pub fn element_type(&self) -> Option<&TypeUsage> {
        match self {
            TypeUsage::Collection(element) => Some(element),
            _ => None,
        }
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldType> {
        match self {
            TypeUsage::Row(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Human-readable type name used in error messages and printed trees.
    pub fn describe(&self) -> String {
        match self {
            TypeUsage::Primitive(kind) => kind.name().to_string(),
            TypeUsage::Enum { name, .. } => format!("Enum {}", name),
            TypeUsage::Entity(name) => format!("Entity {}", name),
            TypeUsage::Row(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}: {}", f.name, f.ty.describe()))
                    .collect();
                format!("Row{{{}}}", fields.join(", "))
            }
            TypeUsage::Collection(element) => format!("Collection<{}>", element.describe()),
            TypeUsage::Null => "Null".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_nested_types() {
        let ty = TypeUsage::collection(TypeUsage::row(vec![
            ("Key", TypeUsage::Primitive(PrimitiveKind::Int32)),
            ("Group", TypeUsage::collection(TypeUsage::Entity("Run".to_string()))),
        ]));
        assert_eq!(
            ty.describe(),
            "Collection<Row{Key: Int32, Group: Collection<Entity Run>}>"
        );
    }

    #[test]
    fn test_cast_eligibility() {
        assert!(TypeUsage::Primitive(PrimitiveKind::Int64).is_primitive_or_enum());
        assert!(TypeUsage::Enum {
            name: "RunPurpose".to_string(),
            underlying: PrimitiveKind::Int32,
        }
        .is_primitive_or_enum());
        assert!(!TypeUsage::Entity("Run".to_string()).is_primitive_or_enum());
        assert!(!TypeUsage::collection(TypeUsage::Entity("Run".to_string())).is_primitive_or_enum());
    }
}

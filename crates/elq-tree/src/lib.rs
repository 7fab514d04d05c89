//! Canonical command trees for ELQ
//!
//! The provider-agnostic relational operator tree the converter emits and a
//! query-processing backend consumes. Trees are immutable once constructed,
//! strictly tree-shaped (no node is referenced by two parents), and every
//! node carries a resolvable result type. Serialization is deterministic so
//! trees can be fingerprinted for caching and determinism checks.

use serde::Serialize;
use sha2::{Digest, Sha256};

use elq_model::{PrimitiveKind, TypeUsage, Value};

mod print;
pub use print::ExpressionPrinter;

/// A bound relational input: the producing expression, the range-variable
/// name it introduces, and the element type that variable ranges over.
#[derive(Debug, Clone, Serialize)]
pub struct ExpressionBinding {
    pub expression: Box<DbExpression>,
    pub var_name: String,
    pub element_type: TypeUsage,
}

impl ExpressionBinding {
    pub fn new(expression: DbExpression, var_name: impl Into<String>, element_type: TypeUsage) -> Self {
        Self {
            expression: Box::new(expression),
            var_name: var_name.into(),
            element_type,
        }
    }
}

/// Comparison and boolean-connective operators. The connectives ride the
/// same node as the six relational operators, mirroring the front end's
/// operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonOp {
    Eq, Ne, Lt, Le, Gt, Ge,
    And, Or,
}

impl ComparisonOp {
    pub fn name(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "Eq",
            ComparisonOp::Ne => "Ne",
            ComparisonOp::Lt => "Lt",
            ComparisonOp::Le => "Le",
            ComparisonOp::Gt => "Gt",
            ComparisonOp::Ge => "Ge",
            ComparisonOp::And => "And",
            ComparisonOp::Or => "Or",
        }
    }
}

/// One ordering key of a `Sort` node.
#[derive(Debug, Clone, Serialize)]
pub struct SortClause {
    pub expression: DbExpression,
    pub descending: bool,
}

/// Command tree node. The variant set is closed; a backend consuming the
/// tree matches exhaustively and the compiler verifies coverage.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum DbExpression {
    /// Leaf reference to an entity set.
    Scan {
        entity_set: String,
        result_type: TypeUsage,
    },
    Filter {
        input: ExpressionBinding,
        predicate: Box<DbExpression>,
        result_type: TypeUsage,
    },
    Project {
        input: ExpressionBinding,
        projection: Box<DbExpression>,
        result_type: TypeUsage,
    },
    /// Keys and aggregates become the fields of the result row type, keys
    /// first, in declaration order. `group_var` is the variable the
    /// aggregate expressions range over.
    GroupBy {
        input: ExpressionBinding,
        group_var: String,
        keys: Vec<(String, DbExpression)>,
        aggregates: Vec<(String, DbExpression)>,
        result_type: TypeUsage,
    },
    /// A single node carries the whole ordering chain.
    Sort {
        input: ExpressionBinding,
        keys: Vec<SortClause>,
        result_type: TypeUsage,
    },
    CrossJoin {
        left: ExpressionBinding,
        right: ExpressionBinding,
        result_type: TypeUsage,
    },
    InnerJoin {
        left: ExpressionBinding,
        right: ExpressionBinding,
        condition: Box<DbExpression>,
        result_type: TypeUsage,
    },
    /// For each input row, evaluate `apply` with the input binding in scope.
    CrossApply {
        input: ExpressionBinding,
        apply: ExpressionBinding,
        result_type: TypeUsage,
    },
    /// Primitive/enum conversion only; the tree has no general-purpose
    /// polymorphic cast.
    Cast {
        argument: Box<DbExpression>,
        result_type: TypeUsage,
    },
    /// Record construction; `result_type` is the row type of the fields.
    NewInstance {
        fields: Vec<(String, DbExpression)>,
        result_type: TypeUsage,
    },
    Case {
        whens: Vec<(DbExpression, DbExpression)>,
        otherwise: Box<DbExpression>,
        result_type: TypeUsage,
    },
    IsNull {
        argument: Box<DbExpression>,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<DbExpression>,
        right: Box<DbExpression>,
    },
    Constant {
        value: Value,
        result_type: TypeUsage,
    },
    /// Reference to a range variable bound by an enclosing binding.
    VariableReference {
        name: String,
        result_type: TypeUsage,
    },
    PropertyAccess {
        base: Box<DbExpression>,
        property: String,
        result_type: TypeUsage,
    },
    /// The whole current group as a nested collection, valid only inside a
    /// group-by's aggregate list.
    GroupAggregate {
        argument: Box<DbExpression>,
        result_type: TypeUsage,
    },
}

impl DbExpression {
    /// The result type attached to this node. Boolean-valued nodes
    /// (`IsNull`, `Comparison`) have a fixed type.
    pub fn result_type(&self) -> TypeUsage {
        match self {
            DbExpression::Scan { result_type, .. }
            | DbExpression::Filter { result_type, .. }
            | DbExpression::Project { result_type, .. }
            | DbExpression::GroupBy { result_type, .. }
            | DbExpression::Sort { result_type, .. }
            | DbExpression::CrossJoin { result_type, .. }
            | DbExpression::InnerJoin { result_type, .. }
            | DbExpression::CrossApply { result_type, .. }
            | DbExpression::Cast { result_type, .. }
            | DbExpression::NewInstance { result_type, .. }
            | DbExpression::Case { result_type, .. }
            | DbExpression::Constant { result_type, .. }
            | DbExpression::VariableReference { result_type, .. }
            | DbExpression::PropertyAccess { result_type, .. }
            | DbExpression::GroupAggregate { result_type, .. } => result_type.clone(),
            DbExpression::IsNull { .. } | DbExpression::Comparison { .. } => {
                TypeUsage::Primitive(PrimitiveKind::Bool)
            }
        }
    }

    /// True for the relational operators (the nodes that bind inputs), as
    /// opposed to scalar-valued nodes.
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            DbExpression::Scan { .. }
                | DbExpression::Filter { .. }
                | DbExpression::Project { .. }
                | DbExpression::GroupBy { .. }
                | DbExpression::Sort { .. }
                | DbExpression::CrossJoin { .. }
                | DbExpression::InnerJoin { .. }
                | DbExpression::CrossApply { .. }
        )
    }

    /// Calculate fingerprint (SHA-256) of the canonical serialization.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("command tree should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

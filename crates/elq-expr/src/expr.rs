//! Scalar expression nodes
//!
//! These are the nodes a query-builder front end produces for lambda bodies:
//! predicates, projections, key selectors. Everything is already typed and
//! bound; there is no name resolution left to do on this side.

use std::fmt;
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use elq_model::{TypeUsage, Value};

use crate::query::QueryExpr;

/// Identity of a lambda parameter. Two references to the same `ParamId`
/// denote the same bound range variable, regardless of display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ParamId(pub u32);

/// A lambda parameter: stable identity plus the front end's display name.
#[derive(Debug, Clone, Serialize)]
pub struct Param {
    pub id: ParamId,
    pub name: String,
}

/// Allocates parameters with fresh identities for one expression tree.
#[derive(Debug, Default)]
pub struct ParamGen {
    next: u32,
}

impl ParamGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, name: impl Into<String>) -> Param {
        let id = ParamId(self.next);
        self.next += 1;
        Param { id, name: name.into() }
    }
}

/// A single-parameter lambda (predicate, selector, key selector).
#[derive(Debug, Clone, Serialize)]
pub struct Lambda {
    pub param: Param,
    pub body: Expr,
}

impl Lambda {
    pub fn new(param: Param, body: Expr) -> Self {
        Self { param, body }
    }
}

/// A two-parameter lambda (join/group-join result selectors).
#[derive(Debug, Clone, Serialize)]
pub struct Lambda2 {
    pub params: (Param, Param),
    pub body: Expr,
}

impl Lambda2 {
    pub fn new(first: Param, second: Param, body: Expr) -> Self {
        Self { params: (first, second), body }
    }
}

/// Binary operators as the front end spells them. Whether an occurrence is
/// client-evaluated or lowered is the funcletizer's decision, not the
/// builder's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod,
    // Comparison
    Eq, Ne, Lt, Le, Gt, Ge,
    // Logical
    And, Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnOp {
    Neg,
    Not,
}

/// An opaque user-supplied function. Only ever executed at funcletization
/// time; it has no relational translation.
#[derive(Clone)]
pub struct HostFn {
    name: String,
    func: Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>,
}

impl HostFn {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, String> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFn").field("name", &self.name).finish()
    }
}

impl Serialize for HostFn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // The closure has no serial form; the name is enough for diagnostics.
        let mut s = serializer.serialize_struct("HostFn", 1)?;
        s.serialize_field("name", &self.name)?;
        s.end()
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Expr {
    /// A literal written directly in the query.
    Constant { value: Value },
    /// A closed-over program variable with its value at build time. Never a
    /// range variable; always available to the funcletizer.
    Captured { name: String, value: Value },
    /// Reference to a lambda parameter (a range variable).
    Param { id: ParamId },
    /// Member access.
    Property { base: Box<Expr>, name: String },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnOp, expr: Box<Expr> },
    /// `test ? then : otherwise`.
    Conditional {
        test: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    IsNull { expr: Box<Expr> },
    /// A checked conversion to a model type.
    Convert { expr: Box<Expr>, target: TypeUsage },
    /// Invocation of an opaque host function.
    Call { func: HostFn, args: Vec<Expr> },
    /// Anonymous record construction.
    Record { fields: Vec<(String, Expr)> },
    /// A nested query in scalar position (select-many selectors and the
    /// like).
    Query { query: Box<QueryExpr> },
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Expr {
        Expr::Constant { value: value.into() }
    }

    pub fn captured(name: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::Captured {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn param(param: &Param) -> Expr {
        Expr::Param { id: param.id }
    }

    pub fn property(base: Expr, name: impl Into<String>) -> Expr {
        Expr::Property {
            base: Box::new(base),
            name: name.into(),
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn convert(expr: Expr, target: TypeUsage) -> Expr {
        Expr::Convert {
            expr: Box::new(expr),
            target,
        }
    }

    pub fn is_null(expr: Expr) -> Expr {
        Expr::IsNull { expr: Box::new(expr) }
    }

    pub fn record<S: Into<String>>(fields: Vec<(S, Expr)>) -> Expr {
        Expr::Record {
            fields: fields.into_iter().map(|(n, e)| (n.into(), e)).collect(),
        }
    }

    pub fn query(query: QueryExpr) -> Expr {
        Expr::Query { query: Box::new(query) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_gen_is_monotonic() {
        let mut gen = ParamGen::new();
        let r = gen.fresh("r");
        let t = gen.fresh("t");
        assert_eq!(r.id, ParamId(0));
        assert_eq!(t.id, ParamId(1));
        assert_ne!(r.id, t.id);
    }

    #[test]
    fn test_host_fn_invoke() {
        let double = HostFn::new("double", |args| match args {
            [Value::Int(i)] => Ok(Value::Int(i * 2)),
            _ => Err("expected one integer".to_string()),
        });
        assert_eq!(double.invoke(&[Value::Int(4)]).unwrap(), Value::Int(8));
        assert!(double.invoke(&[]).is_err());
    }

    #[test]
    fn test_builders_compose() {
        let mut gen = ParamGen::new();
        let r = gen.fresh("r");
        let expr = Expr::binary(
            BinOp::Gt,
            Expr::property(Expr::param(&r), "Id"),
            Expr::captured("threshold", 10i64),
        );
        match expr {
            Expr::Binary { op: BinOp::Gt, left, .. } => match *left {
                Expr::Property { name, .. } => assert_eq!(name, "Id"),
                other => panic!("expected property access, got {:?}", other),
            },
            other => panic!("expected binary, got {:?}", other),
        }
    }
}

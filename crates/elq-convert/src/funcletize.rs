//! Funcletization: eager evaluation of client-side sub-expressions
//!
//! A sub-expression is client-evaluable exactly when no range variable
//! currently in scope occurs inside it. Captured program variables are
//! ordinary values available at conversion time and never force translation.
//! Evaluation runs user code (host functions) synchronously; its failures
//! surface to the converter's caller unchanged.

use std::collections::HashSet;

use thiserror::Error;

use elq_expr::{BinOp, Expr, ParamId, UnOp};
use elq_model::{PrimitiveKind, TypeUsage, Value};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("type mismatch: cannot apply {op} to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("value has no field '{0}'")]
    MissingField(String),

    #[error("property access on a non-record value")]
    NotARecord,

    #[error("invalid conversion from {from} to {to}")]
    InvalidConversion { from: String, to: String },

    #[error("host function '{name}' failed: {message}")]
    HostFunction { name: String, message: String },

    #[error("expression is not client-evaluable: {0}")]
    NotEvaluable(String),

    #[error("unbound parameter {0:?} reached the evaluator")]
    UnboundParameter(ParamId),
}

/// Decides evaluate-vs-translate for one lambda scope. Nested lambdas get a
/// nested funcletizer whose bound set grows by the new parameter, so only
/// that parameter (and anything derived from it) forces translation inside
/// the body.
#[derive(Debug, Clone)]
pub struct Funcletizer {
    bound: HashSet<ParamId>,
}

impl Funcletizer {
    /// The root funcletizer of a conversion: nothing is bound yet.
    pub fn root() -> Self {
        Self { bound: HashSet::new() }
    }

    /// Child funcletizer for a lambda body introducing `param`.
    pub fn nested(&self, param: ParamId) -> Self {
        let mut bound = self.bound.clone();
        bound.insert(param);
        Self { bound }
    }

    pub fn is_bound(&self, param: ParamId) -> bool {
        self.bound.contains(&param)
    }

    /// True iff `expr` contains no reference to a bound identity. Parameter
    /// references always translate (unbound ones surface as scope errors
    /// during translation); nested queries are relational and always
    /// translate.
    pub fn is_evaluable(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Constant { .. } | Expr::Captured { .. } => true,
            Expr::Param { .. } => false,
            Expr::Query { .. } => false,
            Expr::Property { base, .. } => self.is_evaluable(base),
            Expr::Binary { left, right, .. } => {
                self.is_evaluable(left) && self.is_evaluable(right)
            }
            Expr::Unary { expr, .. } => self.is_evaluable(expr),
            Expr::Conditional {
                test,
                then_expr,
                else_expr,
            } => {
                self.is_evaluable(test)
                    && self.is_evaluable(then_expr)
                    && self.is_evaluable(else_expr)
            }
            Expr::IsNull { expr } => self.is_evaluable(expr),
            Expr::Convert { expr, .. } => self.is_evaluable(expr),
            Expr::Call { args, .. } => args.iter().all(|a| self.is_evaluable(a)),
            Expr::Record { fields } => fields.iter().all(|(_, e)| self.is_evaluable(e)),
        }
    }

    /// Execute a client-evaluable sub-expression against the ambient
    /// captured values.
    pub fn evaluate(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Constant { value } => Ok(value.clone()),
            Expr::Captured { value, .. } => Ok(value.clone()),
            Expr::Param { id } => Err(EvalError::UnboundParameter(*id)),
            Expr::Query { .. } => Err(EvalError::NotEvaluable("nested query".to_string())),
            Expr::Property { base, name } => match self.evaluate(base)? {
                Value::Object(fields) => fields
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::MissingField(name.clone())),
                _ => Err(EvalError::NotARecord),
            },
            Expr::Binary { op, left, right } => self.evaluate_binary(*op, left, right),
            Expr::Unary { op, expr } => {
                let value = self.evaluate(expr)?;
                match (op, value) {
                    (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
                    (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (op, value) => Err(EvalError::TypeMismatch {
                        op: match op {
                            UnOp::Neg => "Neg",
                            UnOp::Not => "Not",
                        },
                        left: value.type_usage().describe(),
                        right: "()".to_string(),
                    }),
                }
            }
            Expr::Conditional {
                test,
                then_expr,
                else_expr,
            } => match self.evaluate(test)? {
                Value::Bool(true) => self.evaluate(then_expr),
                Value::Bool(false) => self.evaluate(else_expr),
                other => Err(EvalError::TypeMismatch {
                    op: "Conditional",
                    left: other.type_usage().describe(),
                    right: "Bool".to_string(),
                }),
            },
            Expr::IsNull { expr } => Ok(Value::Bool(self.evaluate(expr)?.is_null())),
            Expr::Convert { expr, target } => {
                let value = self.evaluate(expr)?;
                convert_value(value, target)
            }
            Expr::Call { func, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.evaluate(arg)?);
                }
                func.invoke(&evaluated).map_err(|message| EvalError::HostFunction {
                    name: func.name().to_string(),
                    message,
                })
            }
            Expr::Record { fields } => {
                let mut out = std::collections::BTreeMap::new();
                for (name, field) in fields {
                    out.insert(name.clone(), self.evaluate(field)?);
                }
                Ok(Value::Object(out))
            }
        }
    }

    fn evaluate_binary(&self, op: BinOp, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
        // Logical connectives short-circuit, so the right side only runs
        // when it can decide the result.
        if let BinOp::And | BinOp::Or = op {
            let lhs = expect_bool(op, self.evaluate(left)?)?;
            return match (op, lhs) {
                (BinOp::And, false) => Ok(Value::Bool(false)),
                (BinOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(expect_bool(op, self.evaluate(right)?)?)),
            };
        }

        let lhs = self.evaluate(left)?;
        let rhs = self.evaluate(right)?;
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                arithmetic(op, lhs, rhs)
            }
            BinOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
            BinOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => ordering(op, lhs, rhs),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }
}

fn op_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "Add",
        BinOp::Sub => "Sub",
        BinOp::Mul => "Mul",
        BinOp::Div => "Div",
        BinOp::Mod => "Mod",
        BinOp::Eq => "Eq",
        BinOp::Ne => "Ne",
        BinOp::Lt => "Lt",
        BinOp::Le => "Le",
        BinOp::Gt => "Gt",
        BinOp::Ge => "Ge",
        BinOp::And => "And",
        BinOp::Or => "Or",
    }
}

fn expect_bool(op: BinOp, value: Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::TypeMismatch {
            op: op_name(op),
            left: other.type_usage().describe(),
            right: "Bool".to_string(),
        }),
    }
}

fn mismatch(op: BinOp, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op_name(op),
        left: lhs.type_usage().describe(),
        right: rhs.type_usage().describe(),
    }
}

fn arithmetic(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let a = *a;
            let b = *b;
            match op {
                BinOp::Add => Ok(Value::Int(a.wrapping_add(b))),
                BinOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
                BinOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
                BinOp::Div if b == 0 => Err(EvalError::DivisionByZero),
                BinOp::Div => Ok(Value::Int(a / b)),
                BinOp::Mod if b == 0 => Err(EvalError::DivisionByZero),
                BinOp::Mod => Ok(Value::Int(a % b)),
                _ => unreachable!("non-arithmetic operator"),
            }
        }
        (Value::String(a), Value::String(b)) if op == BinOp::Add => {
            Ok(Value::String(format!("{}{}", a, b)))
        }
        _ => match (as_float(&lhs), as_float(&rhs)) {
            (Some(a), Some(b)) => match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div => Ok(Value::Float(a / b)),
                BinOp::Mod => Ok(Value::Float(a % b)),
                _ => unreachable!("non-arithmetic operator"),
            },
            _ => Err(mismatch(op, &lhs, &rhs)),
        },
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (a, b) => a == b,
    }
}

fn ordering(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let cmp = match (&lhs, &rhs) {
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => match (as_float(&lhs), as_float(&rhs)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let cmp = cmp.ok_or_else(|| mismatch(op, &lhs, &rhs))?;
    let result = match op {
        BinOp::Lt => cmp.is_lt(),
        BinOp::Le => cmp.is_le(),
        BinOp::Gt => cmp.is_gt(),
        BinOp::Ge => cmp.is_ge(),
        _ => unreachable!("non-ordering operator"),
    };
    Ok(Value::Bool(result))
}

fn convert_value(value: Value, target: &TypeUsage) -> Result<Value, EvalError> {
    let from = value.type_usage().describe();
    let invalid = |from: String| EvalError::InvalidConversion {
        from,
        to: target.describe(),
    };

    match target {
        TypeUsage::Primitive(PrimitiveKind::Int32) | TypeUsage::Primitive(PrimitiveKind::Int64) => {
            match value {
                Value::Int(i) => Ok(Value::Int(i)),
                Value::Float(f) => Ok(Value::Int(f as i64)),
                _ => Err(invalid(from)),
            }
        }
        TypeUsage::Primitive(PrimitiveKind::Float64) => match value {
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Float(f) => Ok(Value::Float(f)),
            _ => Err(invalid(from)),
        },
        TypeUsage::Primitive(PrimitiveKind::Bool) => match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            _ => Err(invalid(from)),
        },
        TypeUsage::Primitive(PrimitiveKind::String) => match value {
            Value::String(s) => Ok(Value::String(s)),
            _ => Err(invalid(from)),
        },
        // Enum values travel as their underlying numeric value.
        TypeUsage::Enum { .. } => match value {
            Value::Int(i) => Ok(Value::Int(i)),
            _ => Err(invalid(from)),
        },
        _ => Err(invalid(from)),
    }
}

//! Diagnostic printer for command trees
//!
//! Deterministic indented text form: parent before children, each operator
//! labeled with its kind, bindings labeled with the variable name they
//! introduce. Used for golden-output testing; not a runtime contract.

use std::fmt::Write;

use crate::{DbExpression, ExpressionBinding};

pub struct ExpressionPrinter;

impl ExpressionPrinter {
    pub fn new() -> Self {
        Self
    }

    /// Serialize a command tree to its canonical text form.
    pub fn print(&self, expr: &DbExpression) -> String {
        let mut out = String::new();
        write_block(&mut out, expr, 0);
        out
    }
}

impl Default for ExpressionPrinter {
    fn default() -> Self {
        Self::new()
    }
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

/// Write a relational operator as an indented block.
fn write_block(out: &mut String, expr: &DbExpression, level: usize) {
    match expr {
        DbExpression::Scan { entity_set, .. } => {
            indent(out, level);
            let _ = writeln!(out, "Scan({})", entity_set);
        }
        DbExpression::Filter { input, predicate, .. } => {
            indent(out, level);
            out.push_str("Filter\n");
            write_binding(out, "Input", input, level + 1);
            write_labeled(out, "Predicate", predicate, level + 1);
        }
        DbExpression::Project { input, projection, .. } => {
            indent(out, level);
            out.push_str("Project\n");
            write_binding(out, "Input", input, level + 1);
            write_labeled(out, "Projection", projection, level + 1);
        }
        DbExpression::GroupBy {
            input,
            group_var,
            keys,
            aggregates,
            ..
        } => {
            indent(out, level);
            out.push_str("GroupBy\n");
            write_binding(out, "Input", input, level + 1);
            indent(out, level + 1);
            let _ = writeln!(out, "GroupVar: {}", group_var);
            for (name, key) in keys {
                write_labeled(out, &format!("Key {}", name), key, level + 1);
            }
            for (name, aggregate) in aggregates {
                write_labeled(out, &format!("Aggregate {}", name), aggregate, level + 1);
            }
        }
        DbExpression::Sort { input, keys, .. } => {
            indent(out, level);
            out.push_str("Sort\n");
            write_binding(out, "Input", input, level + 1);
            for key in keys {
                indent(out, level + 1);
                let direction = if key.descending { "desc" } else { "asc" };
                let _ = writeln!(out, "Key: {} {}", inline(&key.expression), direction);
            }
        }
        DbExpression::CrossJoin { left, right, .. } => {
            indent(out, level);
            out.push_str("CrossJoin\n");
            write_binding(out, "Left", left, level + 1);
            write_binding(out, "Right", right, level + 1);
        }
        DbExpression::InnerJoin {
            left,
            right,
            condition,
            ..
        } => {
            indent(out, level);
            out.push_str("InnerJoin\n");
            write_binding(out, "Left", left, level + 1);
            write_binding(out, "Right", right, level + 1);
            write_labeled(out, "Condition", condition, level + 1);
        }
        DbExpression::CrossApply { input, apply, .. } => {
            indent(out, level);
            out.push_str("CrossApply\n");
            write_binding(out, "Input", input, level + 1);
            write_binding(out, "Apply", apply, level + 1);
        }
        scalar => {
            indent(out, level);
            let _ = writeln!(out, "{}", inline(scalar));
        }
    }
}

/// Write a `label: child` line, expanding relational children into blocks.
fn write_labeled(out: &mut String, label: &str, child: &DbExpression, level: usize) {
    if child.is_relational() {
        indent(out, level);
        let _ = writeln!(out, "{}:", label);
        write_block(out, child, level + 1);
    } else {
        indent(out, level);
        let _ = writeln!(out, "{}: {}", label, inline(child));
    }
}

/// Write a binding. Leaf scans stay on one line so the common case reads as
/// `Input: Scan(Runs) as LQ1`.
fn write_binding(out: &mut String, label: &str, binding: &ExpressionBinding, level: usize) {
    match binding.expression.as_ref() {
        DbExpression::Scan { entity_set, .. } => {
            indent(out, level);
            let _ = writeln!(out, "{}: Scan({}) as {}", label, entity_set, binding.var_name);
        }
        expr => {
            indent(out, level);
            let _ = writeln!(out, "{} as {}:", label, binding.var_name);
            write_block(out, expr, level + 1);
        }
    }
}

/// Compact single-line form for scalar expressions.
fn inline(expr: &DbExpression) -> String {
    match expr {
        DbExpression::Constant { value, .. } => format!("Const({})", value.display()),
        DbExpression::VariableReference { name, .. } => format!("VarRef({})", name),
        DbExpression::PropertyAccess { base, property, .. } => match base.as_ref() {
            DbExpression::VariableReference { name, .. } => {
                format!("Property({}.{})", name, property)
            }
            other => format!("Property({}.{})", inline(other), property),
        },
        DbExpression::Comparison { op, left, right } => {
            format!("Comparison({}, {}, {})", op.name(), inline(left), inline(right))
        }
        DbExpression::IsNull { argument } => format!("IsNull({})", inline(argument)),
        DbExpression::Cast { argument, result_type } => {
            format!("Cast({} as {})", inline(argument), result_type.describe())
        }
        DbExpression::Case { whens, otherwise, .. } => {
            let mut parts: Vec<String> = whens
                .iter()
                .map(|(test, then)| format!("When {} Then {}", inline(test), inline(then)))
                .collect();
            parts.push(format!("Else {}", inline(otherwise)));
            format!("Case({})", parts.join("; "))
        }
        DbExpression::NewInstance { fields, .. } => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{}: {}", name, inline(value)))
                .collect();
            format!("New{{{}}}", fields.join(", "))
        }
        DbExpression::GroupAggregate { argument, .. } => {
            format!("GroupAggregate({})", inline(argument))
        }
        // A relational node in scalar position (a nested collection inside a
        // projection record) collapses to its kind; the block printer is the
        // right tool for those.
        relational => format!("Subquery({})", kind_name(relational)),
    }
}

fn kind_name(expr: &DbExpression) -> &'static str {
    match expr {
        DbExpression::Scan { .. } => "Scan",
        DbExpression::Filter { .. } => "Filter",
        DbExpression::Project { .. } => "Project",
        DbExpression::GroupBy { .. } => "GroupBy",
        DbExpression::Sort { .. } => "Sort",
        DbExpression::CrossJoin { .. } => "CrossJoin",
        DbExpression::InnerJoin { .. } => "InnerJoin",
        DbExpression::CrossApply { .. } => "CrossApply",
        DbExpression::Cast { .. } => "Cast",
        DbExpression::NewInstance { .. } => "NewInstance",
        DbExpression::Case { .. } => "Case",
        DbExpression::IsNull { .. } => "IsNull",
        DbExpression::Comparison { .. } => "Comparison",
        DbExpression::Constant { .. } => "Constant",
        DbExpression::VariableReference { .. } => "VariableReference",
        DbExpression::PropertyAccess { .. } => "PropertyAccess",
        DbExpression::GroupAggregate { .. } => "GroupAggregate",
    }
}

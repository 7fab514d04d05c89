//! Query expression to command tree conversion
//!
//! The front-end/middle-end of ELQ: consumes a typed query expression tree
//! plus a model resolver and produces a canonical command tree for a
//! query-processing backend. Conversion is a pure function of the input tree
//! and the captured values inside it; each [`ExpressionConverter`] owns its
//! own scope stack and naming state.

mod convert;
mod funcletize;
mod scope;

pub use convert::{ConvertError, ExpressionConverter};
pub use funcletize::{EvalError, Funcletizer};
pub use scope::{Binding, ScopeBinder, ScopeHandle, ScopeKind};

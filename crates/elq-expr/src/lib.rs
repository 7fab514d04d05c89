//! Typed query expression trees for ELQ
//!
//! This crate is the converter's input contract: the already-typed, already-
//! bound expression shape a query-builder front end produces. It carries no
//! resolution or translation logic of its own.

mod expr;
mod query;

pub use expr::{BinOp, Expr, HostFn, Lambda, Lambda2, Param, ParamGen, ParamId, UnOp};
pub use query::QueryExpr;

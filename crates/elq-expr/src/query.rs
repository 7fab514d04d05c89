//! Query operator nodes
//!
//! The operator chain a query-builder front end hands to the converter:
//! a source extent with filter/project/join/group/sort operators composed
//! around it. Operands that carry user code are [`Lambda`]s over scalar
//! expressions.

use serde::Serialize;

use crate::expr::{Expr, Lambda, Lambda2};

/// A composed query over the model.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op")]
pub enum QueryExpr {
    /// Reference to an entity set: `from r in Runs`.
    Source { entity_set: String },

    /// `source.Where(x => predicate)`.
    Where {
        source: Box<QueryExpr>,
        predicate: Lambda,
    },

    /// `source.Select(x => selector)`.
    Select {
        source: Box<QueryExpr>,
        selector: Lambda,
    },

    /// `source.SelectMany(x => collection, (x, y) => result)`. The collection
    /// selector body is a nested query; the result selector is optional.
    SelectMany {
        source: Box<QueryExpr>,
        collection: Lambda,
        result: Option<Lambda2>,
    },

    /// Equi-join without `into`.
    Join {
        outer: Box<QueryExpr>,
        inner: Box<QueryExpr>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda2,
    },

    /// Equi-join with `into` (the group-join form): the second result
    /// parameter ranges over the whole matching group.
    GroupJoin {
        outer: Box<QueryExpr>,
        inner: Box<QueryExpr>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda2,
    },

    /// `source.GroupBy(x => key)` or `source.GroupBy(x => key, x => element)`.
    GroupBy {
        source: Box<QueryExpr>,
        key: Lambda,
        element: Option<Lambda>,
    },

    /// Start of an ordering chain.
    OrderBy {
        source: Box<QueryExpr>,
        key: Lambda,
        descending: bool,
    },

    /// Continuation of an ordering chain; only valid directly over
    /// `OrderBy`/`ThenBy`.
    ThenBy {
        source: Box<QueryExpr>,
        key: Lambda,
        descending: bool,
    },
}

impl QueryExpr {
    pub fn source(entity_set: impl Into<String>) -> QueryExpr {
        QueryExpr::Source { entity_set: entity_set.into() }
    }

    pub fn filter(self, predicate: Lambda) -> QueryExpr {
        QueryExpr::Where {
            source: Box::new(self),
            predicate,
        }
    }

    pub fn select(self, selector: Lambda) -> QueryExpr {
        QueryExpr::Select {
            source: Box::new(self),
            selector,
        }
    }

    pub fn select_many(self, collection: Lambda, result: Option<Lambda2>) -> QueryExpr {
        QueryExpr::SelectMany {
            source: Box::new(self),
            collection,
            result,
        }
    }

    pub fn join(
        self,
        inner: QueryExpr,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda2,
    ) -> QueryExpr {
        QueryExpr::Join {
            outer: Box::new(self),
            inner: Box::new(inner),
            outer_key,
            inner_key,
            result,
        }
    }

    pub fn group_join(
        self,
        inner: QueryExpr,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda2,
    ) -> QueryExpr {
        QueryExpr::GroupJoin {
            outer: Box::new(self),
            inner: Box::new(inner),
            outer_key,
            inner_key,
            result,
        }
    }

    pub fn group_by(self, key: Lambda, element: Option<Lambda>) -> QueryExpr {
        QueryExpr::GroupBy {
            source: Box::new(self),
            key,
            element,
        }
    }

    pub fn order_by(self, key: Lambda, descending: bool) -> QueryExpr {
        QueryExpr::OrderBy {
            source: Box::new(self),
            key,
            descending,
        }
    }

    pub fn then_by(self, key: Lambda, descending: bool) -> QueryExpr {
        QueryExpr::ThenBy {
            source: Box::new(self),
            key,
            descending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, Expr, ParamGen};

    #[test]
    fn test_operator_chain_shape() {
        let mut gen = ParamGen::new();
        let r = gen.fresh("r");
        let r2 = gen.fresh("r");

        let query = QueryExpr::source("Runs")
            .filter(Lambda::new(
                r.clone(),
                Expr::binary(
                    BinOp::Gt,
                    Expr::property(Expr::param(&r), "Id"),
                    Expr::constant(5i64),
                ),
            ))
            .select(Lambda::new(r2.clone(), Expr::property(Expr::param(&r2), "Name")));

        match query {
            QueryExpr::Select { source, .. } => match *source {
                QueryExpr::Where { source, .. } => {
                    assert!(matches!(*source, QueryExpr::Source { .. }));
                }
                other => panic!("expected Where, got {:?}", other),
            },
            other => panic!("expected Select, got {:?}", other),
        }
    }
}

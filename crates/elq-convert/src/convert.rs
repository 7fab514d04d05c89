//! Core expression-to-command-tree converter
//!
//! A recursive-descent visitor over the query expression tree. At every
//! scalar node it asks the funcletizer whether the sub-expression can run
//! now (it becomes a constant) or must lower to a command tree operator; at
//! every operator it opens a scope, binds the range variable, and emits the
//! corresponding relational node. Either a complete, well-typed tree comes
//! back or a typed error does; there is no partial output.

use thiserror::Error;
use tracing::{debug, trace};

use elq_expr::{BinOp, Expr, Lambda, Lambda2, QueryExpr};
use elq_model::{ModelError, ModelResolver, TypeUsage};
use elq_tree::{ComparisonOp, DbExpression, ExpressionBinding, SortClause};

use crate::funcletize::{EvalError, Funcletizer};
use crate::scope::{ScopeBinder, ScopeKind};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("Unsupported cast from {from} to {to}")]
    UnsupportedCast { from: String, to: String },

    #[error("Scope error: {0}")]
    Scope(String),

    #[error("Funcletization failed: {0}")]
    Funcletization(#[from] EvalError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Converts one query expression into one command tree. Each instance owns
/// its scope stack and name counters, so concurrent conversions never share
/// naming state.
pub struct ExpressionConverter<'a> {
    resolver: &'a dyn ModelResolver,
    funcletizer: Funcletizer,
    root: QueryExpr,
    scope: ScopeBinder,
}

impl<'a> ExpressionConverter<'a> {
    pub fn new(resolver: &'a dyn ModelResolver, funcletizer: Funcletizer, root: QueryExpr) -> Self {
        Self {
            resolver,
            funcletizer,
            root,
            scope: ScopeBinder::new(),
        }
    }

    /// Translate the query into a command tree.
    pub fn convert(mut self) -> Result<DbExpression, ConvertError> {
        debug!("converting query expression to a command tree");
        let funcletizer = self.funcletizer.clone();
        let root = self.root.clone();
        self.convert_query(&root, &funcletizer)
    }

    fn convert_query(
        &mut self,
        query: &QueryExpr,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        match query {
            QueryExpr::Source { entity_set } => self.convert_source(entity_set),
            QueryExpr::Where { source, predicate } => self.convert_where(source, predicate, f),
            QueryExpr::Select { source, selector } => self.convert_select(source, selector, f),
            QueryExpr::SelectMany {
                source,
                collection,
                result,
            } => self.convert_select_many(source, collection, result.as_ref(), f),
            QueryExpr::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.convert_join(outer, inner, outer_key, inner_key, result, f),
            QueryExpr::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.convert_group_join(outer, inner, outer_key, inner_key, result, f),
            QueryExpr::GroupBy {
                source,
                key,
                element,
            } => self.convert_group_by(source, key, element.as_ref(), f),
            QueryExpr::OrderBy { .. } | QueryExpr::ThenBy { .. } => {
                self.convert_ordering(query, f)
            }
        }
    }

    fn convert_source(&mut self, entity_set: &str) -> Result<DbExpression, ConvertError> {
        let set = self.resolver.entity_set(entity_set)?;
        let entity = self.resolver.entity_type(&set.entity_type)?;
        trace!(entity_set, "lowering source to a scan");
        Ok(DbExpression::Scan {
            entity_set: set.name.clone(),
            result_type: TypeUsage::collection(TypeUsage::Entity(entity.name.clone())),
        })
    }

    fn convert_where(
        &mut self,
        source: &QueryExpr,
        predicate: &Lambda,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        let input = self.convert_query(source, f)?;
        let element = element_type(&input)?;
        let result_type = input.result_type();
        trace!("lowering Where to Filter");

        let handle = self.scope.enter_scope(ScopeKind::Select);
        let name = self.scope.bind(predicate.param.id, element.clone())?;
        let body = self.convert_scalar(&predicate.body, &f.nested(predicate.param.id))?;
        self.scope.exit_scope(handle)?;

        Ok(DbExpression::Filter {
            input: ExpressionBinding::new(input, name, element),
            predicate: Box::new(body),
            result_type,
        })
    }

    fn convert_select(
        &mut self,
        source: &QueryExpr,
        selector: &Lambda,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        let input = self.convert_query(source, f)?;
        let element = element_type(&input)?;
        trace!("lowering Select to Project");

        let handle = self.scope.enter_scope(ScopeKind::Select);
        let name = self.scope.bind(selector.param.id, element.clone())?;
        let projection = self.convert_scalar(&selector.body, &f.nested(selector.param.id))?;
        self.scope.exit_scope(handle)?;

        let result_type = TypeUsage::collection(projection.result_type());
        Ok(DbExpression::Project {
            input: ExpressionBinding::new(input, name, element),
            projection: Box::new(projection),
            result_type,
        })
    }

    fn convert_select_many(
        &mut self,
        source: &QueryExpr,
        collection: &Lambda,
        result: Option<&Lambda2>,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        let input = self.convert_query(source, f)?;
        let element = element_type(&input)?;
        trace!("lowering SelectMany to CrossApply");

        let handle = self.scope.enter_scope(ScopeKind::Select);
        let outer_name = self.scope.bind(collection.param.id, element.clone())?;
        let apply_expr =
            self.convert_scalar(&collection.body, &f.nested(collection.param.id))?;
        let inner_element = element_type(&apply_expr).map_err(|_| {
            ConvertError::UnsupportedConstruct(
                "select-many selector must produce a collection".to_string(),
            )
        })?;

        match result {
            None => {
                self.scope.exit_scope(handle)?;
                let apply_name = self.scope.next_name();
                let result_type = TypeUsage::collection(inner_element.clone());
                Ok(DbExpression::CrossApply {
                    input: ExpressionBinding::new(input, outer_name, element),
                    apply: ExpressionBinding::new(apply_expr, apply_name, inner_element),
                    result_type,
                })
            }
            Some(result) => {
                let apply_name = self.scope.next_name();
                self.scope
                    .alias(result.params.0.id, &outer_name, element.clone())?;
                self.scope
                    .alias(result.params.1.id, &apply_name, inner_element.clone())?;
                let nested = f.nested(result.params.0.id).nested(result.params.1.id);
                let projection = self.convert_scalar(&result.body, &nested)?;
                self.scope.exit_scope(handle)?;

                let pair_type = TypeUsage::row(vec![
                    (outer_name.clone(), element.clone()),
                    (apply_name.clone(), inner_element.clone()),
                ]);
                let apply = DbExpression::CrossApply {
                    input: ExpressionBinding::new(input, outer_name, element),
                    apply: ExpressionBinding::new(apply_expr, apply_name, inner_element),
                    result_type: TypeUsage::collection(pair_type.clone()),
                };
                let result_type = TypeUsage::collection(projection.result_type());
                let project_name = self.scope.next_name();
                Ok(DbExpression::Project {
                    input: ExpressionBinding::new(apply, project_name, pair_type),
                    projection: Box::new(projection),
                    result_type,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn convert_join(
        &mut self,
        outer: &QueryExpr,
        inner: &QueryExpr,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda2,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        let left = self.convert_query(outer, f)?;
        let left_element = element_type(&left)?;
        let right = self.convert_query(inner, f)?;
        let right_element = element_type(&right)?;
        trace!("lowering Join to InnerJoin");

        let handle = self.scope.enter_scope(ScopeKind::Join);
        let left_name = self.scope.bind(outer_key.param.id, left_element.clone())?;
        let left_key = self.convert_scalar(&outer_key.body, &f.nested(outer_key.param.id))?;
        let right_name = self.scope.bind(inner_key.param.id, right_element.clone())?;
        let right_key = self.convert_scalar(&inner_key.body, &f.nested(inner_key.param.id))?;
        let condition = self.null_safe_equality(left_key, right_key)?;

        self.scope
            .alias(result.params.0.id, &left_name, left_element.clone())?;
        self.scope
            .alias(result.params.1.id, &right_name, right_element.clone())?;
        let nested = f.nested(result.params.0.id).nested(result.params.1.id);
        let projection = self.convert_scalar(&result.body, &nested)?;
        self.scope.exit_scope(handle)?;

        let pair_type = TypeUsage::row(vec![
            (left_name.clone(), left_element.clone()),
            (right_name.clone(), right_element.clone()),
        ]);
        let join = DbExpression::InnerJoin {
            left: ExpressionBinding::new(left, left_name, left_element),
            right: ExpressionBinding::new(right, right_name, right_element),
            condition: Box::new(condition),
            result_type: TypeUsage::collection(pair_type.clone()),
        };
        let result_type = TypeUsage::collection(projection.result_type());
        let project_name = self.scope.next_name();
        Ok(DbExpression::Project {
            input: ExpressionBinding::new(join, project_name, pair_type),
            projection: Box::new(projection),
            result_type,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn convert_group_join(
        &mut self,
        outer: &QueryExpr,
        inner: &QueryExpr,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda2,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        let left = self.convert_query(outer, f)?;
        let left_element = element_type(&left)?;
        let right = self.convert_query(inner, f)?;
        let right_element = element_type(&right)?;
        trace!("lowering GroupJoin to a filtered CrossApply");

        let handle = self.scope.enter_scope(ScopeKind::Join);
        let left_name = self.scope.bind(outer_key.param.id, left_element.clone())?;
        let left_key = self.convert_scalar(&outer_key.body, &f.nested(outer_key.param.id))?;
        let right_name = self.scope.bind(inner_key.param.id, right_element.clone())?;
        let right_key = self.convert_scalar(&inner_key.body, &f.nested(inner_key.param.id))?;
        let condition = self.null_safe_equality(left_key, right_key)?;

        // The group is the inner source filtered by the key predicate,
        // evaluated per outer row through the apply.
        let group_type = TypeUsage::collection(right_element.clone());
        let group = DbExpression::Filter {
            input: ExpressionBinding::new(right, right_name, right_element),
            predicate: Box::new(condition),
            result_type: group_type.clone(),
        };

        let group_name = self.scope.next_name();
        self.scope
            .alias(result.params.0.id, &left_name, left_element.clone())?;
        self.scope
            .alias(result.params.1.id, &group_name, group_type.clone())?;
        let nested = f.nested(result.params.0.id).nested(result.params.1.id);
        let projection = self.convert_scalar(&result.body, &nested)?;
        self.scope.exit_scope(handle)?;

        let pair_type = TypeUsage::row(vec![
            (left_name.clone(), left_element.clone()),
            (group_name.clone(), group_type.clone()),
        ]);
        let apply = DbExpression::CrossApply {
            input: ExpressionBinding::new(left, left_name, left_element),
            apply: ExpressionBinding::new(group, group_name, group_type),
            result_type: TypeUsage::collection(pair_type.clone()),
        };
        let result_type = TypeUsage::collection(projection.result_type());
        let project_name = self.scope.next_name();
        Ok(DbExpression::Project {
            input: ExpressionBinding::new(apply, project_name, pair_type),
            projection: Box::new(projection),
            result_type,
        })
    }

    fn convert_group_by(
        &mut self,
        source: &QueryExpr,
        key: &Lambda,
        element: Option<&Lambda>,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        let input = self.convert_query(source, f)?;
        let input_element = element_type(&input)?;
        trace!("lowering GroupBy");

        let key_handle = self.scope.enter_scope(ScopeKind::GroupKey);
        let input_name = self.scope.bind(key.param.id, input_element.clone())?;
        let key_f = f.nested(key.param.id);

        // A record-shaped key selector contributes one key per component;
        // anything else is a single key named Key.
        let mut keys = Vec::new();
        match &key.body {
            Expr::Record { fields } => {
                for (field_name, field_expr) in fields {
                    let converted = self.convert_scalar(field_expr, &key_f)?;
                    keys.push((field_name.clone(), converted));
                }
            }
            body => {
                keys.push(("Key".to_string(), self.convert_scalar(body, &key_f)?));
            }
        }

        let element_handle = self.scope.enter_scope(ScopeKind::GroupElement);
        let group_var = self.scope.next_group_name();
        let aggregate = match element {
            None => {
                let var = DbExpression::VariableReference {
                    name: group_var.clone(),
                    result_type: input_element.clone(),
                };
                DbExpression::GroupAggregate {
                    argument: Box::new(var),
                    result_type: TypeUsage::collection(input_element.clone()),
                }
            }
            Some(element) => {
                // The element selector's parameter ranges element-wise over
                // the group variable.
                self.scope
                    .alias(element.param.id, &group_var, input_element.clone())?;
                let body =
                    self.convert_scalar(&element.body, &f.nested(element.param.id))?;
                let body_type = body.result_type();
                DbExpression::GroupAggregate {
                    argument: Box::new(body),
                    result_type: TypeUsage::collection(body_type),
                }
            }
        };
        self.scope.exit_scope(element_handle)?;
        self.scope.exit_scope(key_handle)?;

        // The group-by's immediate result is a row of keys plus aggregates;
        // a trailing Project reshapes it into the user-visible shape.
        let mut row_fields: Vec<(String, TypeUsage)> = keys
            .iter()
            .map(|(name, expr)| (name.clone(), expr.result_type()))
            .collect();
        row_fields.push(("Group".to_string(), aggregate.result_type()));
        let row_type = TypeUsage::row(row_fields.clone());

        let group_by = DbExpression::GroupBy {
            input: ExpressionBinding::new(input, input_name, input_element),
            group_var,
            keys,
            aggregates: vec![("Group".to_string(), aggregate)],
            result_type: TypeUsage::collection(row_type.clone()),
        };

        let project_name = self.scope.next_name();
        let reshaped: Vec<(String, DbExpression)> = row_fields
            .iter()
            .map(|(name, ty)| {
                (
                    name.clone(),
                    DbExpression::PropertyAccess {
                        base: Box::new(DbExpression::VariableReference {
                            name: project_name.clone(),
                            result_type: row_type.clone(),
                        }),
                        property: name.clone(),
                        result_type: ty.clone(),
                    },
                )
            })
            .collect();
        let projection = DbExpression::NewInstance {
            fields: reshaped,
            result_type: row_type.clone(),
        };
        Ok(DbExpression::Project {
            input: ExpressionBinding::new(group_by, project_name, row_type.clone()),
            projection: Box::new(projection),
            result_type: TypeUsage::collection(row_type),
        })
    }

    /// Lower a contiguous OrderBy/ThenBy chain into one Sort node without
    /// re-lowering the source per key.
    fn convert_ordering(
        &mut self,
        query: &QueryExpr,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        let mut keys_outermost_first: Vec<(&Lambda, bool)> = Vec::new();
        let mut current = query;
        let source = loop {
            match current {
                QueryExpr::ThenBy {
                    source,
                    key,
                    descending,
                } => {
                    keys_outermost_first.push((key, *descending));
                    match source.as_ref() {
                        QueryExpr::OrderBy { .. } | QueryExpr::ThenBy { .. } => {
                            current = source.as_ref();
                        }
                        _ => {
                            return Err(ConvertError::UnsupportedConstruct(
                                "ThenBy requires an ordered source".to_string(),
                            ));
                        }
                    }
                }
                QueryExpr::OrderBy {
                    source,
                    key,
                    descending,
                } => {
                    keys_outermost_first.push((key, *descending));
                    break source.as_ref();
                }
                _ => {
                    return Err(ConvertError::UnsupportedConstruct(
                        "ordering chain must start with OrderBy".to_string(),
                    ));
                }
            }
        };

        let input = self.convert_query(source, f)?;
        let element = element_type(&input)?;
        let result_type = input.result_type();
        trace!(keys = keys_outermost_first.len(), "lowering ordering chain to Sort");

        let handle = self.scope.enter_scope(ScopeKind::OrderBy);
        let mut bound_name: Option<String> = None;
        let mut keys = Vec::new();
        for (lambda, descending) in keys_outermost_first.iter().rev() {
            match &bound_name {
                None => {
                    let name = self.scope.bind(lambda.param.id, element.clone())?;
                    bound_name = Some(name);
                }
                Some(name) => {
                    self.scope.alias(lambda.param.id, name, element.clone())?;
                }
            }
            let expression = self.convert_scalar(&lambda.body, &f.nested(lambda.param.id))?;
            keys.push(SortClause {
                expression,
                descending: *descending,
            });
        }
        self.scope.exit_scope(handle)?;

        let name = bound_name.ok_or_else(|| {
            ConvertError::UnsupportedConstruct("ordering chain without keys".to_string())
        })?;
        Ok(DbExpression::Sort {
            input: ExpressionBinding::new(input, name, element),
            keys,
            result_type,
        })
    }

    fn convert_scalar(
        &mut self,
        expr: &Expr,
        f: &Funcletizer,
    ) -> Result<DbExpression, ConvertError> {
        if f.is_evaluable(expr) {
            let value = f.evaluate(expr)?;
            trace!("funcletized sub-expression to a constant");
            let result_type = match expr {
                Expr::Convert { target, .. } => target.clone(),
                _ => value.type_usage(),
            };
            return Ok(DbExpression::Constant { value, result_type });
        }

        match expr {
            Expr::Constant { value } | Expr::Captured { value, .. } => {
                Ok(DbExpression::Constant {
                    value: value.clone(),
                    result_type: value.type_usage(),
                })
            }
            Expr::Param { id } => {
                let binding = self.scope.resolve(*id)?;
                Ok(DbExpression::VariableReference {
                    name: binding.name.clone(),
                    result_type: binding.element_type.clone(),
                })
            }
            Expr::Property { base, name } => {
                let base = self.convert_scalar(base, f)?;
                let result_type = self.property_type(&base.result_type(), name)?;
                Ok(DbExpression::PropertyAccess {
                    base: Box::new(base),
                    property: name.clone(),
                    result_type,
                })
            }
            Expr::Binary { op, left, right } => {
                let op = match op {
                    BinOp::Eq => ComparisonOp::Eq,
                    BinOp::Ne => ComparisonOp::Ne,
                    BinOp::Lt => ComparisonOp::Lt,
                    BinOp::Le => ComparisonOp::Le,
                    BinOp::Gt => ComparisonOp::Gt,
                    BinOp::Ge => ComparisonOp::Ge,
                    BinOp::And => ComparisonOp::And,
                    BinOp::Or => ComparisonOp::Or,
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                        return Err(ConvertError::UnsupportedConstruct(format!(
                            "arithmetic operator {:?} over a range variable has no command tree equivalent",
                            op
                        )));
                    }
                };
                let left = self.convert_scalar(left, f)?;
                let right = self.convert_scalar(right, f)?;
                Ok(DbExpression::Comparison {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            Expr::Unary { op, .. } => Err(ConvertError::UnsupportedConstruct(format!(
                "unary operator {:?} over a range variable has no command tree equivalent",
                op
            ))),
            Expr::Conditional {
                test,
                then_expr,
                else_expr,
            } => {
                let test = self.convert_scalar(test, f)?;
                let then_expr = self.convert_scalar(then_expr, f)?;
                let else_expr = self.convert_scalar(else_expr, f)?;
                let result_type = then_expr.result_type();
                Ok(DbExpression::Case {
                    whens: vec![(test, then_expr)],
                    otherwise: Box::new(else_expr),
                    result_type,
                })
            }
            Expr::IsNull { expr } => {
                let argument = self.convert_scalar(expr, f)?;
                Ok(DbExpression::IsNull {
                    argument: Box::new(argument),
                })
            }
            Expr::Convert { expr, target } => {
                let argument = self.convert_scalar(expr, f)?;
                let source_type = argument.result_type();
                let source_castable =
                    source_type.is_primitive_or_enum() || source_type == TypeUsage::Null;
                if !source_castable || !target.is_primitive_or_enum() {
                    return Err(ConvertError::UnsupportedCast {
                        from: source_type.describe(),
                        to: target.describe(),
                    });
                }
                Ok(DbExpression::Cast {
                    argument: Box::new(argument),
                    result_type: target.clone(),
                })
            }
            Expr::Call { func, .. } => Err(ConvertError::UnsupportedConstruct(format!(
                "host function '{}' applied to a range variable cannot be translated",
                func.name()
            ))),
            Expr::Record { fields } => {
                let mut converted = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    converted.push((name.clone(), self.convert_scalar(field, f)?));
                }
                let row_type = TypeUsage::row(
                    converted
                        .iter()
                        .map(|(name, expr)| (name.clone(), expr.result_type()))
                        .collect::<Vec<_>>(),
                );
                Ok(DbExpression::NewInstance {
                    fields: converted,
                    result_type: row_type,
                })
            }
            Expr::Query { query } => self.convert_query(query, f),
        }
    }

    fn property_type(
        &self,
        base_type: &TypeUsage,
        property: &str,
    ) -> Result<TypeUsage, ConvertError> {
        match base_type {
            TypeUsage::Entity(entity) => {
                let entity = self.resolver.entity_type(entity)?;
                Ok(entity.find_property(property)?.ty.clone())
            }
            TypeUsage::Row(_) => base_type
                .find_field(property)
                .map(|field| field.ty.clone())
                .ok_or_else(|| {
                    ModelError::UnknownProperty {
                        entity: base_type.describe(),
                        property: property.to_string(),
                    }
                    .into()
                }),
            other => Err(ConvertError::UnsupportedConstruct(format!(
                "property access on {}",
                other.describe()
            ))),
        }
    }

    /// Join keys compare with null-propagating set semantics: when both
    /// sides can be null the emitted predicate is
    /// `(a = b) OR (IsNull(a) AND IsNull(b))`.
    fn null_safe_equality(
        &self,
        left: DbExpression,
        right: DbExpression,
    ) -> Result<DbExpression, ConvertError> {
        let plain = DbExpression::Comparison {
            op: ComparisonOp::Eq,
            left: Box::new(left.clone()),
            right: Box::new(right.clone()),
        };
        if self.is_nullable(&left)? && self.is_nullable(&right)? {
            let both_null = DbExpression::Comparison {
                op: ComparisonOp::And,
                left: Box::new(DbExpression::IsNull {
                    argument: Box::new(left),
                }),
                right: Box::new(DbExpression::IsNull {
                    argument: Box::new(right),
                }),
            };
            Ok(DbExpression::Comparison {
                op: ComparisonOp::Or,
                left: Box::new(plain),
                right: Box::new(both_null),
            })
        } else {
            Ok(plain)
        }
    }

    /// Structural nullability of a converted expression.
    fn is_nullable(&self, expr: &DbExpression) -> Result<bool, ConvertError> {
        match expr {
            DbExpression::Constant { value, .. } => Ok(value.is_null()),
            DbExpression::PropertyAccess { base, property, .. } => {
                match base.result_type() {
                    TypeUsage::Entity(entity) => {
                        let entity = self.resolver.entity_type(&entity)?;
                        Ok(entity.find_property(property)?.nullable)
                    }
                    _ => Ok(false),
                }
            }
            DbExpression::Cast { argument, .. } => self.is_nullable(argument),
            DbExpression::Case { whens, otherwise, .. } => {
                for (_, then) in whens {
                    if self.is_nullable(then)? {
                        return Ok(true);
                    }
                }
                self.is_nullable(otherwise)
            }
            _ => Ok(false),
        }
    }
}

fn element_type(expr: &DbExpression) -> Result<TypeUsage, ConvertError> {
    expr.result_type()
        .element_type()
        .cloned()
        .ok_or_else(|| {
            ConvertError::UnsupportedConstruct(
                "query operator applied to a non-collection source".to_string(),
            )
        })
}

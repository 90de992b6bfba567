//! Query expressions and aggregates.
//!
//! [`Expression`] is used for annotations, ordering, `values()` projections
//! and `update()` right-hand sides. Field references are written as paths
//! (`F("events__id")`) and resolved against the model metadata by the query
//! builder, which rewrites them into table-qualified [`ColumnRef`]s.
//!
//! # Examples
//!
//! ```
//! use terrapin_db::query::expressions::{Count, Expression, F, Sum};
//!
//! let total = Sum("price");
//! let n = Count("events__id").distinct();
//! assert!(n.is_aggregate());
//! let bumped = F("views") + Expression::value(1);
//! assert!(!bumped.is_aggregate());
//! # let _ = total;
//! ```

use std::ops;

use super::compiler::ColumnRef;
use crate::value::Value;

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// COUNT.
    Count,
    /// SUM.
    Sum,
    /// AVG.
    Avg,
    /// MIN.
    Min,
    /// MAX.
    Max,
}

impl AggregateFunc {
    /// Returns the SQL function name for this aggregate.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// An unresolved field path (`name`, `tournament__name`) or annotation alias.
    Field(String),
    /// A resolved, table-qualified column.
    Column(ColumnRef),
    /// A literal value, bound as a parameter.
    Value(Value),
    /// `*`, only meaningful inside `COUNT`.
    Star,
    /// An aggregate function.
    Aggregate {
        /// The aggregate operation.
        func: AggregateFunc,
        /// The aggregated expression.
        expr: Box<Expression>,
        /// Whether DISTINCT applies.
        distinct: bool,
    },
    /// A scalar database function call.
    Func {
        /// Function name (e.g. `UPPER`, `COALESCE`).
        name: String,
        /// Arguments.
        args: Vec<Expression>,
    },
    /// Addition.
    Add(Box<Expression>, Box<Expression>),
    /// Subtraction.
    Sub(Box<Expression>, Box<Expression>),
    /// Multiplication.
    Mul(Box<Expression>, Box<Expression>),
    /// Division.
    Div(Box<Expression>, Box<Expression>),
}

impl Expression {
    /// A field reference.
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field(path.into())
    }

    /// A literal value.
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    /// A function call.
    pub fn func(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::Func {
            name: name.into(),
            args,
        }
    }

    /// An aggregate over a field path.
    pub fn aggregate(func: AggregateFunc, path: impl Into<String>) -> Self {
        Self::Aggregate {
            func,
            expr: Box::new(Self::Field(path.into())),
            distinct: false,
        }
    }

    /// Applies DISTINCT to an aggregate; other expressions are unchanged.
    pub fn distinct(self) -> Self {
        match self {
            Self::Aggregate { func, expr, .. } => Self::Aggregate {
                func,
                expr,
                distinct: true,
            },
            other => other,
        }
    }

    /// Whether this expression contains an aggregate.
    pub fn is_aggregate(&self) -> bool {
        match self {
            Self::Aggregate { .. } => true,
            Self::Func { args, .. } => args.iter().any(Self::is_aggregate),
            Self::Add(a, b) | Self::Sub(a, b) | Self::Mul(a, b) | Self::Div(a, b) => {
                a.is_aggregate() || b.is_aggregate()
            }
            Self::Field(_) | Self::Column(_) | Self::Value(_) | Self::Star => false,
        }
    }

    /// Rewrites every field path with `resolve`, leaving everything else intact.
    pub fn try_map_fields<E>(
        &self,
        resolve: &mut impl FnMut(&str) -> Result<Expression, E>,
    ) -> Result<Expression, E> {
        Ok(match self {
            Self::Field(path) => resolve(path)?,
            Self::Aggregate {
                func,
                expr,
                distinct,
            } => Self::Aggregate {
                func: *func,
                expr: Box::new(expr.try_map_fields(resolve)?),
                distinct: *distinct,
            },
            Self::Func { name, args } => Self::Func {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| a.try_map_fields(resolve))
                    .collect::<Result<_, _>>()?,
            },
            Self::Add(a, b) => Self::Add(
                Box::new(a.try_map_fields(resolve)?),
                Box::new(b.try_map_fields(resolve)?),
            ),
            Self::Sub(a, b) => Self::Sub(
                Box::new(a.try_map_fields(resolve)?),
                Box::new(b.try_map_fields(resolve)?),
            ),
            Self::Mul(a, b) => Self::Mul(
                Box::new(a.try_map_fields(resolve)?),
                Box::new(b.try_map_fields(resolve)?),
            ),
            Self::Div(a, b) => Self::Div(
                Box::new(a.try_map_fields(resolve)?),
                Box::new(b.try_map_fields(resolve)?),
            ),
            other => other.clone(),
        })
    }
}

/// `F("field")`: a reference to a field (or annotation) by path.
#[allow(non_snake_case)]
pub fn F(path: impl Into<String>) -> Expression {
    Expression::field(path)
}

/// `Count("field")`.
#[allow(non_snake_case)]
pub fn Count(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Count, path)
}

/// `Sum("field")`.
#[allow(non_snake_case)]
pub fn Sum(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Sum, path)
}

/// `Avg("field")`.
#[allow(non_snake_case)]
pub fn Avg(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Avg, path)
}

/// `Min("field")`.
#[allow(non_snake_case)]
pub fn Min(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Min, path)
}

/// `Max("field")`.
#[allow(non_snake_case)]
pub fn Max(path: impl Into<String>) -> Expression {
    Expression::aggregate(AggregateFunc::Max, path)
}

impl ops::Add for Expression {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::Add(Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Expression {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::Sub(Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expression {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self::Mul(Box::new(self), Box::new(rhs))
    }
}

impl ops::Div for Expression {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self::Div(Box::new(self), Box::new(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_detection() {
        assert!(Count("id").is_aggregate());
        assert!(Expression::func("COALESCE", vec![Sum("x"), Expression::value(0)]).is_aggregate());
        assert!((Max("a") - Min("a")).is_aggregate());
        assert!(!F("a").is_aggregate());
    }

    #[test]
    fn test_distinct_only_touches_aggregates() {
        match Count("events__id").distinct() {
            Expression::Aggregate { distinct, func, .. } => {
                assert!(distinct);
                assert_eq!(func, AggregateFunc::Count);
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
        assert_eq!(F("a").distinct(), F("a"));
    }

    #[test]
    fn test_map_fields() {
        let expr = Sum("price") * Expression::value(2);
        let mapped = expr
            .try_map_fields::<()>(&mut |path| {
                Ok(Expression::Column(ColumnRef::new("book", path)))
            })
            .unwrap();
        match mapped {
            Expression::Mul(lhs, _) => match *lhs {
                Expression::Aggregate { expr, .. } => {
                    assert_eq!(*expr, Expression::Column(ColumnRef::new("book", "price")));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}

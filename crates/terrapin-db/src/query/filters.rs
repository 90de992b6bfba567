//! The filter/lookup algebra.
//!
//! Every resolved model carries a table of [`FilterInfo`] entries keyed by
//! filter name (`name`, `name__gte`, `tournament`, `participants__in`, ...).
//! An entry says which column the filter applies to and which
//! [`LookupKind`] builds its predicate. Many-to-many and backward relations
//! get the same suffixes, but their predicates test membership in a subquery
//! over the through table or the related table instead of a local column.
//!
//! Predicates are built as [`WhereNode`] trees, so they stay dialect
//! independent; the compiler decides how e.g. case-insensitive matching is
//! spelled.

use indexmap::IndexMap;
use terrapin_core::{TerrapinError, TerrapinResult};

use super::compiler::{escape_like, ColumnRef, CompareOp, Query, SelectColumn, WhereNode};
use super::expressions::Expression;
use super::lookups::LookupKind;
use crate::fields::{FieldDef, FieldType};
use crate::model::{ModelKey, ModelMeta};
use crate::value::Value;

/// What a filter compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterTarget {
    /// A column of the model's own table.
    Column(String),
    /// Membership of `own_column` in
    /// `SELECT select_column FROM table WHERE match_column <lookup> value`.
    Related {
        /// Column of the model's table being tested.
        own_column: String,
        /// Through table (M2M) or related table (backward FK).
        table: String,
        /// Column of `table` pointing back at this model.
        select_column: String,
        /// Column of `table` the filter value is compared with.
        match_column: String,
    },
}

/// One entry of a model's filter table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterInfo {
    /// The column or subquery the filter applies to.
    pub target: FilterTarget,
    /// The lookup that builds the predicate.
    pub lookup: LookupKind,
    /// Data field used to convert filter values, if any.
    pub field: Option<String>,
    /// When an instance is passed as the value, the instance field to compare with.
    pub instance_field: Option<String>,
}

impl FilterInfo {
    /// Builds the predicate for this filter, with columns qualified by `alias`.
    pub fn predicate(&self, alias: &str, value: Value) -> TerrapinResult<WhereNode> {
        match &self.target {
            FilterTarget::Column(column) => {
                build_predicate(self.lookup, column_expr(alias, column), value)
            }
            FilterTarget::Related {
                own_column,
                table,
                select_column,
                match_column,
            } => {
                let (lookup, negated) = match self.lookup {
                    LookupKind::Not => (LookupKind::Exact, true),
                    LookupKind::NotIn => (LookupKind::In, true),
                    other => (other, false),
                };
                let mut inner = Query::new(table.clone());
                inner.select = vec![SelectColumn::column(table.clone(), select_column.clone())];
                inner.where_clause = Some(WhereNode::And(vec![
                    build_predicate(lookup, column_expr(table, match_column), value)?,
                    // NOT IN over a set containing NULL never matches.
                    WhereNode::IsNull {
                        lhs: column_expr(table, select_column),
                        negated: true,
                    },
                ]));
                Ok(WhereNode::InSubquery {
                    lhs: column_expr(alias, own_column),
                    query: Box::new(inner),
                    negated,
                })
            }
        }
    }
}

fn column_expr(table: &str, column: &str) -> Expression {
    Expression::Column(ColumnRef::new(table, column))
}

/// Builds the predicate for `lookup` applied to `lhs` and `value`.
///
/// Negated lookups (`not`, `not_in`) also match rows where the column is
/// NULL, which a plain `<>` or `NOT IN` would silently drop.
pub fn build_predicate(lookup: LookupKind, lhs: Expression, value: Value) -> TerrapinResult<WhereNode> {
    let node = match lookup {
        LookupKind::Exact => {
            if value.is_null() {
                WhereNode::IsNull { lhs, negated: false }
            } else {
                compare(lhs, CompareOp::Eq, value)
            }
        }
        LookupKind::Not => {
            if value.is_null() {
                WhereNode::IsNull { lhs, negated: true }
            } else {
                WhereNode::Or(vec![
                    compare(lhs.clone(), CompareOp::Ne, value),
                    WhereNode::IsNull { lhs, negated: false },
                ])
            }
        }
        LookupKind::In => WhereNode::In {
            lhs,
            values: into_list(value),
            negated: false,
        },
        LookupKind::NotIn => WhereNode::Or(vec![
            WhereNode::In {
                lhs: lhs.clone(),
                values: into_list(value),
                negated: true,
            },
            WhereNode::IsNull { lhs, negated: false },
        ]),
        LookupKind::Gt => compare(lhs, CompareOp::Gt, value),
        LookupKind::Gte => compare(lhs, CompareOp::Gte, value),
        LookupKind::Lt => compare(lhs, CompareOp::Lt, value),
        LookupKind::Lte => compare(lhs, CompareOp::Lte, value),
        LookupKind::Range => match into_list(value).as_slice() {
            [low, high] => WhereNode::Between {
                lhs,
                low: low.clone(),
                high: high.clone(),
            },
            _ => {
                return Err(TerrapinError::ParamsError(
                    "range lookup requires a list of exactly two values".to_string(),
                ))
            }
        },
        LookupKind::IsNull | LookupKind::NotIsNull => {
            let flag = truthy(&value)?;
            let is_null = if lookup == LookupKind::IsNull { flag } else { !flag };
            WhereNode::IsNull {
                lhs,
                negated: !is_null,
            }
        }
        LookupKind::Contains | LookupKind::IContains => like(lhs, &value, "%", "%", lookup),
        LookupKind::StartsWith | LookupKind::IStartsWith => like(lhs, &value, "", "%", lookup),
        LookupKind::EndsWith | LookupKind::IEndsWith => like(lhs, &value, "%", "", lookup),
        LookupKind::IExact => like(lhs, &value, "", "", lookup),
    };
    Ok(node)
}

fn compare(lhs: Expression, op: CompareOp, rhs: Value) -> WhereNode {
    WhereNode::Compare { lhs, op, rhs }
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::List(values) => values,
        single => vec![single],
    }
}

fn truthy(value: &Value) -> TerrapinResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        other => Err(TerrapinError::ParamsError(format!(
            "isnull lookups take a boolean, got {}",
            other.type_name()
        ))),
    }
}

fn like(lhs: Expression, value: &Value, prefix: &str, suffix: &str, lookup: LookupKind) -> WhereNode {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    WhereNode::Like {
        lhs,
        pattern: format!("{prefix}{}{suffix}", escape_like(&text)),
        case_insensitive: matches!(
            lookup,
            LookupKind::IContains
                | LookupKind::IStartsWith
                | LookupKind::IEndsWith
                | LookupKind::IExact
        ),
    }
}

/// Lookups available on a data field of the given type.
pub fn lookups_for(field_type: &FieldType) -> &'static [LookupKind] {
    const EQUALITY: &[LookupKind] = &[
        LookupKind::Exact,
        LookupKind::Not,
        LookupKind::In,
        LookupKind::NotIn,
        LookupKind::IsNull,
        LookupKind::NotIsNull,
    ];
    match field_type {
        FieldType::Bool | FieldType::Json | FieldType::Binary => EQUALITY,
        _ => &LookupKind::ALL,
    }
}

/// Lookups available on many-to-many and backward relations.
pub const RELATED_LOOKUPS: &[LookupKind] = &[
    LookupKind::Exact,
    LookupKind::Not,
    LookupKind::In,
    LookupKind::NotIn,
];

fn add_field_filters(
    filters: &mut IndexMap<String, FilterInfo>,
    name: &str,
    field: &FieldDef,
    instance_field: Option<&str>,
) {
    for lookup in lookups_for(&field.field_type) {
        filters.insert(
            lookup.key(name),
            FilterInfo {
                target: FilterTarget::Column(field.column_name().to_string()),
                lookup: *lookup,
                field: Some(field.name.clone()),
                instance_field: instance_field.map(ToString::to_string),
            },
        );
    }
}

/// Builds the filter table of a resolved model.
///
/// `lookup` resolves relation targets; it is called for M2M targets and
/// backward relation sources.
pub fn build_filters<'a>(
    meta: &ModelMeta,
    lookup: impl Fn(&ModelKey) -> Option<&'a ModelMeta>,
) -> IndexMap<String, FilterInfo> {
    let mut filters = IndexMap::new();

    for (name, field) in &meta.fields {
        add_field_filters(&mut filters, name, field, None);
    }
    if let Some(pk) = meta.fields.get(&meta.pk_attr) {
        add_field_filters(&mut filters, "pk", pk, None);
    }

    for (name, fk) in &meta.fk_fields {
        if let Some(key_field) = meta.fields.get(&fk.key_field) {
            add_field_filters(&mut filters, name, key_field, Some(&fk.resolved_to_field));
        }
    }

    let own_pk_column = meta.pk_column().to_string();
    for (name, m2m) in &meta.m2m_fields {
        let Some(target) = m2m.target.as_ref().and_then(&lookup) else {
            continue;
        };
        for kind in RELATED_LOOKUPS {
            filters.insert(
                kind.key(name),
                FilterInfo {
                    target: FilterTarget::Related {
                        own_column: own_pk_column.clone(),
                        table: m2m.through_table().to_string(),
                        select_column: m2m.backward_column().to_string(),
                        match_column: m2m.forward_column().to_string(),
                    },
                    lookup: *kind,
                    field: None,
                    instance_field: Some(target.pk_attr.clone()),
                },
            );
        }
    }

    for (name, backward) in &meta.backward_fields {
        let Some(source) = lookup(&backward.source) else {
            continue;
        };
        let own_column = meta
            .fields
            .get(&backward.to_field)
            .map_or_else(|| own_pk_column.clone(), |f| f.column_name().to_string());
        for kind in RELATED_LOOKUPS {
            filters.insert(
                kind.key(name),
                FilterInfo {
                    target: FilterTarget::Related {
                        own_column: own_column.clone(),
                        table: source.table.clone(),
                        select_column: backward.key_column.clone(),
                        match_column: source.pk_column().to_string(),
                    },
                    lookup: *kind,
                    field: None,
                    instance_field: Some(source.pk_attr.clone()),
                },
            );
        }
    }

    filters
}

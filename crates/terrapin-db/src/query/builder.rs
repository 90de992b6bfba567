//! Resolution of a [`QuerySet`] into a [`Query`].
//!
//! Field paths (`tournament__name`, `events__participants__id`) become
//! qualified columns, and every relation traversed on the way becomes a
//! LEFT JOIN. Each distinct relation path is joined once, under the alias
//! `{root_table}__{path}`.
//!
//! Filters are looked up in the filter table of the model reached so far,
//! longest remaining key first, so `tournament` (the key column) wins over
//! traversing the `tournament` relation. Filters on aggregate annotations
//! go to HAVING; everything else goes to WHERE.

use std::sync::Arc;

use indexmap::IndexMap;
use terrapin_core::{TerrapinError, TerrapinResult};

use super::compiler::{ColumnRef, Join, JoinType, OrderBy, Query, SelectColumn, WhereNode};
use super::expressions::Expression;
use super::filters::{build_predicate, FilterInfo};
use super::lookups::{FilterArg, LookupKind, Q};
use super::queryset::QuerySet;
use crate::dialect::DatabaseBackendType;
use crate::fields::FieldDef;
use crate::model::ModelMeta;
use crate::registry::Registry;
use crate::schema::types;
use crate::value::Value;

/// What a SELECT returns.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Projection<'p> {
    /// Every root column, unaliased, plus the annotations.
    Instances,
    /// The given paths, each aliased by its path. Empty means every field
    /// (aliased by attribute name) plus the annotations.
    Values(&'p [String]),
}

#[derive(Debug, Default)]
struct Clauses {
    where_parts: Vec<WhereNode>,
    having_parts: Vec<WhereNode>,
}

impl Clauses {
    fn extend(&mut self, other: Self) {
        self.where_parts.extend(other.where_parts);
        self.having_parts.extend(other.having_parts);
    }
}

/// Collapses a list of conditions into one node.
pub(crate) fn conjunction(mut parts: Vec<WhereNode>) -> Option<WhereNode> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(WhereNode::And(parts)),
    }
}

fn and_all(parts: Vec<WhereNode>) -> WhereNode {
    conjunction(parts).unwrap_or_else(|| WhereNode::And(Vec::new()))
}

fn column(alias: &str, column: &str) -> Expression {
    Expression::Column(ColumnRef::new(alias, column))
}

/// Converts a filter or update value for binding against `field`.
pub(crate) fn convert_value(
    field: &FieldDef,
    backend: DatabaseBackendType,
    value: Value,
) -> TerrapinResult<Value> {
    match value {
        Value::List(items) => Ok(Value::List(
            items
                .into_iter()
                .map(|item| convert_value(field, backend, item))
                .collect::<TerrapinResult<_>>()?,
        )),
        single => {
            let converted = field.to_db_value(&single)?;
            Ok(types::db_value(&field.field_type, backend, converted))
        }
    }
}

/// Join and annotation state while one query is being resolved.
pub(crate) struct QueryBuilder<'a> {
    registry: &'a Registry,
    root: Arc<ModelMeta>,
    backend: DatabaseBackendType,
    joins: Vec<Join>,
    joined: IndexMap<String, (String, Arc<ModelMeta>)>,
    annotations: IndexMap<String, Expression>,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(registry: &'a Registry, root: Arc<ModelMeta>, backend: DatabaseBackendType) -> Self {
        Self {
            registry,
            root,
            backend,
            joins: Vec::new(),
            joined: IndexMap::new(),
            annotations: IndexMap::new(),
        }
    }

    fn annotation_columns(&self) -> Vec<SelectColumn> {
        self.annotations
            .iter()
            .map(|(name, expr)| SelectColumn::aliased(expr.clone(), name.clone()))
            .collect()
    }

    fn root_alias(&self) -> String {
        self.root.table.clone()
    }

    /// Resolves and records an annotation. Later annotations may refer to
    /// earlier ones by name.
    fn annotate(&mut self, name: &str, expr: &Expression) -> TerrapinResult<()> {
        let resolved = expr.try_map_fields(&mut |path| self.resolve_field(path))?;
        self.annotations.insert(name.to_string(), resolved);
        Ok(())
    }

    /// Joins the relation named by the last element of `path`, starting from
    /// `parent` (reached through the preceding elements). Returns `None`
    /// when that name is not a relation of `parent`.
    fn join(
        &mut self,
        parent_alias: &str,
        parent: &ModelMeta,
        path: &[&str],
    ) -> TerrapinResult<Option<(String, Arc<ModelMeta>)>> {
        let path_key = path.join("__");
        if let Some(found) = self.joined.get(&path_key) {
            return Ok(Some(found.clone()));
        }
        let Some(name) = path.last().copied() else {
            return Ok(None);
        };
        let alias = format!("{}__{path_key}", self.root.table);

        let target = if let Some(fk) = parent.fk_fields.get(name) {
            let target = self.related_meta(fk.target.as_ref(), name)?;
            let own = parent.column_for(&fk.key_field).unwrap_or(&fk.key_field);
            let to_column = target.column_for(&fk.resolved_to_field).unwrap_or(target.pk_column());
            self.push_join(
                &target.table,
                &alias,
                ColumnRef::new(parent_alias, own),
                ColumnRef::new(&alias, to_column),
            );
            target
        } else if let Some(backward) = parent.backward_fields.get(name) {
            let source = self.registry.meta(&backward.source)?;
            let own = parent.column_for(&backward.to_field).unwrap_or(parent.pk_column());
            self.push_join(
                &source.table,
                &alias,
                ColumnRef::new(parent_alias, own),
                ColumnRef::new(&alias, &backward.key_column),
            );
            source
        } else if let Some(m2m) = parent.m2m_fields.get(name) {
            let target = self.related_meta(m2m.target.as_ref(), name)?;
            let through_alias = format!("{alias}__through");
            self.push_join(
                m2m.through_table(),
                &through_alias,
                ColumnRef::new(parent_alias, parent.pk_column()),
                ColumnRef::new(&through_alias, m2m.backward_column()),
            );
            self.push_join(
                &target.table,
                &alias,
                ColumnRef::new(&through_alias, m2m.forward_column()),
                ColumnRef::new(&alias, target.pk_column()),
            );
            target
        } else {
            return Ok(None);
        };

        self.joined.insert(path_key, (alias.clone(), Arc::clone(&target)));
        Ok(Some((alias, target)))
    }

    fn push_join(&mut self, table: &str, alias: &str, lhs: ColumnRef, rhs: ColumnRef) {
        self.joins.push(Join {
            table: table.to_string(),
            alias: alias.to_string(),
            join_type: JoinType::Left,
            on: WhereNode::ColumnEquals(lhs, rhs),
        });
    }

    fn related_meta(
        &self,
        target: Option<&crate::model::ModelKey>,
        name: &str,
    ) -> TerrapinResult<Arc<ModelMeta>> {
        let key = target.ok_or_else(|| {
            TerrapinError::configuration(format!("Relation '{name}' is not resolved"))
        })?;
        self.registry.meta(key)
    }

    /// Resolves a field path (or annotation name) to an expression.
    ///
    /// A path ending on a foreign key name yields its key column; a path
    /// ending on any other relation yields the related primary key.
    pub(crate) fn resolve_field(&mut self, path: &str) -> TerrapinResult<Expression> {
        if let Some(expr) = self.annotations.get(path) {
            return Ok(expr.clone());
        }
        let parts: Vec<&str> = path.split("__").collect();
        let mut alias = self.root_alias();
        let mut meta = Arc::clone(&self.root);
        for (i, part) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            if last {
                if let Some(col) = meta.column_for(part) {
                    return Ok(column(&alias, col));
                }
            }
            match self.join(&alias, &meta, &parts[..=i])? {
                Some((next_alias, next_meta)) => {
                    if last {
                        return Ok(column(&next_alias, next_meta.pk_column()));
                    }
                    alias = next_alias;
                    meta = next_meta;
                }
                None => break,
            }
        }
        Err(TerrapinError::ParamsError(format!(
            "Unknown field '{path}' for model {}",
            self.root.name()
        )))
    }

    fn filter_value(
        &self,
        meta: &ModelMeta,
        info: &FilterInfo,
        key: &str,
        arg: &FilterArg,
    ) -> TerrapinResult<Value> {
        let value = match arg {
            FilterArg::Value(value) => value.clone(),
            FilterArg::Instance(instance) => {
                let field = info.instance_field.as_deref().ok_or_else(|| {
                    TerrapinError::ParamsError(format!("Filter '{key}' does not accept a model instance"))
                })?;
                instance.values.get(field).cloned().ok_or_else(|| {
                    TerrapinError::ParamsError(format!(
                        "Instance of {} has no field '{field}'",
                        instance.model
                    ))
                })?
            }
        };
        if info.lookup.is_pattern() || info.lookup.is_null_check() || value.is_null() {
            return Ok(value);
        }
        match info.field.as_deref().and_then(|f| meta.field(f)) {
            Some(field) => convert_value(field, self.backend, value),
            None => Ok(value),
        }
    }

    fn allowed_filters(&self) -> String {
        let names: Vec<&str> = self
            .root
            .fields
            .keys()
            .map(String::as_str)
            .chain(self.root.fetch_fields())
            .chain(self.annotations.keys().map(String::as_str))
            .collect();
        format!("[{}]", names.join(", "))
    }

    fn resolve_filter(&mut self, key: &str, arg: &FilterArg) -> TerrapinResult<Clauses> {
        let parts: Vec<&str> = key.split("__").collect();
        let mut alias = self.root_alias();
        let mut meta = Arc::clone(&self.root);
        for i in 0..parts.len() {
            let rest = parts[i..].join("__");
            if let Some(info) = meta.filter(&rest).cloned() {
                let value = self.filter_value(&meta, &info, key, arg)?;
                return Ok(Clauses {
                    where_parts: vec![info.predicate(&alias, value)?],
                    having_parts: Vec::new(),
                });
            }
            if i + 1 == parts.len() {
                break;
            }
            match self.join(&alias, &meta, &parts[..=i])? {
                Some((next_alias, next_meta)) => {
                    alias = next_alias;
                    meta = next_meta;
                }
                None => break,
            }
        }

        let (name, lookup) = LookupKind::split(key);
        if let Some(expr) = self.annotations.get(name).cloned() {
            let FilterArg::Value(value) = arg else {
                return Err(TerrapinError::ParamsError(format!(
                    "Filter '{key}' does not accept a model instance"
                )));
            };
            let node = build_predicate(lookup, expr.clone(), value.clone())?;
            let mut clauses = Clauses::default();
            if expr.is_aggregate() {
                clauses.having_parts.push(node);
            } else {
                clauses.where_parts.push(node);
            }
            return Ok(clauses);
        }

        Err(TerrapinError::ParamsError(format!(
            "Unknown filter param '{key}'. Allowed base values are {}",
            self.allowed_filters()
        )))
    }

    fn compile_q(&mut self, q: &Q) -> TerrapinResult<Clauses> {
        match q {
            Q::Filter { key, value } => self.resolve_filter(key, value),
            Q::And(children) => {
                let mut clauses = Clauses::default();
                for child in children {
                    clauses.extend(self.compile_q(child)?);
                }
                Ok(clauses)
            }
            Q::Or(children) => {
                let compiled = children
                    .iter()
                    .map(|child| self.compile_q(child))
                    .collect::<TerrapinResult<Vec<_>>>()?;
                let (where_only, having_only) = split_kinds(&compiled)?;
                let mut clauses = Clauses::default();
                if where_only {
                    clauses.where_parts.push(WhereNode::Or(
                        compiled.into_iter().map(|c| and_all(c.where_parts)).collect(),
                    ));
                } else if having_only {
                    clauses.having_parts.push(WhereNode::Or(
                        compiled.into_iter().map(|c| and_all(c.having_parts)).collect(),
                    ));
                }
                Ok(clauses)
            }
            Q::Not(inner) => {
                let compiled = self.compile_q(inner)?;
                let mut clauses = Clauses::default();
                if compiled.having_parts.is_empty() {
                    clauses
                        .where_parts
                        .push(WhereNode::Not(Box::new(and_all(compiled.where_parts))));
                } else if compiled.where_parts.is_empty() {
                    clauses
                        .having_parts
                        .push(WhereNode::Not(Box::new(and_all(compiled.having_parts))));
                } else {
                    return Err(mixed_error());
                }
                Ok(clauses)
            }
        }
    }
}

fn mixed_error() -> TerrapinError {
    TerrapinError::ParamsError(
        "Can't mix filters on aggregated annotations with other filters inside OR or NOT".to_string(),
    )
}

/// Whether every branch is WHERE-only, or every branch HAVING-only.
fn split_kinds(compiled: &[Clauses]) -> TerrapinResult<(bool, bool)> {
    let where_only = compiled.iter().all(|c| c.having_parts.is_empty());
    let having_only = compiled.iter().all(|c| c.where_parts.is_empty());
    if !where_only && !having_only {
        return Err(mixed_error());
    }
    Ok((where_only, having_only))
}

/// Builds the SELECT for a queryset.
pub(crate) fn build_select(
    qs: &QuerySet,
    backend: DatabaseBackendType,
    projection: Projection<'_>,
) -> TerrapinResult<Query> {
    let meta = Arc::clone(&qs.meta);
    let root = meta.table.clone();
    let mut builder = QueryBuilder::new(&qs.registry, Arc::clone(&meta), backend);

    for (name, expr) in &qs.annotations {
        builder.annotate(name, expr)?;
    }

    let mut clauses = Clauses::default();
    for q in &qs.filters {
        clauses.extend(builder.compile_q(q)?);
    }
    clauses.where_parts.extend(qs.conditions.iter().cloned());

    let select: Vec<SelectColumn> = match projection {
        Projection::Instances => meta
            .fields
            .values()
            .map(|f| SelectColumn::column(root.clone(), f.column_name()))
            .chain(builder.annotation_columns())
            .collect(),
        Projection::Values([]) => meta
            .fields
            .values()
            .map(|f| SelectColumn::aliased(column(&root, f.column_name()), f.name.clone()))
            .chain(builder.annotation_columns())
            .collect(),
        Projection::Values(paths) => {
            let mut select = Vec::with_capacity(paths.len());
            for path in paths {
                select.push(SelectColumn::aliased(builder.resolve_field(path)?, path.clone()));
            }
            select
        }
    };

    let has_aggregate =
        select.iter().any(|c| c.expr.is_aggregate()) || !clauses.having_parts.is_empty();
    let mut group_by = Vec::new();
    for path in &qs.group_by {
        let expr = builder.resolve_field(path)?;
        if !group_by.contains(&expr) {
            group_by.push(expr);
        }
    }
    if has_aggregate {
        for col in &select {
            if !col.expr.is_aggregate() && !group_by.contains(&col.expr) {
                group_by.push(col.expr.clone());
            }
        }
    }

    let ordering = if qs.order_by.is_empty() && !has_aggregate {
        meta.ordering.clone()
    } else {
        qs.order_by.clone()
    };
    let mut order_by = Vec::with_capacity(ordering.len());
    for item in &ordering {
        let (descending, path) = match item.strip_prefix('-') {
            Some(path) => (true, path),
            None => (false, item.as_str()),
        };
        order_by.push(OrderBy {
            expr: builder.resolve_field(path)?,
            descending,
        });
    }

    let mut query = Query::new(root);
    query.select = select;
    query.joins = builder.joins;
    query.where_clause = conjunction(clauses.where_parts);
    query.having = conjunction(clauses.having_parts);
    query.group_by = group_by;
    query.order_by = order_by;
    query.limit = qs.limit;
    query.offset = qs.offset;
    query.distinct = qs.distinct;
    Ok(query)
}

/// The condition selecting the rows of `qs` in an UPDATE or DELETE.
///
/// Joined, sliced or grouped querysets are narrowed with
/// `pk IN (SELECT pk ...)`, since neither statement can carry joins or a
/// LIMIT portably.
fn row_condition(qs: &QuerySet, backend: DatabaseBackendType) -> TerrapinResult<WhereNode> {
    let meta = &qs.meta;
    let mut query = build_select(qs, backend, Projection::Instances)?;
    let simple = query.joins.is_empty()
        && query.limit.is_none()
        && query.offset.is_none()
        && query.having.is_none()
        && query.group_by.is_empty();
    if simple {
        return Ok(query.where_clause.unwrap_or_else(|| WhereNode::And(Vec::new())));
    }
    let pk = column(&meta.table, meta.pk_column());
    query.select = vec![SelectColumn {
        expr: pk.clone(),
        alias: None,
    }];
    if query.limit.is_none() {
        query.order_by.clear();
    }
    query.distinct = false;
    Ok(WhereNode::InSubquery {
        lhs: pk,
        query: Box::new(query),
        negated: false,
    })
}

/// Builds the assignments and row condition of a queryset UPDATE.
///
/// Values are converted for their field; `F()` paths become bare columns of
/// the updated table.
pub(crate) fn build_update(
    qs: &QuerySet,
    backend: DatabaseBackendType,
    values: &[(&str, Expression)],
) -> TerrapinResult<(Vec<(String, Expression)>, WhereNode)> {
    let meta = &qs.meta;
    if values.is_empty() {
        return Err(TerrapinError::ParamsError("update() needs at least one value".to_string()));
    }
    let mut assignments = Vec::with_capacity(values.len());
    for (name, expr) in values {
        let field = meta
            .field(name)
            .or_else(|| meta.fk_fields.get(*name).and_then(|fk| meta.fields.get(&fk.key_field)))
            .ok_or_else(|| {
                TerrapinError::ParamsError(format!("Unknown field '{name}' for model {}", meta.name()))
            })?;
        if field.primary_key {
            return Err(TerrapinError::ParamsError(format!(
                "Field '{name}' is the primary key and can't be updated"
            )));
        }
        let expr = match expr {
            Expression::Value(value) if value.is_null() => Expression::Value(Value::Null),
            Expression::Value(value) => Expression::Value(convert_value(field, backend, value.clone())?),
            other => other.try_map_fields(&mut |path| {
                meta.column_for(path)
                    .map(|c| Expression::Field(c.to_string()))
                    .ok_or_else(|| {
                        TerrapinError::ParamsError(format!(
                            "Unknown field '{path}' for model {}",
                            meta.name()
                        ))
                    })
            })?,
        };
        assignments.push((field.column_name().to_string(), expr));
    }
    Ok((assignments, row_condition(qs, backend)?))
}

/// Builds the row condition of a queryset DELETE.
pub(crate) fn build_delete(qs: &QuerySet, backend: DatabaseBackendType) -> TerrapinResult<WhereNode> {
    row_condition(qs, backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compiler::SqlCompiler;
    use crate::query::expressions::{Count, F};
    use crate::testing::tournament_registry;

    fn sql(qs: &QuerySet) -> (String, Vec<Value>) {
        let query = build_select(qs, DatabaseBackendType::SQLite, Projection::Instances).unwrap();
        SqlCompiler::new(DatabaseBackendType::SQLite).compile_select(&query)
    }

    fn values_sql(qs: &QuerySet, paths: &[&str]) -> (String, Vec<Value>) {
        let paths: Vec<String> = paths.iter().map(ToString::to_string).collect();
        let query = build_select(qs, DatabaseBackendType::SQLite, Projection::Values(&paths)).unwrap();
        SqlCompiler::new(DatabaseBackendType::SQLite).compile_select(&query)
    }

    fn events() -> QuerySet {
        tournament_registry().manager("models.Event").unwrap().all()
    }

    #[test]
    fn test_default_ordering_applies() {
        let registry = tournament_registry();
        let (sql, _) = sql(&registry.manager("models.Tournament").unwrap().all());
        assert_eq!(
            sql,
            "SELECT \"tournament\".\"id\",\"tournament\".\"name\",\"tournament\".\"desc\",\
             \"tournament\".\"created\" FROM \"tournament\" ORDER BY \"tournament\".\"name\" ASC"
        );
    }

    #[test]
    fn test_fk_name_filters_key_column() {
        let (sql, params) = sql(&events().filter(Q::new("tournament", 3)));
        assert!(sql.ends_with("FROM \"event\" WHERE \"event\".\"tournament_id\"=?"));
        assert_eq!(params, vec![Value::Int(3)]);
    }

    #[test]
    fn test_related_path_joins_once() {
        let qs = events()
            .filter(Q::new("tournament__name", "Cup"))
            .filter(Q::new("tournament__desc__isnull", false));
        let (sql, params) = sql(&qs);
        assert_eq!(sql.matches("LEFT JOIN").count(), 1);
        assert!(sql.contains(
            "LEFT JOIN \"tournament\" \"event__tournament\" ON \
             \"event\".\"tournament_id\"=\"event__tournament\".\"id\""
        ));
        assert!(sql.contains("\"event__tournament\".\"name\"=?"));
        assert!(sql.contains("\"event__tournament\".\"desc\" IS NOT NULL"));
        assert_eq!(params, vec![Value::from("Cup")]);
    }

    #[test]
    fn test_backward_and_m2m_paths() {
        let registry = tournament_registry();
        let qs = registry
            .manager("models.Tournament")
            .unwrap()
            .filter(Q::new("events__participants__name", "Blue"));
        let (sql, _) = sql(&qs);
        assert!(sql.contains(
            "LEFT JOIN \"event\" \"tournament__events\" ON \
             \"tournament\".\"id\"=\"tournament__events\".\"tournament_id\""
        ));
        assert!(sql.contains(
            "LEFT JOIN \"event_team\" \"tournament__events__participants__through\" ON \
             \"tournament__events\".\"id\"=\"tournament__events__participants__through\".\"event_id\""
        ));
        assert!(sql.contains("\"tournament__events__participants\".\"name\"=?"));
    }

    #[test]
    fn test_unknown_filter_lists_allowed_names() {
        let query = build_select(
            &events().filter(Q::new("nope", 1)),
            DatabaseBackendType::SQLite,
            Projection::Instances,
        );
        let err = query.unwrap_err().to_string();
        assert!(err.contains("Unknown filter param 'nope'"));
        assert!(err.contains("tournament_id"));
        assert!(err.contains("participants"));
    }

    #[test]
    fn test_values_convert_for_the_field() {
        let (_, params) = sql(&events().filter(Q::new("prize__gte", 10)));
        assert_eq!(params, vec![Value::from("10.00")]);
        let (_, params) = sql(&events().filter(Q::new("prize__in", vec![Value::Int(1), Value::Int(2)])));
        assert_eq!(params, vec![Value::from("1.00"), Value::from("2.00")]);
    }

    #[test]
    fn test_aggregate_filter_goes_to_having() {
        let registry = tournament_registry();
        let qs = registry
            .manager("models.Book")
            .unwrap()
            .all()
            .annotate("count", Count("id"))
            .group_by(&["author_id"])
            .filter(Q::new("count__gt", 6));
        let (sql, params) = values_sql(&qs, &["author_id", "count"]);
        assert_eq!(
            sql,
            "SELECT \"book\".\"author_id\" \"author_id\",COUNT(\"book\".\"id\") \"count\" \
             FROM \"book\" GROUP BY \"book\".\"author_id\" HAVING COUNT(\"book\".\"id\")>?"
        );
        assert_eq!(params, vec![Value::Int(6)]);
    }

    #[test]
    fn test_or_cannot_mix_where_and_having() {
        let registry = tournament_registry();
        let qs = registry
            .manager("models.Book")
            .unwrap()
            .all()
            .annotate("count", Count("id"))
            .filter(Q::new("count__gt", 1) | Q::new("name", "x"));
        let err = build_select(&qs, DatabaseBackendType::SQLite, Projection::Instances).unwrap_err();
        assert!(matches!(err, TerrapinError::ParamsError(_)));
    }

    #[test]
    fn test_annotation_over_relation_groups_by_fields() {
        let registry = tournament_registry();
        let qs = registry
            .manager("models.Tournament")
            .unwrap()
            .all()
            .annotate("events_count", Count("events"))
            .order_by(&["-events_count"]);
        let (sql, _) = sql(&qs);
        assert!(sql.contains("COUNT(\"tournament__events\".\"id\") \"events_count\""));
        assert!(sql.contains("GROUP BY \"tournament\".\"id\",\"tournament\".\"name\""));
        assert!(sql.ends_with("ORDER BY COUNT(\"tournament__events\".\"id\") DESC"));
    }

    #[test]
    fn test_update_with_f_expression() {
        let registry = tournament_registry();
        let qs = registry.manager("models.Team").unwrap().filter(Q::new("name", "Blue"));
        let (assignments, condition) = build_update(
            &qs,
            DatabaseBackendType::SQLite,
            &[("rating", F("rating") + Expression::value(1))],
        )
        .unwrap();
        let (sql, params) =
            SqlCompiler::new(DatabaseBackendType::SQLite).compile_update("team", &assignments, &condition);
        assert_eq!(sql, "UPDATE \"team\" SET \"rating\"=(\"rating\"+?) WHERE \"team\".\"name\"=?");
        assert_eq!(params, vec![Value::Int(1), Value::from("Blue")]);
    }

    #[test]
    fn test_joined_delete_uses_pk_subquery() {
        let qs = events().filter(Q::new("tournament__name", "Cup"));
        let condition = build_delete(&qs, DatabaseBackendType::SQLite).unwrap();
        let (sql, _) = SqlCompiler::new(DatabaseBackendType::SQLite).compile_delete("event", &condition);
        assert!(sql.starts_with("DELETE FROM \"event\" WHERE \"event\".\"id\" IN (SELECT \"event\".\"id\" FROM \"event\" LEFT JOIN"));
    }
}

//! QuerySet and Manager for building and executing database queries.
//!
//! A [`QuerySet`] is a lazy description of a query: filters, annotations,
//! grouping, ordering, slicing and prefetches. Nothing touches the database
//! until a terminal method (`all`, `first`, `get`, `count`, `exists`,
//! `values`, `values_list`, `update`, `delete`) is awaited. Every builder
//! method consumes the queryset and returns the extended copy, so a
//! queryset can be cloned and forked freely.
//!
//! The [`Manager`] is the per-model entry point handing out querysets.
//!
//! # Examples
//!
//! ```ignore
//! let events = registry.manager("models.Event")?;
//! let cup = events
//!     .filter(Q::new("tournament__name", "Cup"))
//!     .order_by(&["-name"])
//!     .limit(10)
//!     .all(&db)
//!     .await?;
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use terrapin_core::{TerrapinError, TerrapinResult};

use super::builder::{self, Projection};
use super::compiler::{ColumnRef, Query, Row, SelectColumn, SqlCompiler, WhereNode};
use super::expressions::Expression;
use super::lookups::Q;
use super::prefetch::{prefetch_instances, Prefetch};
use crate::dialect::DatabaseBackendType;
use crate::executor::DbClient;
use crate::fields::FieldDef;
use crate::instance::Instance;
use crate::model::ModelMeta;
use crate::registry::Registry;
use crate::value::Value;

/// A lazy, composable database query over one model.
#[derive(Clone)]
pub struct QuerySet {
    pub(crate) registry: Arc<Registry>,
    pub(crate) meta: Arc<ModelMeta>,
    pub(crate) filters: Vec<Q>,
    /// Pre-resolved conditions added by relation managers.
    pub(crate) conditions: Vec<WhereNode>,
    pub(crate) annotations: IndexMap<String, Expression>,
    pub(crate) group_by: Vec<String>,
    pub(crate) order_by: Vec<String>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: Option<usize>,
    pub(crate) distinct: bool,
    pub(crate) prefetch: Vec<Prefetch>,
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.meta.key)
            .field("filters", &self.filters)
            .field("annotations", &self.annotations)
            .field("group_by", &self.group_by)
            .field("order_by", &self.order_by)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("distinct", &self.distinct)
            .field("prefetch", &self.prefetch)
            .finish_non_exhaustive()
    }
}

impl QuerySet {
    /// Creates a queryset matching every row of the model.
    pub fn new(registry: Arc<Registry>, meta: Arc<ModelMeta>) -> Self {
        Self {
            registry,
            meta,
            filters: Vec::new(),
            conditions: Vec::new(),
            annotations: IndexMap::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            prefetch: Vec::new(),
        }
    }

    /// The queried model.
    pub fn model(&self) -> &ModelMeta {
        &self.meta
    }

    /// Adds a filter. Filters are combined with AND.
    #[must_use]
    pub fn filter(mut self, q: Q) -> Self {
        if !q.is_empty() {
            self.filters.push(q);
        }
        self
    }

    /// Adds a negated filter.
    #[must_use]
    pub fn exclude(mut self, q: Q) -> Self {
        if !q.is_empty() {
            self.filters.push(!q);
        }
        self
    }

    #[must_use]
    pub(crate) fn with_condition(mut self, condition: WhereNode) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds a computed column under `name`. Annotations can be filtered and
    /// ordered on by name; filters on aggregates become HAVING conditions.
    #[must_use]
    pub fn annotate(mut self, name: impl Into<String>, expr: Expression) -> Self {
        self.annotations.insert(name.into(), expr);
        self
    }

    /// Sets the GROUP BY fields.
    #[must_use]
    pub fn group_by(mut self, fields: &[&str]) -> Self {
        self.group_by = fields.iter().map(ToString::to_string).collect();
        self
    }

    /// Sets the ordering. A leading `-` sorts descending. Replaces the
    /// model's default ordering.
    #[must_use]
    pub fn order_by(mut self, fields: &[&str]) -> Self {
        self.order_by = fields.iter().map(ToString::to_string).collect();
        self
    }

    /// Limits the number of rows.
    #[must_use]
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skips the first `n` rows.
    #[must_use]
    pub const fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    /// Removes duplicate rows.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Prefetches relation paths (`events`, `events__participants`) for
    /// every fetched instance.
    #[must_use]
    pub fn prefetch_related(mut self, paths: &[&str]) -> Self {
        self.prefetch.extend(paths.iter().map(|p| Prefetch::path(*p)));
        self
    }

    /// Prefetches a relation path with a custom queryset.
    #[must_use]
    pub fn prefetch(mut self, prefetch: Prefetch) -> Self {
        self.prefetch.push(prefetch);
        self
    }

    // ── SQL generation ────────────────────────────────────────────────

    pub(crate) fn build(&self, backend: DatabaseBackendType) -> TerrapinResult<Query> {
        builder::build_select(self, backend, Projection::Instances)
    }

    /// Renders the SELECT this queryset would run.
    pub fn to_sql(&self, backend: DatabaseBackendType) -> TerrapinResult<(String, Vec<Value>)> {
        let query = self.build(backend)?;
        Ok(SqlCompiler::new(backend).compile_select(&query))
    }

    async fn fetch_rows(&self, db: &dyn DbClient, query: &Query) -> TerrapinResult<Vec<Row>> {
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_select(query);
        tracing::debug!(model = %self.meta.key, sql = %sql, "running query");
        db.execute_query(&sql, &params).await
    }

    async fn fetch_instances(&self, db: &dyn DbClient, query: &Query) -> TerrapinResult<Vec<Instance>> {
        let rows = self.fetch_rows(db, query).await?;
        let mut instances = rows
            .into_iter()
            .map(|row| Instance::from_row(Arc::clone(&self.registry), Arc::clone(&self.meta), row))
            .collect::<TerrapinResult<Vec<_>>>()?;
        if !self.prefetch.is_empty() && !instances.is_empty() {
            prefetch_instances(db, &mut instances, &self.prefetch).await?;
        }
        Ok(instances)
    }

    // ── Terminal operations ──────────────────────────────────────────

    /// Fetches every matching instance.
    pub async fn all(&self, db: &dyn DbClient) -> TerrapinResult<Vec<Instance>> {
        let query = self.build(db.backend_type())?;
        self.fetch_instances(db, &query).await
    }

    /// Fetches the first matching instance, if any.
    pub async fn first(&self, db: &dyn DbClient) -> TerrapinResult<Option<Instance>> {
        let mut query = self.build(db.backend_type())?;
        query.limit = Some(1);
        Ok(self.fetch_instances(db, &query).await?.into_iter().next())
    }

    /// Fetches exactly one instance.
    ///
    /// Fails with `DoesNotExist` when nothing matches and with
    /// `MultipleObjectsReturned` when more than one row does.
    pub async fn get(&self, db: &dyn DbClient) -> TerrapinResult<Instance> {
        let mut query = self.build(db.backend_type())?;
        query.limit = Some(2);
        let mut instances = self.fetch_instances(db, &query).await?;
        match instances.len() {
            0 => Err(TerrapinError::DoesNotExist(format!(
                "{} matching query does not exist.",
                self.meta.name()
            ))),
            1 => Ok(instances.remove(0)),
            _ => Err(TerrapinError::MultipleObjectsReturned(format!(
                "get() returned more than one {}",
                self.meta.name()
            ))),
        }
    }

    /// Counts the matching rows.
    pub async fn count(&self, db: &dyn DbClient) -> TerrapinResult<u64> {
        let query = self.build(db.backend_type())?;
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_count(&query);
        tracing::debug!(model = %self.meta.key, sql = %sql, "running count");
        let rows = db.execute_query(&sql, &params).await?;
        let count = rows
            .into_iter()
            .next()
            .and_then(|row| row.into_pairs().next())
            .and_then(|(_, value)| value.as_int())
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Whether any row matches.
    pub async fn exists(&self, db: &dyn DbClient) -> TerrapinResult<bool> {
        let mut query = self.build(db.backend_type())?;
        query.select = vec![SelectColumn {
            expr: Expression::Column(ColumnRef::new(self.meta.table.clone(), self.meta.pk_column())),
            alias: None,
        }];
        query.order_by.clear();
        query.limit = Some(1);
        Ok(!self.fetch_rows(db, &query).await?.is_empty())
    }

    /// Fetches the given paths (relation paths and annotation names
    /// included) as maps keyed by path. No paths means every field plus
    /// the annotations.
    pub async fn values(
        &self,
        db: &dyn DbClient,
        fields: &[&str],
    ) -> TerrapinResult<Vec<IndexMap<String, Value>>> {
        let paths: Vec<String> = fields.iter().map(ToString::to_string).collect();
        let query = builder::build_select(self, db.backend_type(), Projection::Values(&paths))?;
        let rows = self.fetch_rows(db, &query).await?;
        let converters: Vec<Option<FieldDef>> = query
            .select
            .iter()
            .map(|col| col.alias.as_deref().and_then(|path| self.field_for_path(path)))
            .collect();
        rows.into_iter()
            .map(|row| {
                row.into_pairs()
                    .zip(&converters)
                    .map(|((column, raw), field)| {
                        let value = match field {
                            Some(field) => field.to_python_value(raw)?,
                            None => raw,
                        };
                        Ok::<_, TerrapinError>((column, value))
                    })
                    .collect()
            })
            .collect()
    }

    /// Fetches the given paths as tuples. With `flat`, exactly one path may
    /// be given and each row is that single value.
    pub async fn values_list(
        &self,
        db: &dyn DbClient,
        fields: &[&str],
        flat: bool,
    ) -> TerrapinResult<Vec<Value>> {
        if flat && fields.len() != 1 {
            return Err(TerrapinError::ParamsError(
                "You can flat value_list only if contains one field".to_string(),
            ));
        }
        let rows = self.values(db, fields).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut values: Vec<Value> = row.into_values().collect();
                if flat {
                    values.pop().unwrap_or(Value::Null)
                } else {
                    Value::List(values)
                }
            })
            .collect())
    }

    /// Updates every matching row and returns the number of rows changed.
    ///
    /// Values are plain [`Expression::Value`]s or expressions over the
    /// row's own fields such as `F("rating") + Expression::value(1)`.
    pub async fn update(&self, db: &dyn DbClient, values: &[(&str, Expression)]) -> TerrapinResult<u64> {
        let backend = db.backend_type();
        let (assignments, condition) = builder::build_update(self, backend, values)?;
        let (sql, params) = SqlCompiler::new(backend).compile_update(&self.meta.table, &assignments, &condition);
        tracing::debug!(model = %self.meta.key, sql = %sql, "running update");
        db.execute_update(&sql, &params).await
    }

    /// Deletes every matching row and returns the number of rows removed.
    pub async fn delete(&self, db: &dyn DbClient) -> TerrapinResult<u64> {
        let backend = db.backend_type();
        let condition = builder::build_delete(self, backend)?;
        let (sql, params) = SqlCompiler::new(backend).compile_delete(&self.meta.table, &condition);
        tracing::debug!(model = %self.meta.key, sql = %sql, "running delete");
        db.execute_update(&sql, &params).await
    }

    /// The data field a values path ends on, for converting fetched values.
    fn field_for_path(&self, path: &str) -> Option<FieldDef> {
        let mut meta = Arc::clone(&self.meta);
        let mut parts = path.split("__").peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let field = meta.field(part).or_else(|| {
                    meta.fk_fields
                        .get(part)
                        .and_then(|fk| meta.fields.get(&fk.key_field))
                });
                return field.cloned();
            }
            let next = if let Some(fk) = meta.fk_fields.get(part) {
                fk.target.clone()
            } else if let Some(m2m) = meta.m2m_fields.get(part) {
                m2m.target.clone()
            } else {
                meta.backward_fields.get(part).map(|b| b.source.clone())
            };
            meta = self.registry.meta(&next?).ok()?;
        }
        None
    }
}

/// The entry point for model-level query operations.
///
/// A `Manager` holds no query state; it hands out fresh querysets and
/// builds instances.
#[derive(Clone)]
pub struct Manager {
    registry: Arc<Registry>,
    meta: Arc<ModelMeta>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager").field("model", &self.meta.key).finish()
    }
}

impl Manager {
    /// Creates the manager of a resolved model.
    pub fn new(registry: Arc<Registry>, meta: Arc<ModelMeta>) -> Self {
        Self { registry, meta }
    }

    /// The managed model.
    pub fn model(&self) -> &ModelMeta {
        &self.meta
    }

    /// A new unsaved instance with default values.
    pub fn build(&self) -> Instance {
        Instance::new(Arc::clone(&self.registry), Arc::clone(&self.meta))
    }

    /// A queryset over every row.
    pub fn all(&self) -> QuerySet {
        QuerySet::new(Arc::clone(&self.registry), Arc::clone(&self.meta))
    }

    /// A filtered queryset.
    pub fn filter(&self, q: Q) -> QuerySet {
        self.all().filter(q)
    }

    /// A queryset excluding the matching rows.
    pub fn exclude(&self, q: Q) -> QuerySet {
        self.all().exclude(q)
    }

    /// Fetches exactly one instance matching `q`.
    pub async fn get(&self, db: &dyn DbClient, q: Q) -> TerrapinResult<Instance> {
        self.filter(q).get(db).await
    }

    /// Builds, fills and saves a new instance.
    pub async fn create(&self, db: &dyn DbClient, values: &[(&str, Value)]) -> TerrapinResult<Instance> {
        let mut instance = self.build();
        for (name, value) in values {
            instance.set(name, value.clone())?;
        }
        instance.save(db).await?;
        Ok(instance)
    }

    /// Fetches the instance matching `lookup`, creating it from `lookup`
    /// plus `defaults` when there is none. The flag tells whether it was
    /// created.
    pub async fn get_or_create(
        &self,
        db: &dyn DbClient,
        lookup: &[(&str, Value)],
        defaults: &[(&str, Value)],
    ) -> TerrapinResult<(Instance, bool)> {
        let q = lookup
            .iter()
            .fold(Q::And(Vec::new()), |q, (name, value)| q & Q::new(*name, value.clone()));
        match self.filter(q.clone()).get(db).await {
            Ok(instance) => return Ok((instance, false)),
            Err(TerrapinError::DoesNotExist(_)) => {}
            Err(err) => return Err(err),
        }
        let values: Vec<(&str, Value)> = lookup.iter().chain(defaults).cloned().collect();
        match self.create(db, &values).await {
            Ok(instance) => Ok((instance, true)),
            // Someone else created it in between.
            Err(TerrapinError::IntegrityError(_)) => Ok((self.filter(q).get(db).await?, false)),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expressions::{Count, F};
    use crate::testing::{row, tournament_registry, RecordingClient};

    fn manager(name: &str) -> Manager {
        tournament_registry().manager(name).unwrap()
    }

    #[test]
    fn test_querysets_are_lazy_and_forkable() {
        let base = manager("models.Event").filter(Q::new("name__startswith", "Fin"));
        let narrow = base.clone().filter(Q::new("prize__gt", 10)).limit(5);
        let (base_sql, _) = base.to_sql(DatabaseBackendType::SQLite).unwrap();
        let (narrow_sql, params) = narrow.to_sql(DatabaseBackendType::SQLite).unwrap();
        assert!(!base_sql.contains("LIMIT"));
        assert!(narrow_sql.ends_with("LIMIT 5"));
        assert_eq!(params, vec![Value::from("Fin%"), Value::from("10.00")]);
    }

    #[test]
    fn test_exclude_negates() {
        let (sql, _) = manager("models.Team")
            .exclude(Q::new("name", "Blue"))
            .to_sql(DatabaseBackendType::PostgreSQL)
            .unwrap();
        assert!(sql.ends_with("WHERE NOT (\"team\".\"name\"=$1)"));
    }

    #[test]
    fn test_order_by_overrides_default() {
        let (sql, _) = manager("models.Tournament")
            .all()
            .order_by(&["-created", "name"])
            .to_sql(DatabaseBackendType::SQLite)
            .unwrap();
        assert!(sql.ends_with("ORDER BY \"tournament\".\"created\" DESC,\"tournament\".\"name\" ASC"));
    }

    #[tokio::test]
    async fn test_get_errors() {
        let db = RecordingClient::sqlite();
        let teams = manager("models.Team");
        let err = teams.get(&db, Q::new("name", "Blue")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Does not exist: Team matching query does not exist."
        );

        let team = |id: i64| row(&[("id", Value::Int(id)), ("name", Value::from("x")), ("rating", Value::Int(0))]);
        db.push_rows(vec![team(1), team(2)]);
        let err = teams.get(&db, Q::new("rating", 0)).await.unwrap_err();
        assert!(matches!(err, TerrapinError::MultipleObjectsReturned(_)));
        let (sql, _) = db.statements().pop().unwrap();
        assert!(sql.ends_with("LIMIT 2"));
    }

    #[tokio::test]
    async fn test_count_and_exists() {
        let db = RecordingClient::sqlite();
        let teams = manager("models.Team").filter(Q::new("rating__gte", 3));
        db.push_rows(vec![row(&[("COUNT(*)", Value::Int(4))])]);
        assert_eq!(teams.count(&db).await.unwrap(), 4);
        assert!(!teams.exists(&db).await.unwrap());

        let statements = db.statements();
        assert_eq!(
            statements[0].0,
            "SELECT COUNT(*) FROM \"team\" WHERE \"team\".\"rating\">=?"
        );
        assert_eq!(
            statements[1].0,
            "SELECT \"team\".\"id\" FROM \"team\" WHERE \"team\".\"rating\">=? LIMIT 1"
        );
    }

    #[tokio::test]
    async fn test_values_and_values_list() {
        let db = RecordingClient::sqlite();
        let events = manager("models.Event");
        db.push_rows(vec![row(&[
            ("name", Value::from("Final")),
            ("tournament__name", Value::from("Cup")),
        ])]);
        let values = events
            .all()
            .values(&db, &["name", "tournament__name"])
            .await
            .unwrap();
        assert_eq!(values[0]["tournament__name"], Value::from("Cup"));
        let (sql, _) = db.statements().pop().unwrap();
        assert!(sql.starts_with(
            "SELECT \"event\".\"name\" \"name\",\"event__tournament\".\"name\" \"tournament__name\""
        ));

        db.push_rows(vec![row(&[("id", Value::Int(1))])]);
        let ids = events.all().values_list(&db, &["id"], true).await.unwrap();
        assert_eq!(ids, vec![Value::Int(1)]);

        let err = events.all().values_list(&db, &["id", "name"], true).await.unwrap_err();
        assert!(matches!(err, TerrapinError::ParamsError(_)));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = RecordingClient::sqlite();
        let teams = manager("models.Team").filter(Q::new("name__in", vec![Value::from("A"), Value::from("B")]));
        teams
            .update(&db, &[("rating", F("rating") * Expression::value(2))])
            .await
            .unwrap();
        teams.delete(&db).await.unwrap();
        let statements = db.statements();
        assert_eq!(
            statements[0].0,
            "UPDATE \"team\" SET \"rating\"=(\"rating\"*?) WHERE \"team\".\"name\" IN (?,?)"
        );
        assert_eq!(statements[1].0, "DELETE FROM \"team\" WHERE \"team\".\"name\" IN (?,?)");

        let err = teams.update(&db, &[("id", Expression::value(3))]).await.unwrap_err();
        assert!(matches!(err, TerrapinError::ParamsError(_)));
    }

    #[tokio::test]
    async fn test_create_and_get_or_create() {
        let db = RecordingClient::sqlite();
        let teams = manager("models.Team");
        let team = teams.create(&db, &[("name", Value::from("Blue"))]).await.unwrap();
        assert!(team.is_saved());
        assert_eq!(team.pk(), Value::Int(1));

        db.push_rows(vec![row(&[("id", Value::Int(1)), ("name", Value::from("Blue")), ("rating", Value::Int(0))])]);
        let (found, created) = teams
            .get_or_create(&db, &[("name", Value::from("Blue"))], &[("rating", Value::Int(5))])
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(found, team);

        let (fresh, created) = teams
            .get_or_create(&db, &[("name", Value::from("Red"))], &[("rating", Value::Int(5))])
            .await
            .unwrap();
        assert!(created);
        assert_eq!(fresh.get("rating").unwrap(), &Value::Int(5));
    }

    #[test]
    fn test_annotated_ordering_on_alias() {
        let (sql, _) = manager("models.Author")
            .all()
            .annotate("books_count", Count("books"))
            .filter(Q::new("books_count__gte", 2))
            .order_by(&["books_count"])
            .to_sql(DatabaseBackendType::MySQL)
            .unwrap();
        assert!(sql.contains("LEFT JOIN `book` `author__books`"));
        assert!(sql.contains("HAVING COUNT(`author__books`.`id`)>=?"));
        assert!(sql.ends_with("ORDER BY COUNT(`author__books`.`id`) ASC"));
    }
}

//! The database client boundary and instance persistence.
//!
//! [`DbClient`] is the only thing the ORM core needs from a database: run a
//! query, run an insert and hand back the generated key, run an update and
//! run a script. Backends in `terrapin-db-backends` implement it; the query
//! layer, the schema generator and the persistence functions here only ever
//! see `&dyn DbClient`.
//!
//! The free functions [`save_instance`], [`delete_instance`] and
//! [`refresh_instance`] implement `Instance::save`, `Instance::delete` and
//! `Instance::refresh_from_db`.

use std::sync::Arc;

use chrono::Utc;
use terrapin_core::{TerrapinError, TerrapinResult};

use crate::dialect::DatabaseBackendType;
use crate::fields::FieldType;
use crate::instance::Instance;
use crate::model::ModelMeta;
use crate::query::compiler::{ColumnRef, CompareOp, Query, Row, SelectColumn, SqlCompiler, WhereNode};
use crate::query::expressions::Expression;
use crate::schema::types;
use crate::value::Value;

/// Minimal async database client.
///
/// This is the bridge between the ORM layer (`terrapin-db`) and the concrete
/// database backends (`terrapin-db-backends`). It lives in the ORM crate so
/// that execution can be expressed without a dependency cycle.
#[async_trait::async_trait]
pub trait DbClient: Send + Sync {
    /// The dialect, used to compile SQL and pick type overrides.
    fn backend_type(&self) -> DatabaseBackendType;

    /// The connection alias this client serves.
    fn alias(&self) -> &str;

    /// Runs a query and returns every row.
    async fn execute_query(&self, sql: &str, params: &[Value]) -> TerrapinResult<Vec<Row>>;

    /// Runs an INSERT and returns the generated key, or `Value::Null` when
    /// the table has none.
    async fn execute_insert(&self, sql: &str, params: &[Value]) -> TerrapinResult<Value>;

    /// Runs a statement that returns no rows (UPDATE, DELETE, or an INSERT
    /// without a generated key) and returns the number of affected rows.
    async fn execute_update(&self, sql: &str, params: &[Value]) -> TerrapinResult<u64>;

    /// Runs several `;`-separated statements without parameters.
    async fn execute_script(&self, sql: &str) -> TerrapinResult<()>;

    /// Releases the underlying connection.
    async fn close(&self) -> TerrapinResult<()> {
        Ok(())
    }
}

/// The canonical value of `field_name` prepared for binding.
pub(crate) fn bind_value(
    meta: &ModelMeta,
    field_name: &str,
    backend: DatabaseBackendType,
    value: &Value,
) -> TerrapinResult<Value> {
    let field = meta.field(field_name).ok_or_else(|| {
        TerrapinError::operational(format!("{} has no field '{field_name}'", meta.name()))
    })?;
    let value = field.to_db_value(value)?;
    Ok(types::db_value(&field.field_type, backend, value))
}

/// `pk = value` against the bare (unaliased) table.
fn pk_condition(meta: &ModelMeta, backend: DatabaseBackendType, pk: &Value) -> TerrapinResult<WhereNode> {
    Ok(WhereNode::Compare {
        lhs: Expression::Field(meta.pk_column().to_string()),
        op: CompareOp::Eq,
        rhs: bind_value(meta, &meta.pk_attr, backend, pk)?,
    })
}

/// Inserts or updates an instance.
///
/// An instance that has not been saved yet is INSERTed, and a generated
/// primary key is read back from the client. A saved instance gets an
/// UPDATE of every non-pk column. Missing values fall back to field
/// defaults; `auto_now` columns are stamped on every save and
/// `auto_now_add` columns on insert.
pub async fn save_instance(instance: &mut Instance, db: &dyn DbClient) -> TerrapinResult<()> {
    let meta = Arc::clone(&instance.meta);
    let backend = db.backend_type();
    let compiler = SqlCompiler::new(backend);
    let inserting = !instance.saved_in_db;
    let now = Value::DateTimeTz(Utc::now());
    let pk = meta.pk()?;

    let mut columns: Vec<(String, Value)> = Vec::new();
    for field in meta.fields.values() {
        if let FieldType::DateTime {
            auto_now,
            auto_now_add,
        } = field.field_type
        {
            if auto_now || (auto_now_add && inserting) {
                instance.values.insert(field.name.clone(), now.clone());
            }
        }

        let mut value = instance.values.get(&field.name).cloned().unwrap_or(Value::Null);
        if value.is_null() {
            if let Some(default) = &field.default {
                value = default.produce();
                instance.values.insert(field.name.clone(), value.clone());
            }
        }
        if field.primary_key && (!inserting || (field.generated && value.is_null())) {
            continue;
        }
        let value = field.to_db_value(&value)?;
        columns.push((
            field.column_name().to_string(),
            types::db_value(&field.field_type, backend, value),
        ));
    }

    if inserting {
        let (sql, params) = compiler.compile_insert(&meta.table, &columns, Some(pk.column_name()));
        let generated = db.execute_insert(&sql, &params).await?;
        if instance.pk().is_null() && !generated.is_null() {
            let generated = pk.to_python_value(generated)?;
            instance.values.insert(pk.name.clone(), generated);
        }
        instance.saved_in_db = true;
        tracing::debug!(model = %meta.key, pk = %instance.pk(), "inserted instance");
    } else {
        if columns.is_empty() {
            return Ok(());
        }
        let condition = pk_condition(&meta, backend, &instance.pk())?;
        let assignments: Vec<(String, Expression)> = columns
            .into_iter()
            .map(|(column, value)| (column, Expression::Value(value)))
            .collect();
        let (sql, params) = compiler.compile_update(&meta.table, &assignments, &condition);
        db.execute_update(&sql, &params).await?;
        tracing::debug!(model = %meta.key, pk = %instance.pk(), "updated instance");
    }
    Ok(())
}

/// Deletes the row of a saved instance. Returns the number of rows removed.
pub async fn delete_instance(instance: &Instance, db: &dyn DbClient) -> TerrapinResult<u64> {
    if !instance.saved_in_db {
        return Err(TerrapinError::operational("Can't delete unpersisted record"));
    }
    let backend = db.backend_type();
    let condition = pk_condition(&instance.meta, backend, &instance.pk())?;
    let (sql, params) = SqlCompiler::new(backend).compile_delete(&instance.meta.table, &condition);
    db.execute_update(&sql, &params).await
}

/// Reloads every field of a saved instance from its row.
pub async fn refresh_instance(instance: &mut Instance, db: &dyn DbClient) -> TerrapinResult<()> {
    if !instance.saved_in_db {
        return Err(TerrapinError::operational("Can't refresh unpersisted record"));
    }
    let meta = Arc::clone(&instance.meta);
    let backend = db.backend_type();
    let mut query = Query::new(meta.table.clone());
    query.select = meta
        .fields
        .values()
        .map(|f| SelectColumn::column(meta.table.clone(), f.column_name()))
        .collect();
    query.where_clause = Some(WhereNode::Compare {
        lhs: Expression::Column(ColumnRef::new(meta.table.clone(), meta.pk_column())),
        op: CompareOp::Eq,
        rhs: bind_value(&meta, &meta.pk_attr, backend, &instance.pk())?,
    });
    query.limit = Some(1);

    let (sql, params) = SqlCompiler::new(backend).compile_select(&query);
    let row = db
        .execute_query(&sql, &params)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            TerrapinError::DoesNotExist(format!("{} matching query does not exist.", meta.name()))
        })?;
    let fresh = Instance::from_row(Arc::clone(&instance.registry), meta, row)?;
    instance.values = fresh.values;
    instance.reset_relations();
    Ok(())
}

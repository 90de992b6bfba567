//! Per-dialect column types and value casts.
//!
//! Every semantic field type has a generic SQL type. Dialects that need
//! something else register a [`TypeOverride`] keyed by
//! `(SemanticKind, DatabaseBackendType)`; the override may replace the SQL
//! type, cast values before they are bound, and supply the SQL default used
//! for auto-populated datetime columns.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::dialect::DatabaseBackendType;
use crate::fields::{FieldType, SemanticKind};
use crate::value::Value;

/// How a dialect deviates from the generic mapping of one semantic type.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeOverride {
    /// SQL type template; `{max_length}`, `{max_digits}` and
    /// `{decimal_places}` are substituted.
    pub sql_type: Option<&'static str>,
    /// Cast applied to bound values.
    pub cast: Option<fn(Value) -> Value>,
    /// SQL expression for auto-populated defaults.
    pub default_sql: Option<&'static str>,
}

impl TypeOverride {
    const fn sql(sql_type: &'static str) -> Self {
        Self {
            sql_type: Some(sql_type),
            cast: None,
            default_sql: None,
        }
    }

    const fn cast(mut self, cast: fn(Value) -> Value) -> Self {
        self.cast = Some(cast);
        self
    }

    const fn default_sql(mut self, sql: &'static str) -> Self {
        self.default_sql = Some(sql);
        self
    }
}

fn bool_to_int(value: Value) -> Value {
    match value {
        Value::Bool(b) => Value::Int(i64::from(b)),
        other => other,
    }
}

fn to_text(value: Value) -> Value {
    match value {
        Value::Uuid(u) => Value::String(u.to_string()),
        Value::Json(j) => Value::String(j.to_string()),
        Value::DateTimeTz(dt) => Value::String(dt.to_rfc3339()),
        Value::DateTime(dt) => Value::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Date(d) => Value::String(d.to_string()),
        other => other,
    }
}

static OVERRIDES: Lazy<HashMap<(SemanticKind, DatabaseBackendType), TypeOverride>> = Lazy::new(|| {
    use DatabaseBackendType::{ClickHouse, MySQL, Oracle, PostgreSQL, SQLite, MSSQL};
    use SemanticKind as K;

    HashMap::from([
        // SQLite
        ((K::Int, SQLite), TypeOverride::sql("INTEGER")),
        ((K::Bool, SQLite), TypeOverride::sql("INT").cast(bool_to_int)),
        ((K::Decimal, SQLite), TypeOverride::sql("VARCHAR(40)")),
        ((K::Float, SQLite), TypeOverride::sql("REAL")),
        ((K::Uuid, SQLite), TypeOverride::sql("CHAR(36)").cast(to_text)),
        ((K::Json, SQLite), TypeOverride::sql("JSON").cast(to_text)),
        (
            (K::DateTime, SQLite),
            TypeOverride::sql("TIMESTAMP")
                .cast(to_text)
                .default_sql("CURRENT_TIMESTAMP"),
        ),
        ((K::Date, SQLite), TypeOverride::sql("DATE").cast(to_text)),
        // PostgreSQL
        ((K::Float, PostgreSQL), TypeOverride::sql("DOUBLE PRECISION")),
        ((K::Json, PostgreSQL), TypeOverride::sql("JSONB")),
        ((K::Uuid, PostgreSQL), TypeOverride::sql("UUID")),
        ((K::Binary, PostgreSQL), TypeOverride::sql("BYTEA")),
        (
            (K::DateTime, PostgreSQL),
            TypeOverride::sql("TIMESTAMPTZ").default_sql("CURRENT_TIMESTAMP"),
        ),
        // MySQL
        ((K::Text, MySQL), TypeOverride::sql("LONGTEXT")),
        ((K::Float, MySQL), TypeOverride::sql("DOUBLE")),
        ((K::Uuid, MySQL), TypeOverride::sql("CHAR(36)").cast(to_text)),
        ((K::Json, MySQL), TypeOverride::sql("JSON").cast(to_text)),
        ((K::Binary, MySQL), TypeOverride::sql("LONGBLOB")),
        (
            (K::DateTime, MySQL),
            TypeOverride::sql("DATETIME(6)").default_sql("CURRENT_TIMESTAMP(6)"),
        ),
        // MSSQL
        ((K::Char, MSSQL), TypeOverride::sql("NVARCHAR({max_length})")),
        ((K::Text, MSSQL), TypeOverride::sql("NVARCHAR(MAX)")),
        ((K::Bool, MSSQL), TypeOverride::sql("BIT").cast(bool_to_int)),
        ((K::Float, MSSQL), TypeOverride::sql("FLOAT")),
        ((K::Uuid, MSSQL), TypeOverride::sql("CHAR(36)").cast(to_text)),
        ((K::Json, MSSQL), TypeOverride::sql("NVARCHAR(MAX)").cast(to_text)),
        ((K::Binary, MSSQL), TypeOverride::sql("VARBINARY(MAX)")),
        (
            (K::DateTime, MSSQL),
            TypeOverride::sql("DATETIME2").default_sql("SYSDATETIME()"),
        ),
        // Oracle
        ((K::BigInt, Oracle), TypeOverride::sql("INT")),
        ((K::SmallInt, Oracle), TypeOverride::sql("INT")),
        ((K::Char, Oracle), TypeOverride::sql("NVARCHAR2({max_length})")),
        ((K::Text, Oracle), TypeOverride::sql("NCLOB")),
        ((K::Bool, Oracle), TypeOverride::sql("NUMBER(1)").cast(bool_to_int)),
        ((K::Uuid, Oracle), TypeOverride::sql("NVARCHAR2(36)").cast(to_text)),
        ((K::Json, Oracle), TypeOverride::sql("NCLOB").cast(to_text)),
        (
            (K::DateTime, Oracle),
            TypeOverride::sql("TIMESTAMP WITH TIME ZONE").default_sql("CURRENT_TIMESTAMP"),
        ),
        // ClickHouse
        ((K::Int, ClickHouse), TypeOverride::sql("Int32")),
        ((K::BigInt, ClickHouse), TypeOverride::sql("Int64")),
        ((K::SmallInt, ClickHouse), TypeOverride::sql("Int16")),
        ((K::Char, ClickHouse), TypeOverride::sql("String")),
        ((K::Text, ClickHouse), TypeOverride::sql("String")),
        ((K::Bool, ClickHouse), TypeOverride::sql("Bool")),
        (
            (K::Decimal, ClickHouse),
            TypeOverride::sql("Decimal({max_digits},{decimal_places})"),
        ),
        (
            (K::DateTime, ClickHouse),
            TypeOverride::sql("DateTime64(6)").default_sql("now64(6)"),
        ),
        ((K::Date, ClickHouse), TypeOverride::sql("Date")),
        ((K::TimeDelta, ClickHouse), TypeOverride::sql("Int64")),
        ((K::Float, ClickHouse), TypeOverride::sql("Float64")),
        ((K::Json, ClickHouse), TypeOverride::sql("String").cast(to_text)),
        ((K::Uuid, ClickHouse), TypeOverride::sql("UUID")),
        ((K::Binary, ClickHouse), TypeOverride::sql("String")),
    ])
});

/// The override registered for a semantic type on a dialect, if any.
pub fn lookup_override(kind: SemanticKind, backend: DatabaseBackendType) -> Option<&'static TypeOverride> {
    OVERRIDES.get(&(kind, backend))
}

const fn generic_type(kind: SemanticKind) -> &'static str {
    match kind {
        SemanticKind::Int => "INT",
        SemanticKind::BigInt | SemanticKind::TimeDelta => "BIGINT",
        SemanticKind::SmallInt => "SMALLINT",
        SemanticKind::Char => "VARCHAR({max_length})",
        SemanticKind::Text => "TEXT",
        SemanticKind::Bool => "BOOL",
        SemanticKind::Decimal => "DECIMAL({max_digits},{decimal_places})",
        SemanticKind::DateTime => "TIMESTAMP",
        SemanticKind::Date => "DATE",
        SemanticKind::Float => "DOUBLE PRECISION",
        SemanticKind::Json => "JSON",
        SemanticKind::Uuid => "CHAR(36)",
        SemanticKind::Binary => "BLOB",
    }
}

/// The SQL column type of a field type on a dialect.
pub fn column_type(field_type: &FieldType, backend: DatabaseBackendType) -> String {
    let kind = field_type.kind();
    let template = lookup_override(kind, backend)
        .and_then(|o| o.sql_type)
        .unwrap_or_else(|| generic_type(kind));
    match field_type {
        FieldType::Char { max_length } => template.replace("{max_length}", &max_length.to_string()),
        FieldType::Decimal {
            max_digits,
            decimal_places,
        } => template
            .replace("{max_digits}", &max_digits.to_string())
            .replace("{decimal_places}", &decimal_places.to_string()),
        _ => template.to_string(),
    }
}

/// Prepares a canonical field value for binding on a dialect.
///
/// Time deltas are stored as whole microseconds everywhere.
pub fn db_value(field_type: &FieldType, backend: DatabaseBackendType, value: Value) -> Value {
    let value = match value {
        Value::Duration(d) => d.num_microseconds().map_or(Value::Null, Value::Int),
        Value::List(values) => {
            return Value::List(
                values
                    .into_iter()
                    .map(|v| db_value(field_type, backend, v))
                    .collect(),
            )
        }
        other => other,
    };
    match lookup_override(field_type.kind(), backend).and_then(|o| o.cast) {
        Some(cast) => cast(value),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametrized_types() {
        assert_eq!(
            column_type(&FieldType::char(50), DatabaseBackendType::PostgreSQL),
            "VARCHAR(50)"
        );
        assert_eq!(
            column_type(&FieldType::char(50), DatabaseBackendType::MSSQL),
            "NVARCHAR(50)"
        );
        assert_eq!(
            column_type(&FieldType::decimal(10, 2), DatabaseBackendType::MySQL),
            "DECIMAL(10,2)"
        );
        assert_eq!(
            column_type(&FieldType::decimal(10, 2), DatabaseBackendType::ClickHouse),
            "Decimal(10,2)"
        );
    }

    #[test]
    fn test_overrides_fall_back_to_generic() {
        assert_eq!(column_type(&FieldType::Json, DatabaseBackendType::PostgreSQL), "JSONB");
        assert_eq!(column_type(&FieldType::Text, DatabaseBackendType::PostgreSQL), "TEXT");
        assert_eq!(column_type(&FieldType::Bool, DatabaseBackendType::SQLite), "INT");
        assert!(lookup_override(SemanticKind::Text, DatabaseBackendType::SQLite).is_none());
    }

    #[test]
    fn test_sqlite_casts() {
        let sqlite = DatabaseBackendType::SQLite;
        assert_eq!(db_value(&FieldType::Bool, sqlite, Value::Bool(true)), Value::Int(1));
        let id = uuid::Uuid::nil();
        assert_eq!(
            db_value(&FieldType::Uuid, sqlite, Value::Uuid(id)),
            Value::String(id.to_string())
        );
        assert_eq!(
            db_value(&FieldType::Json, sqlite, Value::Json(serde_json::json!({"a": 1}))),
            Value::String("{\"a\":1}".into())
        );
        assert_eq!(
            db_value(
                &FieldType::Bool,
                sqlite,
                Value::List(vec![Value::Bool(false), Value::Bool(true)])
            ),
            Value::List(vec![Value::Int(0), Value::Int(1)])
        );
        // PostgreSQL binds booleans natively.
        assert_eq!(
            db_value(&FieldType::Bool, DatabaseBackendType::PostgreSQL, Value::Bool(true)),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_durations_are_microseconds() {
        let value = Value::Duration(chrono::Duration::milliseconds(3));
        assert_eq!(
            db_value(&FieldType::TimeDelta, DatabaseBackendType::PostgreSQL, value),
            Value::Int(3000)
        );
    }
}

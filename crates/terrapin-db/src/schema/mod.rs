//! DDL generation.
//!
//! [`SchemaGenerator`] walks a resolved [`Registry`] and emits one CREATE
//! TABLE per model, followed by index statements and the junction tables of
//! many-to-many relations. Tables are ordered so that every table comes
//! after the tables its enforced foreign keys reference; a foreign-key cycle
//! is a configuration error.
//!
//! Column types come from [`types`], which holds the per-dialect override
//! table.

pub mod types;

use std::sync::Arc;

use sha2::{Digest, Sha256};
use terrapin_core::{TerrapinError, TerrapinResult};

use crate::dialect::DatabaseBackendType;
use crate::executor::DbClient;
use crate::fields::{FieldDef, ManyToManyDef, OnDelete};
use crate::model::{ModelKey, ModelMeta};
use crate::registry::Registry;

/// Builds a deterministic, length-bounded constraint or index name.
///
/// The name is `{prefix}_{table[:11]}_{first_field[:7]}_{hash}`, where the
/// hash is the first six hex digits of the SHA-256 of the table and fields.
pub fn index_name(prefix: &str, table: &str, fields: &[&str]) -> String {
    let first = fields.first().copied().unwrap_or_default();
    let hashed = make_hash(&[table, &fields.join(",")], 6);
    format!("{prefix}_{}_{}_{hashed}", truncate(table, 11), truncate(first, 7))
}

fn fk_name(table: &str, column: &str, target_table: &str, target_column: &str) -> String {
    let hashed = make_hash(&[table, column, target_table, target_column], 8);
    format!("fk_{}_{}_{hashed}", truncate(table, 8), truncate(target_table, 8))
}

fn make_hash(parts: &[&str], length: usize) -> String {
    let digest = Sha256::digest(parts.join(";").as_bytes());
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(length)
        .collect()
}

fn truncate(text: &str, length: usize) -> &str {
    text.char_indices()
        .nth(length)
        .map_or(text, |(idx, _)| &text[..idx])
}

fn escape_comment(text: &str) -> String {
    text.replace('\'', "''")
}

/// How a dialect renders foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FkStyle {
    Inline,
    Constraint,
    Unsupported,
}

/// How a dialect renders table and column comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentStyle {
    Block,
    Inline,
    CommentOn,
    Unsupported,
}

/// Generates CREATE statements for the models of a registry.
#[derive(Debug, Clone)]
pub struct SchemaGenerator {
    backend: DatabaseBackendType,
    safe: bool,
    connection: Option<String>,
}

struct ForeignKeyTarget {
    column: String,
    target_column: String,
    on_delete: OnDelete,
}

impl SchemaGenerator {
    /// Creates a generator. `safe` emits "if not exists" statements.
    pub const fn new(backend: DatabaseBackendType, safe: bool) -> Self {
        Self {
            backend,
            safe,
            connection: None,
        }
    }

    /// Restricts generation to models bound to one connection alias.
    pub fn for_connection(mut self, alias: impl Into<String>) -> Self {
        self.connection = Some(alias.into());
        self
    }

    fn q(&self, ident: &str) -> String {
        self.backend.quote(ident)
    }

    const fn fk_style(&self) -> FkStyle {
        match self.backend {
            DatabaseBackendType::SQLite | DatabaseBackendType::PostgreSQL => FkStyle::Inline,
            DatabaseBackendType::MySQL | DatabaseBackendType::MSSQL | DatabaseBackendType::Oracle => {
                FkStyle::Constraint
            }
            DatabaseBackendType::ClickHouse => FkStyle::Unsupported,
        }
    }

    const fn comment_style(&self) -> CommentStyle {
        match self.backend {
            DatabaseBackendType::SQLite => CommentStyle::Block,
            DatabaseBackendType::MySQL | DatabaseBackendType::ClickHouse => CommentStyle::Inline,
            DatabaseBackendType::PostgreSQL | DatabaseBackendType::Oracle => CommentStyle::CommentOn,
            DatabaseBackendType::MSSQL => CommentStyle::Unsupported,
        }
    }

    /// Whether indexes are declared inside the table body.
    const fn inline_indexes(&self) -> bool {
        matches!(self.backend, DatabaseBackendType::MySQL | DatabaseBackendType::MSSQL)
    }

    fn create_table_prefix(&self, table: &str) -> String {
        match (self.safe, self.backend) {
            (false, _) => format!("CREATE TABLE {}", self.q(table)),
            (true, DatabaseBackendType::MSSQL) => format!(
                "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {}",
                escape_comment(table),
                self.q(table)
            ),
            (true, _) => format!("CREATE TABLE IF NOT EXISTS {}", self.q(table)),
        }
    }

    fn create_index_prefix(&self, unique: bool) -> String {
        let unique = if unique { "UNIQUE " } else { "" };
        let safe = if self.safe { "IF NOT EXISTS " } else { "" };
        format!("CREATE {unique}INDEX {safe}")
    }

    /// The statements creating every table, in dependency order.
    pub fn statements(&self, registry: &Registry) -> TerrapinResult<Vec<String>> {
        let models: Vec<&ModelMeta> = registry
            .models()
            .map(AsRef::as_ref)
            .filter(|m| self.connection.as_ref().map_or(true, |c| &m.connection == c))
            .collect();
        let ordered = order_by_dependencies(&models)?;

        let mut statements = Vec::new();
        for meta in &ordered {
            statements.extend(self.table_statements(meta, registry)?);
        }

        let mut junctions: Vec<&str> = Vec::new();
        for meta in &ordered {
            for m2m in meta.m2m_fields.values() {
                if m2m.generated || !m2m.auto_create {
                    continue;
                }
                let through = m2m.through_table();
                let is_model_table = models.iter().any(|m| m.table == through);
                if is_model_table || junctions.contains(&through) {
                    continue;
                }
                junctions.push(through);
                statements.extend(self.junction_statements(meta, m2m, registry)?);
            }
        }
        Ok(statements)
    }

    /// The whole schema as one script, statements separated by `;\n`.
    pub fn generate(&self, registry: &Registry) -> TerrapinResult<String> {
        let statements = self.statements(registry)?;
        if statements.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{};", statements.join(";\n")))
    }

    fn foreign_key_for(
        meta: &ModelMeta,
        field: &FieldDef,
        registry: &Registry,
    ) -> TerrapinResult<Option<(ForeignKeyTarget, Arc<ModelMeta>)>> {
        let Some(fk) = field.reference.as_ref().and_then(|name| meta.fk_fields.get(name)) else {
            return Ok(None);
        };
        if !fk.db_constraint {
            return Ok(None);
        }
        let Some(target_key) = &fk.target else {
            return Ok(None);
        };
        let target = registry.meta(target_key)?;
        let target_column = target
            .fields
            .get(&fk.resolved_to_field)
            .map_or_else(|| target.pk_column().to_string(), |f| f.column_name().to_string());
        Ok(Some((
            ForeignKeyTarget {
                column: field.column_name().to_string(),
                target_column,
                on_delete: fk.on_delete,
            },
            target,
        )))
    }

    fn on_delete_clause(&self, on_delete: OnDelete) -> String {
        let unsupported = matches!(
            (self.backend, on_delete),
            (
                DatabaseBackendType::MSSQL | DatabaseBackendType::Oracle,
                OnDelete::Restrict | OnDelete::SetDefault
            )
        );
        if unsupported {
            String::new()
        } else {
            format!(" ON DELETE {}", on_delete.sql())
        }
    }

    fn column_line(&self, field: &FieldDef) -> String {
        let column = self.q(field.column_name());
        let sql_type = types::column_type(&field.field_type, self.backend);
        if self.backend == DatabaseBackendType::ClickHouse {
            return if field.null && !field.primary_key {
                format!("{column} Nullable({sql_type})")
            } else {
                format!("{column} {sql_type}")
            };
        }
        if field.primary_key {
            if field.generated && field.field_type.is_integer() {
                return self.autoincrement_line(&column, field);
            }
            return format!("{column} {sql_type} NOT NULL PRIMARY KEY");
        }
        let mut line = format!("{column} {sql_type}");
        if !field.null {
            line.push_str(" NOT NULL");
        }
        if field.unique {
            line.push_str(" UNIQUE");
        }
        if let crate::fields::FieldType::DateTime {
            auto_now,
            auto_now_add,
        } = field.field_type
        {
            if auto_now || auto_now_add {
                if let Some(default) = types::lookup_override(field.field_type.kind(), self.backend)
                    .and_then(|o| o.default_sql)
                {
                    line.push_str(&format!(" DEFAULT {default}"));
                }
            }
        }
        line
    }

    fn autoincrement_line(&self, column: &str, field: &FieldDef) -> String {
        use crate::fields::FieldType;
        match self.backend {
            DatabaseBackendType::SQLite => format!("{column} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL"),
            DatabaseBackendType::PostgreSQL => {
                let serial = match field.field_type {
                    FieldType::BigInt => "BIGSERIAL",
                    FieldType::SmallInt => "SMALLSERIAL",
                    _ => "SERIAL",
                };
                format!("{column} {serial} NOT NULL PRIMARY KEY")
            }
            DatabaseBackendType::MySQL => format!(
                "{column} {} NOT NULL PRIMARY KEY AUTO_INCREMENT",
                types::column_type(&field.field_type, self.backend)
            ),
            DatabaseBackendType::MSSQL => format!(
                "{column} {} IDENTITY(1,1) NOT NULL PRIMARY KEY",
                types::column_type(&field.field_type, self.backend)
            ),
            DatabaseBackendType::Oracle => format!(
                "{column} {} GENERATED BY DEFAULT AS IDENTITY NOT NULL PRIMARY KEY",
                types::column_type(&field.field_type, self.backend)
            ),
            DatabaseBackendType::ClickHouse => format!(
                "{column} {}",
                types::column_type(&field.field_type, self.backend)
            ),
        }
    }

    fn with_comment(&self, line: String, comment: Option<&str>) -> String {
        match (comment, self.comment_style()) {
            (Some(text), CommentStyle::Block) => format!("{line} /* {} */", text.replace("*/", "* /")),
            (Some(text), CommentStyle::Inline) => format!("{line} COMMENT '{}'", escape_comment(text)),
            _ => line,
        }
    }

    fn references(&self, fk: &ForeignKeyTarget, target_table: &str) -> String {
        format!(
            " REFERENCES {} ({}){}",
            self.q(target_table),
            self.q(&fk.target_column),
            self.on_delete_clause(fk.on_delete)
        )
    }

    fn table_statements(&self, meta: &ModelMeta, registry: &Registry) -> TerrapinResult<Vec<String>> {
        let table = meta.table.as_str();
        let mut lines = Vec::new();
        let mut constraints = Vec::new();
        let mut comment_statements = Vec::new();
        let mut index_statements = Vec::new();

        for field in meta.fields.values() {
            let mut line = self.column_line(field);
            if let Some((fk, target)) = Self::foreign_key_for(meta, field, registry)? {
                match self.fk_style() {
                    FkStyle::Inline => line.push_str(&self.references(&fk, &target.table)),
                    FkStyle::Constraint => constraints.push(format!(
                        "CONSTRAINT {} FOREIGN KEY ({}){}",
                        self.q(&fk_name(table, &fk.column, &target.table, &fk.target_column)),
                        self.q(&fk.column),
                        self.references(&fk, &target.table)
                    )),
                    FkStyle::Unsupported => {}
                }
            }
            lines.push(self.with_comment(line, field.description.as_deref()));
            if let (Some(text), CommentStyle::CommentOn) = (&field.description, self.comment_style()) {
                comment_statements.push(format!(
                    "COMMENT ON COLUMN {}.{} IS '{}'",
                    self.q(table),
                    self.q(field.column_name()),
                    escape_comment(text)
                ));
            }
        }

        if self.backend != DatabaseBackendType::ClickHouse {
            for group in &meta.unique_together {
                let columns = group_columns(meta, group);
                let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                constraints.push(format!(
                    "CONSTRAINT {} UNIQUE ({})",
                    self.q(&index_name("uid", table, &refs)),
                    self.quote_list(&refs)
                ));
            }

            let mut indexes: Vec<(String, Vec<String>, bool)> = meta
                .fields
                .values()
                .filter(|f| f.db_index && !f.unique && !f.primary_key)
                .map(|f| {
                    let column = f.column_name().to_string();
                    (index_name("idx", table, &[column.as_str()]), vec![column], false)
                })
                .collect();
            for index in &meta.indexes {
                let columns = group_columns(meta, &index.fields);
                let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                let prefix = if index.unique { "uidx" } else { "idx" };
                let name = index
                    .name
                    .clone()
                    .unwrap_or_else(|| index_name(prefix, table, &refs));
                indexes.push((name, columns, index.unique));
            }
            for (name, columns, unique) in indexes {
                let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                if self.inline_indexes() {
                    let keyword = match (self.backend, unique) {
                        (DatabaseBackendType::MySQL, true) => "UNIQUE KEY",
                        (DatabaseBackendType::MySQL, false) => "KEY",
                        (_, true) => "CONSTRAINT",
                        (_, false) => "INDEX",
                    };
                    let body = if unique && self.backend == DatabaseBackendType::MSSQL {
                        format!("{keyword} {} UNIQUE ({})", self.q(&name), self.quote_list(&refs))
                    } else {
                        format!("{keyword} {} ({})", self.q(&name), self.quote_list(&refs))
                    };
                    constraints.push(body);
                } else {
                    index_statements.push(format!(
                        "{}{} ON {} ({})",
                        self.create_index_prefix(unique),
                        self.q(&name),
                        self.q(table),
                        self.quote_list(&refs)
                    ));
                }
            }
        }

        lines.extend(constraints);
        let mut create = format!(
            "{} (\n    {}\n)",
            self.create_table_prefix(table),
            lines.join(",\n    ")
        );
        if self.backend == DatabaseBackendType::ClickHouse {
            create.push_str(&format!(
                " ENGINE = MergeTree() ORDER BY ({})",
                self.q(meta.pk_column())
            ));
        }
        match (&meta.description, self.comment_style()) {
            (Some(text), CommentStyle::Block) => {
                create.push_str(&format!(" /* {} */", text.replace("*/", "* /")));
            }
            (Some(text), CommentStyle::Inline) => {
                let separator = if self.backend == DatabaseBackendType::MySQL { "=" } else { " " };
                create.push_str(&format!(" COMMENT{separator}'{}'", escape_comment(text)));
            }
            (Some(text), CommentStyle::CommentOn) => comment_statements.insert(
                0,
                format!("COMMENT ON TABLE {} IS '{}'", self.q(table), escape_comment(text)),
            ),
            _ => {}
        }

        let mut statements = vec![create];
        statements.extend(index_statements);
        statements.extend(comment_statements);
        Ok(statements)
    }

    fn junction_statements(
        &self,
        meta: &ModelMeta,
        m2m: &ManyToManyDef,
        registry: &Registry,
    ) -> TerrapinResult<Vec<String>> {
        let through = m2m.through_table();
        let target_key = m2m.target.as_ref().ok_or_else(|| {
            TerrapinError::configuration(format!(
                "ManyToManyField '{}' of model {} is not resolved",
                m2m.name, meta.key
            ))
        })?;
        let target = registry.meta(target_key)?;
        let source_pk = meta.pk()?;
        let target_pk = target.pk()?;

        let mut lines = Vec::new();
        let mut constraints = Vec::new();
        for (column, referenced_table, referenced_pk) in [
            (m2m.backward_column(), meta.table.as_str(), source_pk),
            (m2m.forward_column(), target.table.as_str(), target_pk),
        ] {
            let mut key_field = FieldDef::new(column, referenced_pk.field_type.clone());
            if let crate::fields::FieldType::DateTime { .. } = key_field.field_type {
                key_field.field_type = crate::fields::FieldType::datetime();
            }
            let mut line = self.column_line(&key_field);
            if m2m.db_constraint {
                let fk = ForeignKeyTarget {
                    column: column.to_string(),
                    target_column: referenced_pk.column_name().to_string(),
                    on_delete: m2m.on_delete,
                };
                match self.fk_style() {
                    FkStyle::Inline => line.push_str(&self.references(&fk, referenced_table)),
                    FkStyle::Constraint => constraints.push(format!(
                        "CONSTRAINT {} FOREIGN KEY ({}){}",
                        self.q(&fk_name(through, column, referenced_table, &fk.target_column)),
                        self.q(column),
                        self.references(&fk, referenced_table)
                    )),
                    FkStyle::Unsupported => {}
                }
            }
            lines.push(line);
        }

        let pair = [m2m.backward_column(), m2m.forward_column()];
        let mut index_statements = Vec::new();
        if m2m.unique && self.backend != DatabaseBackendType::ClickHouse {
            let name = index_name("uidx", through, &pair);
            if self.inline_indexes() {
                constraints.push(format!(
                    "CONSTRAINT {} UNIQUE ({})",
                    self.q(&name),
                    self.quote_list(&pair)
                ));
            } else {
                index_statements.push(format!(
                    "{}{} ON {} ({})",
                    self.create_index_prefix(true),
                    self.q(&name),
                    self.q(through),
                    self.quote_list(&pair)
                ));
            }
        }

        lines.extend(constraints);
        let mut create = format!(
            "{} (\n    {}\n)",
            self.create_table_prefix(through),
            lines.join(",\n    ")
        );
        if self.backend == DatabaseBackendType::ClickHouse {
            create.push_str(&format!(" ENGINE = MergeTree() ORDER BY ({})", self.quote_list(&pair)));
        }
        let mut comment_statements = Vec::new();
        match (&m2m.description, self.comment_style()) {
            (Some(text), CommentStyle::Block) => {
                create.push_str(&format!(" /* {} */", text.replace("*/", "* /")));
            }
            (Some(text), CommentStyle::Inline) => {
                let separator = if self.backend == DatabaseBackendType::MySQL { "=" } else { " " };
                create.push_str(&format!(" COMMENT{separator}'{}'", escape_comment(text)));
            }
            (Some(text), CommentStyle::CommentOn) => comment_statements.push(format!(
                "COMMENT ON TABLE {} IS '{}'",
                self.q(through),
                escape_comment(text)
            )),
            _ => {}
        }

        let mut statements = vec![create];
        statements.extend(index_statements);
        statements.extend(comment_statements);
        Ok(statements)
    }

    fn quote_list(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| self.q(c))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn group_columns(meta: &ModelMeta, fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .map(|f| meta.column_for(f).unwrap_or(f).to_string())
        .collect()
}

/// Orders models so that every model follows the models its enforced
/// foreign keys point at. Self references do not count.
fn order_by_dependencies<'a>(models: &[&'a ModelMeta]) -> TerrapinResult<Vec<&'a ModelMeta>> {
    let present: Vec<&ModelKey> = models.iter().map(|m| &m.key).collect();
    let dependencies = |meta: &ModelMeta| -> Vec<ModelKey> {
        meta.fk_fields
            .values()
            .filter(|fk| fk.db_constraint)
            .filter_map(|fk| fk.target.clone())
            .filter(|target| target != &meta.key && present.contains(&target))
            .collect()
    };

    let mut emitted: Vec<ModelKey> = Vec::new();
    let mut ordered = Vec::new();
    let mut remaining: Vec<&ModelMeta> = models.to_vec();
    while !remaining.is_empty() {
        let Some(pos) = remaining
            .iter()
            .position(|m| dependencies(m).iter().all(|d| emitted.contains(d)))
        else {
            return Err(TerrapinError::configuration(
                "Can't create schema due to cyclic fk references",
            ));
        };
        let meta = remaining.remove(pos);
        emitted.push(meta.key.clone());
        ordered.push(meta);
    }
    Ok(ordered)
}

/// Generates the schema for the models bound to `client`'s connection and
/// runs it as one script.
pub async fn generate_schema(client: &dyn DbClient, registry: &Registry, safe: bool) -> TerrapinResult<()> {
    let generator = SchemaGenerator::new(client.backend_type(), safe).for_connection(client.alias());
    let script = generator.generate(registry)?;
    if script.is_empty() {
        return Ok(());
    }
    tracing::debug!(connection = client.alias(), safe, "creating schema\n{script}");
    client.execute_script(&script).await
}

//! Shared fixtures for the SQLite integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use terrapin_core::TerrapinResult;
use terrapin_db::query::compiler::Row;
use terrapin_db::{
    generate_schema, DatabaseBackendType, DbClient, FieldDef, FieldType, ForeignKeyDef,
    ManyToManyDef, ModelDef, ModelModule, Registry, Value,
};
use terrapin_db_backends::SqliteClient;

/// Tournament / Event / Team plus Author / Book, registered as app `models`.
pub fn registry() -> Arc<Registry> {
    let module = ModelModule::new("tests.models")
        .model(
            ModelDef::new("Tournament")
                .field(FieldDef::new("name", FieldType::char(255)))
                .field(FieldDef::new("desc", FieldType::Text).nullable())
                .ordering(&["name"]),
        )
        .model(
            ModelDef::new("Event")
                .field(FieldDef::new("name", FieldType::Text))
                .foreign_key(
                    ForeignKeyDef::new("tournament", "models.Tournament").related_name("events"),
                )
                .many_to_many(
                    ManyToManyDef::new("participants", "models.Team").related_name("events"),
                )
                .field(FieldDef::new("prize", FieldType::decimal(10, 2)).nullable()),
        )
        .model(
            ModelDef::new("Team")
                .field(FieldDef::new("name", FieldType::char(50)).unique())
                .field(FieldDef::new("rating", FieldType::Int).default(0)),
        )
        .model(ModelDef::new("Author").field(FieldDef::new("name", FieldType::Text)))
        .model(
            ModelDef::new("Book")
                .field(FieldDef::new("name", FieldType::Text))
                .foreign_key(ForeignKeyDef::new("author", "models.Author").related_name("books"))
                .field(FieldDef::new("rating", FieldType::Float)),
        );
    let mut builder = Registry::builder();
    builder
        .register_app("models", &[module], "default")
        .expect("models register");
    Arc::new(builder.build().expect("models resolve"))
}

/// An in-memory database with the fixture schema created.
pub async fn setup() -> (Arc<Registry>, Arc<QueryCounter>) {
    let registry = registry();
    let client = SqliteClient::memory("default").expect("in-memory sqlite opens");
    generate_schema(&client, &registry, false)
        .await
        .expect("schema is created");
    (registry, Arc::new(QueryCounter::new(client)))
}

/// Wraps a client and counts the statements that read rows.
pub struct QueryCounter {
    inner: SqliteClient,
    queries: AtomicUsize,
}

impl QueryCounter {
    pub fn new(inner: SqliteClient) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DbClient for QueryCounter {
    fn backend_type(&self) -> DatabaseBackendType {
        self.inner.backend_type()
    }

    fn alias(&self) -> &str {
        self.inner.alias()
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> TerrapinResult<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.execute_query(sql, params).await
    }

    async fn execute_insert(&self, sql: &str, params: &[Value]) -> TerrapinResult<Value> {
        self.inner.execute_insert(sql, params).await
    }

    async fn execute_update(&self, sql: &str, params: &[Value]) -> TerrapinResult<u64> {
        self.inner.execute_update(sql, params).await
    }

    async fn execute_script(&self, sql: &str) -> TerrapinResult<()> {
        self.inner.execute_script(sql).await
    }

    async fn close(&self) -> TerrapinResult<()> {
        self.inner.close().await
    }
}

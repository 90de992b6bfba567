//! Test fixtures shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use terrapin_core::TerrapinResult;

use crate::dialect::DatabaseBackendType;
use crate::executor::DbClient;
use crate::fields::{FieldDef, FieldType, ForeignKeyDef, ManyToManyDef};
use crate::model::{ModelDef, ModelModule};
use crate::query::compiler::Row;
use crate::registry::Registry;
use crate::value::Value;

/// A client that records statements and replays canned result sets.
pub(crate) struct RecordingClient {
    backend: DatabaseBackendType,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    responses: Mutex<VecDeque<Vec<Row>>>,
    next_id: AtomicI64,
}

impl RecordingClient {
    pub(crate) fn new(backend: DatabaseBackendType) -> Self {
        Self {
            backend,
            statements: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub(crate) fn sqlite() -> Self {
        Self::new(DatabaseBackendType::SQLite)
    }

    /// Queues the rows returned by the next query.
    pub(crate) fn push_rows(&self, rows: Vec<Row>) {
        self.responses.lock().unwrap().push_back(rows);
    }

    pub(crate) fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.lock().unwrap().clone()
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
    }
}

#[async_trait::async_trait]
impl DbClient for RecordingClient {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend
    }

    fn alias(&self) -> &str {
        "default"
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> TerrapinResult<Vec<Row>> {
        self.record(sql, params);
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn execute_insert(&self, sql: &str, params: &[Value]) -> TerrapinResult<Value> {
        self.record(sql, params);
        Ok(Value::Int(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn execute_update(&self, sql: &str, params: &[Value]) -> TerrapinResult<u64> {
        self.record(sql, params);
        Ok(1)
    }

    async fn execute_script(&self, sql: &str) -> TerrapinResult<()> {
        self.record(sql, &[]);
        Ok(())
    }
}

/// Builds a row from `(column, value)` pairs.
pub(crate) fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs.iter().map(|(c, _)| (*c).to_string()).collect(),
        pairs.iter().map(|(_, v)| v.clone()).collect(),
    )
}

/// Tournament / Event / Team / Address plus Author / Book, all in app `models`.
pub(crate) fn tournament_registry() -> Arc<Registry> {
    let module = ModelModule::new("tests.models")
        .model(
            ModelDef::new("Tournament")
                .field(FieldDef::new("name", FieldType::char(255)))
                .field(FieldDef::new("desc", FieldType::Text).nullable())
                .field(FieldDef::new(
                    "created",
                    FieldType::DateTime {
                        auto_now: false,
                        auto_now_add: true,
                    },
                ))
                .ordering(&["name"]),
        )
        .model(
            ModelDef::new("Event")
                .field(FieldDef::new("name", FieldType::Text))
                .foreign_key(
                    ForeignKeyDef::new("tournament", "models.Tournament").related_name("events"),
                )
                .many_to_many(ManyToManyDef::new("participants", "models.Team").related_name("events"))
                .field(FieldDef::new("prize", FieldType::decimal(10, 2)).nullable()),
        )
        .model(
            ModelDef::new("Team")
                .field(FieldDef::new("name", FieldType::char(50)).unique())
                .field(FieldDef::new("rating", FieldType::Int).default(0)),
        )
        .model(
            ModelDef::new("Address")
                .field(FieldDef::new("city", FieldType::Text))
                .one_to_one(ForeignKeyDef::new("event", "models.Event").related_name("address")),
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
        .expect("fixture models register");
    Arc::new(builder.build().expect("fixture models resolve"))
}

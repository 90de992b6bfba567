//! Schema creation and model resolution against in-memory SQLite.

mod common;

use terrapin_core::TerrapinError;
use terrapin_db::{
    generate_schema, DbClient, FieldDef, FieldDefault, FieldType, ForeignKeyDef, ModelDef,
    ModelModule, Registry, Value,
};
use terrapin_db_backends::SqliteClient;

fn build(models: Vec<ModelDef>) -> Result<Registry, TerrapinError> {
    let module = models
        .into_iter()
        .fold(ModelModule::new("tests.models"), ModelModule::model);
    let mut builder = Registry::builder();
    builder.register_app("models", &[module], "default")?;
    builder.build()
}

#[tokio::test]
async fn test_safe_schema_is_repeatable() {
    let registry = common::registry();
    let client = SqliteClient::memory("default").unwrap();
    generate_schema(&client, &registry, true).await.unwrap();
    generate_schema(&client, &registry, true).await.unwrap();

    let err = generate_schema(&client, &registry, false).await.unwrap_err();
    assert!(err.is_operational());

    let tables = client
        .execute_query(
            "SELECT \"name\" FROM sqlite_master WHERE \"type\"='table' ORDER BY \"name\"",
            &[],
        )
        .await
        .unwrap();
    let names: Vec<String> = tables
        .iter()
        .map(|row| row.get::<String>("name").unwrap())
        .filter(|name| !name.starts_with("sqlite_"))
        .collect();
    assert_eq!(
        names,
        vec!["author", "book", "event", "event_team", "team", "tournament"]
    );
}

#[tokio::test]
async fn test_foreign_keys_are_enforced() {
    let registry = common::registry();
    let client = SqliteClient::memory("default").unwrap();
    generate_schema(&client, &registry, false).await.unwrap();

    let err = client
        .execute_insert(
            "INSERT INTO \"event\" (\"name\",\"tournament_id\") VALUES (?,?)",
            &[Value::from("Orphan"), Value::from(42)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TerrapinError::IntegrityError(_)));
}

#[tokio::test]
async fn test_cyclic_foreign_keys_fail_schema_generation() {
    let registry = build(vec![
        ModelDef::new("One").foreign_key(ForeignKeyDef::new("two", "models.Two").related_name("ones")),
        ModelDef::new("Two").foreign_key(ForeignKeyDef::new("one", "models.One").related_name("twos")),
    ])
    .unwrap();
    let client = SqliteClient::memory("default").unwrap();
    let err = generate_schema(&client, &registry, false).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("cyclic fk references"));
}

#[test]
fn test_duplicate_related_name() {
    let err = build(vec![
        ModelDef::new("Tournament").field(FieldDef::new("name", FieldType::Text)),
        ModelDef::new("Event")
            .foreign_key(ForeignKeyDef::new("tournament", "models.Tournament").related_name("events")),
        ModelDef::new("Match")
            .foreign_key(ForeignKeyDef::new("tournament", "models.Tournament").related_name("events")),
    ])
    .unwrap_err();
    assert!(err.is_configuration());
    assert!(err
        .to_string()
        .contains("backward relation 'events' duplicates in model Tournament"));
}

#[test]
fn test_bad_reference() {
    let err = build(vec![
        ModelDef::new("Event").foreign_key(ForeignKeyDef::new("tournament", "Tournament")),
    ])
    .unwrap_err();
    assert!(err.to_string().contains("is not a valid model reference"));
}

fn new_uuid() -> Value {
    Value::Uuid(uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_typed_values_round_trip() {
    let registry = std::sync::Arc::new(
        build(vec![ModelDef::new("Document")
            .field(
                FieldDef::new("id", FieldType::Uuid)
                    .primary_key()
                    .default_fn("uuid4", new_uuid),
            )
            .field(FieldDef::new("body", FieldType::Json))
            .field(FieldDef::new("published", FieldType::Bool).default(false))
            .field(FieldDef::new(
                "created",
                FieldType::DateTime {
                    auto_now: false,
                    auto_now_add: true,
                },
            ))])
        .unwrap(),
    );
    let meta = registry.model("models.Document").unwrap();
    assert!(matches!(
        meta.field("id").and_then(|f| f.default.clone()),
        Some(FieldDefault::Callable { name: "uuid4", .. })
    ));

    let client = SqliteClient::memory("default").unwrap();
    generate_schema(&client, &registry, false).await.unwrap();
    let documents = registry.manager("models.Document").unwrap();

    let body = serde_json::json!({"tags": ["a", "b"], "draft": true});
    let doc = documents
        .create(
            &client,
            &[("body", Value::Json(body.clone())), ("published", Value::Bool(true))],
        )
        .await
        .unwrap();
    assert!(matches!(doc.pk(), Value::Uuid(_)));

    let fetched = documents
        .get(&client, terrapin_db::Q::new("id", doc.pk()))
        .await
        .unwrap();
    assert_eq!(fetched.pk(), doc.pk());
    assert_eq!(fetched.get("body").unwrap(), &Value::Json(body));
    assert_eq!(fetched.get("published").unwrap(), &Value::Bool(true));
    assert!(matches!(
        fetched.get("created").unwrap(),
        Value::DateTime(_) | Value::DateTimeTz(_)
    ));

    let err = documents
        .create(&client, &[("body", Value::from("{not json"))])
        .await
        .unwrap_err();
    assert!(matches!(err, TerrapinError::FieldError(_)));
}

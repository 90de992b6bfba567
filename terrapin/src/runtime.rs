//! The process-wide ORM runtime.
//!
//! [`Terrapin::init`] resolves the configured apps into a registry and sets
//! up lazily opened connections; everything else (`registry`, `connection`,
//! `generate_schemas`, ...) reads that state and fails with a
//! configuration error until `init` has run.
//!
//! # Examples
//!
//! ```ignore
//! let config = OrmConfig::from_db_url("sqlite://:memory:", ["app.models"]);
//! Terrapin::init(config, &[models()]).await?;
//! Terrapin::generate_schemas(true).await?;
//!
//! let teams = Terrapin::manager("models.Team")?;
//! let db = Terrapin::connection("default").await?;
//! teams.create(db.as_ref(), &[("name", Value::from("Red"))]).await?;
//!
//! Terrapin::close_connections().await?;
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use terrapin_core::{OrmConfig, TerrapinError, TerrapinResult};
use terrapin_db::connections::{ConnectionFactory, ConnectionHandler};
use terrapin_db::describe::ModelDescription;
use terrapin_db::{generate_schema, DbClient, Manager, ModelModule, Registry};
use terrapin_db_backends::BackendFactory;

const NOT_INITIALISED: &str = "You have to call Terrapin::init() first";

struct State {
    config: OrmConfig,
    registry: Arc<Registry>,
    connections: ConnectionHandler,
}

static STATE: Lazy<RwLock<Option<Arc<State>>>> = Lazy::new(|| RwLock::new(None));

fn current() -> TerrapinResult<Arc<State>> {
    STATE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or_else(|| TerrapinError::configuration(NOT_INITIALISED))
}

fn replace(state: Option<Arc<State>>) -> Option<Arc<State>> {
    let mut guard = STATE.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, state)
}

/// A captured runtime, reinstated with [`Terrapin::restore`].
#[derive(Clone)]
pub struct Snapshot(Option<Arc<State>>);

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Snapshot")
            .field(&self.0.as_ref().map(|s| s.config.apps.keys().collect::<Vec<_>>()))
            .finish()
    }
}

/// Entry point to the process-wide ORM state.
#[derive(Debug, Clone, Copy)]
pub struct Terrapin;

impl Terrapin {
    /// Initialises the ORM with the built-in backend factory.
    ///
    /// `modules` are matched against the module paths each app lists in
    /// `config`. Calling `init` again closes the connections of the
    /// previous initialisation first.
    pub async fn init(config: OrmConfig, modules: &[ModelModule]) -> TerrapinResult<()> {
        Self::init_with_factory(config, modules, Arc::new(BackendFactory::new())).await
    }

    /// Initialises the ORM with a custom connection factory.
    pub async fn init_with_factory(
        config: OrmConfig,
        modules: &[ModelModule],
        factory: Arc<dyn ConnectionFactory>,
    ) -> TerrapinResult<()> {
        if let Ok(previous) = current() {
            tracing::debug!("re-initialising, closing previous connections");
            previous.connections.close_all().await?;
        }

        if config.connections.is_empty() {
            return Err(TerrapinError::configuration(
                "Config must define \"connections\" section",
            ));
        }
        if config.apps.is_empty() {
            return Err(TerrapinError::configuration("Config must define \"apps\" section"));
        }
        config.validate()?;

        let mut builder = Registry::builder();
        for (label, app) in &config.apps {
            let app_modules = app
                .models
                .iter()
                .map(|path| {
                    modules.iter().find(|m| &m.path == path).cloned().ok_or_else(|| {
                        TerrapinError::configuration(format!(
                            "Module \"{path}\" not found for app \"{label}\""
                        ))
                    })
                })
                .collect::<TerrapinResult<Vec<_>>>()?;
            builder.register_app(label, &app_modules, &app.default_connection)?;
        }
        let registry = Arc::new(builder.build()?);
        let connections = ConnectionHandler::new(config.connections.clone(), factory);

        tracing::info!(
            apps = config.apps.len(),
            models = registry.models().count(),
            connections = config.connections.len(),
            "terrapin initialised"
        );
        replace(Some(Arc::new(State {
            config,
            registry,
            connections,
        })));
        Ok(())
    }

    /// Whether `init` has run (and `reset` has not since).
    pub fn is_initialised() -> bool {
        current().is_ok()
    }

    /// The resolved registry.
    pub fn registry() -> TerrapinResult<Arc<Registry>> {
        Ok(Arc::clone(&current()?.registry))
    }

    /// The configuration `init` was called with.
    pub fn config() -> TerrapinResult<OrmConfig> {
        Ok(current()?.config.clone())
    }

    /// A manager for `app.Model`.
    pub fn manager(reference: &str) -> TerrapinResult<Manager> {
        current()?.registry.manager(reference)
    }

    /// The client for a connection alias, opened on first use.
    pub async fn connection(alias: &str) -> TerrapinResult<Arc<dyn DbClient>> {
        current()?.connections.get(alias).await
    }

    /// Describes every registered model.
    pub fn describe_models() -> TerrapinResult<IndexMap<String, ModelDescription>> {
        Ok(current()?.registry.describe_models())
    }

    /// Creates the tables of every app on its connection. With `safe`, existing
    /// tables and indexes are left alone.
    pub async fn generate_schemas(safe: bool) -> TerrapinResult<()> {
        let state = current()?;
        let aliases: IndexSet<&str> = state
            .config
            .apps
            .values()
            .map(|app| app.default_connection.as_str())
            .collect();
        for alias in aliases {
            let client = state.connections.get(alias).await?;
            generate_schema(client.as_ref(), &state.registry, safe).await?;
        }
        Ok(())
    }

    /// Closes every open connection. The registry stays usable and
    /// connections reopen on next use.
    pub async fn close_connections() -> TerrapinResult<()> {
        current()?.connections.close_all().await
    }

    /// Closes connections and forgets the registry, returning to the state
    /// before `init`.
    pub async fn reset() -> TerrapinResult<()> {
        if let Some(previous) = replace(None) {
            previous.connections.close_all().await?;
        }
        Ok(())
    }

    /// Captures the current runtime (possibly uninitialised).
    pub fn snapshot() -> Snapshot {
        Snapshot(current().ok())
    }

    /// Reinstates a captured runtime. Connections owned by the runtime being
    /// replaced are left open.
    pub fn restore(snapshot: Snapshot) {
        replace(snapshot.0);
    }
}

#[cfg(test)]
mod tests {
    use terrapin_core::config::{AppConfig, ConnectionConfig};
    use terrapin_core::ConnectionSettings;
    use terrapin_db::{FieldDef, FieldType, ForeignKeyDef, ModelDef, Value};
    use tokio::sync::Mutex;

    use super::*;

    // The runtime is process-wide; tests touching it take turns.
    static SERIAL: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn modules() -> Vec<ModelModule> {
        vec![
            ModelModule::new("app.models")
                .model(ModelDef::new("Team").field(FieldDef::new("name", FieldType::char(50))))
                .model(
                    ModelDef::new("Player")
                        .field(FieldDef::new("name", FieldType::Text))
                        .foreign_key(ForeignKeyDef::new("team", "models.Team").related_name("players")),
                ),
            ModelModule::new("app.events")
                .model(ModelDef::new("Event").field(FieldDef::new("name", FieldType::Text))),
        ]
    }

    fn config() -> OrmConfig {
        OrmConfig::from_db_url("sqlite://:memory:", ["app.models"])
    }

    #[tokio::test]
    async fn test_use_before_init_fails() {
        let _serial = SERIAL.lock().await;
        Terrapin::reset().await.unwrap();

        let err = Terrapin::registry().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains(NOT_INITIALISED));
        assert!(Terrapin::generate_schemas(true).await.is_err());
        assert!(Terrapin::manager("models.Team").is_err());
        assert!(!Terrapin::is_initialised());
    }

    #[tokio::test]
    async fn test_init_generate_and_query() {
        let _serial = SERIAL.lock().await;
        Terrapin::init(config(), &modules()).await.unwrap();
        Terrapin::generate_schemas(false).await.unwrap();

        let teams = Terrapin::manager("models.Team").unwrap();
        let db = Terrapin::connection("default").await.unwrap();
        teams
            .create(db.as_ref(), &[("name", Value::from("Red"))])
            .await
            .unwrap();
        assert_eq!(teams.all().count(db.as_ref()).await.unwrap(), 1);

        let described = Terrapin::describe_models().unwrap();
        assert!(described.contains_key("models.Player"));
        assert!(!described.contains_key("models.Event"));

        Terrapin::reset().await.unwrap();
        assert!(!Terrapin::is_initialised());
    }

    #[tokio::test]
    async fn test_reinit_closes_previous_connections() {
        let _serial = SERIAL.lock().await;
        Terrapin::init(config(), &modules()).await.unwrap();
        let first = Terrapin::connection("default").await.unwrap();
        first.execute_query("SELECT 1", &[]).await.unwrap();

        Terrapin::init(config(), &modules()).await.unwrap();
        let err = first.execute_query("SELECT 1", &[]).await.unwrap_err();
        assert!(err.to_string().contains("is closed"));

        let second = Terrapin::connection("default").await.unwrap();
        second.execute_query("SELECT 1", &[]).await.unwrap();
        Terrapin::reset().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let _serial = SERIAL.lock().await;
        Terrapin::init(config(), &modules()).await.unwrap();
        let snapshot = Terrapin::snapshot();

        let other = OrmConfig::from_db_url("sqlite://:memory:", ["app.events"]);
        Terrapin::init(other, &modules()).await.unwrap();
        assert!(Terrapin::manager("models.Team").is_err());
        assert!(Terrapin::manager("models.Event").is_ok());

        Terrapin::restore(snapshot);
        assert!(Terrapin::manager("models.Team").is_ok());
        Terrapin::reset().await.unwrap();
    }

    #[tokio::test]
    async fn test_config_errors() {
        let _serial = SERIAL.lock().await;
        Terrapin::reset().await.unwrap();

        let err = Terrapin::init(OrmConfig::new(), &modules()).await.unwrap_err();
        assert!(err.to_string().contains("Config must define \"connections\" section"));

        let no_apps = OrmConfig::new()
            .connection("default", ConnectionConfig::Url("sqlite://:memory:".to_string()));
        let err = Terrapin::init(no_apps, &modules()).await.unwrap_err();
        assert!(err.to_string().contains("Config must define \"apps\" section"));

        let missing = OrmConfig::from_db_url("sqlite://:memory:", ["app.nowhere"]);
        let err = Terrapin::init(missing, &modules()).await.unwrap_err();
        assert!(err.to_string().contains("Module \"app.nowhere\" not found"));

        let unknown_alias = OrmConfig::from_db_url("sqlite://:memory:", ["app.models"])
            .app("extra", AppConfig::new(["app.events"]).connection("replica"));
        assert!(Terrapin::init(unknown_alias, &modules()).await.is_err());
        assert!(!Terrapin::is_initialised());
    }

    #[tokio::test]
    async fn test_engine_without_driver() {
        let _serial = SERIAL.lock().await;
        let config = OrmConfig::new()
            .connection(
                "default",
                ConnectionConfig::Explicit(
                    ConnectionSettings::new(terrapin_core::config::ENGINE_POSTGRES)
                        .credential("database", "app"),
                ),
            )
            .app("models", AppConfig::new(["app.models"]));
        // Connections are lazy, so init succeeds and first use fails.
        Terrapin::init(config, &modules()).await.unwrap();
        let err = Terrapin::generate_schemas(true).await.unwrap_err();
        assert!(err.is_configuration());
        Terrapin::reset().await.unwrap();
    }
}

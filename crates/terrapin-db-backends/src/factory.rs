//! Engine-to-client mapping.

use std::sync::Arc;

use terrapin_core::{ConnectionSettings, TerrapinError, TerrapinResult};
use terrapin_db::connections::ConnectionFactory;
use terrapin_db::{DatabaseBackendType, DbClient};

/// Opens a client for whichever engine a connection names.
///
/// Engines without a driver compiled into this build are reported as
/// configuration errors when the connection is first used.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendFactory;

impl BackendFactory {
    /// Creates the factory.
    pub const fn new() -> Self {
        Self
    }

    /// Whether a driver for `backend` is available in this build.
    pub const fn supports(backend: DatabaseBackendType) -> bool {
        match backend {
            #[cfg(feature = "sqlite")]
            DatabaseBackendType::SQLite => true,
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for BackendFactory {
    async fn connect(&self, alias: &str, settings: &ConnectionSettings) -> TerrapinResult<Arc<dyn DbClient>> {
        let backend = DatabaseBackendType::from_engine(&settings.engine)?;
        match backend {
            #[cfg(feature = "sqlite")]
            DatabaseBackendType::SQLite => {
                let client = crate::sqlite::SqliteClient::from_settings(alias, settings)?;
                Ok(Arc::new(client))
            }
            other => Err(TerrapinError::configuration(format!(
                "No driver for engine '{}' ({}) is available for connection '{alias}'",
                settings.engine,
                other.dialect()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use terrapin_core::config::expand_db_url;

    use super::*;

    #[tokio::test]
    async fn test_sqlite_connects() {
        let settings = expand_db_url("sqlite://:memory:").unwrap();
        let client = BackendFactory::new().connect("default", &settings).await.unwrap();
        assert_eq!(client.backend_type(), DatabaseBackendType::SQLite);
        assert_eq!(client.alias(), "default");
        assert!(BackendFactory::supports(DatabaseBackendType::SQLite));
    }

    #[tokio::test]
    async fn test_missing_driver_is_configuration_error() {
        let settings = expand_db_url("postgres://u:p@localhost/app").unwrap();
        let err = BackendFactory::new()
            .connect("default", &settings)
            .await
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("No driver for engine"));
        assert!(!BackendFactory::supports(DatabaseBackendType::PostgreSQL));
    }

    #[tokio::test]
    async fn test_unknown_engine() {
        let settings = ConnectionSettings::new("terrapin.backends.nosuch");
        let err = BackendFactory::new()
            .connect("default", &settings)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unknown database engine"));
    }
}

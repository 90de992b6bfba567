//! # terrapin-core
//!
//! Error types, configuration and logging for terrapin. This crate has no
//! ORM knowledge and provides the foundation for the other crates.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`config`] - Connection/app configuration and DB URL expansion
//! - [`config_loader`] - Loading configuration from TOML and JSON
//! - [`logging`] - Tracing-based logging integration

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;

// Re-export the most commonly used types at the crate root.
pub use config::{AppConfig, ConnectionConfig, ConnectionSettings, OrmConfig};
pub use error::{ConversionError, ConversionErrorKind, TerrapinError, TerrapinResult};

//! # terrapin
//!
//! An async ORM for Rust. Models are declared once, grouped into modules and
//! registered per app; the registry resolves every relation between them,
//! querysets build SQL lazily and the schema generator creates the tables.
//!
//! This is the facade crate: it re-exports the sub-crates and adds the
//! process-wide [`Terrapin`] runtime that ties configuration, registry and
//! connections together.
//!
//! ```ignore
//! use terrapin::prelude::*;
//!
//! let models = ModelModule::new("app.models").model(
//!     ModelDef::new("Team").field(FieldDef::new("name", FieldType::char(50))),
//! );
//! Terrapin::init(OrmConfig::from_db_url("sqlite://:memory:", ["app.models"]), &[models]).await?;
//! Terrapin::generate_schemas(true).await?;
//! ```

#![allow(clippy::result_large_err)]
#![allow(clippy::missing_errors_doc)]

pub mod runtime;

/// Configuration, errors and logging.
pub use terrapin_core as core;

/// Models, registry, querysets, instances and schema generation.
pub use terrapin_db as db;

/// Database clients.
pub use terrapin_db_backends as backends;

pub use runtime::{Snapshot, Terrapin};

/// The types most applications need.
pub mod prelude {
    pub use terrapin_core::config_loader;
    pub use terrapin_core::logging::setup_logging;
    pub use terrapin_core::{
        AppConfig, ConnectionConfig, ConnectionSettings, OrmConfig, TerrapinError, TerrapinResult,
    };
    pub use terrapin_db::query::{Avg, Count, Expression, Max, Min, Prefetch, Sum, F, Q};
    pub use terrapin_db::{
        atomic, in_transaction, DbClient, FieldDef, FieldType, ForeignKeyDef, Instance, Manager,
        ManyToManyDef, ModelDef, ModelModule, OnDelete, QuerySet, Registry, Value,
    };

    pub use crate::Terrapin;
}

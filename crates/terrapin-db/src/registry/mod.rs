//! The application registry.
//!
//! A [`RegistryBuilder`] discovers models per app label and owns all
//! metadata while relations are resolved. [`RegistryBuilder::build`] runs
//! the resolver and freezes the result into a [`Registry`], whose metadata
//! is shared read-only behind `Arc`s and needs no locking.
//!
//! ```
//! use terrapin_db::fields::{FieldDef, FieldType, ForeignKeyDef};
//! use terrapin_db::model::{ModelDef, ModelModule};
//! use terrapin_db::registry::Registry;
//!
//! let module = ModelModule::new("app.models")
//!     .model(ModelDef::new("Tournament").field(FieldDef::new("name", FieldType::Text)))
//!     .model(
//!         ModelDef::new("Event")
//!             .foreign_key(ForeignKeyDef::new("tournament", "models.Tournament")),
//!     );
//! let mut builder = Registry::builder();
//! builder.register_app("models", &[module], "default").unwrap();
//! let registry = builder.build().unwrap();
//!
//! let tournament = registry.model("models.Tournament").unwrap();
//! assert!(tournament.backward_fields.contains_key("events"));
//! ```

mod resolver;

use std::sync::Arc;

use indexmap::IndexMap;
use terrapin_core::{TerrapinError, TerrapinResult};

use crate::model::{ModelKey, ModelMeta, ModelModule};
use crate::query::Manager;
use resolver::Apps;

/// Derives a table name from a model name.
pub type TableNameGenerator = fn(&str) -> String;

/// Collects model declarations and resolves them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    apps: Apps,
    table_name_generator: Option<TableNameGenerator>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook that names tables of models without an explicit table.
    pub fn table_name_generator(mut self, generator: TableNameGenerator) -> Self {
        self.table_name_generator = Some(generator);
        self
    }

    /// Discovers the models of `modules` and registers them under `label`.
    ///
    /// Returns the keys of the newly registered models.
    pub fn register_app(
        &mut self,
        label: &str,
        modules: &[ModelModule],
        connection: &str,
    ) -> TerrapinResult<Vec<ModelKey>> {
        let mut registered = Vec::new();
        for module in modules {
            for def in module.discover()? {
                if let Some(app) = &def.app {
                    if app != label {
                        return Err(TerrapinError::configuration(format!(
                            "{} model cannot be created twice: it belongs to app '{app}', not '{label}'",
                            def.name
                        )));
                    }
                }
                let models = self.apps.entry(label.to_string()).or_default();
                if models.contains_key(&def.name) {
                    return Err(TerrapinError::configuration(format!(
                        "{} model cannot be created twice in app '{label}'",
                        def.name
                    )));
                }
                let table = match (&def.table, self.table_name_generator) {
                    (Some(table), _) => table.clone(),
                    (None, Some(generate)) => generate(&def.name),
                    (None, None) => def.name.to_lowercase(),
                };
                let meta = ModelMeta::from_def(def, label, table, connection)?;
                tracing::debug!(app = label, model = %def.name, table = %meta.table, "registered model");
                registered.push(meta.key.clone());
                models.insert(def.name.clone(), meta);
            }
        }
        self.apps.entry(label.to_string()).or_default();
        Ok(registered)
    }

    /// Resolves every relation and freezes the registry.
    pub fn build(mut self) -> TerrapinResult<Registry> {
        resolver::resolve(&mut self.apps)?;
        let apps = self
            .apps
            .into_iter()
            .map(|(label, models)| {
                let models = models
                    .into_iter()
                    .map(|(name, meta)| (name, Arc::new(meta)))
                    .collect();
                (label, models)
            })
            .collect();
        Ok(Registry {
            apps,
            table_name_generator: self.table_name_generator,
        })
    }
}

/// Resolved models by app label and model name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    apps: IndexMap<String, IndexMap<String, Arc<ModelMeta>>>,
    table_name_generator: Option<TableNameGenerator>,
}

impl Registry {
    /// Starts a builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A builder seeded with this registry's (already resolved) models and
    /// table-name hook, for registering further apps incrementally.
    pub fn to_builder(&self) -> RegistryBuilder {
        let apps = self
            .apps
            .iter()
            .map(|(label, models)| {
                let models = models
                    .iter()
                    .map(|(name, meta)| (name.clone(), meta.as_ref().clone()))
                    .collect();
                (label.clone(), models)
            })
            .collect();
        RegistryBuilder {
            apps,
            table_name_generator: self.table_name_generator,
        }
    }

    /// Whether no app is registered.
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Registered app labels.
    pub fn app_labels(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    /// Models of one app.
    pub fn app_models(&self, label: &str) -> TerrapinResult<Vec<Arc<ModelMeta>>> {
        self.apps
            .get(label)
            .map(|models| models.values().cloned().collect())
            .ok_or_else(|| {
                TerrapinError::configuration(format!("No app with name '{label}' registered."))
            })
    }

    /// Every model, app by app in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelMeta>> {
        self.apps.values().flat_map(IndexMap::values)
    }

    /// Looks up a model by app label and model name.
    pub fn get_model(&self, app: &str, name: &str) -> TerrapinResult<Arc<ModelMeta>> {
        let models = self.apps.get(app).ok_or_else(|| {
            TerrapinError::configuration(format!("No app with name '{app}' registered."))
        })?;
        models.get(name).cloned().ok_or_else(|| {
            TerrapinError::configuration(format!(
                "No model with name '{name}' registered in app '{app}'."
            ))
        })
    }

    /// Looks up a model by key.
    pub fn meta(&self, key: &ModelKey) -> TerrapinResult<Arc<ModelMeta>> {
        self.get_model(&key.app, &key.name)
    }

    /// Looks up a model by `app.Model` reference.
    pub fn model(&self, reference: &str) -> TerrapinResult<Arc<ModelMeta>> {
        self.meta(&ModelKey::parse(reference)?)
    }

    /// The query entry point for a model.
    pub fn manager(self: &Arc<Self>, reference: &str) -> TerrapinResult<Manager> {
        Ok(Manager::new(Arc::clone(self), self.model(reference)?))
    }
}

//! Model declarations and resolved model metadata.
//!
//! Models are declared with the [`ModelDef`] builder and grouped into
//! [`ModelModule`]s. The registry builder turns each declaration into a
//! [`ModelMeta`] (phase one, declarations only) and then runs the relation
//! resolver over all of them (phase two). A `ModelMeta` is immutable once the
//! registry is built and is shared behind an `Arc`.
//!
//! # Examples
//!
//! ```
//! use terrapin_db::fields::{FieldDef, FieldType, ForeignKeyDef};
//! use terrapin_db::model::{ModelDef, ModelModule};
//!
//! let module = ModelModule::new("app.models")
//!     .model(ModelDef::new("Tournament").field(FieldDef::new("name", FieldType::char(255))))
//!     .model(
//!         ModelDef::new("Event")
//!             .field(FieldDef::new("name", FieldType::Text))
//!             .foreign_key(ForeignKeyDef::new("tournament", "models.Tournament")),
//!     );
//! assert_eq!(module.discover().unwrap().len(), 2);
//! ```

use std::fmt;

use indexmap::IndexMap;
use terrapin_core::{TerrapinError, TerrapinResult};

use crate::fields::{BackwardRelation, FieldDef, ForeignKeyDef, ManyToManyDef};
use crate::query::filters::FilterInfo;

/// Identifies a model inside the registry: `(app_label, model_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    /// The app label.
    pub app: String,
    /// The model name.
    pub name: String,
}

impl ModelKey {
    /// Creates a key.
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }

    /// Parses an `app.Model` reference. Exactly one `.` is required.
    pub fn parse(reference: &str) -> TerrapinResult<Self> {
        let mut parts = reference.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(app), Some(name), None) if !app.is_empty() && !name.is_empty() => {
                Ok(Self::new(app, name))
            }
            _ => Err(TerrapinError::configuration(format!(
                "'{reference}' is not a valid model reference Bad Reference. \
                 Should be something like <appname>.<modelname>."
            ))),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.name)
    }
}

/// One declared attribute of a model.
#[derive(Debug, Clone)]
pub enum Declaration {
    /// A data column.
    Field(FieldDef),
    /// A foreign key or one-to-one relation.
    ForeignKey(ForeignKeyDef),
    /// A many-to-many relation.
    ManyToMany(ManyToManyDef),
}

impl Declaration {
    /// The attribute name.
    pub fn name(&self) -> &str {
        match self {
            Self::Field(f) => &f.name,
            Self::ForeignKey(f) => &f.name,
            Self::ManyToMany(f) => &f.name,
        }
    }
}

/// A (possibly unique) index over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Field names, in index order.
    pub fields: Vec<String>,
    /// Explicit index name; derived when `None`.
    pub name: Option<String>,
    /// Whether this is a unique index.
    pub unique: bool,
}

impl IndexDef {
    /// A plain index over the given fields.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            name: None,
            unique: false,
        }
    }

    /// Sets an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Makes the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A model declaration.
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// The model name (e.g. `Event`).
    pub name: String,
    /// Explicit table name.
    pub table: Option<String>,
    /// Explicit app label; must match the label it is registered under.
    pub app: Option<String>,
    /// Abstract models are never registered; they only lend declarations.
    pub abstract_model: bool,
    /// Table description, emitted as a table comment.
    pub description: Option<String>,
    /// Groups of fields that must be unique together.
    pub unique_together: Vec<Vec<String>>,
    /// Extra indexes.
    pub indexes: Vec<IndexDef>,
    /// Default ordering, `-` prefix for descending.
    pub ordering: Vec<String>,
    /// Declarations in declaration order.
    pub declarations: Vec<Declaration>,
}

impl ModelDef {
    /// Starts a declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            app: None,
            abstract_model: false,
            description: None,
            unique_together: Vec::new(),
            indexes: Vec::new(),
            ordering: Vec::new(),
            declarations: Vec::new(),
        }
    }

    /// Sets the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Pins the app label.
    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// Marks the model abstract.
    pub fn abstract_model(mut self) -> Self {
        self.abstract_model = true;
        self
    }

    /// Sets the table description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Copies all declarations of `parent` in front of this model's own.
    pub fn inherit(mut self, parent: &Self) -> Self {
        let own = std::mem::take(&mut self.declarations);
        self.declarations = parent.declarations.clone();
        self.declarations.extend(own);
        self.unique_together
            .extend(parent.unique_together.iter().cloned());
        self.indexes.extend(parent.indexes.iter().cloned());
        self
    }

    /// Adds a data field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.declarations.push(Declaration::Field(field));
        self
    }

    /// Adds a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKeyDef) -> Self {
        self.declarations.push(Declaration::ForeignKey(fk));
        self
    }

    /// Adds a one-to-one relation.
    pub fn one_to_one(mut self, mut fk: ForeignKeyDef) -> Self {
        fk.one_to_one = true;
        self.declarations.push(Declaration::ForeignKey(fk));
        self
    }

    /// Adds a many-to-many relation.
    pub fn many_to_many(mut self, m2m: ManyToManyDef) -> Self {
        self.declarations.push(Declaration::ManyToMany(m2m));
        self
    }

    /// Adds a unique-together group.
    pub fn unique_together(mut self, fields: &[&str]) -> Self {
        self.unique_together
            .push(fields.iter().map(ToString::to_string).collect());
        self
    }

    /// Adds an index.
    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Sets the default ordering.
    pub fn ordering(mut self, fields: &[&str]) -> Self {
        self.ordering = fields.iter().map(ToString::to_string).collect();
        self
    }
}

/// A module of model declarations, registered under an app label.
#[derive(Debug, Clone, Default)]
pub struct ModelModule {
    /// The module path (used in error messages and describe output).
    pub path: String,
    /// Declared models.
    pub models: Vec<ModelDef>,
    /// Explicit list of exported model names; all models when `None`.
    pub exports: Option<Vec<String>>,
}

impl ModelModule {
    /// Creates an empty module.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            models: Vec::new(),
            exports: None,
        }
    }

    /// Adds a model.
    pub fn model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    /// Restricts discovery to the given model names.
    pub fn exports(mut self, names: &[&str]) -> Self {
        self.exports = Some(names.iter().map(ToString::to_string).collect());
        self
    }

    /// Returns the concrete models this module contributes.
    pub fn discover(&self) -> TerrapinResult<Vec<&ModelDef>> {
        let candidates: Vec<&ModelDef> = match &self.exports {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.models.iter().find(|m| &m.name == name).ok_or_else(|| {
                        TerrapinError::configuration(format!(
                            "Module \"{}\" has no model named \"{name}\"",
                            self.path
                        ))
                    })
                })
                .collect::<TerrapinResult<_>>()?,
            None => self.models.iter().collect(),
        };
        Ok(candidates
            .into_iter()
            .filter(|m| !m.abstract_model)
            .collect())
    }
}

/// The resolved metadata of one model.
#[derive(Debug, Clone)]
pub struct ModelMeta {
    /// Registry key.
    pub key: ModelKey,
    /// Table name.
    pub table: String,
    /// Table description.
    pub description: Option<String>,
    /// Connection alias the model is bound to.
    pub connection: String,
    /// Data fields (including synthesized key fields), in declaration order.
    pub fields: IndexMap<String, FieldDef>,
    /// Attribute name of the primary key.
    pub pk_attr: String,
    /// Foreign key and one-to-one relations.
    pub fk_fields: IndexMap<String, ForeignKeyDef>,
    /// Many-to-many relations (declared and mirrored).
    pub m2m_fields: IndexMap<String, ManyToManyDef>,
    /// Backward FK / O2O relations installed by resolution.
    pub backward_fields: IndexMap<String, BackwardRelation>,
    /// Unique-together groups.
    pub unique_together: Vec<Vec<String>>,
    /// Extra indexes.
    pub indexes: Vec<IndexDef>,
    /// Default ordering.
    pub ordering: Vec<String>,
    /// Filter predicates by key (`name`, `name__gte`, ...).
    pub filters: IndexMap<String, FilterInfo>,
    /// Set once relation resolution has run for this model.
    pub resolved: bool,
}

impl ModelMeta {
    /// Builds unresolved metadata from a declaration.
    ///
    /// Synthesizes an auto-increment `id` primary key when none is declared.
    pub fn from_def(def: &ModelDef, app: &str, table: String, connection: &str) -> TerrapinResult<Self> {
        let model = &def.name;
        let mut seen: Vec<&str> = Vec::new();
        for decl in &def.declarations {
            if seen.contains(&decl.name()) {
                return Err(TerrapinError::configuration(format!(
                    "Field '{}' is declared twice in model {model}",
                    decl.name()
                )));
            }
            seen.push(decl.name());
        }

        let mut fields = IndexMap::new();
        let mut fk_fields = IndexMap::new();
        let mut m2m_fields = IndexMap::new();
        let mut pk_candidates = Vec::new();

        for decl in &def.declarations {
            match decl {
                Declaration::Field(field) => {
                    field.validate(model)?;
                    if field.primary_key {
                        pk_candidates.push(field.name.clone());
                    }
                    fields.insert(field.name.clone(), field.clone());
                }
                Declaration::ForeignKey(fk) => {
                    if fk.primary_key {
                        if !fk.one_to_one {
                            return Err(TerrapinError::configuration(format!(
                                "ForeignKeyField '{}' in model {model} can't be used as primary key",
                                fk.name
                            )));
                        }
                        pk_candidates.push(fk.key_field_name());
                    }
                    fk_fields.insert(fk.name.clone(), fk.clone());
                }
                Declaration::ManyToMany(m2m) => {
                    m2m_fields.insert(m2m.name.clone(), m2m.clone());
                }
            }
        }

        let pk_attr = match pk_candidates.as_slice() {
            [single] => single.clone(),
            [] => {
                if seen.contains(&"id") {
                    return Err(TerrapinError::configuration(format!(
                        "Can't create model {model} without explicit primary key \
                         if field 'id' already present"
                    )));
                }
                fields.shift_insert(0, "id".to_string(), FieldDef::auto_id());
                "id".to_string()
            }
            _ => {
                return Err(TerrapinError::configuration(format!(
                    "Can't create model {model} with two primary keys, \
                     only single primary key is supported"
                )))
            }
        };

        let known = |name: &str| {
            name == "id" || fields.contains_key(name) || fk_fields.contains_key(name)
        };
        for group in &def.unique_together {
            if let Some(bad) = group.iter().find(|f| !known(f)) {
                return Err(TerrapinError::configuration(format!(
                    "unique_together refers to unknown field '{bad}' in model {model}"
                )));
            }
        }
        for index in &def.indexes {
            if let Some(bad) = index.fields.iter().find(|f| !known(f)) {
                return Err(TerrapinError::configuration(format!(
                    "Index refers to unknown field '{bad}' in model {model}"
                )));
            }
        }

        Ok(Self {
            key: ModelKey::new(app, model.clone()),
            table,
            description: def.description.clone(),
            connection: connection.to_string(),
            fields,
            pk_attr,
            fk_fields,
            m2m_fields,
            backward_fields: IndexMap::new(),
            unique_together: def.unique_together.clone(),
            indexes: def.indexes.clone(),
            ordering: def.ordering.clone(),
            filters: IndexMap::new(),
            resolved: false,
        })
    }

    /// The model name.
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// The primary key field.
    pub fn pk(&self) -> TerrapinResult<&FieldDef> {
        self.fields.get(&self.pk_attr).ok_or_else(|| {
            TerrapinError::operational(format!(
                "Model {} has no resolved primary key '{}'",
                self.key, self.pk_attr
            ))
        })
    }

    /// The primary key column name.
    pub fn pk_column(&self) -> &str {
        self.fields
            .get(&self.pk_attr)
            .map_or(self.pk_attr.as_str(), FieldDef::column_name)
    }

    /// Looks up a data field by attribute name (`pk` is an alias).
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        if name == "pk" {
            return self.fields.get(&self.pk_attr);
        }
        self.fields.get(name)
    }

    /// The column of a data field, translating FK relation names to their key column.
    pub fn column_for(&self, name: &str) -> Option<&str> {
        if let Some(field) = self.field(name) {
            return Some(field.column_name());
        }
        self.fk_fields
            .get(name)
            .and_then(|fk| self.fields.get(&fk.key_field))
            .map(FieldDef::column_name)
    }

    /// Whether any field or relation uses this name.
    pub fn has_name(&self, name: &str) -> bool {
        self.fields.contains_key(name)
            || self.fk_fields.contains_key(name)
            || self.m2m_fields.contains_key(name)
            || self.backward_fields.contains_key(name)
    }

    /// Names of all relations (forward, many-to-many and backward).
    pub fn fetch_fields(&self) -> Vec<&str> {
        self.fk_fields
            .keys()
            .chain(self.m2m_fields.keys())
            .chain(self.backward_fields.keys())
            .map(String::as_str)
            .collect()
    }

    /// Looks up a filter predicate.
    pub fn filter(&self, key: &str) -> Option<&FilterInfo> {
        self.filters.get(key)
    }

    /// Makes sure the primary key field carries the pk flags. Needed after an
    /// O2O primary key has had its key column synthesized.
    pub fn finalize_pk(&mut self) {
        let pk_attr = self.pk_attr.clone();
        if let Some(field) = self.fields.get_mut(&pk_attr) {
            field.primary_key = true;
            field.unique = true;
            field.null = false;
            if let Some(index) = self.fields.get_index_of(&pk_attr) {
                self.fields.move_index(index, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;

    fn build(def: &ModelDef) -> TerrapinResult<ModelMeta> {
        ModelMeta::from_def(def, "models", def.name.to_lowercase(), "default")
    }

    #[test]
    fn test_parse_reference() {
        let key = ModelKey::parse("models.Tournament").unwrap();
        assert_eq!(key, ModelKey::new("models", "Tournament"));
        assert_eq!(key.to_string(), "models.Tournament");
        for bad in ["Tournament", "a.b.c", ".Tournament", "models."] {
            let err = ModelKey::parse(bad).unwrap_err();
            assert!(err.to_string().contains("Bad Reference"), "{bad}");
        }
    }

    #[test]
    fn test_auto_pk_synthesized_first() {
        let meta = build(&ModelDef::new("Team").field(FieldDef::new("name", FieldType::Text)))
            .unwrap();
        assert_eq!(meta.pk_attr, "id");
        assert_eq!(meta.fields.get_index(0).unwrap().0, "id");
        assert!(meta.pk().unwrap().generated);
        assert_eq!(meta.field("pk").unwrap().name, "id");
    }

    #[test]
    fn test_two_primary_keys() {
        let def = ModelDef::new("Bad")
            .field(FieldDef::new("a", FieldType::Int).primary_key())
            .field(FieldDef::new("b", FieldType::Int).primary_key());
        let err = build(&def).unwrap_err();
        assert!(err
            .to_string()
            .contains("Can't create model Bad with two primary keys"));
    }

    #[test]
    fn test_id_without_pk() {
        let def = ModelDef::new("Bad").field(FieldDef::new("id", FieldType::Int));
        let err = build(&def).unwrap_err();
        assert!(err
            .to_string()
            .contains("without explicit primary key if field 'id' already present"));
    }

    #[test]
    fn test_fk_pk_requires_one_to_one() {
        let def = ModelDef::new("Bad")
            .foreign_key(ForeignKeyDef::new("owner", "models.User").primary_key());
        assert!(build(&def).unwrap_err().to_string().contains("can't be used as primary key"));

        let def = ModelDef::new("Profile")
            .one_to_one(ForeignKeyDef::new("user", "models.User").primary_key());
        let meta = build(&def).unwrap();
        assert_eq!(meta.pk_attr, "user_id");
        assert!(meta.pk().is_err());
    }

    #[test]
    fn test_unknown_unique_together() {
        let def = ModelDef::new("Bad")
            .field(FieldDef::new("a", FieldType::Int))
            .unique_together(&["a", "missing"]);
        let err = build(&def).unwrap_err();
        assert!(err.to_string().contains("unknown field 'missing'"));
    }

    #[test]
    fn test_duplicate_declaration() {
        let def = ModelDef::new("Bad")
            .field(FieldDef::new("a", FieldType::Int))
            .field(FieldDef::new("a", FieldType::Text));
        assert!(build(&def).unwrap_err().to_string().contains("declared twice"));
    }

    #[test]
    fn test_discover_exports_and_abstract() {
        let base = ModelDef::new("Base")
            .abstract_model()
            .field(FieldDef::new("created", FieldType::datetime()));
        let module = ModelModule::new("app.models")
            .model(base.clone())
            .model(ModelDef::new("A").inherit(&base))
            .model(ModelDef::new("B"));
        let names: Vec<_> = module.discover().unwrap().iter().map(|m| m.name.clone()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(module.models[1].declarations.len(), 1);

        let exported = module.clone().exports(&["B"]);
        assert_eq!(exported.discover().unwrap().len(), 1);

        let err = module.exports(&["C"]).discover().unwrap_err();
        assert!(err.to_string().contains("has no model named \"C\""));
    }
}

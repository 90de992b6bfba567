//! Model instances.
//!
//! An [`Instance`] is one row of a model: its field values keyed by
//! attribute name, any annotations selected with it, and one container per
//! relation. Field access goes through the model's metadata, so setting a
//! value converts and validates it the same way a query parameter would be.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use terrapin_core::{TerrapinError, TerrapinResult};

use crate::executor::{self, DbClient};
use crate::model::ModelMeta;
use crate::query::compiler::{FromValue, Row};
use crate::query::lookups::InstanceRef;
use crate::query::prefetch::{prefetch_instances, Prefetch};
use crate::query::{QuerySet, Q};
use crate::registry::Registry;
use crate::relations::{ManyToManyManager, RelatedObject, RelatedSet, Relation, UNSAVED};
use crate::value::Value;

/// One row of a model.
#[derive(Clone)]
pub struct Instance {
    pub(crate) registry: Arc<Registry>,
    pub(crate) meta: Arc<ModelMeta>,
    pub(crate) values: IndexMap<String, Value>,
    pub(crate) annotations: IndexMap<String, Value>,
    pub(crate) relations: IndexMap<String, Relation>,
    pub(crate) saved_in_db: bool,
}

fn empty_relations(meta: &ModelMeta) -> IndexMap<String, Relation> {
    let mut relations = IndexMap::new();
    for name in meta.fk_fields.keys() {
        relations.insert(name.clone(), Relation::Object(RelatedObject::default()));
    }
    for name in meta.m2m_fields.keys() {
        relations.insert(name.clone(), Relation::Set(RelatedSet::default()));
    }
    for (name, backward) in &meta.backward_fields {
        let container = if backward.one_to_one {
            Relation::Object(RelatedObject::default())
        } else {
            Relation::Set(RelatedSet::default())
        };
        relations.insert(name.clone(), container);
    }
    relations
}

impl Instance {
    /// A new, unsaved instance with every field at its default (or NULL).
    pub fn new(registry: Arc<Registry>, meta: Arc<ModelMeta>) -> Self {
        let values = meta
            .fields
            .values()
            .map(|f| {
                let value = f.default.as_ref().map_or(Value::Null, |d| d.produce());
                (f.name.clone(), value)
            })
            .collect();
        let relations = empty_relations(&meta);
        Self {
            registry,
            meta,
            values,
            annotations: IndexMap::new(),
            relations,
            saved_in_db: false,
        }
    }

    /// Builds a saved instance from a result row.
    ///
    /// Columns that belong to a field are converted with the field's
    /// `to_python_value`; any other column is kept as an annotation.
    pub fn from_row(registry: Arc<Registry>, meta: Arc<ModelMeta>, row: Row) -> TerrapinResult<Self> {
        let mut values = IndexMap::new();
        let mut annotations = IndexMap::new();
        for (column, raw) in row.into_pairs() {
            match meta.fields.values().find(|f| f.column_name() == column) {
                Some(field) => {
                    values.insert(field.name.clone(), field.to_python_value(raw)?);
                }
                None => {
                    annotations.insert(column, raw);
                }
            }
        }
        let relations = empty_relations(&meta);
        Ok(Self {
            registry,
            meta,
            values,
            annotations,
            relations,
            saved_in_db: true,
        })
    }

    /// The model metadata.
    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    /// The registry the model belongs to.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Whether the instance has a row in the database.
    pub const fn is_saved(&self) -> bool {
        self.saved_in_db
    }

    /// The primary key value (NULL before the first save of a generated key).
    pub fn pk(&self) -> Value {
        self.values.get(&self.meta.pk_attr).cloned().unwrap_or(Value::Null)
    }

    /// All field values by attribute name.
    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// A field value. `pk` and foreign key names are accepted as aliases of
    /// the primary key and of the key field.
    pub fn get(&self, name: &str) -> TerrapinResult<&Value> {
        let attr = self.attribute(name)?;
        self.values
            .get(attr)
            .or_else(|| self.annotations.get(name))
            .ok_or_else(|| self.unknown(name))
    }

    /// A field value converted to a Rust type.
    pub fn get_as<T: FromValue>(&self, name: &str) -> TerrapinResult<T> {
        T::from_value(self.get(name)?)
    }

    /// An annotation selected with the instance.
    pub fn annotation(&self, name: &str) -> Option<&Value> {
        self.annotations.get(name)
    }

    fn unknown(&self, name: &str) -> TerrapinError {
        TerrapinError::operational(format!("{} has no field '{name}'", self.meta.name()))
    }

    fn attribute<'a>(&'a self, name: &'a str) -> TerrapinResult<&'a str> {
        if let Some(field) = self.meta.field(name) {
            return Ok(&field.name);
        }
        if let Some(fk) = self.meta.fk_fields.get(name) {
            return Ok(&fk.key_field);
        }
        if self.annotations.contains_key(name) {
            return Ok(name);
        }
        Err(self.unknown(name))
    }

    /// Sets a field value, converting it for the field type.
    ///
    /// Setting a key field (directly or through the relation name) drops
    /// the cached related instance.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> TerrapinResult<()> {
        let field = match self.meta.field(name) {
            Some(field) => field,
            None => self
                .meta
                .fk_fields
                .get(name)
                .and_then(|fk| self.meta.fields.get(&fk.key_field))
                .ok_or_else(|| self.unknown(name))?,
        };
        let value = field.to_db_value(&value.into())?;
        let attr = field.name.clone();
        if let Some(relation) = field.reference.clone() {
            self.relations
                .insert(relation, Relation::Object(RelatedObject::default()));
        }
        self.values.insert(attr, value);
        Ok(())
    }

    /// Points a foreign key or one-to-one relation at a saved instance.
    pub fn set_related(&mut self, name: &str, related: &Instance) -> TerrapinResult<()> {
        let fk = self.meta.fk_fields.get(name).ok_or_else(|| self.unknown(name))?;
        if fk.target.as_ref() != Some(&related.meta.key) {
            return Err(TerrapinError::ParamsError(format!(
                "{name} expects a {} instance, got {}",
                fk.reference,
                related.meta.key
            )));
        }
        if !related.saved_in_db {
            return Err(TerrapinError::operational(format!(
                "You should first call .save() on {}",
                related.meta.name()
            )));
        }
        let key = related.get(&fk.resolved_to_field)?.clone();
        let key_field = fk.key_field.clone();
        self.values.insert(key_field, key);
        let mut object = RelatedObject::default();
        object.set(Some(related.clone()));
        self.relations.insert(name.to_string(), Relation::Object(object));
        Ok(())
    }

    fn relation(&self, name: &str) -> TerrapinResult<&Relation> {
        self.relations.get(name).ok_or_else(|| {
            TerrapinError::operational(format!("{} has no relation '{name}'", self.meta.name()))
        })
    }

    pub(crate) fn relation_mut(&mut self, name: &str) -> Option<&mut Relation> {
        self.relations.get_mut(name)
    }

    pub(crate) fn reset_relations(&mut self) {
        self.relations = empty_relations(&self.meta);
    }

    /// A fetched single-object relation; `None` when it is empty.
    pub fn related_object(&self, name: &str) -> TerrapinResult<Option<&Instance>> {
        match self.relation(name)? {
            Relation::Object(object) => object.get(),
            Relation::Set(_) => Err(TerrapinError::ParamsError(format!(
                "'{name}' is a multi-object relation"
            ))),
        }
    }

    /// A fetched multi-object relation.
    pub fn related_set(&self, name: &str) -> TerrapinResult<&[Instance]> {
        match self.relation(name)? {
            Relation::Set(set) => set.get(),
            Relation::Object(_) => Err(TerrapinError::ParamsError(format!(
                "'{name}' is a single-object relation"
            ))),
        }
    }

    /// A lazy query over the instances of a relation.
    pub fn related_query(&self, name: &str) -> TerrapinResult<QuerySet> {
        if !self.saved_in_db {
            return Err(TerrapinError::operational(UNSAVED));
        }
        if let Some(fk) = self.meta.fk_fields.get(name) {
            let target = self.target_meta(fk.target.as_ref(), name)?;
            let key = self.get(&fk.key_field)?.clone();
            return Ok(QuerySet::new(Arc::clone(&self.registry), target)
                .filter(Q::new(fk.resolved_to_field.clone(), key)));
        }
        if let Some(backward) = self.meta.backward_fields.get(name) {
            let source = self.registry.meta(&backward.source)?;
            let own = self.get(&backward.to_field)?.clone();
            return Ok(QuerySet::new(Arc::clone(&self.registry), source)
                .filter(Q::new(backward.key_field.clone(), own)));
        }
        if self.meta.m2m_fields.contains_key(name) {
            return Ok(self.m2m(name)?.all());
        }
        Err(TerrapinError::operational(format!(
            "{} has no relation '{name}'",
            self.meta.name()
        )))
    }

    fn target_meta(&self, target: Option<&crate::model::ModelKey>, name: &str) -> TerrapinResult<Arc<ModelMeta>> {
        let key = target.ok_or_else(|| {
            TerrapinError::configuration(format!("Relation '{name}' is not resolved"))
        })?;
        self.registry.meta(key)
    }

    /// The manager of a many-to-many relation.
    pub fn m2m(&self, name: &str) -> TerrapinResult<ManyToManyManager<'_>> {
        ManyToManyManager::new(self, name)
    }

    /// Prefetches relation paths onto this instance.
    pub async fn fetch_related(&mut self, db: &dyn DbClient, paths: &[&str]) -> TerrapinResult<()> {
        if !self.saved_in_db {
            return Err(TerrapinError::operational(UNSAVED));
        }
        let prefetches: Vec<Prefetch> = paths.iter().map(|p| Prefetch::path(*p)).collect();
        prefetch_instances(db, std::slice::from_mut(self), &prefetches).await
    }

    /// Inserts or updates the row.
    pub async fn save(&mut self, db: &dyn DbClient) -> TerrapinResult<()> {
        executor::save_instance(self, db).await
    }

    /// Deletes the row.
    pub async fn delete(&self, db: &dyn DbClient) -> TerrapinResult<u64> {
        executor::delete_instance(self, db).await
    }

    /// Reloads the field values from the row. Fetched relations are dropped.
    pub async fn refresh_from_db(&mut self, db: &dyn DbClient) -> TerrapinResult<()> {
        executor::refresh_instance(self, db).await
    }

    /// A filter value identifying this instance.
    pub fn to_ref(&self) -> TerrapinResult<InstanceRef> {
        if !self.saved_in_db {
            return Err(TerrapinError::operational(UNSAVED));
        }
        Ok(InstanceRef {
            model: self.meta.key.clone(),
            values: self.values.clone(),
        })
    }

    /// The field values (and annotations) as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .values
            .iter()
            .chain(&self.annotations)
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        let pk = self.pk();
        self.meta.key == other.meta.key && !pk.is_null() && pk == other.pk()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.meta.key)
            .field("values", &self.values)
            .field("annotations", &self.annotations)
            .field("saved_in_db", &self.saved_in_db)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pk = self.pk();
        if pk.is_null() {
            write!(f, "<{}>", self.meta.name())
        } else {
            write!(f, "<{}: {pk}>", self.meta.name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{row, tournament_registry, RecordingClient};

    #[test]
    fn test_new_instance_defaults() {
        let registry = tournament_registry();
        let team = registry.manager("models.Team").unwrap().build();
        assert!(!team.is_saved());
        assert!(team.pk().is_null());
        assert_eq!(team.get("rating").unwrap(), &Value::Int(0));
        assert_eq!(team.to_string(), "<Team>");
    }

    #[test]
    fn test_set_converts_and_validates() {
        let registry = tournament_registry();
        let mut event = registry.manager("models.Event").unwrap().build();
        event.set("prize", 12.5).unwrap();
        assert_eq!(event.get("prize").unwrap(), &Value::from("12.50"));
        event.set("tournament", 3).unwrap();
        assert_eq!(event.get("tournament_id").unwrap(), &Value::Int(3));
        assert_eq!(event.get("tournament").unwrap(), &Value::Int(3));
        let err = event.set("missing", 1).unwrap_err();
        assert!(err.to_string().contains("Event has no field 'missing'"));
    }

    #[test]
    fn test_from_row_keeps_annotations() {
        let registry = tournament_registry();
        let meta = registry.model("models.Team").unwrap();
        let team = Instance::from_row(
            Arc::clone(&registry),
            meta,
            row(&[
                ("id", Value::Int(4)),
                ("name", Value::from("Blue")),
                ("rating", Value::Int(2)),
                ("events_count", Value::Int(9)),
            ]),
        )
        .unwrap();
        assert!(team.is_saved());
        assert_eq!(team.pk(), Value::Int(4));
        assert_eq!(team.annotation("events_count"), Some(&Value::Int(9)));
        assert_eq!(team.get_as::<i64>("events_count").unwrap(), 9);
        assert_eq!(team.to_string(), "<Team: 4>");
    }

    #[tokio::test]
    async fn test_set_related_caches_instance() {
        let registry = tournament_registry();
        let db = RecordingClient::sqlite();
        let mut tournament = registry.manager("models.Tournament").unwrap().build();
        tournament.set("name", "Cup").unwrap();

        let mut event = registry.manager("models.Event").unwrap().build();
        let err = event.set_related("tournament", &tournament).unwrap_err();
        assert!(err.to_string().contains("You should first call .save()"));

        tournament.save(&db).await.unwrap();
        event.set_related("tournament", &tournament).unwrap();
        assert_eq!(event.get("tournament_id").unwrap(), &tournament.pk());
        assert_eq!(event.related_object("tournament").unwrap(), Some(&tournament));

        event.set("tournament_id", 99).unwrap();
        assert!(event.related_object("tournament").is_err());
    }

    #[test]
    fn test_relations_start_unfetched() {
        let registry = tournament_registry();
        let tournament = registry.manager("models.Tournament").unwrap().build();
        let err = tournament.related_set("events").unwrap_err();
        assert!(matches!(err, TerrapinError::NoValuesFetched(_)));
        let err = tournament.related_query("events").unwrap_err();
        assert!(err.to_string().contains("hasn't been instanced"));
        assert!(tournament.related_object("events").is_err());
    }

    #[tokio::test]
    async fn test_related_queries() {
        let registry = tournament_registry();
        let db = RecordingClient::sqlite();
        let mut tournament = registry.manager("models.Tournament").unwrap().build();
        tournament.set("name", "Cup").unwrap();
        tournament.save(&db).await.unwrap();

        let (sql, params) = tournament
            .related_query("events")
            .unwrap()
            .to_sql(crate::dialect::DatabaseBackendType::SQLite)
            .unwrap();
        assert!(sql.starts_with("SELECT \"event\".\"id\""));
        assert!(sql.ends_with("FROM \"event\" WHERE \"event\".\"tournament_id\"=?"));
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_equality_is_model_and_pk() {
        let registry = tournament_registry();
        let db = RecordingClient::sqlite();
        let mut a = registry.manager("models.Team").unwrap().build();
        a.set("name", "A").unwrap();
        let unsaved = a.clone();
        assert_ne!(a, unsaved);
        a.save(&db).await.unwrap();
        let mut b = a.clone();
        b.set("name", "B").unwrap();
        assert_eq!(a, b);
    }
}

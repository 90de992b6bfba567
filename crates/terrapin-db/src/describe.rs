//! Serializable model descriptions.
//!
//! [`ModelMeta::describe`] flattens resolved metadata into plain data that
//! external serializers and schema generators can consume without touching
//! the registry's internal types. Defaults are rendered as JSON primitives,
//! or as `"<function name>"` for generated defaults.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::fields::{BackwardRelation, FieldDef, FieldType, ForeignKeyDef, ManyToManyDef};
use crate::model::ModelMeta;
use crate::registry::Registry;

/// One data field, relation key column included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct FieldDescription {
    /// Attribute name.
    pub name: String,
    /// Field type name, e.g. `CharField`.
    pub field_type: String,
    /// Column name.
    pub db_column: String,
    /// Caller-facing value type, e.g. `str`.
    pub value_type: String,
    /// Set by the database on insert.
    pub generated: bool,
    pub nullable: bool,
    pub unique: bool,
    pub indexed: bool,
    /// The default, if any.
    pub default: Option<serde_json::Value>,
    pub description: Option<String>,
    /// Type parameters such as `max_length`.
    pub constraints: IndexMap<String, serde_json::Value>,
}

/// A forward foreign key or one-to-one relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescription {
    /// Relation name.
    pub name: String,
    /// Related model, as `app.Model`.
    pub related_model: String,
    /// Attribute holding the key value.
    pub source_field: String,
    /// Field on the related model the key points at.
    pub to_field: String,
    pub nullable: bool,
    /// `ON DELETE` action.
    pub on_delete: String,
    /// Whether a `REFERENCES` constraint is emitted.
    pub db_constraint: bool,
    pub description: Option<String>,
}

/// The reverse side of a foreign key or one-to-one relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackwardDescription {
    pub name: String,
    /// The model declaring the forward relation.
    pub related_model: String,
    /// Attribute on the declaring model that holds the key.
    pub key_field: String,
    pub description: Option<String>,
}

/// A many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToManyDescription {
    pub name: String,
    pub related_model: String,
    /// Junction table.
    pub through: String,
    /// Junction column pointing at the related model.
    pub forward_key: String,
    /// Junction column pointing at this model.
    pub backward_key: String,
    /// Whether this side was mirrored from the other model's declaration.
    pub generated: bool,
    pub unique: bool,
    pub description: Option<String>,
}

/// A resolved model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// `app.Model`.
    pub name: String,
    pub app: String,
    pub table: String,
    pub connection: String,
    pub description: Option<String>,
    pub unique_together: Vec<Vec<String>>,
    pub pk_field: FieldDescription,
    /// Data fields other than the primary key.
    pub data_fields: Vec<FieldDescription>,
    pub fk_fields: Vec<RelationDescription>,
    pub backward_fk_fields: Vec<BackwardDescription>,
    pub o2o_fields: Vec<RelationDescription>,
    pub backward_o2o_fields: Vec<BackwardDescription>,
    pub m2m_fields: Vec<ManyToManyDescription>,
}

fn describe_field(field: &FieldDef) -> FieldDescription {
    let mut constraints = IndexMap::new();
    match &field.field_type {
        FieldType::Char { max_length } => {
            constraints.insert("max_length".to_string(), serde_json::json!(max_length));
        }
        FieldType::Decimal {
            max_digits,
            decimal_places,
        } => {
            constraints.insert("max_digits".to_string(), serde_json::json!(max_digits));
            constraints.insert("decimal_places".to_string(), serde_json::json!(decimal_places));
        }
        FieldType::Int => {
            constraints.insert("ge".to_string(), serde_json::json!(i32::MIN));
            constraints.insert("le".to_string(), serde_json::json!(i32::MAX));
        }
        FieldType::SmallInt => {
            constraints.insert("ge".to_string(), serde_json::json!(i16::MIN));
            constraints.insert("le".to_string(), serde_json::json!(i16::MAX));
        }
        FieldType::DateTime {
            auto_now,
            auto_now_add,
        } if *auto_now || *auto_now_add => {
            constraints.insert("readOnly".to_string(), serde_json::json!(true));
        }
        _ => {}
    }
    if field.generated {
        constraints.insert("readOnly".to_string(), serde_json::json!(true));
    }

    FieldDescription {
        name: field.name.clone(),
        field_type: field.field_type.type_name().to_string(),
        db_column: field.column_name().to_string(),
        value_type: field.field_type.value_type().to_string(),
        generated: field.generated,
        nullable: field.null,
        unique: field.unique,
        indexed: field.db_index || field.unique || field.primary_key,
        default: field.default.as_ref().map(|d| d.describe()),
        description: field.description.clone(),
        constraints,
    }
}

fn describe_fk(fk: &ForeignKeyDef) -> RelationDescription {
    RelationDescription {
        name: fk.name.clone(),
        related_model: fk
            .target
            .as_ref()
            .map_or_else(|| fk.reference.clone(), ToString::to_string),
        source_field: fk.key_field.clone(),
        to_field: fk.resolved_to_field.clone(),
        nullable: fk.null,
        on_delete: fk.on_delete.to_string(),
        db_constraint: fk.db_constraint,
        description: fk.description.clone(),
    }
}

fn describe_backward(relation: &BackwardRelation) -> BackwardDescription {
    BackwardDescription {
        name: relation.name.clone(),
        related_model: relation.source.to_string(),
        key_field: relation.key_field.clone(),
        description: relation.description.clone(),
    }
}

fn describe_m2m(m2m: &ManyToManyDef) -> ManyToManyDescription {
    ManyToManyDescription {
        name: m2m.name.clone(),
        related_model: m2m
            .target
            .as_ref()
            .map_or_else(|| m2m.reference.clone(), ToString::to_string),
        through: m2m.through_table().to_string(),
        forward_key: m2m.forward_column().to_string(),
        backward_key: m2m.backward_column().to_string(),
        generated: m2m.generated,
        unique: m2m.unique,
        description: m2m.description.clone(),
    }
}

impl ModelMeta {
    /// Describes the resolved model.
    pub fn describe(&self) -> ModelDescription {
        let pk_field = self
            .fields
            .get(&self.pk_attr)
            .map_or_else(|| describe_field(&FieldDef::auto_id()), describe_field);
        let data_fields = self
            .fields
            .values()
            .filter(|f| f.name != self.pk_attr)
            .map(describe_field)
            .collect();
        let (o2o, fk): (Vec<_>, Vec<_>) = self.fk_fields.values().partition(|fk| fk.one_to_one);
        let (backward_o2o, backward_fk): (Vec<_>, Vec<_>) =
            self.backward_fields.values().partition(|b| b.one_to_one);

        ModelDescription {
            name: self.key.to_string(),
            app: self.key.app.clone(),
            table: self.table.clone(),
            connection: self.connection.clone(),
            description: self.description.clone(),
            unique_together: self.unique_together.clone(),
            pk_field,
            data_fields,
            fk_fields: fk.into_iter().map(describe_fk).collect(),
            backward_fk_fields: backward_fk.into_iter().map(describe_backward).collect(),
            o2o_fields: o2o.into_iter().map(describe_fk).collect(),
            backward_o2o_fields: backward_o2o.into_iter().map(describe_backward).collect(),
            m2m_fields: self.m2m_fields.values().map(describe_m2m).collect(),
        }
    }
}

impl Registry {
    /// Describes every registered model, keyed by `app.Model`.
    pub fn describe_models(&self) -> IndexMap<String, ModelDescription> {
        self.models()
            .map(|meta| (meta.key.to_string(), meta.describe()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tournament_registry;

    #[test]
    fn test_describe_event() {
        let registry = tournament_registry();
        let event = registry.model("models.Event").unwrap().describe();

        assert_eq!(event.name, "models.Event");
        assert_eq!(event.table, "event");
        assert_eq!(event.pk_field.name, "id");
        assert!(event.pk_field.generated);
        assert_eq!(event.pk_field.field_type, "IntField");

        let names: Vec<&str> = event.data_fields.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"tournament_id"));

        assert_eq!(event.fk_fields.len(), 1);
        let fk = &event.fk_fields[0];
        assert_eq!(fk.name, "tournament");
        assert_eq!(fk.related_model, "models.Tournament");
        assert_eq!(fk.source_field, "tournament_id");
        assert_eq!(fk.on_delete, "CASCADE");

        let m2m = &event.m2m_fields[0];
        assert_eq!(m2m.name, "participants");
        assert_eq!(m2m.related_model, "models.Team");
        assert_eq!(m2m.through, "event_team");
        assert!(!m2m.generated);
    }

    #[test]
    fn test_describe_backward_sides() {
        let registry = tournament_registry();
        let tournament = registry.model("models.Tournament").unwrap().describe();
        assert_eq!(tournament.backward_fk_fields.len(), 1);
        assert_eq!(tournament.backward_fk_fields[0].name, "events");
        assert_eq!(tournament.backward_fk_fields[0].related_model, "models.Event");

        let team = registry.model("models.Team").unwrap().describe();
        let mirrored = team.m2m_fields.iter().find(|m| m.name == "events").unwrap();
        assert!(mirrored.generated);
        assert_eq!(mirrored.through, "event_team");
        assert_eq!(mirrored.forward_key, "event_id");
    }

    #[test]
    fn test_char_constraints_and_json_shape() {
        let registry = tournament_registry();
        let tournament = registry.model("models.Tournament").unwrap().describe();
        let name = tournament
            .data_fields
            .iter()
            .find(|f| f.name == "name")
            .unwrap();
        assert_eq!(name.value_type, "str");
        assert!(name.constraints.contains_key("max_length"));

        let json = serde_json::to_value(&tournament).unwrap();
        assert_eq!(json["name"], "models.Tournament");
        assert!(json["data_fields"].is_array());
    }

    #[test]
    fn test_describe_models_covers_registry() {
        let registry = tournament_registry();
        let all = registry.describe_models();
        assert_eq!(all.len(), registry.models().count());
        assert!(all.contains_key("models.Book"));
    }
}

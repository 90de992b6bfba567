//! Relation descriptors.
//!
//! Relations are declared with a textual `app.Model` reference and are left
//! unresolved until the registry builder runs its resolution pass. Resolution
//! fills in the `target` handle, the synthesized key column and (through the
//! target's metadata) a [`BackwardRelation`]. Targets are referenced by
//! [`ModelKey`], never by pointer, so self-references and cycles are plain
//! graph edges.

use std::fmt;
use std::str::FromStr;

use terrapin_core::TerrapinError;

use super::types::FieldDefault;
use crate::model::ModelKey;
use crate::value::Value;

/// Behavior when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OnDelete {
    /// Delete the referencing rows too.
    #[default]
    Cascade,
    /// Refuse to delete while references exist.
    Restrict,
    /// Set the key column to NULL. Requires a nullable relation.
    SetNull,
    /// Set the key column to its default.
    SetDefault,
    /// Leave it to the database.
    NoAction,
}

impl OnDelete {
    /// The SQL spelling used in `ON DELETE` clauses.
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::NoAction => "NO ACTION",
        }
    }
}

impl fmt::Display for OnDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

impl FromStr for OnDelete {
    type Err = TerrapinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace(' ', "_").as_str() {
            "CASCADE" => Ok(Self::Cascade),
            "RESTRICT" => Ok(Self::Restrict),
            "SET_NULL" => Ok(Self::SetNull),
            "SET_DEFAULT" => Ok(Self::SetDefault),
            "NO_ACTION" => Ok(Self::NoAction),
            _ => Err(TerrapinError::configuration(
                "on_delete can only be CASCADE, RESTRICT, SET_NULL, SET_DEFAULT or NO_ACTION",
            )),
        }
    }
}

/// How the backward side of a relation is named.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RelatedName {
    /// Derived from the source table name.
    #[default]
    Default,
    /// An explicit name.
    Named(String),
    /// No backward relation is installed.
    Disabled,
}

impl RelatedName {
    /// Resolves the name, given the derived default.
    pub fn resolve(&self, derived: String) -> Option<String> {
        match self {
            Self::Default => Some(derived),
            Self::Named(name) => Some(name.clone()),
            Self::Disabled => None,
        }
    }
}

/// A foreign key or one-to-one relation.
#[derive(Debug, Clone)]
pub struct ForeignKeyDef {
    /// The relation attribute name (e.g. `tournament`).
    pub name: String,
    /// The target, as `app.Model`.
    pub reference: String,
    /// Name of the backward relation on the target.
    pub related_name: RelatedName,
    /// Target field referenced; the target's primary key when `None`.
    pub to_field: Option<String>,
    /// Attribute name of the key field; `{name}_id` when `None`.
    pub source_field: Option<String>,
    /// ON DELETE policy.
    pub on_delete: OnDelete,
    /// Whether the key column may be NULL.
    pub null: bool,
    /// Whether the key column is this model's primary key (one-to-one only).
    pub primary_key: bool,
    /// One-to-one instead of many-to-one.
    pub one_to_one: bool,
    /// Whether the database enforces the reference.
    pub db_constraint: bool,
    /// Whether the key column is indexed.
    pub db_index: bool,
    /// Default for the key column.
    pub default: Option<FieldDefault>,
    /// Free-form description.
    pub description: Option<String>,
    /// Resolved target model.
    pub target: Option<ModelKey>,
    /// Resolved key field attribute name.
    pub key_field: String,
    /// Resolved name of the referenced field on the target.
    pub resolved_to_field: String,
}

impl ForeignKeyDef {
    /// Declares a foreign key to `reference` (`app.Model`).
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            related_name: RelatedName::Default,
            to_field: None,
            source_field: None,
            on_delete: OnDelete::Cascade,
            null: false,
            primary_key: false,
            one_to_one: false,
            db_constraint: true,
            db_index: false,
            default: None,
            description: None,
            target: None,
            key_field: String::new(),
            resolved_to_field: String::new(),
        }
    }

    /// Sets an explicit backward relation name.
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = RelatedName::Named(name.into());
        self
    }

    /// Suppresses the backward relation.
    pub fn no_related_name(mut self) -> Self {
        self.related_name = RelatedName::Disabled;
        self
    }

    /// References a unique non-pk field on the target.
    pub fn to_field(mut self, field: impl Into<String>) -> Self {
        self.to_field = Some(field.into());
        self
    }

    /// Overrides the key field attribute name.
    pub fn source_field(mut self, field: impl Into<String>) -> Self {
        self.source_field = Some(field.into());
        self
    }

    /// Sets the ON DELETE policy.
    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Allows NULL.
    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Makes the key column the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Controls whether a REFERENCES constraint is emitted.
    pub fn db_constraint(mut self, enforce: bool) -> Self {
        self.db_constraint = enforce;
        self
    }

    /// Indexes the key column.
    pub fn db_index(mut self) -> Self {
        self.db_index = true;
        self
    }

    /// Default for the key column.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    /// Sets the description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// The key field attribute name, before or after resolution.
    pub fn key_field_name(&self) -> String {
        self.source_field
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.name))
    }

    /// The public type name used in descriptions.
    pub const fn type_name(&self) -> &'static str {
        if self.one_to_one {
            "OneToOneFieldInstance"
        } else {
            "ForeignKeyFieldInstance"
        }
    }
}

/// A many-to-many relation, mediated by a through table.
#[derive(Debug, Clone)]
pub struct ManyToManyDef {
    /// The relation attribute name.
    pub name: String,
    /// The target, as `app.Model`.
    pub reference: String,
    /// Through table name; derived when `None`.
    pub through: Option<String>,
    /// Column in the through table pointing at the target.
    pub forward_key: Option<String>,
    /// Column in the through table pointing at this model.
    pub backward_key: Option<String>,
    /// Name of the mirrored relation on the target.
    pub related_name: RelatedName,
    /// ON DELETE policy for both junction columns.
    pub on_delete: OnDelete,
    /// Whether the junction columns carry REFERENCES constraints.
    pub db_constraint: bool,
    /// Whether the junction pair is unique.
    pub unique: bool,
    /// Whether the junction table is created by schema generation.
    pub auto_create: bool,
    /// Free-form description.
    pub description: Option<String>,
    /// Set on the mirror relation installed on the target.
    pub generated: bool,
    /// Resolved target model.
    pub target: Option<ModelKey>,
}

impl ManyToManyDef {
    /// Declares a many-to-many relation to `reference` (`app.Model`).
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            through: None,
            forward_key: None,
            backward_key: None,
            related_name: RelatedName::Default,
            on_delete: OnDelete::Cascade,
            db_constraint: true,
            unique: true,
            auto_create: true,
            description: None,
            generated: false,
            target: None,
        }
    }

    /// Sets the through table name.
    pub fn through(mut self, table: impl Into<String>) -> Self {
        self.through = Some(table.into());
        self
    }

    /// Sets the column pointing at the target.
    pub fn forward_key(mut self, column: impl Into<String>) -> Self {
        self.forward_key = Some(column.into());
        self
    }

    /// Sets the column pointing at this model.
    pub fn backward_key(mut self, column: impl Into<String>) -> Self {
        self.backward_key = Some(column.into());
        self
    }

    /// Sets an explicit mirror relation name.
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = RelatedName::Named(name.into());
        self
    }

    /// Suppresses the mirror relation.
    pub fn no_related_name(mut self) -> Self {
        self.related_name = RelatedName::Disabled;
        self
    }

    /// Sets the ON DELETE policy.
    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Controls REFERENCES constraints on the junction columns.
    pub fn db_constraint(mut self, enforce: bool) -> Self {
        self.db_constraint = enforce;
        self
    }

    /// Controls the unique index on the junction pair.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Marks the through table as managed elsewhere.
    pub fn no_auto_create(mut self) -> Self {
        self.auto_create = false;
        self
    }

    /// Sets the description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// The resolved through table name.
    pub fn through_table(&self) -> &str {
        self.through.as_deref().unwrap_or_default()
    }

    /// The resolved target-side junction column.
    pub fn forward_column(&self) -> &str {
        self.forward_key.as_deref().unwrap_or_default()
    }

    /// The resolved source-side junction column.
    pub fn backward_column(&self) -> &str {
        self.backward_key.as_deref().unwrap_or_default()
    }
}

/// The inverse side of a foreign key or one-to-one relation, installed on
/// the target model during resolution.
#[derive(Debug, Clone)]
pub struct BackwardRelation {
    /// Attribute name on the target (e.g. `events`).
    pub name: String,
    /// The model declaring the forward relation.
    pub source: ModelKey,
    /// The forward relation name on the source.
    pub source_field: String,
    /// Key field attribute on the source.
    pub key_field: String,
    /// Key column on the source table.
    pub key_column: String,
    /// Field on this model that the key column references.
    pub to_field: String,
    /// Whether the inverse of a one-to-one (a single optional object).
    pub one_to_one: bool,
    /// Copied from the forward relation.
    pub description: Option<String>,
}

impl BackwardRelation {
    /// Backward relations are always nullable: a parent may have no children.
    pub const fn null(&self) -> bool {
        true
    }

    /// The public type name used in descriptions.
    pub const fn type_name(&self) -> &'static str {
        if self.one_to_one {
            "BackwardOneToOneRelation"
        } else {
            "BackwardFKRelation"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_delete_parsing() {
        assert_eq!("cascade".parse::<OnDelete>().unwrap(), OnDelete::Cascade);
        assert_eq!("SET NULL".parse::<OnDelete>().unwrap(), OnDelete::SetNull);
        assert_eq!("NO_ACTION".parse::<OnDelete>().unwrap(), OnDelete::NoAction);
        let err = "DROP".parse::<OnDelete>().unwrap_err();
        assert!(err.to_string().contains("on_delete can only be"));
    }

    #[test]
    fn test_on_delete_sql() {
        assert_eq!(OnDelete::SetDefault.sql(), "SET DEFAULT");
        assert_eq!(OnDelete::Restrict.to_string(), "RESTRICT");
    }

    #[test]
    fn test_related_name_resolution() {
        assert_eq!(
            RelatedName::Default.resolve("events".into()),
            Some("events".to_string())
        );
        assert_eq!(
            RelatedName::Named("games".into()).resolve("events".into()),
            Some("games".to_string())
        );
        assert_eq!(RelatedName::Disabled.resolve("events".into()), None);
    }

    #[test]
    fn test_fk_builder() {
        let fk = ForeignKeyDef::new("tournament", "models.Tournament")
            .related_name("events")
            .on_delete(OnDelete::SetNull)
            .nullable();
        assert_eq!(fk.key_field_name(), "tournament_id");
        assert!(fk.null);
        assert!(fk.db_constraint);
        assert_eq!(fk.type_name(), "ForeignKeyFieldInstance");

        let custom = ForeignKeyDef::new("owner", "models.User").source_field("owner_ref");
        assert_eq!(custom.key_field_name(), "owner_ref");
    }

    #[test]
    fn test_m2m_defaults() {
        let m2m = ManyToManyDef::new("participants", "models.Team");
        assert!(m2m.unique && m2m.auto_create && !m2m.generated);
        assert_eq!(m2m.through_table(), "");
        let m2m = m2m.through("event_team").forward_key("team_id");
        assert_eq!(m2m.through_table(), "event_team");
        assert_eq!(m2m.forward_column(), "team_id");
    }
}

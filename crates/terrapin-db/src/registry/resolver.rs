//! Relation resolution.
//!
//! Runs once over every discovered model, in four passes:
//!
//! 1. foreign keys and one-to-one relations (one-to-one primary keys first,
//!    since other relations may reference the key column they create),
//! 2. many-to-many relations, installing a generated mirror on the target,
//! 3. primary-key bookkeeping for models whose pk came from a relation,
//! 4. filter tables for every model, since targets gained backward relations.
//!
//! Models already marked `resolved` are skipped, so resolving again after
//! registering more apps is safe.

use indexmap::IndexMap;
use terrapin_core::{TerrapinError, TerrapinResult};

use crate::fields::{BackwardRelation, FieldDef, FieldType, ForeignKeyDef, OnDelete, RelatedName};
use crate::model::{ModelKey, ModelMeta};
use crate::query::filters::build_filters;

/// `app_label -> model_name -> metadata`.
pub(crate) type Apps = IndexMap<String, IndexMap<String, ModelMeta>>;

pub(crate) fn lookup_model<'a>(apps: &'a Apps, key: &ModelKey) -> TerrapinResult<&'a ModelMeta> {
    let models = apps.get(&key.app).ok_or_else(|| {
        TerrapinError::configuration(format!("No app with name '{}' registered.", key.app))
    })?;
    models.get(&key.name).ok_or_else(|| {
        TerrapinError::configuration(format!(
            "No model with name '{}' registered in app '{}'.",
            key.name, key.app
        ))
    })
}

fn lookup_model_mut<'a>(apps: &'a mut Apps, key: &ModelKey) -> TerrapinResult<&'a mut ModelMeta> {
    apps.get_mut(&key.app)
        .and_then(|models| models.get_mut(&key.name))
        .ok_or_else(|| TerrapinError::configuration(format!("Model {key} is not registered")))
}

/// Resolves all unresolved models in `apps`.
pub(crate) fn resolve(apps: &mut Apps) -> TerrapinResult<()> {
    let keys: Vec<ModelKey> = apps
        .values()
        .flat_map(|models| models.values().map(|m| m.key.clone()))
        .collect();
    let pending: Vec<ModelKey> = keys
        .iter()
        .filter(|k| apps.get(&k.app).and_then(|m| m.get(&k.name)).is_some_and(|m| !m.resolved))
        .cloned()
        .collect();

    resolve_pk_relations(apps, &pending)?;

    for key in &pending {
        let names: Vec<String> = lookup_model(apps, key)?.fk_fields.keys().cloned().collect();
        for name in names {
            resolve_foreign_key(apps, key, &name)?;
        }
    }

    for key in &pending {
        let names: Vec<String> = lookup_model(apps, key)?
            .m2m_fields
            .iter()
            .filter(|(_, m2m)| !m2m.generated && m2m.target.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            resolve_many_to_many(apps, key, &name)?;
        }
    }

    for key in &pending {
        let meta = lookup_model_mut(apps, key)?;
        meta.finalize_pk();
        meta.resolved = true;
    }

    let filters: Vec<_> = keys
        .iter()
        .map(|key| {
            let meta = lookup_model(apps, key)?;
            let table = build_filters(meta, |k| apps.get(&k.app).and_then(|m| m.get(&k.name)));
            Ok((key.clone(), table))
        })
        .collect::<TerrapinResult<_>>()?;
    for (key, table) in filters {
        lookup_model_mut(apps, &key)?.filters = table;
    }
    Ok(())
}

/// One-to-one relations used as primary keys go first, and in dependency
/// order: a pk relation can only be resolved once its target has a pk field.
fn resolve_pk_relations(apps: &mut Apps, pending: &[ModelKey]) -> TerrapinResult<()> {
    let mut waiting: Vec<(ModelKey, String)> = Vec::new();
    for key in pending {
        let meta = lookup_model(apps, key)?;
        for fk in meta.fk_fields.values() {
            if fk.primary_key && fk.target.is_none() {
                waiting.push((key.clone(), fk.name.clone()));
            }
        }
    }
    while !waiting.is_empty() {
        let mut progressed = false;
        let mut still_waiting = Vec::new();
        for (key, name) in waiting {
            let reference = lookup_model(apps, &key)?
                .fk_fields
                .get(&name)
                .map(|fk| fk.reference.clone())
                .unwrap_or_default();
            let target = lookup_model(apps, &ModelKey::parse(&reference)?)?;
            if target.fields.contains_key(&target.pk_attr) {
                resolve_foreign_key(apps, &key, &name)?;
                progressed = true;
            } else {
                still_waiting.push((key, name));
            }
        }
        if !progressed && !still_waiting.is_empty() {
            let (key, name) = &still_waiting[0];
            return Err(TerrapinError::configuration(format!(
                "Can't resolve primary key relation '{name}' of model {key}: \
                 primary keys reference each other"
            )));
        }
        waiting = still_waiting;
    }
    Ok(())
}

fn resolve_foreign_key(apps: &mut Apps, key: &ModelKey, name: &str) -> TerrapinResult<()> {
    let source = lookup_model(apps, key)?;
    let Some(fk) = source.fk_fields.get(name).cloned() else {
        return Ok(());
    };
    if fk.target.is_some() {
        return Ok(());
    }
    if fk.on_delete == OnDelete::SetNull && !fk.null {
        return Err(TerrapinError::configuration(
            "If on_delete is SET_NULL, then field must have null=True set",
        ));
    }

    let target_key = ModelKey::parse(&fk.reference)?;
    let target = lookup_model(apps, &target_key)?;
    let to_field = resolve_to_field(&fk, target)?;
    let referenced = target.fields.get(&to_field).ok_or_else(|| {
        TerrapinError::configuration(format!(
            "there is no field named \"{to_field}\" in model \"{}\"",
            target.name()
        ))
    })?;

    let key_field_name = fk.key_field_name();
    if source.fields.contains_key(&key_field_name) {
        return Err(TerrapinError::configuration(format!(
            "Field '{key_field_name}' in model {} clashes with the key field of relation '{}'",
            source.name(),
            fk.name
        )));
    }
    let key_field = FieldDef {
        name: key_field_name.clone(),
        field_type: key_field_type(&referenced.field_type),
        null: fk.null,
        unique: fk.one_to_one,
        db_index: fk.db_index,
        primary_key: fk.primary_key,
        generated: false,
        default: fk.default.clone(),
        db_column: None,
        description: fk.description.clone(),
        reference: Some(fk.name.clone()),
    };

    let derived = if fk.one_to_one {
        source.table.clone()
    } else {
        format!("{}s", source.table)
    };
    let backward_name = fk.related_name.resolve(derived);
    if let Some(backward_name) = &backward_name {
        if target.has_name(backward_name) {
            return Err(TerrapinError::configuration(format!(
                "backward relation '{backward_name}' duplicates in model {}",
                target.name()
            )));
        }
    }

    let source = lookup_model_mut(apps, key)?;
    source.fields.insert(key_field_name.clone(), key_field);
    if let Some(stored) = source.fk_fields.get_mut(name) {
        stored.target = Some(target_key.clone());
        stored.key_field = key_field_name.clone();
        stored.resolved_to_field = to_field.clone();
    }
    tracing::debug!(model = %key, relation = name, target = %target_key, "resolved foreign key");

    if let Some(backward_name) = backward_name {
        let target = lookup_model_mut(apps, &target_key)?;
        target.backward_fields.insert(
            backward_name.clone(),
            BackwardRelation {
                name: backward_name.clone(),
                source: key.clone(),
                source_field: fk.name.clone(),
                key_field: key_field_name.clone(),
                key_column: key_field_name,
                to_field,
                one_to_one: fk.one_to_one,
                description: fk.description,
            },
        );
        tracing::debug!(model = %target_key, relation = %backward_name, "installed backward relation");
    }
    Ok(())
}

fn resolve_to_field(fk: &ForeignKeyDef, target: &ModelMeta) -> TerrapinResult<String> {
    let Some(to_field) = &fk.to_field else {
        return Ok(target.pk_attr.clone());
    };
    let field = target.fields.get(to_field).ok_or_else(|| {
        TerrapinError::configuration(format!(
            "there is no field named \"{to_field}\" in model \"{}\"",
            target.name()
        ))
    })?;
    if !(field.unique || field.primary_key) {
        return Err(TerrapinError::configuration(format!(
            "field \"{to_field}\" in model \"{}\" is not unique",
            target.name()
        )));
    }
    Ok(to_field.clone())
}

/// Key columns copy the referenced type without its generation behaviour.
fn key_field_type(referenced: &FieldType) -> FieldType {
    match referenced {
        FieldType::DateTime { .. } => FieldType::datetime(),
        other => other.clone(),
    }
}

fn resolve_many_to_many(apps: &mut Apps, key: &ModelKey, name: &str) -> TerrapinResult<()> {
    let source = lookup_model(apps, key)?;
    let Some(m2m) = source.m2m_fields.get(name).cloned() else {
        return Ok(());
    };
    let target_key = ModelKey::parse(&m2m.reference)?;
    let target = lookup_model(apps, &target_key)?;

    let forward_key = m2m
        .forward_key
        .clone()
        .unwrap_or_else(|| format!("{}_id", target.name().to_lowercase()));
    let backward_key = match &m2m.backward_key {
        Some(explicit) => explicit.clone(),
        None => {
            let derived = format!("{}_id", source.table);
            if derived == forward_key {
                format!("{}_rel_id", source.table)
            } else {
                derived
            }
        }
    };
    let through = m2m
        .through
        .clone()
        .unwrap_or_else(|| format!("{}_{}", source.table, target.table));

    let mirror_name = m2m.related_name.resolve(format!("{}s", source.table));
    if let Some(mirror_name) = &mirror_name {
        if target.has_name(mirror_name) {
            return Err(TerrapinError::configuration(format!(
                "backward relation '{mirror_name}' duplicates in model {}",
                target.name()
            )));
        }
    }

    let mut resolved = m2m;
    resolved.target = Some(target_key.clone());
    resolved.through = Some(through);
    resolved.forward_key = Some(forward_key.clone());
    resolved.backward_key = Some(backward_key.clone());

    if let Some(mirror_name) = mirror_name {
        let mut mirror = resolved.clone();
        mirror.name = mirror_name.clone();
        mirror.reference = key.to_string();
        mirror.target = Some(key.clone());
        mirror.forward_key = Some(backward_key);
        mirror.backward_key = Some(forward_key);
        mirror.related_name = RelatedName::Named(name.to_string());
        mirror.generated = true;
        lookup_model_mut(apps, &target_key)?
            .m2m_fields
            .insert(mirror_name, mirror);
    }
    lookup_model_mut(apps, key)?
        .m2m_fields
        .insert(name.to_string(), resolved);
    tracing::debug!(model = %key, relation = name, target = %target_key, "resolved many-to-many");
    Ok(())
}

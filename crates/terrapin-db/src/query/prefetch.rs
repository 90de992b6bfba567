//! Batched loading of relations.
//!
//! Prefetching fills the relation containers of a batch of instances with
//! one query per relation path, however many instances there are:
//!
//! - forward FK / O2O: one `to_field IN (keys)` query on the target;
//! - backward FK / O2O: one `key IN (own values)` query on the source,
//!   bucketed back by key;
//! - many-to-many: one query on the target joined with the through table,
//!   selecting the owning key alongside each row.
//!
//! Nested paths (`events__participants`) are prefetched on the freshly
//! loaded instances before they are attached.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use terrapin_core::{TerrapinError, TerrapinResult};

use super::builder::conjunction;
use super::compiler::{ColumnRef, Join, JoinType, SelectColumn, SqlCompiler, WhereNode};
use super::expressions::Expression;
use super::lookups::Q;
use super::queryset::QuerySet;
use crate::executor::{bind_value, DbClient};
use crate::fields::{BackwardRelation, ForeignKeyDef, ManyToManyDef};
use crate::instance::Instance;
use crate::model::{ModelKey, ModelMeta};
use crate::relations::Relation;
use crate::value::{Value, ValueKey};

/// Column carrying the owning key in many-to-many prefetch queries.
const BACKWARD_KEY: &str = "_backward_relation_key";

/// A relation path to prefetch, optionally with its own queryset.
#[derive(Debug, Clone)]
pub struct Prefetch {
    pub(crate) path: String,
    pub(crate) queryset: Option<QuerySet>,
}

impl Prefetch {
    /// Prefetches `path` with the default queryset of the related model.
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            queryset: None,
        }
    }

    /// Prefetches `path` with a custom queryset (extra filters, ordering)
    /// applied to the last relation of the path.
    pub fn new(path: impl Into<String>, queryset: QuerySet) -> Self {
        Self {
            path: path.into(),
            queryset: Some(queryset),
        }
    }
}

#[derive(Default)]
struct Group {
    queryset: Option<QuerySet>,
    nested: Vec<Prefetch>,
}

/// Splits prefetch paths by their first relation.
fn group_paths(prefetches: &[Prefetch]) -> IndexMap<String, Group> {
    let mut groups: IndexMap<String, Group> = IndexMap::new();
    for prefetch in prefetches {
        match prefetch.path.split_once("__") {
            Some((head, rest)) => groups.entry(head.to_string()).or_default().nested.push(Prefetch {
                path: rest.to_string(),
                queryset: prefetch.queryset.clone(),
            }),
            None => {
                let group = groups.entry(prefetch.path.clone()).or_default();
                if prefetch.queryset.is_some() {
                    group.queryset = prefetch.queryset.clone();
                }
            }
        }
    }
    groups
}

fn distinct_keys(values: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut seen = IndexMap::new();
    for value in values.filter(|v| !v.is_null()) {
        seen.entry(value.key()).or_insert(value);
    }
    seen.into_values().collect()
}

fn base_queryset(group: &Group, registry: &Arc<crate::registry::Registry>, target: Arc<ModelMeta>) -> QuerySet {
    let mut qs = group
        .queryset
        .clone()
        .unwrap_or_else(|| QuerySet::new(Arc::clone(registry), target));
    qs.prefetch.extend(group.nested.iter().cloned());
    qs
}

fn resolved(key: Option<&ModelKey>, name: &str) -> TerrapinResult<ModelKey> {
    key.cloned()
        .ok_or_else(|| TerrapinError::configuration(format!("Relation '{name}' is not resolved")))
}

/// Fills the relation containers of `instances` for every prefetch path.
///
/// All instances must belong to the same model.
pub fn prefetch_instances<'a>(
    db: &'a dyn DbClient,
    instances: &'a mut [Instance],
    prefetches: &'a [Prefetch],
) -> Pin<Box<dyn Future<Output = TerrapinResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let Some(first) = instances.first() else {
            return Ok(());
        };
        let meta = Arc::clone(&first.meta);
        for (name, group) in group_paths(prefetches) {
            if let Some(fk) = meta.fk_fields.get(&name) {
                prefetch_forward(db, instances, &name, fk, &group).await?;
            } else if let Some(backward) = meta.backward_fields.get(&name) {
                prefetch_backward(db, instances, &name, backward, &group).await?;
            } else if let Some(m2m) = meta.m2m_fields.get(&name) {
                prefetch_many_to_many(db, instances, &name, m2m, &group).await?;
            } else {
                return Err(TerrapinError::ParamsError(format!(
                    "Relation '{name}' for model {} not found",
                    meta.name()
                )));
            }
        }
        Ok(())
    })
}

async fn prefetch_forward(
    db: &dyn DbClient,
    instances: &mut [Instance],
    name: &str,
    fk: &ForeignKeyDef,
    group: &Group,
) -> TerrapinResult<()> {
    let registry = Arc::clone(&instances[0].registry);
    let target = registry.meta(&resolved(fk.target.as_ref(), name)?)?;
    let keys = distinct_keys(
        instances
            .iter()
            .map(|i| i.values.get(&fk.key_field).cloned().unwrap_or(Value::Null)),
    );

    let mut by_key: HashMap<ValueKey, Instance> = HashMap::new();
    if !keys.is_empty() {
        let related = base_queryset(group, &registry, target)
            .filter(Q::new(format!("{}__in", fk.resolved_to_field), Value::List(keys)))
            .all(db)
            .await?;
        tracing::debug!(relation = name, rows = related.len(), "prefetched forward relation");
        for instance in related {
            let key = instance.get(&fk.resolved_to_field)?.key();
            by_key.insert(key, instance);
        }
    }

    for instance in instances.iter_mut() {
        let key = instance.values.get(&fk.key_field).cloned().unwrap_or(Value::Null);
        let related = if key.is_null() {
            None
        } else {
            by_key.get(&key.key()).cloned()
        };
        if let Some(Relation::Object(object)) = instance.relation_mut(name) {
            object.set(related);
        }
    }
    Ok(())
}

async fn prefetch_backward(
    db: &dyn DbClient,
    instances: &mut [Instance],
    name: &str,
    backward: &BackwardRelation,
    group: &Group,
) -> TerrapinResult<()> {
    let registry = Arc::clone(&instances[0].registry);
    let source = registry.meta(&backward.source)?;
    let own_values = distinct_keys(
        instances
            .iter()
            .map(|i| i.values.get(&backward.to_field).cloned().unwrap_or(Value::Null)),
    );

    let mut buckets: HashMap<ValueKey, Vec<Instance>> = HashMap::new();
    if !own_values.is_empty() {
        let related = base_queryset(group, &registry, source)
            .filter(Q::new(format!("{}__in", backward.key_field), Value::List(own_values)))
            .all(db)
            .await?;
        tracing::debug!(relation = name, rows = related.len(), "prefetched backward relation");
        for instance in related {
            let key = instance.get(&backward.key_field)?.key();
            buckets.entry(key).or_default().push(instance);
        }
    }

    for instance in instances.iter_mut() {
        let own = instance.values.get(&backward.to_field).cloned().unwrap_or(Value::Null);
        let items = if own.is_null() {
            Vec::new()
        } else {
            buckets.get(&own.key()).cloned().unwrap_or_default()
        };
        match instance.relation_mut(name) {
            Some(Relation::Object(object)) => object.set(items.into_iter().next()),
            Some(Relation::Set(set)) => set.set(items),
            None => {}
        }
    }
    Ok(())
}

async fn prefetch_many_to_many(
    db: &dyn DbClient,
    instances: &mut [Instance],
    name: &str,
    m2m: &ManyToManyDef,
    group: &Group,
) -> TerrapinResult<()> {
    let registry = Arc::clone(&instances[0].registry);
    let owner = Arc::clone(&instances[0].meta);
    let target = registry.meta(&resolved(m2m.target.as_ref(), name)?)?;
    let pks = distinct_keys(instances.iter().map(Instance::pk));

    let mut pairs: Vec<(ValueKey, ValueKey)> = Vec::new();
    let mut related: IndexMap<ValueKey, Instance> = IndexMap::new();
    if !pks.is_empty() {
        let backend = db.backend_type();
        let through = m2m.through_table();
        let qs = group
            .queryset
            .clone()
            .unwrap_or_else(|| QuerySet::new(Arc::clone(&registry), Arc::clone(&target)));
        let mut query = qs.build(backend)?;
        query.joins.push(Join {
            table: through.to_string(),
            alias: through.to_string(),
            join_type: JoinType::Inner,
            on: WhereNode::ColumnEquals(
                ColumnRef::new(through, m2m.forward_column()),
                ColumnRef::new(target.table.clone(), target.pk_column()),
            ),
        });
        query.select.push(SelectColumn::aliased(
            Expression::Column(ColumnRef::new(through, m2m.backward_column())),
            BACKWARD_KEY,
        ));
        let owner_keys = pks
            .iter()
            .map(|pk| bind_value(&owner, &owner.pk_attr, backend, pk))
            .collect::<TerrapinResult<Vec<_>>>()?;
        let membership = WhereNode::In {
            lhs: Expression::Column(ColumnRef::new(through, m2m.backward_column())),
            values: owner_keys,
            negated: false,
        };
        query.where_clause = conjunction(query.where_clause.take().into_iter().chain([membership]).collect());

        let (sql, params) = SqlCompiler::new(backend).compile_select(&query);
        tracing::debug!(relation = name, sql = %sql, "prefetching many-to-many relation");
        let rows = db.execute_query(&sql, &params).await?;

        let owner_pk = owner.pk()?;
        for row in rows {
            let mut instance = Instance::from_row(Arc::clone(&registry), Arc::clone(&target), row)?;
            let raw = instance.annotations.shift_remove(BACKWARD_KEY).unwrap_or(Value::Null);
            let backward_key = owner_pk.to_python_value(raw)?.key();
            let pk = instance.pk().key();
            pairs.push((backward_key, pk.clone()));
            related.entry(pk).or_insert(instance);
        }

        if !group.nested.is_empty() && !related.is_empty() {
            let mut fetched: Vec<Instance> = related.into_values().collect();
            prefetch_instances(db, &mut fetched, &group.nested).await?;
            related = fetched.into_iter().map(|i| (i.pk().key(), i)).collect();
        }
    }

    for instance in instances.iter_mut() {
        let own = instance.pk().key();
        let items: Vec<Instance> = pairs
            .iter()
            .filter(|(backward, _)| *backward == own)
            .filter_map(|(_, pk)| related.get(pk).cloned())
            .collect();
        if let Some(Relation::Set(set)) = instance.relation_mut(name) {
            set.set(items);
        }
    }
    Ok(())
}

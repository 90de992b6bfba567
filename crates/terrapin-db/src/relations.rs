//! Relation containers and the many-to-many manager.
//!
//! Every relation of an instance has a container that starts out
//! unfetched. Prefetching (or `set_related`) fills it; reading an unfetched
//! container is a [`NoValuesFetched`](TerrapinError::NoValuesFetched) error
//! rather than a silent database round trip.

use std::collections::HashSet;
use std::sync::Arc;

use terrapin_core::{TerrapinError, TerrapinResult};

use crate::executor::{bind_value, DbClient};
use crate::fields::ManyToManyDef;
use crate::instance::Instance;
use crate::model::ModelMeta;
use crate::query::compiler::{ColumnRef, CompareOp, Query, SelectColumn, SqlCompiler, WhereNode};
use crate::query::expressions::Expression;
use crate::query::QuerySet;
use crate::value::{Value, ValueKey};

const NOT_FETCHED: &str = "No values were fetched for this relation, first use .fetch_related()";

pub(crate) const UNSAVED: &str =
    "This objects hasn't been instanced, call .save() before calling related queries";

fn bare(column: &str) -> Expression {
    Expression::Field(column.to_string())
}

/// A forward foreign key, one-to-one or backward one-to-one.
#[derive(Debug, Clone, Default)]
pub struct RelatedObject {
    loaded: Option<Option<Box<Instance>>>,
}

impl RelatedObject {
    /// Whether the relation has been fetched.
    pub const fn is_fetched(&self) -> bool {
        self.loaded.is_some()
    }

    /// The related instance; `None` when the relation is empty.
    pub fn get(&self) -> TerrapinResult<Option<&Instance>> {
        match &self.loaded {
            Some(related) => Ok(related.as_deref()),
            None => Err(TerrapinError::NoValuesFetched(NOT_FETCHED.to_string())),
        }
    }

    pub(crate) fn set(&mut self, related: Option<Instance>) {
        self.loaded = Some(related.map(Box::new));
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut Instance> {
        self.loaded.as_mut().and_then(|r| r.as_deref_mut())
    }
}

/// A backward foreign key or many-to-many relation.
#[derive(Debug, Clone, Default)]
pub struct RelatedSet {
    items: Option<Vec<Instance>>,
}

impl RelatedSet {
    /// Whether the relation has been fetched.
    pub const fn is_fetched(&self) -> bool {
        self.items.is_some()
    }

    /// The related instances.
    pub fn get(&self) -> TerrapinResult<&[Instance]> {
        self.items
            .as_deref()
            .ok_or_else(|| TerrapinError::NoValuesFetched(NOT_FETCHED.to_string()))
    }

    /// Number of related instances.
    pub fn len(&self) -> TerrapinResult<usize> {
        self.get().map(<[Instance]>::len)
    }

    /// Whether there are no related instances.
    pub fn is_empty(&self) -> TerrapinResult<bool> {
        self.get().map(<[Instance]>::is_empty)
    }

    /// Whether `instance` is among the related instances.
    pub fn contains(&self, instance: &Instance) -> TerrapinResult<bool> {
        Ok(self.get()?.contains(instance))
    }

    pub(crate) fn set(&mut self, items: Vec<Instance>) {
        self.items = Some(items);
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut Vec<Instance>> {
        self.items.as_mut()
    }
}

/// The container of one relation.
#[derive(Debug, Clone)]
pub enum Relation {
    /// At most one related instance.
    Object(RelatedObject),
    /// Any number of related instances.
    Set(RelatedSet),
}

impl Relation {
    /// Whether the relation has been fetched.
    pub const fn is_fetched(&self) -> bool {
        match self {
            Self::Object(object) => object.is_fetched(),
            Self::Set(set) => set.is_fetched(),
        }
    }
}

/// Writes and reads the through table of one many-to-many relation of one
/// instance.
pub struct ManyToManyManager<'a> {
    instance: &'a Instance,
    relation: ManyToManyDef,
    target: Arc<ModelMeta>,
}

impl<'a> ManyToManyManager<'a> {
    pub(crate) fn new(instance: &'a Instance, name: &str) -> TerrapinResult<Self> {
        let relation = instance.meta.m2m_fields.get(name).cloned().ok_or_else(|| {
            TerrapinError::operational(format!(
                "{} has no many-to-many relation '{name}'",
                instance.meta.name()
            ))
        })?;
        if !instance.saved_in_db {
            return Err(TerrapinError::operational(UNSAVED));
        }
        let target_key = relation.target.clone().ok_or_else(|| {
            TerrapinError::configuration(format!("Relation '{name}' is not resolved"))
        })?;
        let target = instance.registry.meta(&target_key)?;
        Ok(Self {
            instance,
            relation,
            target,
        })
    }

    fn own_key(&self, db: &dyn DbClient) -> TerrapinResult<Value> {
        let meta = &self.instance.meta;
        bind_value(meta, &meta.pk_attr, db.backend_type(), &self.instance.pk())
    }

    fn related_keys(&self, db: &dyn DbClient, related: &[&Instance]) -> TerrapinResult<Vec<Value>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for other in related {
            if other.meta.key != self.target.key {
                return Err(TerrapinError::ParamsError(format!(
                    "{} is not a {} instance",
                    other.meta.name(),
                    self.target.name()
                )));
            }
            if !other.saved_in_db {
                return Err(TerrapinError::operational(format!(
                    "You should first call .save() on {}",
                    other.meta.name()
                )));
            }
            let key = bind_value(&self.target, &self.target.pk_attr, db.backend_type(), &other.pk())?;
            if seen.insert(key.key()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn pair_condition(&self, own: Value, related: Vec<Value>) -> WhereNode {
        WhereNode::And(vec![
            WhereNode::Compare {
                lhs: bare(self.relation.backward_column()),
                op: CompareOp::Eq,
                rhs: own,
            },
            WhereNode::In {
                lhs: bare(self.relation.forward_column()),
                values: related,
                negated: false,
            },
        ])
    }

    /// Links `related` instances. Pairs that already exist are skipped.
    pub async fn add(&self, db: &dyn DbClient, related: &[&Instance]) -> TerrapinResult<()> {
        let keys = self.related_keys(db, related)?;
        if keys.is_empty() {
            return Ok(());
        }
        let own = self.own_key(db)?;
        let through = self.relation.through_table();
        let compiler = SqlCompiler::new(db.backend_type());

        let mut existing_query = Query::new(through);
        existing_query.select = vec![SelectColumn::column(through, self.relation.forward_column())];
        existing_query.where_clause = Some(self.pair_condition(own.clone(), keys.clone()));
        let (sql, params) = compiler.compile_select(&existing_query);
        let existing: HashSet<ValueKey> = db
            .execute_query(&sql, &params)
            .await?
            .iter()
            .filter_map(|row| row.get_value(self.relation.forward_column()).map(Value::key))
            .collect();

        for key in keys {
            if existing.contains(&key.key()) {
                continue;
            }
            let values = [
                (self.relation.backward_column().to_string(), own.clone()),
                (self.relation.forward_column().to_string(), key),
            ];
            let (sql, params) = compiler.compile_insert(through, &values, None);
            db.execute_update(&sql, &params).await?;
        }
        tracing::debug!(
            model = %self.instance.meta.key,
            relation = %self.relation.name,
            "linked many-to-many rows"
        );
        Ok(())
    }

    /// Unlinks `related` instances.
    pub async fn remove(&self, db: &dyn DbClient, related: &[&Instance]) -> TerrapinResult<u64> {
        let keys = self.related_keys(db, related)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let condition = self.pair_condition(self.own_key(db)?, keys);
        let (sql, params) =
            SqlCompiler::new(db.backend_type()).compile_delete(self.relation.through_table(), &condition);
        db.execute_update(&sql, &params).await
    }

    /// Unlinks every related instance.
    pub async fn clear(&self, db: &dyn DbClient) -> TerrapinResult<u64> {
        let condition = WhereNode::Compare {
            lhs: bare(self.relation.backward_column()),
            op: CompareOp::Eq,
            rhs: self.own_key(db)?,
        };
        let (sql, params) =
            SqlCompiler::new(db.backend_type()).compile_delete(self.relation.through_table(), &condition);
        db.execute_update(&sql, &params).await
    }

    /// The related instances as a lazy query.
    ///
    /// The instance key is bound when the query is built, so the returned
    /// queryset is dialect independent until executed.
    pub fn all(&self) -> QuerySet {
        let through = self.relation.through_table();
        let mut links = Query::new(through);
        links.select = vec![SelectColumn::column(through, self.relation.forward_column())];
        links.where_clause = Some(WhereNode::Compare {
            lhs: Expression::Column(ColumnRef::new(through, self.relation.backward_column())),
            op: CompareOp::Eq,
            rhs: self.instance.pk(),
        });
        QuerySet::new(Arc::clone(&self.instance.registry), Arc::clone(&self.target)).with_condition(
            WhereNode::InSubquery {
                lhs: Expression::Column(ColumnRef::new(&self.target.table, self.target.pk_column())),
                query: Box::new(links),
                negated: false,
            },
        )
    }
}

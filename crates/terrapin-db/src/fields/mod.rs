//! Field definitions for the ORM.
//!
//! [`types`] holds data fields ([`FieldDef`], [`FieldType`]) and their value
//! conversions; [`relational`] holds relation declarations (foreign keys,
//! one-to-one and many-to-many) and the backward relations that the registry
//! installs on their targets.

pub mod relational;
pub mod types;

pub use relational::{BackwardRelation, ForeignKeyDef, ManyToManyDef, OnDelete, RelatedName};
pub use types::{FieldDef, FieldDefault, FieldType, SemanticKind};

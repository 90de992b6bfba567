//! Query building, compilation, and execution.
//!
//! - [`lookups`] - `Q` objects and lookup kinds for filtering
//! - [`filters`] - per-field filter tables and predicate construction
//! - [`expressions`] - F-expressions and aggregates
//! - [`compiler`] - query AST and SQL compilation
//! - [`queryset`] - `QuerySet` and `Manager` for lazy query building
//! - [`prefetch`] - batched loading of related objects

pub(crate) mod builder;
pub mod compiler;
pub mod expressions;
pub mod filters;
pub mod lookups;
pub mod prefetch;
pub mod queryset;

pub use compiler::{ColumnRef, CompareOp, OrderBy, Query, Row, SelectColumn, SqlCompiler, WhereNode};
pub use expressions::{AggregateFunc, Avg, Count, Expression, Max, Min, Sum, F};
pub use lookups::{InstanceRef, LookupKind, Q};
pub use prefetch::Prefetch;
pub use queryset::{Manager, QuerySet};

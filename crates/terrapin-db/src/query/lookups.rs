//! Lookup suffixes and `Q` objects.
//!
//! Filters are written as `field__suffix` keys (`price__gte`, `name__in`,
//! `tournament__name__icontains`). [`LookupKind`] names the suffixes and
//! [`Q`] combines keyed filters with `&`, `|` and `!`.
//!
//! # Examples
//!
//! ```
//! use terrapin_db::query::lookups::{LookupKind, Q};
//!
//! assert_eq!(LookupKind::split("age__gte"), ("age", LookupKind::Gte));
//! assert_eq!(LookupKind::split("events__name"), ("events__name", LookupKind::Exact));
//!
//! let q = Q::new("name", "Alice") | Q::new("name", "Bob");
//! let q = q & !Q::new("active", false);
//! assert!(matches!(q, Q::And(_)));
//! ```

use std::ops;

use indexmap::IndexMap;

use crate::model::ModelKey;
use crate::value::Value;

/// A lookup suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    /// `field = value` (no suffix).
    Exact,
    /// `field != value`, NULLs included.
    Not,
    /// `field IN (...)`.
    In,
    /// `field NOT IN (...)`, NULLs included.
    NotIn,
    /// `field >= value`.
    Gte,
    /// `field > value`.
    Gt,
    /// `field <= value`.
    Lte,
    /// `field < value`.
    Lt,
    /// `field BETWEEN a AND b`.
    Range,
    /// `field IS NULL` when true, `IS NOT NULL` when false.
    IsNull,
    /// `field IS NOT NULL` when true, `IS NULL` when false.
    NotIsNull,
    /// Substring match.
    Contains,
    /// Case-insensitive substring match.
    IContains,
    /// Prefix match.
    StartsWith,
    /// Case-insensitive prefix match.
    IStartsWith,
    /// Suffix match.
    EndsWith,
    /// Case-insensitive suffix match.
    IEndsWith,
    /// Case-insensitive equality.
    IExact,
}

impl LookupKind {
    /// Every lookup, in the order filters are generated.
    pub const ALL: [Self; 18] = [
        Self::Exact,
        Self::Not,
        Self::In,
        Self::NotIn,
        Self::Gte,
        Self::Gt,
        Self::Lte,
        Self::Lt,
        Self::Range,
        Self::IsNull,
        Self::NotIsNull,
        Self::Contains,
        Self::IContains,
        Self::StartsWith,
        Self::IStartsWith,
        Self::EndsWith,
        Self::IEndsWith,
        Self::IExact,
    ];

    /// The suffix token; empty for `Exact`.
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::Exact => "",
            Self::Not => "not",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Gte => "gte",
            Self::Gt => "gt",
            Self::Lte => "lte",
            Self::Lt => "lt",
            Self::Range => "range",
            Self::IsNull => "isnull",
            Self::NotIsNull => "not_isnull",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::IExact => "iexact",
        }
    }

    /// Parses a suffix token. `Exact` has no token and is never returned.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .skip(1)
            .find(|kind| kind.suffix() == suffix)
    }

    /// Splits a filter key into the field path and its lookup.
    pub fn split(key: &str) -> (&str, Self) {
        if let Some((path, suffix)) = key.rsplit_once("__") {
            if let Some(kind) = Self::from_suffix(suffix) {
                return (path, kind);
            }
        }
        (key, Self::Exact)
    }

    /// The filter key for `field` with this lookup.
    pub fn key(&self, field: &str) -> String {
        match self {
            Self::Exact => field.to_string(),
            other => format!("{field}__{}", other.suffix()),
        }
    }

    /// Whether the value is a list.
    pub const fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::Range)
    }

    /// Whether the lookup matches text patterns.
    pub const fn is_pattern(&self) -> bool {
        matches!(
            self,
            Self::Contains
                | Self::IContains
                | Self::StartsWith
                | Self::IStartsWith
                | Self::EndsWith
                | Self::IEndsWith
                | Self::IExact
        )
    }

    /// Whether the value is a boolean flag rather than a field value.
    pub const fn is_null_check(&self) -> bool {
        matches!(self, Self::IsNull | Self::NotIsNull)
    }
}

/// A saved instance used as a filter value (`tournament=<instance>`).
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRef {
    /// The instance's model.
    pub model: ModelKey,
    /// The instance's field values by attribute name.
    pub values: IndexMap<String, Value>,
}

/// The right-hand side of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArg {
    /// A plain value (or a list of values).
    Value(Value),
    /// A model instance, compared through the related key field.
    Instance(InstanceRef),
}

/// A composable query filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// A single keyed filter (`name__icontains`, `events__id__in`, ...).
    Filter {
        /// The filter key.
        key: String,
        /// The value.
        value: FilterArg,
    },
    /// All children must match.
    And(Vec<Q>),
    /// Any child must match.
    Or(Vec<Q>),
    /// Negation.
    Not(Box<Q>),
}

impl Q {
    /// A keyed filter with a plain value.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Filter {
            key: key.into(),
            value: FilterArg::Value(value.into()),
        }
    }

    /// A keyed filter whose value is a model instance.
    pub fn instance(key: impl Into<String>, instance: InstanceRef) -> Self {
        Self::Filter {
            key: key.into(),
            value: FilterArg::Instance(instance),
        }
    }

    /// Returns `true` for an empty AND/OR.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.is_empty(),
            _ => false,
        }
    }
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Q {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

//! Core error types for terrapin.
//!
//! This module provides the error enum [`TerrapinError`] shared by every
//! crate in the workspace, together with the structured [`ConversionError`]
//! produced when a value cannot be converted to or from its database
//! representation.
//!
//! Error messages are part of the public contract: callers (and the test
//! suite) match on message content, so wording should only change
//! deliberately.

use std::fmt;

use thiserror::Error;

/// The kind of failure encountered while converting a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionErrorKind {
    /// The value has the wrong shape for the field type.
    InvalidType,
    /// The value is syntactically malformed (bad JSON, bad UUID text, ...).
    Malformed,
    /// The value exceeds a declared bound such as `max_length`.
    OutOfRange,
    /// NULL was supplied for a non-nullable field.
    NullNotAllowed,
}

impl fmt::Display for ConversionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InvalidType => "invalid type",
            Self::Malformed => "malformed value",
            Self::OutOfRange => "value out of range",
            Self::NullNotAllowed => "null not allowed",
        };
        f.write_str(label)
    }
}

/// A structured value conversion failure.
///
/// Returned by field conversions instead of signalling through panics, so
/// that callers decide whether to propagate or fall back to a default.
///
/// # Examples
///
/// ```
/// use terrapin_core::error::{ConversionError, ConversionErrorKind};
///
/// let err = ConversionError::new(ConversionErrorKind::Malformed, "data", "{not json");
/// assert_eq!(err.field, "data");
/// assert!(err.to_string().contains("data"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    /// What went wrong.
    pub kind: ConversionErrorKind,
    /// The field whose value failed to convert.
    pub field: String,
    /// A rendering of the offending value.
    pub value: String,
    /// Optional extra detail from the underlying parser.
    pub detail: Option<String>,
}

impl ConversionError {
    /// Creates a conversion error for the given field and offending value.
    pub fn new(
        kind: ConversionErrorKind,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            field: field.into(),
            value: value.into(),
            detail: None,
        }
    }

    /// Attaches parser detail to the error.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for field '{}': {}",
            self.kind, self.field, self.value
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConversionError {}

/// The primary error type for terrapin.
///
/// Configuration problems are detected while models are declared and
/// resolved; everything else is raised per operation and never poisons the
/// shared model registry.
#[derive(Error, Debug)]
pub enum TerrapinError {
    // ── Declaration / initialisation errors ──────────────────────────

    /// Bad model declarations, unresolvable references, cyclic schemas,
    /// missing configuration sections and similar static problems.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Invalid parameters passed to a query-building call.
    #[error("Params error: {0}")]
    ParamsError(String),

    // ── Value errors ─────────────────────────────────────────────────

    /// A value could not be converted to or from its database form.
    #[error("Field error: {0}")]
    FieldError(ConversionError),

    // ── ORM runtime errors ───────────────────────────────────────────

    /// Runtime misuse or a database-level failure.
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// A constraint violation reported by the database engine.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// A relation was accessed before it was fetched.
    #[error("No values fetched: {0}")]
    NoValuesFetched(String),

    /// `.get()` matched zero rows.
    #[error("Does not exist: {0}")]
    DoesNotExist(String),

    /// `.get()` matched more than one row.
    #[error("Multiple objects returned: {0}")]
    MultipleObjectsReturned(String),

    /// A transaction was committed or rolled back twice.
    #[error("Transaction management error: {0}")]
    TransactionManagementError(String),

    // ── Misc ─────────────────────────────────────────────────────────

    /// An IO error (reading configuration files, opening databases).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TerrapinError {
    /// Returns `true` for errors that belong to the operational family.
    ///
    /// `IntegrityError` and `NoValuesFetched` are refinements of
    /// `OperationalError`, so code that handles "any runtime database
    /// failure" can branch on this instead of listing variants.
    pub const fn is_operational(&self) -> bool {
        matches!(
            self,
            Self::OperationalError(_) | Self::IntegrityError(_) | Self::NoValuesFetched(_)
        )
    }

    /// Returns `true` for declaration-time configuration errors.
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::ConfigurationError(_))
    }

    /// Shorthand for building a [`TerrapinError::ConfigurationError`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }

    /// Shorthand for building a [`TerrapinError::OperationalError`].
    pub fn operational(message: impl Into<String>) -> Self {
        Self::OperationalError(message.into())
    }
}

impl From<ConversionError> for TerrapinError {
    fn from(err: ConversionError) -> Self {
        Self::FieldError(err)
    }
}

/// A convenience type alias for results using [`TerrapinError`].
pub type TerrapinResult<T> = Result<T, TerrapinError>;

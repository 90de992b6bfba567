//! Data field descriptors.
//!
//! A [`FieldDef`] describes one column of a model: its semantic
//! [`FieldType`], nullability, uniqueness, indexing, default and column
//! name. Fields also own the value conversions between caller-facing values
//! and their database representation; conversions return a structured
//! [`ConversionError`] instead of failing silently.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use terrapin_core::{ConversionError, ConversionErrorKind, TerrapinError, TerrapinResult};

use crate::value::Value;

/// The semantic type of a data field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// 16-bit signed integer.
    SmallInt,
    /// Variable-length string with a max length.
    Char {
        /// Maximum number of characters.
        max_length: usize,
    },
    /// Unlimited-length text.
    Text,
    /// Boolean.
    Bool,
    /// Fixed-precision decimal number.
    Decimal {
        /// Maximum total digits.
        max_digits: u32,
        /// Digits after the decimal point.
        decimal_places: u32,
    },
    /// Date and time.
    DateTime {
        /// Set to the current time on every save.
        auto_now: bool,
        /// Set to the current time when first inserted.
        auto_now_add: bool,
    },
    /// Date without time.
    Date,
    /// A time delta, stored as microseconds.
    TimeDelta,
    /// 64-bit floating-point number.
    Float,
    /// JSON document.
    Json,
    /// UUID.
    Uuid,
    /// Raw binary data.
    Binary,
}

/// The field type without its parameters, used to key per-dialect tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemanticKind {
    Int,
    BigInt,
    SmallInt,
    Char,
    Text,
    Bool,
    Decimal,
    DateTime,
    Date,
    TimeDelta,
    Float,
    Json,
    Uuid,
    Binary,
}

impl FieldType {
    /// A `Char` type with the given max length.
    pub const fn char(max_length: usize) -> Self {
        Self::Char { max_length }
    }

    /// A `Decimal` type with the given precision and scale.
    pub const fn decimal(max_digits: u32, decimal_places: u32) -> Self {
        Self::Decimal {
            max_digits,
            decimal_places,
        }
    }

    /// A plain `DateTime` type.
    pub const fn datetime() -> Self {
        Self::DateTime {
            auto_now: false,
            auto_now_add: false,
        }
    }

    /// Returns the parameterless kind of this type.
    pub const fn kind(&self) -> SemanticKind {
        match self {
            Self::Int => SemanticKind::Int,
            Self::BigInt => SemanticKind::BigInt,
            Self::SmallInt => SemanticKind::SmallInt,
            Self::Char { .. } => SemanticKind::Char,
            Self::Text => SemanticKind::Text,
            Self::Bool => SemanticKind::Bool,
            Self::Decimal { .. } => SemanticKind::Decimal,
            Self::DateTime { .. } => SemanticKind::DateTime,
            Self::Date => SemanticKind::Date,
            Self::TimeDelta => SemanticKind::TimeDelta,
            Self::Float => SemanticKind::Float,
            Self::Json => SemanticKind::Json,
            Self::Uuid => SemanticKind::Uuid,
            Self::Binary => SemanticKind::Binary,
        }
    }

    /// Returns `true` for the integer types (the ones that can auto-increment).
    pub const fn is_integer(&self) -> bool {
        matches!(self, Self::Int | Self::BigInt | Self::SmallInt)
    }

    /// Whether LIKE-style lookups make sense on this type.
    pub const fn is_textual(&self) -> bool {
        matches!(self, Self::Char { .. } | Self::Text | Self::Uuid)
    }

    /// The public type name, as shown in model descriptions.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int => "IntField",
            Self::BigInt => "BigIntField",
            Self::SmallInt => "SmallIntField",
            Self::Char { .. } => "CharField",
            Self::Text => "TextField",
            Self::Bool => "BooleanField",
            Self::Decimal { .. } => "DecimalField",
            Self::DateTime { .. } => "DatetimeField",
            Self::Date => "DateField",
            Self::TimeDelta => "TimeDeltaField",
            Self::Float => "FloatField",
            Self::Json => "JSONField",
            Self::Uuid => "UUIDField",
            Self::Binary => "BinaryField",
        }
    }

    /// The caller-facing value type name.
    pub const fn value_type(&self) -> &'static str {
        match self {
            Self::Int | Self::BigInt | Self::SmallInt => "int",
            Self::Char { .. } | Self::Text => "str",
            Self::Bool => "bool",
            Self::Decimal { .. } => "decimal",
            Self::DateTime { .. } => "datetime",
            Self::Date => "date",
            Self::TimeDelta => "timedelta",
            Self::Float => "float",
            Self::Json => "json",
            Self::Uuid => "uuid",
            Self::Binary => "bytes",
        }
    }
}

/// A field default: either a literal or a named zero-argument generator.
#[derive(Debug, Clone)]
pub enum FieldDefault {
    /// A literal value.
    Value(Value),
    /// A generator called each time a new instance is built.
    Callable {
        /// A display name for descriptions.
        name: &'static str,
        /// The generator.
        generate: fn() -> Value,
    },
}

impl FieldDefault {
    /// Produces the default value.
    pub fn produce(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Callable { generate, .. } => generate(),
        }
    }

    /// A JSON rendering: literals as-is, generators by name.
    pub fn describe(&self) -> serde_json::Value {
        match self {
            Self::Value(value) => value.to_json(),
            Self::Callable { name, .. } => serde_json::Value::String(format!("<function {name}>")),
        }
    }
}

/// A single data column of a model.
///
/// # Examples
///
/// ```
/// use terrapin_db::fields::{FieldDef, FieldType};
///
/// let name = FieldDef::new("name", FieldType::char(255)).unique();
/// assert_eq!(name.column_name(), "name");
/// assert!(name.unique);
///
/// let created = FieldDef::new("created", FieldType::datetime()).column("created_at");
/// assert_eq!(created.column_name(), "created_at");
/// ```
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The attribute name.
    pub name: String,
    /// The semantic type.
    pub field_type: FieldType,
    /// Whether NULL is allowed.
    pub null: bool,
    /// Whether values must be unique.
    pub unique: bool,
    /// Whether an index is created for this column.
    pub db_index: bool,
    /// Whether this is the primary key.
    pub primary_key: bool,
    /// Whether the database generates the value (auto-increment).
    pub generated: bool,
    /// The default applied to new instances.
    pub default: Option<FieldDefault>,
    /// Column name override.
    pub db_column: Option<String>,
    /// Free-form description, emitted as a column comment.
    pub description: Option<String>,
    /// For key columns synthesized from a relation: the relation's name.
    pub reference: Option<String>,
}

impl FieldDef {
    /// Creates a nullable-false, non-unique field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            null: false,
            unique: false,
            db_index: false,
            primary_key: false,
            generated: false,
            default: None,
            db_column: None,
            description: None,
            reference: None,
        }
    }

    /// The auto-increment `id` primary key synthesized for models without one.
    pub fn auto_id() -> Self {
        Self::new("id", FieldType::Int).primary_key().generated()
    }

    /// Marks the field as the primary key (implies unique and indexed).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self.db_index = true;
        self
    }

    /// Marks the field as database-generated.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Allows NULL.
    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Requires unique values.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Requests an index.
    pub fn db_index(mut self) -> Self {
        self.db_index = true;
        self
    }

    /// Sets a literal default.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    /// Sets a generated default.
    pub fn default_fn(mut self, name: &'static str, generate: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Callable { name, generate });
        self
    }

    /// Overrides the column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.db_column = Some(column.into());
        self
    }

    /// Sets the description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// The database column name.
    pub fn column_name(&self) -> &str {
        self.db_column.as_deref().unwrap_or(&self.name)
    }

    /// Checks type parameters for a field of the given model.
    pub fn validate(&self, model: &str) -> TerrapinResult<()> {
        match self.field_type {
            FieldType::Char { max_length } if max_length < 1 => {
                Err(TerrapinError::configuration(format!(
                    "'max_length' must be >= 1 for field '{}' of model {model}",
                    self.name
                )))
            }
            FieldType::Decimal { max_digits, .. } if max_digits < 1 => {
                Err(TerrapinError::configuration(format!(
                    "'max_digits' must be >= 1 for field '{}' of model {model}",
                    self.name
                )))
            }
            FieldType::Decimal {
                max_digits,
                decimal_places,
            } if decimal_places > max_digits => Err(TerrapinError::configuration(format!(
                "'decimal_places' must not exceed 'max_digits' for field '{}' of model {model}",
                self.name
            ))),
            _ if self.generated && !self.field_type.is_integer() => {
                Err(TerrapinError::configuration(format!(
                    "Field '{}' of model {model} is generated but not an integer field",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }

    fn error(&self, kind: ConversionErrorKind, value: &Value) -> ConversionError {
        ConversionError::new(kind, self.name.clone(), value.to_string())
    }

    /// Converts a caller-supplied value into the canonical value for this
    /// field, ready to be bound as a query parameter.
    pub fn to_db_value(&self, value: &Value) -> Result<Value, ConversionError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &self.field_type {
            FieldType::Int | FieldType::BigInt | FieldType::SmallInt => {
                let int = self.coerce_int(value)?;
                self.check_int_range(int, value)?;
                Ok(Value::Int(int))
            }
            FieldType::Char { max_length } => {
                let text = self.coerce_text(value)?;
                if text.chars().count() > *max_length {
                    return Err(self
                        .error(ConversionErrorKind::OutOfRange, value)
                        .with_detail(format!("longer than max_length {max_length}")));
                }
                Ok(Value::String(text))
            }
            FieldType::Text => Ok(Value::String(self.coerce_text(value)?)),
            FieldType::Bool => self.coerce_bool(value).map(Value::Bool),
            FieldType::Decimal {
                max_digits,
                decimal_places,
            } => {
                let raw = match value {
                    Value::Int(i) => i.to_string(),
                    Value::Float(f) => f.to_string(),
                    Value::String(s) => s.clone(),
                    other => return Err(self.error(ConversionErrorKind::InvalidType, other)),
                };
                self.normalize_decimal(&raw, *max_digits, *decimal_places, value)
                    .map(Value::String)
            }
            FieldType::DateTime { .. } => self.coerce_datetime(value),
            FieldType::Date => match value {
                Value::Date(_) => Ok(value.clone()),
                Value::DateTime(dt) => Ok(Value::Date(dt.date())),
                Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|e| {
                        self.error(ConversionErrorKind::Malformed, value)
                            .with_detail(e.to_string())
                    }),
                other => Err(self.error(ConversionErrorKind::InvalidType, other)),
            },
            FieldType::TimeDelta => match value {
                Value::Duration(_) => Ok(value.clone()),
                Value::Int(micros) => Ok(Value::Duration(chrono::Duration::microseconds(*micros))),
                other => Err(self.error(ConversionErrorKind::InvalidType, other)),
            },
            FieldType::Float => match value {
                Value::Float(_) => Ok(value.clone()),
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::String(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|e| {
                    self.error(ConversionErrorKind::Malformed, value)
                        .with_detail(e.to_string())
                }),
                other => Err(self.error(ConversionErrorKind::InvalidType, other)),
            },
            FieldType::Json => match value {
                Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                    .map(Value::Json)
                    .map_err(|e| {
                        self.error(ConversionErrorKind::Malformed, value)
                            .with_detail(e.to_string())
                    }),
                other => Ok(Value::Json(other.to_json())),
            },
            FieldType::Uuid => self.coerce_uuid(value),
            FieldType::Binary => match value {
                Value::Bytes(_) => Ok(value.clone()),
                Value::String(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
                other => Err(self.error(ConversionErrorKind::InvalidType, other)),
            },
        }
    }

    /// Converts a raw database cell into the canonical value for this field.
    pub fn to_python_value(&self, value: Value) -> Result<Value, ConversionError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &self.field_type {
            FieldType::Bool => self.coerce_bool(&value).map(Value::Bool),
            FieldType::Int | FieldType::BigInt | FieldType::SmallInt => {
                self.coerce_int(&value).map(Value::Int)
            }
            FieldType::Char { .. } | FieldType::Text => match value {
                Value::String(_) => Ok(value),
                other => Ok(Value::String(other.to_string())),
            },
            FieldType::Decimal { decimal_places, .. } => match &value {
                Value::Float(f) => Ok(Value::String(format!(
                    "{:.*}",
                    *decimal_places as usize,
                    f
                ))),
                Value::Int(i) if *decimal_places > 0 => Ok(Value::String(format!(
                    "{i}.{}",
                    "0".repeat(*decimal_places as usize)
                ))),
                Value::Int(i) => Ok(Value::String(i.to_string())),
                Value::String(_) => Ok(value),
                other => Err(self.error(ConversionErrorKind::InvalidType, other)),
            },
            FieldType::DateTime { .. } => self.coerce_datetime(&value),
            FieldType::TimeDelta => match value {
                Value::Int(micros) => Ok(Value::Duration(chrono::Duration::microseconds(micros))),
                Value::Duration(_) => Ok(value),
                other => Err(self.error(ConversionErrorKind::InvalidType, &other)),
            },
            FieldType::Float => match value {
                Value::Int(i) => Ok(Value::Float(i as f64)),
                other => self.to_db_value(&other),
            },
            FieldType::Binary => match value {
                Value::Bytes(_) => Ok(value),
                Value::String(s) => Ok(Value::Bytes(s.into_bytes())),
                other => Err(self.error(ConversionErrorKind::InvalidType, &other)),
            },
            FieldType::Uuid => match &value {
                Value::Bytes(bytes) => uuid::Uuid::from_slice(bytes)
                    .map(Value::Uuid)
                    .map_err(|e| {
                        self.error(ConversionErrorKind::Malformed, &value)
                            .with_detail(e.to_string())
                    }),
                _ => self.coerce_uuid(&value),
            },
            FieldType::Json | FieldType::Date => self.to_db_value(&value),
        }
    }

    fn coerce_int(&self, value: &Value) -> Result<i64, ConversionError> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
            Value::String(s) => s.trim().parse::<i64>().map_err(|e| {
                self.error(ConversionErrorKind::Malformed, value)
                    .with_detail(e.to_string())
            }),
            other => Err(self.error(ConversionErrorKind::InvalidType, other)),
        }
    }

    fn check_int_range(&self, int: i64, value: &Value) -> Result<(), ConversionError> {
        let (min, max) = match self.field_type {
            FieldType::SmallInt => (i64::from(i16::MIN), i64::from(i16::MAX)),
            FieldType::Int => (i64::from(i32::MIN), i64::from(i32::MAX)),
            _ => (i64::MIN, i64::MAX),
        };
        if int < min || int > max {
            return Err(self
                .error(ConversionErrorKind::OutOfRange, value)
                .with_detail(format!("expected {min}..={max}")));
        }
        Ok(())
    }

    fn coerce_text(&self, value: &Value) -> Result<String, ConversionError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Bytes(_) | Value::List(_) | Value::Json(_) => {
                Err(self.error(ConversionErrorKind::InvalidType, value))
            }
            other => Ok(other.to_string()),
        }
    }

    fn coerce_bool(&self, value: &Value) -> Result<bool, ConversionError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::String(s) => match s.to_lowercase().as_str() {
                "1" | "true" | "t" => Ok(true),
                "0" | "false" | "f" => Ok(false),
                _ => Err(self.error(ConversionErrorKind::Malformed, value)),
            },
            other => Err(self.error(ConversionErrorKind::InvalidType, other)),
        }
    }

    fn coerce_uuid(&self, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::Uuid(_) => Ok(value.clone()),
            Value::String(s) => uuid::Uuid::parse_str(s).map(Value::Uuid).map_err(|e| {
                self.error(ConversionErrorKind::Malformed, value)
                    .with_detail(e.to_string())
            }),
            other => Err(self.error(ConversionErrorKind::InvalidType, other)),
        }
    }

    fn coerce_datetime(&self, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::DateTime(_) | Value::DateTimeTz(_) => Ok(value.clone()),
            Value::Date(d) => Ok(Value::DateTime(d.and_time(chrono::NaiveTime::MIN))),
            Value::String(s) => parse_datetime(s).ok_or_else(|| {
                self.error(ConversionErrorKind::Malformed, value)
            }),
            other => Err(self.error(ConversionErrorKind::InvalidType, other)),
        }
    }

    fn normalize_decimal(
        &self,
        raw: &str,
        max_digits: u32,
        decimal_places: u32,
        original: &Value,
    ) -> Result<String, ConversionError> {
        let number: f64 = raw.trim().parse().map_err(|_| {
            self.error(ConversionErrorKind::Malformed, original)
        })?;
        if !number.is_finite() {
            return Err(self.error(ConversionErrorKind::Malformed, original));
        }
        let text = format!("{:.*}", decimal_places as usize, number);
        let integer_digits = text
            .trim_start_matches('-')
            .split('.')
            .next()
            .unwrap_or_default()
            .trim_start_matches('0')
            .len();
        if integer_digits + decimal_places as usize > max_digits as usize {
            return Err(self
                .error(ConversionErrorKind::OutOfRange, original)
                .with_detail(format!("exceeds {max_digits} digits")));
        }
        Ok(text)
    }
}

fn parse_datetime(text: &str) -> Option<Value> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(Value::DateTimeTz(dt.with_timezone(&Utc)));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(Value::DateTime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_id() {
        let id = FieldDef::auto_id();
        assert_eq!(id.name, "id");
        assert!(id.primary_key && id.generated && id.unique);
        assert_eq!(id.field_type, FieldType::Int);
    }

    #[test]
    fn test_validate_params() {
        let err = FieldDef::new("code", FieldType::char(0)).validate("Item").unwrap_err();
        assert!(err.to_string().contains("'max_length' must be >= 1"));
        let err = FieldDef::new("price", FieldType::decimal(4, 6))
            .validate("Item")
            .unwrap_err();
        assert!(err.to_string().contains("'decimal_places'"));
        let err = FieldDef::new("slug", FieldType::Text)
            .generated()
            .validate("Item")
            .unwrap_err();
        assert!(err.to_string().contains("not an integer field"));
        assert!(FieldDef::new("n", FieldType::Int).validate("Item").is_ok());
    }

    #[test]
    fn test_char_too_long() {
        let field = FieldDef::new("code", FieldType::char(3));
        let err = field.to_db_value(&Value::from("abcd")).unwrap_err();
        assert_eq!(err.kind, ConversionErrorKind::OutOfRange);
        assert_eq!(err.field, "code");
        assert_eq!(field.to_db_value(&Value::from("abc")).unwrap(), Value::from("abc"));
    }

    #[test]
    fn test_int_range_and_parse() {
        let small = FieldDef::new("n", FieldType::SmallInt);
        assert!(small.to_db_value(&Value::Int(40_000)).is_err());
        assert_eq!(small.to_db_value(&Value::from("12")).unwrap(), Value::Int(12));
        let err = small.to_db_value(&Value::from("twelve")).unwrap_err();
        assert_eq!(err.kind, ConversionErrorKind::Malformed);
    }

    #[test]
    fn test_json_malformed() {
        let field = FieldDef::new("data", FieldType::Json);
        let err = field.to_python_value(Value::from("{oops")).unwrap_err();
        assert_eq!(err.kind, ConversionErrorKind::Malformed);
        assert_eq!(
            field.to_python_value(Value::from("{\"a\": 1}")).unwrap(),
            Value::Json(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn test_bool_from_sqlite_int() {
        let field = FieldDef::new("active", FieldType::Bool);
        assert_eq!(field.to_python_value(Value::Int(1)).unwrap(), Value::Bool(true));
        assert_eq!(field.to_python_value(Value::Int(0)).unwrap(), Value::Bool(false));
        assert!(field.to_python_value(Value::Int(7)).is_err());
    }

    #[test]
    fn test_decimal_normalisation() {
        let field = FieldDef::new("price", FieldType::decimal(5, 2));
        assert_eq!(
            field.to_db_value(&Value::Float(3.14159)).unwrap(),
            Value::from("3.14")
        );
        assert_eq!(field.to_db_value(&Value::Int(12)).unwrap(), Value::from("12.00"));
        let err = field.to_db_value(&Value::from("12345.6")).unwrap_err();
        assert_eq!(err.kind, ConversionErrorKind::OutOfRange);
        assert_eq!(field.to_python_value(Value::Float(2.5)).unwrap(), Value::from("2.50"));
    }

    #[test]
    fn test_datetime_parsing() {
        let field = FieldDef::new("at", FieldType::datetime());
        let naive = field
            .to_python_value(Value::from("2024-03-01 10:30:00"))
            .unwrap();
        assert!(matches!(naive, Value::DateTime(_)));
        let aware = field
            .to_python_value(Value::from("2024-03-01T10:30:00+00:00"))
            .unwrap();
        assert!(matches!(aware, Value::DateTimeTz(_)));
        assert!(field.to_python_value(Value::from("yesterday")).is_err());
    }

    #[test]
    fn test_uuid_and_timedelta() {
        let field = FieldDef::new("uid", FieldType::Uuid);
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            field.to_python_value(Value::String(id.to_string())).unwrap(),
            Value::Uuid(id)
        );
        let delta = FieldDef::new("took", FieldType::TimeDelta);
        assert_eq!(
            delta.to_python_value(Value::Int(1_500_000)).unwrap(),
            Value::Duration(chrono::Duration::milliseconds(1500))
        );
    }

    #[test]
    fn test_null_passes_through() {
        let field = FieldDef::new("n", FieldType::Int);
        assert_eq!(field.to_db_value(&Value::Null).unwrap(), Value::Null);
        assert_eq!(field.to_python_value(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_defaults() {
        fn zero() -> Value {
            Value::Int(0)
        }
        let literal = FieldDef::new("n", FieldType::Int).default(5);
        assert_eq!(literal.default.as_ref().unwrap().produce(), Value::Int(5));
        let generated = FieldDef::new("n", FieldType::Int).default_fn("zero", zero);
        let default = generated.default.as_ref().unwrap();
        assert_eq!(default.produce(), Value::Int(0));
        assert_eq!(default.describe(), serde_json::json!("<function zero>"));
    }
}

//! SQL dialects.
//!
//! [`DatabaseBackendType`] identifies the SQL flavour a client speaks. The
//! compiler and the schema generator ask it for identifier quoting,
//! placeholder style, pagination syntax and case-insensitive matching, so
//! predicate and field names stay the same across engines.

use std::fmt;

use terrapin_core::config::{
    ENGINE_CLICKHOUSE, ENGINE_MSSQL, ENGINE_MYSQL, ENGINE_ORACLE, ENGINE_POSTGRES, ENGINE_SQLITE,
};
use terrapin_core::{TerrapinError, TerrapinResult};

/// The type of database backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatabaseBackendType {
    /// SQLite (`?` placeholders, `"` quoting).
    SQLite,
    /// PostgreSQL (`$1, $2, ...` placeholders).
    PostgreSQL,
    /// MySQL / MariaDB (backtick quoting).
    MySQL,
    /// Microsoft SQL Server (`[ident]` quoting, `OFFSET ... FETCH`).
    MSSQL,
    /// Oracle (`:1, :2, ...` placeholders).
    Oracle,
    /// ClickHouse (no foreign keys, `MergeTree` tables).
    ClickHouse,
}

/// How a dialect renders case-insensitive comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseInsensitiveStyle {
    /// Native `ILIKE`.
    Ilike,
    /// `UPPER(col) LIKE UPPER(value)`.
    Upper,
    /// `UPPER(CAST(col AS <type>)) LIKE UPPER(value)`.
    UpperCast(&'static str),
}

impl DatabaseBackendType {
    /// Every supported dialect.
    pub const ALL: [Self; 6] = [
        Self::SQLite,
        Self::PostgreSQL,
        Self::MySQL,
        Self::MSSQL,
        Self::Oracle,
        Self::ClickHouse,
    ];

    /// The dialect identifier string.
    pub const fn dialect(&self) -> &'static str {
        match self {
            Self::SQLite => "sqlite",
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
            Self::MSSQL => "mssql",
            Self::Oracle => "oracle",
            Self::ClickHouse => "clickhouse",
        }
    }

    /// Looks up a dialect by its identifier string.
    pub fn from_dialect(dialect: &str) -> TerrapinResult<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.dialect() == dialect)
            .ok_or_else(|| TerrapinError::configuration(format!("Unknown dialect '{dialect}'")))
    }

    /// Maps a configured engine identifier onto its dialect.
    pub fn from_engine(engine: &str) -> TerrapinResult<Self> {
        match engine {
            ENGINE_SQLITE => Ok(Self::SQLite),
            ENGINE_POSTGRES => Ok(Self::PostgreSQL),
            ENGINE_MYSQL => Ok(Self::MySQL),
            ENGINE_MSSQL => Ok(Self::MSSQL),
            ENGINE_ORACLE => Ok(Self::Oracle),
            ENGINE_CLICKHOUSE => Ok(Self::ClickHouse),
            other => Err(TerrapinError::configuration(format!(
                "Unknown database engine '{other}'"
            ))),
        }
    }

    /// Quotes an identifier.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Self::MySQL | Self::ClickHouse => format!("`{}`", ident.replace('`', "``")),
            Self::MSSQL => format!("[{}]", ident.replace(']', "]]")),
            Self::SQLite | Self::PostgreSQL | Self::Oracle => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            }
        }
    }

    /// Returns a parameter placeholder for the given 1-based index.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${index}"),
            Self::Oracle => format!(":{index}"),
            Self::SQLite | Self::MySQL | Self::MSSQL | Self::ClickHouse => "?".to_string(),
        }
    }

    /// How `iexact`/`icontains`/... are rendered.
    pub const fn case_insensitive_style(&self) -> CaseInsensitiveStyle {
        match self {
            Self::PostgreSQL | Self::ClickHouse => CaseInsensitiveStyle::Ilike,
            Self::SQLite => CaseInsensitiveStyle::Upper,
            Self::MySQL => CaseInsensitiveStyle::UpperCast("CHAR"),
            Self::MSSQL => CaseInsensitiveStyle::UpperCast("NVARCHAR(MAX)"),
            Self::Oracle => CaseInsensitiveStyle::UpperCast("VARCHAR2(4000)"),
        }
    }

    /// The `ESCAPE` clause appended to LIKE patterns, if the dialect needs one.
    pub const fn like_escape(&self) -> &'static str {
        match self {
            Self::SQLite | Self::PostgreSQL | Self::MSSQL | Self::Oracle => " ESCAPE '\\'",
            Self::MySQL | Self::ClickHouse => "",
        }
    }

    /// Whether pagination uses `OFFSET n ROWS FETCH NEXT m ROWS ONLY`.
    pub const fn uses_fetch_pagination(&self) -> bool {
        matches!(self, Self::MSSQL | Self::Oracle)
    }

    /// Renders the LIMIT/OFFSET tail of a SELECT.
    pub fn limit_offset(&self, limit: Option<usize>, offset: Option<usize>) -> String {
        if limit.is_none() && offset.is_none() {
            return String::new();
        }
        if self.uses_fetch_pagination() {
            let mut sql = format!(" OFFSET {} ROWS", offset.unwrap_or(0));
            if let Some(limit) = limit {
                sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
            }
            return sql;
        }
        let mut sql = String::new();
        match (limit, self) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Self::SQLite) => sql.push_str(" LIMIT -1"),
            (None, Self::MySQL) => sql.push_str(" LIMIT 18446744073709551615"),
            (None, _) => {}
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    /// The statement that opens a transaction.
    pub const fn begin_statement(&self) -> &'static str {
        match self {
            Self::MSSQL => "BEGIN TRANSACTION",
            Self::MySQL => "START TRANSACTION",
            _ => "BEGIN",
        }
    }

    /// Whether the engine enforces foreign key constraints.
    pub const fn supports_foreign_keys(&self) -> bool {
        !matches!(self, Self::ClickHouse)
    }
}

impl fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_round_trip() {
        for dialect in DatabaseBackendType::ALL {
            assert_eq!(
                DatabaseBackendType::from_dialect(dialect.dialect()).unwrap(),
                dialect
            );
        }
        assert!(DatabaseBackendType::from_dialect("db2").is_err());
    }

    #[test]
    fn test_from_engine() {
        assert_eq!(
            DatabaseBackendType::from_engine("terrapin.backends.sqlite").unwrap(),
            DatabaseBackendType::SQLite
        );
        let err = DatabaseBackendType::from_engine("terrapin.backends.db2").unwrap_err();
        assert!(err.to_string().contains("Unknown database engine"));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(DatabaseBackendType::SQLite.quote("event"), "\"event\"");
        assert_eq!(DatabaseBackendType::MySQL.quote("event"), "`event`");
        assert_eq!(DatabaseBackendType::MSSQL.quote("event"), "[event]");
        assert_eq!(DatabaseBackendType::PostgreSQL.quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(DatabaseBackendType::PostgreSQL.placeholder(3), "$3");
        assert_eq!(DatabaseBackendType::Oracle.placeholder(2), ":2");
        assert_eq!(DatabaseBackendType::SQLite.placeholder(9), "?");
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(
            DatabaseBackendType::SQLite.limit_offset(Some(10), Some(5)),
            " LIMIT 10 OFFSET 5"
        );
        assert_eq!(
            DatabaseBackendType::SQLite.limit_offset(None, Some(5)),
            " LIMIT -1 OFFSET 5"
        );
        assert_eq!(
            DatabaseBackendType::MSSQL.limit_offset(Some(10), None),
            " OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(DatabaseBackendType::PostgreSQL.limit_offset(None, None), "");
    }
}

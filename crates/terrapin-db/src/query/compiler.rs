//! SQL query AST and compiler.
//!
//! [`Query`] is a fully resolved SELECT: every column is qualified with the
//! table alias it comes from, joins are explicit and predicates are
//! [`WhereNode`] trees. [`SqlCompiler`] turns it into parameterized SQL for a
//! [`DatabaseBackendType`], taking quoting, placeholders, pagination and
//! case-insensitive matching from the dialect.

use terrapin_core::{TerrapinError, TerrapinResult};

use super::expressions::{AggregateFunc, Expression};
use crate::dialect::{CaseInsensitiveStyle, DatabaseBackendType};
use crate::value::Value;

/// A column qualified by the table (or alias) it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Table name or alias.
    pub table: String,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Creates a column reference.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

impl CompareOp {
    /// The SQL operator.
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// A WHERE/HAVING/ON predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    /// `lhs <op> rhs`.
    Compare {
        /// Left operand.
        lhs: Expression,
        /// Operator.
        op: CompareOp,
        /// Bound value.
        rhs: Value,
    },
    /// `lhs [NOT] IN (...)`.
    In {
        /// Left operand.
        lhs: Expression,
        /// Candidate values.
        values: Vec<Value>,
        /// `NOT IN` when true.
        negated: bool,
    },
    /// `lhs BETWEEN low AND high`.
    Between {
        /// Left operand.
        lhs: Expression,
        /// Lower bound.
        low: Value,
        /// Upper bound.
        high: Value,
    },
    /// `lhs IS [NOT] NULL`.
    IsNull {
        /// Operand.
        lhs: Expression,
        /// `IS NOT NULL` when true.
        negated: bool,
    },
    /// `lhs LIKE pattern`, the pattern already escaped and wildcarded.
    Like {
        /// Operand.
        lhs: Expression,
        /// LIKE pattern.
        pattern: String,
        /// Case-insensitive matching.
        case_insensitive: bool,
    },
    /// `lhs [NOT] IN (SELECT ...)`.
    InSubquery {
        /// Left operand.
        lhs: Expression,
        /// The single-column subquery.
        query: Box<Query>,
        /// `NOT IN` when true.
        negated: bool,
    },
    /// `left = right` between two columns (join conditions).
    ColumnEquals(ColumnRef, ColumnRef),
    /// Conjunction; empty is always true.
    And(Vec<WhereNode>),
    /// Disjunction; empty is always false.
    Or(Vec<WhereNode>),
    /// Negation.
    Not(Box<WhereNode>),
}

/// A selected column or expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    /// The selected expression.
    pub expr: Expression,
    /// Output alias.
    pub alias: Option<String>,
}

impl SelectColumn {
    /// A plain column, selected under its own name.
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            expr: Expression::Column(ColumnRef::new(table, column)),
            alias: None,
        }
    }

    /// An aliased expression.
    pub fn aliased(expr: Expression, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

/// SQL JOIN types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN.
    Inner,
    /// LEFT JOIN.
    Left,
}

impl JoinType {
    /// Returns the SQL keyword for this join type.
    pub const fn sql_keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// The joined table.
    pub table: String,
    /// Alias the table is joined under.
    pub alias: String,
    /// Join type.
    pub join_type: JoinType,
    /// ON condition.
    pub on: WhereNode,
}

/// An ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// The ordered expression.
    pub expr: Expression,
    /// Descending when true.
    pub descending: bool,
}

/// A resolved SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The main table.
    pub table: String,
    /// Selected columns; `*` when empty.
    pub select: Vec<SelectColumn>,
    /// Joins, in order.
    pub joins: Vec<Join>,
    /// WHERE clause.
    pub where_clause: Option<WhereNode>,
    /// GROUP BY expressions.
    pub group_by: Vec<Expression>,
    /// HAVING clause.
    pub having: Option<WhereNode>,
    /// ORDER BY items.
    pub order_by: Vec<OrderBy>,
    /// LIMIT.
    pub limit: Option<usize>,
    /// OFFSET.
    pub offset: Option<usize>,
    /// SELECT DISTINCT.
    pub distinct: bool,
}

impl Query {
    /// Creates a new query for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }
}

/// A database row.
///
/// `Row` holds a list of column names and their corresponding values, and
/// provides typed access via [`get`](Row::get).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> TerrapinResult<T> {
        let value = self.get_value(column).ok_or_else(|| {
            TerrapinError::operational(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value in the given column.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Consumes the row into `(column, value)` pairs.
    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        self.columns.into_iter().zip(self.values)
    }
}

/// Converts a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> TerrapinResult<Self>;
}

fn unexpected(expected: &str, value: &Value) -> TerrapinError {
    TerrapinError::operational(format!("Expected {expected}, got {}", value.type_name()))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> TerrapinResult<Self> {
        value.as_int().ok_or_else(|| unexpected("int", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> TerrapinResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            _ => Err(unexpected("float", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> TerrapinResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(unexpected("bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> TerrapinResult<Self> {
        value
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| unexpected("str", value))
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> TerrapinResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> TerrapinResult<Self> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

/// Escapes `\`, `%` and `_` for use inside a LIKE pattern.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Translates a [`Query`] AST into parameterized SQL.
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    backend: DatabaseBackendType,
}

impl SqlCompiler {
    /// Creates a new compiler for the given backend type.
    pub const fn new(backend: DatabaseBackendType) -> Self {
        Self { backend }
    }

    /// The dialect this compiler targets.
    pub const fn backend(&self) -> DatabaseBackendType {
        self.backend
    }

    fn quote(&self, ident: &str) -> String {
        self.backend.quote(ident)
    }

    fn bind(&self, value: Value, params: &mut Vec<Value>) -> String {
        params.push(value);
        self.backend.placeholder(params.len())
    }

    /// Compiles a SELECT query into SQL and parameters.
    pub fn compile_select(&self, query: &Query) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.select_sql(query, &mut params);
        (sql, params)
    }

    fn select_sql(&self, query: &Query, params: &mut Vec<Value>) -> String {
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }

        if query.select.is_empty() {
            sql.push('*');
        } else {
            let parts: Vec<String> = query
                .select
                .iter()
                .map(|col| {
                    let expr_sql = self.expression_sql(&col.expr, params);
                    match &col.alias {
                        Some(alias) => format!("{expr_sql} {}", self.quote(alias)),
                        None => expr_sql,
                    }
                })
                .collect();
            sql.push_str(&parts.join(","));
        }

        sql.push_str(&format!(" FROM {}", self.quote(&query.table)));

        for join in &query.joins {
            sql.push_str(&format!(
                " {} {} {} ON ",
                join.join_type.sql_keyword(),
                self.quote(&join.table),
                self.quote(&join.alias)
            ));
            self.where_sql(&join.on, &mut sql, params);
        }

        if let Some(where_clause) = &query.where_clause {
            sql.push_str(" WHERE ");
            self.where_sql(where_clause, &mut sql, params);
        }

        if !query.group_by.is_empty() {
            let cols: Vec<String> = query
                .group_by
                .iter()
                .map(|e| self.expression_sql(e, params))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", cols.join(",")));
        }

        if let Some(having) = &query.having {
            sql.push_str(" HAVING ");
            self.where_sql(having, &mut sql, params);
        }

        let paginated = query.limit.is_some() || query.offset.is_some();
        if !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("{} {dir}", self.expression_sql(&o.expr, params))
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(",")));
        } else if paginated && self.backend.uses_fetch_pagination() {
            // OFFSET/FETCH is only valid after an ORDER BY.
            sql.push_str(" ORDER BY (SELECT 0)");
        }

        sql.push_str(&self.backend.limit_offset(query.limit, query.offset));
        sql
    }

    /// Compiles a `SELECT COUNT(*)` over the rows the query would return.
    pub fn compile_count(&self, query: &Query) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let needs_subquery = query.distinct
            || !query.group_by.is_empty()
            || query.limit.is_some()
            || query.offset.is_some();
        let sql = if needs_subquery {
            let inner = self.select_sql(query, &mut params);
            format!("SELECT COUNT(*) FROM ({inner}) {}", self.quote("_count"))
        } else {
            let mut counted = query.clone();
            counted.select = vec![SelectColumn {
                expr: Expression::Aggregate {
                    func: AggregateFunc::Count,
                    expr: Box::new(Expression::Star),
                    distinct: false,
                },
                alias: None,
            }];
            counted.order_by.clear();
            self.select_sql(&counted, &mut params)
        };
        (sql, params)
    }

    /// Compiles an INSERT statement. `returning` names the column whose
    /// generated value should be returned, on dialects that support it.
    pub fn compile_insert(
        &self,
        table: &str,
        values: &[(String, Value)],
        returning: Option<&str>,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("INSERT INTO {}", self.quote(table));
        if values.is_empty() {
            match self.backend {
                DatabaseBackendType::MySQL => sql.push_str(" () VALUES ()"),
                _ => sql.push_str(" DEFAULT VALUES"),
            }
        } else {
            let columns: Vec<String> = values.iter().map(|(c, _)| self.quote(c)).collect();
            let placeholders: Vec<String> = values
                .iter()
                .map(|(_, v)| self.bind(v.clone(), &mut params))
                .collect();
            sql.push_str(&format!(
                " ({}) VALUES ({})",
                columns.join(","),
                placeholders.join(",")
            ));
        }
        if let (Some(column), DatabaseBackendType::PostgreSQL) = (returning, self.backend) {
            sql.push_str(&format!(" RETURNING {}", self.quote(column)));
        }
        (sql, params)
    }

    /// Compiles an UPDATE statement.
    pub fn compile_update(
        &self,
        table: &str,
        assignments: &[(String, Expression)],
        where_clause: &WhereNode,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let set_parts: Vec<String> = assignments
            .iter()
            .map(|(column, expr)| {
                format!(
                    "{}={}",
                    self.quote(column),
                    self.expression_sql(expr, &mut params)
                )
            })
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {} WHERE ",
            self.quote(table),
            set_parts.join(",")
        );
        self.where_sql(where_clause, &mut sql, &mut params);
        (sql, params)
    }

    /// Compiles a DELETE statement.
    pub fn compile_delete(&self, table: &str, where_clause: &WhereNode) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {} WHERE ", self.quote(table));
        self.where_sql(where_clause, &mut sql, &mut params);
        (sql, params)
    }

    fn expression_sql(&self, expr: &Expression, params: &mut Vec<Value>) -> String {
        match expr {
            Expression::Column(col) => {
                format!("{}.{}", self.quote(&col.table), self.quote(&col.column))
            }
            Expression::Field(name) => self.quote(name),
            Expression::Value(value) => self.bind(value.clone(), params),
            Expression::Star => "*".to_string(),
            Expression::Aggregate {
                func,
                expr,
                distinct,
            } => {
                let inner = self.expression_sql(expr, params);
                let distinct = if *distinct { "DISTINCT " } else { "" };
                format!("{}({distinct}{inner})", func.sql_name())
            }
            Expression::Func { name, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expression_sql(a, params)).collect();
                format!("{name}({})", args.join(","))
            }
            Expression::Add(a, b) => self.binary_sql(a, "+", b, params),
            Expression::Sub(a, b) => self.binary_sql(a, "-", b, params),
            Expression::Mul(a, b) => self.binary_sql(a, "*", b, params),
            Expression::Div(a, b) => self.binary_sql(a, "/", b, params),
        }
    }

    fn binary_sql(
        &self,
        a: &Expression,
        op: &str,
        b: &Expression,
        params: &mut Vec<Value>,
    ) -> String {
        let left = self.expression_sql(a, params);
        let right = self.expression_sql(b, params);
        format!("({left}{op}{right})")
    }

    fn where_sql(&self, node: &WhereNode, sql: &mut String, params: &mut Vec<Value>) {
        match node {
            WhereNode::Compare { lhs, op, rhs } => {
                let lhs = self.expression_sql(lhs, params);
                let ph = self.bind(rhs.clone(), params);
                sql.push_str(&format!("{lhs}{}{ph}", op.sql()));
            }
            WhereNode::In {
                lhs,
                values,
                negated,
            } => {
                if values.is_empty() {
                    // IN () is invalid SQL; an empty IN matches nothing.
                    sql.push_str(if *negated { "1=1" } else { "1=0" });
                    return;
                }
                let lhs = self.expression_sql(lhs, params);
                let phs: Vec<String> = values.iter().map(|v| self.bind(v.clone(), params)).collect();
                let keyword = if *negated { "NOT IN" } else { "IN" };
                sql.push_str(&format!("{lhs} {keyword} ({})", phs.join(",")));
            }
            WhereNode::Between { lhs, low, high } => {
                let lhs = self.expression_sql(lhs, params);
                let low = self.bind(low.clone(), params);
                let high = self.bind(high.clone(), params);
                sql.push_str(&format!("{lhs} BETWEEN {low} AND {high}"));
            }
            WhereNode::IsNull { lhs, negated } => {
                let lhs = self.expression_sql(lhs, params);
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                sql.push_str(&format!("{lhs} {keyword}"));
            }
            WhereNode::Like {
                lhs,
                pattern,
                case_insensitive,
            } => {
                let lhs = self.expression_sql(lhs, params);
                let ph = self.bind(Value::String(pattern.clone()), params);
                let escape = self.backend.like_escape();
                if *case_insensitive {
                    match self.backend.case_insensitive_style() {
                        CaseInsensitiveStyle::Ilike => {
                            sql.push_str(&format!("{lhs} ILIKE {ph}{escape}"));
                        }
                        CaseInsensitiveStyle::Upper => {
                            sql.push_str(&format!("UPPER({lhs}) LIKE UPPER({ph}){escape}"));
                        }
                        CaseInsensitiveStyle::UpperCast(ty) => sql.push_str(&format!(
                            "UPPER(CAST({lhs} AS {ty})) LIKE UPPER({ph}){escape}"
                        )),
                    }
                } else {
                    sql.push_str(&format!("{lhs} LIKE {ph}{escape}"));
                }
            }
            WhereNode::InSubquery {
                lhs,
                query,
                negated,
            } => {
                let lhs = self.expression_sql(lhs, params);
                let inner = self.select_sql(query, params);
                let keyword = if *negated { "NOT IN" } else { "IN" };
                sql.push_str(&format!("{lhs} {keyword} ({inner})"));
            }
            WhereNode::ColumnEquals(left, right) => {
                sql.push_str(&format!(
                    "{}.{}={}.{}",
                    self.quote(&left.table),
                    self.quote(&left.column),
                    self.quote(&right.table),
                    self.quote(&right.column)
                ));
            }
            WhereNode::And(children) => self.join_sql(children, " AND ", "1=1", sql, params),
            WhereNode::Or(children) => self.join_sql(children, " OR ", "1=0", sql, params),
            WhereNode::Not(inner) => {
                sql.push_str("NOT (");
                self.where_sql(inner, sql, params);
                sql.push(')');
            }
        }
    }

    fn join_sql(
        &self,
        children: &[WhereNode],
        separator: &str,
        empty: &str,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) {
        match children {
            [] => sql.push_str(empty),
            [only] => self.where_sql(only, sql, params),
            _ => {
                sql.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(separator);
                    }
                    self.where_sql(child, sql, params);
                }
                sql.push(')');
            }
        }
    }
}

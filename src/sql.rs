use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// One row of `INSERT INTO events`. A NULL id gets a fresh ULID.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub id: Ulid,
    pub unit_id: UnitId,
    pub state: StateCode,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUnit {
        id: UnitId,
        default_state: StateCode,
        name: Option<String>,
    },
    DeleteUnit {
        id: UnitId,
    },
    SelectUnits,
    SelectUnit {
        id: UnitId,
    },
    InsertEvents {
        events: Vec<EventRow>,
    },
    DeleteEvents {
        unit_id: UnitId,
        state: StateCode,
        start: NaiveDate,
        end: NaiveDate,
    },
    InsertLock {
        unit_id: UnitId,
        state: StateCode,
    },
    DeleteLock {
        unit_id: UnitId,
        state: StateCode,
    },
    InsertBooking {
        id: u64,
        unit_id: UnitId,
        start: NaiveDate,
        end: NaiveDate,
        confirmed: bool,
    },
    DeleteBooking {
        id: u64,
        unit_id: UnitId,
        start: NaiveDate,
        end: NaiveDate,
        confirmed: bool,
    },
    SelectEvents {
        unit_id: UnitId,
        start: NaiveDate,
        end: NaiveDate,
    },
    SelectStates {
        unit_id: UnitId,
        start: NaiveDate,
        end: NaiveDate,
        confirmed: bool,
    },
    SelectAvailability {
        unit_id: UnitId,
        start: NaiveDate,
        end: NaiveDate,
        accepted: Vec<StateCode>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "units" => {
            let values = single_row("units", &rows)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("units", 2, values.len()));
            }
            let name = if values.len() >= 3 {
                parse_string_or_null(&values[2])?
            } else {
                None
            };
            Ok(Command::InsertUnit {
                id: parse_ulid(&values[0])?,
                default_state: parse_i64(&values[1])?,
                name,
            })
        }
        "events" => {
            let mut events = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 5 {
                    return Err(SqlError::WrongArity("events row", 5, row.len()));
                }
                let row_err = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
                events.push(EventRow {
                    id: parse_ulid_or_null(&row[0]).map_err(row_err)?.unwrap_or_else(Ulid::new),
                    unit_id: parse_ulid(&row[1]).map_err(row_err)?,
                    state: parse_i64(&row[2]).map_err(row_err)?,
                    start: parse_date(&row[3]).map_err(row_err)?,
                    end: parse_date(&row[4]).map_err(row_err)?,
                });
            }
            Ok(Command::InsertEvents { events })
        }
        "locks" => {
            let values = single_row("locks", &rows)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("locks", 2, values.len()));
            }
            Ok(Command::InsertLock {
                unit_id: parse_ulid(&values[0])?,
                state: parse_i64(&values[1])?,
            })
        }
        "bookings" => {
            let values = single_row("bookings", &rows)?;
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let confirmed = if values.len() >= 5 { parse_bool(&values[4])? } else { true };
            Ok(Command::InsertBooking {
                id: parse_u64(&values[0])?,
                unit_id: parse_ulid(&values[1])?,
                start: parse_date(&values[2])?,
                end: parse_date(&values[3])?,
                confirmed,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "units" => Ok(Command::DeleteUnit { id: filters.id()? }),
        "events" => Ok(Command::DeleteEvents {
            unit_id: filters.unit_id()?,
            state: filters.state()?,
            start: filters.start()?,
            end: filters.end()?,
        }),
        "locks" => Ok(Command::DeleteLock {
            unit_id: filters.unit_id()?,
            state: filters.state()?,
        }),
        "bookings" => Ok(Command::DeleteBooking {
            id: filters.booking_id()?,
            unit_id: filters.unit_id()?,
            start: filters.start()?,
            end: filters.end()?,
            confirmed: filters.confirmed.unwrap_or(true),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "units" if filters.id.is_some() => Ok(Command::SelectUnit { id: filters.id()? }),
        "units" => Ok(Command::SelectUnits),
        "events" => Ok(Command::SelectEvents {
            unit_id: filters.unit_id()?,
            start: filters.start()?,
            end: filters.end()?,
        }),
        "states" => Ok(Command::SelectStates {
            unit_id: filters.unit_id()?,
            start: filters.start()?,
            end: filters.end()?,
            confirmed: filters.confirmed.unwrap_or(false),
        }),
        "availability" => Ok(Command::SelectAvailability {
            unit_id: filters.unit_id()?,
            start: filters.start()?,
            end: filters.end()?,
            accepted: filters.states.clone().ok_or(SqlError::MissingFilter("state IN (...)"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause ──────────────────────────────────────────────

/// Column constraints collected from an AND-chain of comparisons.
///
/// `start_date` accepts `=` or `>=`, `end_date` accepts `=` or `<=`.
#[derive(Debug, Default)]
struct Filters {
    id: Option<Expr>,
    unit_id: Option<UnitId>,
    state: Option<StateCode>,
    states: Option<Vec<StateCode>>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    confirmed: Option<bool>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner)?,
            Expr::BinaryOp { left, op, right } => {
                let col = expr_column_name(left);
                match (op, col.as_deref()) {
                    (ast::BinaryOperator::And, _) => {
                        self.collect(left)?;
                        self.collect(right)?;
                    }
                    (ast::BinaryOperator::Eq, Some("id")) => self.id = Some((**right).clone()),
                    (ast::BinaryOperator::Eq, Some("unit_id")) => self.unit_id = Some(parse_ulid(right)?),
                    (ast::BinaryOperator::Eq, Some("state")) => self.state = Some(parse_i64(right)?),
                    (ast::BinaryOperator::Eq, Some("confirmed")) => self.confirmed = Some(parse_bool(right)?),
                    (ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq, Some("start_date")) => {
                        self.start = Some(parse_date(right)?)
                    }
                    (ast::BinaryOperator::Eq | ast::BinaryOperator::LtEq, Some("end_date")) => {
                        self.end = Some(parse_date(right)?)
                    }
                    _ => return Err(SqlError::Unsupported(format!("filter: {expr}"))),
                }
            }
            Expr::InList { expr: col, list, negated: false } if expr_column_name(col).as_deref() == Some("state") => {
                let states = list.iter().map(parse_i64).collect::<Result<Vec<_>, _>>()?;
                self.states = Some(states);
            }
            _ => return Err(SqlError::Unsupported(format!("filter: {expr}"))),
        }
        Ok(())
    }

    fn id(&self) -> Result<UnitId, SqlError> {
        parse_ulid(self.id.as_ref().ok_or(SqlError::MissingFilter("id"))?)
    }

    fn booking_id(&self) -> Result<u64, SqlError> {
        parse_u64(self.id.as_ref().ok_or(SqlError::MissingFilter("id"))?)
    }

    fn unit_id(&self) -> Result<UnitId, SqlError> {
        self.unit_id.ok_or(SqlError::MissingFilter("unit_id"))
    }

    fn state(&self) -> Result<StateCode, SqlError> {
        self.state.ok_or(SqlError::MissingFilter("state"))
    }

    fn start(&self) -> Result<NaiveDate, SqlError> {
        self.start.ok_or(SqlError::MissingFilter("start_date"))
    }

    fn end(&self) -> Result<NaiveDate, SqlError> {
        self.end.ok_or(SqlError::MissingFilter("end_date"))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn single_row<'a>(table: &'static str, rows: &'a [Vec<Expr>]) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!("multi-row INSERT into {table}"))),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} is negative")))
}

/// ISO `YYYY-MM-DD` string.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected date string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

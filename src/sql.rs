use std::collections::BTreeSet;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::ledger::ReportFilter;
use crate::ledger::lifecycle::parse_date;
use crate::limits::MAX_BATCH_ROWS;
use crate::model::*;
use crate::schema::{self, SLOT_NUMBER, SchemaError};
use crate::store::Row;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectActive,
    SelectArchive,
    SelectSummary,
    SelectFirstEmpty,
    SelectReport {
        filter: ReportFilter,
    },
    SelectContract {
        slot: SlotNumber,
        source: RecordSource,
    },
    QuickAdd {
        target: SlotTarget,
        overwrite: bool,
        booking: Booking,
    },
    /// Partial Active rows; each names its slot and the columns it changes.
    ApplyEdits {
        rows: Vec<Row>,
    },
    ClearSlots {
        slots: BTreeSet<SlotNumber>,
    },
    Archive {
        slots: BTreeSet<SlotNumber>,
    },
    ClearArchive,
    Undo {
        index: usize,
    },
    Save,
    Reload,
    Reset,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(cmd) = parse_admin(trimmed)? {
        return Ok(cmd);
    }

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

/// `UNDO n`, `SAVE`, `RELOAD` and `RESET` are not SQL; they are matched
/// before the parser sees the text.
fn parse_admin(text: &str) -> Result<Option<Command>, SqlError> {
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();
    let cmd = match (first.to_uppercase().as_str(), rest.as_slice()) {
        ("SAVE", []) => Command::Save,
        ("RELOAD", []) => Command::Reload,
        ("RESET", []) => Command::Reset,
        ("UNDO", [index]) => Command::Undo {
            index: index
                .parse()
                .map_err(|_| SqlError::Parse(format!("bad archive index: {index}")))?,
        },
        ("UNDO", _) => return Err(SqlError::Parse("usage: UNDO <archive index>".into())),
        _ => return Ok(None),
    };
    Ok(Some(cmd))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    let rows = extract_all_insert_rows(insert)?;
    if rows.len() > MAX_BATCH_ROWS {
        return Err(SqlError::TooManyRows(rows.len()));
    }
    for row in &rows {
        if !columns.is_empty() && row.len() != columns.len() {
            return Err(SqlError::WrongArity(columns.len(), row.len()));
        }
    }

    match table.as_str() {
        "bookings" => {
            if columns.is_empty() {
                return Err(SqlError::MissingColumnList("bookings"));
            }
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("INSERT INTO bookings takes one row".into()));
            }
            parse_quick_add(&columns, &rows[0])
        }
        "active" => {
            if !columns.iter().any(|c| c == SLOT_NUMBER) {
                return Err(SqlError::MissingColumnList("active"));
            }
            let mut edits = Vec::with_capacity(rows.len());
            for values in &rows {
                let mut row = Row::new();
                for (column, expr) in columns.iter().zip(values) {
                    if column != SLOT_NUMBER && !schema::is_booking_column(column) {
                        return Err(SchemaError::UnknownColumn(column.clone()).into());
                    }
                    row.insert(column.clone(), cell_text(expr)?.unwrap_or_default());
                }
                edits.push(row);
            }
            Ok(Command::ApplyEdits { rows: edits })
        }
        "archive" => {
            if !(columns.is_empty() || columns == [SLOT_NUMBER]) {
                return Err(SqlError::Unsupported("INSERT INTO archive takes only slot_number".into()));
            }
            let mut slots = BTreeSet::new();
            for values in &rows {
                match values.as_slice() {
                    [expr] => {
                        slots.insert(parse_u32(expr)?);
                    }
                    other => return Err(SqlError::WrongArity(1, other.len())),
                }
            }
            Ok(Command::Archive { slots })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_quick_add(columns: &[String], values: &[Expr]) -> Result<Command, SqlError> {
    let mut target = SlotTarget::Auto;
    let mut overwrite = false;
    let mut booking = Booking::default();

    for (column, expr) in columns.iter().zip(values) {
        match column.as_str() {
            SLOT_NUMBER => {
                target = match cell_text(expr)? {
                    None => SlotTarget::Auto,
                    Some(s) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("auto") => SlotTarget::Auto,
                    Some(s) => SlotTarget::Number(
                        s.trim()
                            .parse()
                            .map_err(|_| SqlError::Parse(format!("bad slot number: {s}")))?,
                    ),
                };
            }
            "overwrite" => overwrite = parse_bool(expr)?,
            other => {
                let text = cell_text(expr)?.unwrap_or_default();
                schema::set_booking_cell(&mut booking, other, &text)?;
            }
        }
    }
    Ok(Command::QuickAdd {
        target,
        overwrite,
        booking,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "active" => {
            let selection = delete.selection.as_ref().ok_or(SqlError::MissingFilter(SLOT_NUMBER))?;
            Ok(Command::ClearSlots {
                slots: extract_slot_set(selection)?,
            })
        }
        "archive" => match &delete.selection {
            None => Ok(Command::ClearArchive),
            Some(_) => Err(SqlError::Unsupported(
                "DELETE FROM archive clears every entry; use UNDO to restore one".into(),
            )),
        },
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

    let plain = |cmd: Command| match &select.selection {
        None => Ok(cmd),
        Some(_) => Err(SqlError::Unsupported(format!("WHERE on {table}"))),
    };

    match table.as_str() {
        "active" => plain(Command::SelectActive),
        "archive" => plain(Command::SelectArchive),
        "summary" => plain(Command::SelectSummary),
        "first_empty" => plain(Command::SelectFirstEmpty),
        "report" => {
            let mut filter = ReportFilter::default();
            if let Some(selection) = &select.selection {
                extract_report_filters(selection, &mut filter)?;
            }
            Ok(Command::SelectReport { filter })
        }
        "contract" => {
            let (mut slot, mut source) = (None, RecordSource::Active);
            if let Some(selection) = &select.selection {
                extract_contract_filters(selection, &mut slot, &mut source)?;
            }
            Ok(Command::SelectContract {
                slot: slot.ok_or(SqlError::MissingFilter(SLOT_NUMBER))?,
                source,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_report_filters(expr: &Expr, filter: &mut ReportFilter) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_report_filters(inner, filter),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_report_filters(left, filter)?;
            extract_report_filters(right, filter)
        }
        Expr::Like {
            negated: false,
            expr,
            pattern,
            ..
        }
        | Expr::ILike {
            negated: false,
            expr,
            pattern,
            ..
        } if expr_column_name(expr).as_deref() == Some("client_name") => {
            let pattern = cell_text(pattern)?.unwrap_or_default();
            filter.client_contains = contains_needle(&pattern)?;
            Ok(())
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left);
            match (col.as_deref(), op) {
                (Some("start_date"), ast::BinaryOperator::GtEq) => {
                    filter.start_on_or_after = Some(parse_date_expr(right)?);
                }
                (Some("end_date"), ast::BinaryOperator::LtEq) => {
                    filter.end_on_or_before = Some(parse_date_expr(right)?);
                }
                _ => return Err(SqlError::Unsupported(format!("report filter: {expr}"))),
            }
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("report filter: {other}"))),
    }
}

/// The report only does case-insensitive "contains" matching, so the one
/// pattern shape accepted is `'%text%'` with no wildcards inside.
fn contains_needle(pattern: &str) -> Result<Option<String>, SqlError> {
    if pattern.chars().all(|c| c == '%') && !pattern.is_empty() {
        return Ok(None);
    }
    let needle = pattern
        .strip_prefix('%')
        .and_then(|p| p.strip_suffix('%'))
        .filter(|n| !n.is_empty() && !n.contains(['%', '_']))
        .ok_or_else(|| {
            SqlError::Unsupported(format!("client_name pattern {pattern:?}; use '%text%'"))
        })?;
    Ok(Some(needle.to_string()))
}

fn extract_contract_filters(
    expr: &Expr,
    slot: &mut Option<SlotNumber>,
    source: &mut RecordSource,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_contract_filters(inner, slot, source),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_contract_filters(left, slot, source)?;
                extract_contract_filters(right, slot, source)
            }
            ast::BinaryOperator::Eq => {
                match expr_column_name(left).as_deref() {
                    Some(SLOT_NUMBER) => *slot = Some(parse_u32(right)?),
                    Some("source") => {
                        let text = cell_text(right)?.unwrap_or_default();
                        *source = match text.trim().to_lowercase().as_str() {
                            "active" => RecordSource::Active,
                            "archive" => RecordSource::Archive,
                            _ => return Err(SqlError::Parse(format!("bad source: {text}"))),
                        };
                    }
                    _ => return Err(SqlError::Unsupported(format!("contract filter: {expr}"))),
                }
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("contract filter: {expr}"))),
        },
        other => Err(SqlError::Unsupported(format!("contract filter: {other}"))),
    }
}

/// `slot_number = n`, `slot_number IN (...)`, or an `OR` of those.
fn extract_slot_set(expr: &Expr) -> Result<BTreeSet<SlotNumber>, SqlError> {
    match expr {
        Expr::Nested(inner) => extract_slot_set(inner),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Or,
            right,
        } => {
            let mut slots = extract_slot_set(left)?;
            slots.extend(extract_slot_set(right)?);
            Ok(slots)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(SLOT_NUMBER) => {
            Ok(BTreeSet::from([parse_u32(right)?]))
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } if expr_column_name(expr).as_deref() == Some(SLOT_NUMBER) => {
            list.iter().map(parse_u32).collect()
        }
        _ => Err(SqlError::MissingFilter(SLOT_NUMBER)),
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
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

/// Text of a literal cell. `NULL` is `None`; numbers keep their source text.
fn cell_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(s.clone())),
            Value::Boolean(b) => Ok(Some(b.to_string())),
            _ => Err(SqlError::Parse(format!("expected literal, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(cell_text(expr)?.map(|s| format!("-{s}")))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let text = cell_text(expr)?.ok_or(SqlError::Parse("expected number, got NULL".into()))?;
    text.trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("bad slot number: {text}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match cell_text(expr)? {
        None => Ok(false),
        Some(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" | "" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let text = cell_text(expr)?.unwrap_or_default();
    parse_date(&text).ok_or_else(|| SqlError::Parse(format!("bad date: {text:?}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("INSERT INTO {0} needs an explicit column list including slot_number")]
    MissingColumnList(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("too many rows in one INSERT: {0}")]
    TooManyRows(usize),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::Schema(SchemaError::UnknownColumn(_)) => "42703",
            SqlError::Schema(_) => "22023",
            SqlError::TooManyRows(_) => "54000",
            _ => "42601",
        }
    }
}

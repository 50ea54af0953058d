use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::BillboardAuthSource;
use crate::ledger::LedgerError;
use crate::observability;
use crate::schema;
use crate::service::BoardService;
use crate::sql::{self, Command, SqlError};
use crate::store::Row;

pub struct BillboardHandler {
    service: Arc<BoardService>,
    query_parser: Arc<BillboardQueryParser>,
}

impl BillboardHandler {
    pub fn new(service: Arc<BoardService>) -> Self {
        Self {
            service,
            query_parser: Arc::new(BillboardQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        debug!("command {label}");

        let start = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let svc = &self.service;
        match cmd {
            Command::SelectActive => {
                let rows = svc.active_rows().await;
                Ok(table_response(&schema::active_columns(), &rows))
            }
            Command::SelectArchive => {
                let entries = svc.archive_entries().await;
                let rows: Vec<Row> = entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| {
                        let mut row = schema::archived_to_row(e);
                        row.insert(ENTRY.into(), i.to_string());
                        row
                    })
                    .collect();
                Ok(table_response(&archive_view_columns(), &rows))
            }
            Command::SelectSummary => {
                let s = svc.summary().await;
                let fields = Arc::new(summary_schema());
                let mut encoder = DataRowEncoder::new(fields.clone());
                for v in [
                    i64::from(s.stats.total_slots),
                    i64::from(s.stats.booked),
                    i64::from(s.stats.available),
                    s.stats.archived as i64,
                    i64::from(s.stats.expiring_soon),
                    i64::from(s.stats.expired),
                    i64::from(s.alert_days),
                ] {
                    encoder.encode_field(&v)?;
                }
                encoder.encode_field(&s.dirty)?;
                encoder.encode_field(&s.in_sync)?;
                let row = encoder.take_row();
                Ok(Response::Query(QueryResponse::new(fields, stream::iter(vec![Ok(row)]))))
            }
            Command::SelectFirstEmpty => {
                let fields = Arc::new(vec![int_field(schema::SLOT_NUMBER)]);
                let mut rows = Vec::new();
                if let Some(n) = svc.first_empty().await {
                    let mut encoder = DataRowEncoder::new(fields.clone());
                    encoder.encode_field(&i64::from(n))?;
                    rows.push(Ok(encoder.take_row()));
                }
                Ok(Response::Query(QueryResponse::new(fields, stream::iter(rows))))
            }
            Command::SelectReport { filter } => {
                let records = svc.report(&filter).await;
                let rows: Vec<Row> = records
                    .iter()
                    .map(|r| {
                        let mut row = schema::booking_to_row(&r.booking);
                        row.insert(SOURCE.into(), r.source.as_str().into());
                        row.insert(schema::SLOT_NUMBER.into(), r.slot_number.to_string());
                        row.insert(schema::STATUS.into(), r.status.to_string());
                        row.insert(schema::ARCHIVED_AT.into(), r.archived_at.clone().unwrap_or_default());
                        row
                    })
                    .collect();
                Ok(table_response(&report_columns(), &rows))
            }
            Command::SelectContract { slot, source } => {
                let doc = svc.contract(slot, source).await.map_err(ledger_err)?;
                let fields = Arc::new(contract_schema());
                let mut encoder = DataRowEncoder::new(fields.clone());
                encoder.encode_field(&doc.file_name)?;
                encoder.encode_field(&doc.content_type.to_string())?;
                encoder.encode_field(&String::from_utf8_lossy(&doc.body).into_owned())?;
                let row = encoder.take_row();
                Ok(Response::Query(QueryResponse::new(fields, stream::iter(vec![Ok(row)]))))
            }
            Command::QuickAdd {
                target,
                overwrite,
                booking,
            } => {
                let n = svc.quick_add(target, booking, overwrite).await.map_err(ledger_err)?;
                let fields = Arc::new(vec![int_field(schema::SLOT_NUMBER)]);
                let mut encoder = DataRowEncoder::new(fields.clone());
                encoder.encode_field(&i64::from(n))?;
                let row = encoder.take_row();
                Ok(Response::Query(QueryResponse::new(fields, stream::iter(vec![Ok(row)]))))
            }
            Command::ApplyEdits { rows } => {
                let n = svc.apply_edits(rows).await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(n)))
            }
            Command::ClearSlots { slots } => {
                let n = svc.clear_slots(slots).await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(n)))
            }
            Command::Archive { slots } => {
                let report = svc.archive(slots).await.map_err(ledger_err)?;
                let fields = Arc::new(vec![int_field(schema::SLOT_NUMBER), text_field("outcome")]);
                let mut rows = Vec::with_capacity(report.outcomes.len());
                for (n, outcome) in &report.outcomes {
                    let mut encoder = DataRowEncoder::new(fields.clone());
                    encoder.encode_field(&i64::from(*n))?;
                    encoder.encode_field(&outcome.as_str().to_string())?;
                    rows.push(Ok(encoder.take_row()));
                }
                Ok(Response::Query(QueryResponse::new(fields, stream::iter(rows))))
            }
            Command::ClearArchive => {
                let n = svc.clear_archive().await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(n)))
            }
            Command::Undo { index } => {
                let n = svc.undo(index).await.map_err(ledger_err)?;
                let fields = Arc::new(vec![int_field(schema::SLOT_NUMBER)]);
                let mut encoder = DataRowEncoder::new(fields.clone());
                encoder.encode_field(&i64::from(n))?;
                let row = encoder.take_row();
                Ok(Response::Query(QueryResponse::new(fields, stream::iter(vec![Ok(row)]))))
            }
            Command::Save => {
                svc.save().await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("SAVE")))
            }
            Command::Reload => {
                svc.reload().await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("RELOAD")))
            }
            Command::Reset => {
                svc.reset().await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("RESET")))
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

const ENTRY: &str = "entry";
const SOURCE: &str = "source";

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn is_int_column(name: &str) -> bool {
    matches!(name, ENTRY | schema::SLOT_NUMBER)
}

fn archive_view_columns() -> Vec<&'static str> {
    let mut cols = vec![ENTRY];
    cols.extend(schema::archive_columns());
    cols
}

fn report_columns() -> Vec<&'static str> {
    let mut cols = vec![SOURCE, schema::SLOT_NUMBER];
    cols.extend(schema::BOOKING_COLUMNS);
    cols.push(schema::STATUS);
    cols.push(schema::ARCHIVED_AT);
    cols
}

fn summary_schema() -> Vec<FieldInfo> {
    let mut fields: Vec<FieldInfo> = [
        "total_slots",
        "booked",
        "available",
        "archived",
        "expiring_soon",
        "expired",
        "alert_days",
    ]
    .into_iter()
    .map(int_field)
    .collect();
    fields.push(FieldInfo::new("dirty".into(), None, None, Type::BOOL, FieldFormat::Text));
    fields.push(FieldInfo::new("in_sync".into(), None, None, Type::BOOL, FieldFormat::Text));
    fields
}

fn contract_schema() -> Vec<FieldInfo> {
    vec![text_field("file_name"), text_field("content_type"), text_field("document")]
}

fn columns_schema(columns: &[&str]) -> Vec<FieldInfo> {
    columns
        .iter()
        .map(|c| if is_int_column(c) { int_field(c) } else { text_field(c) })
        .collect()
}

/// Encode flat rows under a fixed column list. Integer columns are sent as
/// INT8, the rest as text; a missing cell is the empty string.
fn table_response(columns: &[&str], rows: &[Row]) -> Response {
    let fields = Arc::new(columns_schema(columns));
    let data: Vec<_> = rows
        .iter()
        .map(|row| -> PgWireResult<DataRow> {
            let mut encoder = DataRowEncoder::new(fields.clone());
            for col in columns {
                let cell = row.get(*col).map(String::as_str).unwrap_or("");
                if is_int_column(col) {
                    let v: i64 = cell.parse().unwrap_or_default();
                    encoder.encode_field(&v)?;
                } else {
                    encoder.encode_field(&cell.to_string())?;
                }
            }
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(fields, stream::iter(data)))
}

/// Result schema for a statement, used when describing it. Mutations that
/// answer with rows are listed too.
fn describe_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::parse_sql(sql) {
        Ok(Command::SelectActive) => columns_schema(&schema::active_columns()),
        Ok(Command::SelectArchive) => columns_schema(&archive_view_columns()),
        Ok(Command::SelectSummary) => summary_schema(),
        Ok(Command::SelectReport { .. }) => columns_schema(&report_columns()),
        Ok(Command::SelectContract { .. }) => contract_schema(),
        Ok(Command::SelectFirstEmpty | Command::QuickAdd { .. } | Command::Undo { .. }) => {
            vec![int_field(schema::SLOT_NUMBER)]
        }
        Ok(Command::Archive { .. }) => vec![int_field(schema::SLOT_NUMBER), text_field("outcome")],
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for BillboardHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let mut responses = Vec::new();
        for statement in split_statements(query) {
            responses.push(self.run(statement).await?);
        }
        if responses.is_empty() {
            responses.push(Response::EmptyQuery);
        }
        Ok(responses)
    }
}

/// Split a simple-protocol query string on `;`, ignoring semicolons inside
/// single-quoted literals. Blank statements are dropped.
fn split_statements(query: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in query.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            ';' if !in_quote => {
                out.push(&query[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&query[start..]);
    out.into_iter().map(str::trim).filter(|s| !s.is_empty()).collect()
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BillboardQueryParser;

#[async_trait]
impl QueryParser for BillboardQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BillboardHandler {
    type Statement = String;
    type QueryParser = BillboardQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe_schema(&substitute_params(target))))
    }
}

/// Byte ranges and indexes of `$N` placeholders outside single-quoted literals.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_quote = !in_quote;
                i += 1;
            }
            b'$' if !in_quote => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// One left-to-right pass, so bound text is never rescanned.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[last..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        last = range.end;
    }
    result.push_str(&sql[last..]);
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, portal.parameters.as_slice())
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BillboardFactory {
    handler: Arc<BillboardHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<BillboardAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl BillboardFactory {
    pub fn new(service: Arc<BoardService>, password: String) -> Self {
        let auth_source = BillboardAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BillboardHandler::new(service)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BillboardFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    service: Arc<BoardService>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = BillboardFactory::new(service, password);
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

fn ledger_err(e: LedgerError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM active"), 0);
        assert_eq!(count_params("UNDO $1"), 1);
        assert_eq!(
            count_params("INSERT INTO bookings (client_name, notes) VALUES ($2, $10)"),
            10
        );
    }

    #[test]
    fn placeholders_inside_literals_are_not_params() {
        assert_eq!(count_params("INSERT INTO bookings (notes) VALUES ('$5 off')"), 0);
        assert_eq!(count_params("INSERT INTO bookings (notes, rent) VALUES ('it''s $3', $1)"), 1);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let params = [Some("2"), Some("Acme"), Some("$2 off, $1 deposit")];
        assert_eq!(
            bind_params("INSERT INTO active (slot_number, client_name, notes) VALUES ($1, $2, $3)", &params),
            "INSERT INTO active (slot_number, client_name, notes) VALUES ('2', 'Acme', '$2 off, $1 deposit')"
        );
    }

    #[test]
    fn bind_params_quotes_and_nulls() {
        let params: [Option<&str>; 2] = [Some("O'Neil"), None];
        assert_eq!(
            bind_params("VALUES ($1, $2, '$1', $3)", &params),
            "VALUES ('O''Neil', NULL, '$1', $3)"
        );
        let many: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        assert_eq!(bind_params("VALUES ($10, $1)", &many), "VALUES ('10', '1')");
    }

    #[test]
    fn split_statements_respects_quotes() {
        assert_eq!(
            split_statements("SAVE; INSERT INTO bookings (notes) VALUES ('a;b');;"),
            vec!["SAVE", "INSERT INTO bookings (notes) VALUES ('a;b')"]
        );
        assert!(split_statements("  ;  ").is_empty());
    }

    #[test]
    fn report_columns_lead_with_source() {
        let cols = report_columns();
        assert_eq!(cols[0], "source");
        assert_eq!(cols[1], "slot_number");
        assert_eq!(cols.last(), Some(&"archived_at"));
        assert_eq!(cols.len(), schema::BOOKING_COLUMNS.len() + 4);
    }

    #[test]
    fn describe_matches_command_shape() {
        assert_eq!(describe_schema("SELECT * FROM summary").len(), 9);
        assert_eq!(describe_schema("SELECT * FROM contract WHERE slot_number = 1").len(), 3);
        assert_eq!(describe_schema("SAVE").len(), 0);
        assert_eq!(
            describe_schema("SELECT * FROM active").len(),
            schema::active_columns().len()
        );
    }
}

use std::collections::{HashMap, HashSet};
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::RoomCalAuthSource;
use crate::calendar::{CalendarEvent, EventOutcome};
use crate::engine::{Booking, Engine, EngineError};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, EventRow};
use crate::tenant::TenantManager;

pub struct RoomCalHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RoomCalQueryParser>,
}

impl RoomCalHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RoomCalQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, execute and record metrics for one statement.
    async fn run_query<C: ClientInfo + Sync>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
            sql_err(e)
        })?;

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::debug!("{label} failed: {e}");
        }
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertUnit {
                id,
                default_state,
                name,
            } => {
                engine
                    .create_unit(id, name, default_state)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteUnit { id } => {
                engine.delete_unit(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectUnits => Ok(units_response(engine.list_units().await)),
            Command::SelectUnit { id } => {
                let unit = engine.get_unit_info(id).await.map_err(engine_err)?;
                Ok(units_response(vec![unit]))
            }
            Command::InsertEvents { events } => {
                let outcomes = apply_event_rows(engine, &events).await?;
                let rows = events
                    .iter()
                    .map(|row| {
                        let outcome = outcomes.get(&row.id).copied().unwrap_or(EventOutcome::WrongUnit);
                        (row.id.to_string(), row.unit_id, outcome)
                    })
                    .collect();
                Ok(outcome_response(rows))
            }
            Command::DeleteEvents {
                unit_id,
                state,
                start,
                end,
            } => {
                let event = CalendarEvent::new(unit_id, state, start, end)
                    .map_err(|e| engine_err(e.into()))?;
                let outcomes = engine
                    .remove_events(unit_id, std::slice::from_ref(&event))
                    .await
                    .map_err(engine_err)?;
                let removed = usize::from(outcomes.get(&event.id) == Some(&EventOutcome::Updated));
                Ok(Response::Execution(Tag::new("DELETE").with_rows(removed)))
            }
            Command::InsertLock { unit_id, state } => {
                engine.set_lock(unit_id, state, true).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteLock { unit_id, state } => {
                engine.set_lock(unit_id, state, false).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking {
                id,
                unit_id,
                start,
                end,
                confirmed,
            } => {
                let booking = Booking { id, unit_id, start, end, confirmed };
                let outcome = engine.save_booking(&booking).await.map_err(engine_err)?;
                Ok(outcome_response(vec![(id.to_string(), unit_id, outcome)]))
            }
            Command::DeleteBooking {
                id,
                unit_id,
                start,
                end,
                confirmed,
            } => {
                let booking = Booking { id, unit_id, start, end, confirmed };
                let outcome = engine.delete_booking(&booking).await.map_err(engine_err)?;
                Ok(outcome_response(vec![(id.to_string(), unit_id, outcome)]))
            }
            Command::SelectEvents { unit_id, start, end } => {
                let events = engine
                    .get_events(unit_id, start, end)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(events_schema());
                let rows: Vec<PgWireResult<_>> = events
                    .into_iter()
                    .map(|event| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&event.id.to_string())?;
                        encoder.encode_field(&event.unit_id.to_string())?;
                        encoder.encode_field(&event.state)?;
                        encoder.encode_field(&event.start().to_string())?;
                        encoder.encode_field(&event.end().to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectStates {
                unit_id,
                start,
                end,
                confirmed,
            } => {
                let states = engine
                    .get_states(unit_id, start, end, confirmed)
                    .await
                    .map_err(engine_err)?;
                let mut states: Vec<_> = states.into_iter().collect();
                states.sort_unstable();

                let schema = Arc::new(states_schema());
                let rows: Vec<PgWireResult<_>> = states
                    .into_iter()
                    .map(|state| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&state)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAvailability {
                unit_id,
                start,
                end,
                accepted,
            } => {
                let accepted: HashSet<StateCode> = accepted.into_iter().collect();
                let available = engine
                    .state_availability(unit_id, start, end, &accepted)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&unit_id.to_string())?;
                encoder.encode_field(&available)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

/// Group rows by unit, keeping first-seen order, and run one
/// `update_calendar` per unit.
async fn apply_event_rows(
    engine: &Engine,
    rows: &[EventRow],
) -> PgWireResult<HashMap<ulid::Ulid, EventOutcome>> {
    let mut order: Vec<UnitId> = Vec::new();
    let mut by_unit: HashMap<UnitId, Vec<CalendarEvent>> = HashMap::new();
    for row in rows {
        let event = CalendarEvent::with_id(row.id, row.unit_id, row.state, row.start, row.end)
            .map_err(|e| engine_err(e.into()))?;
        by_unit
            .entry(row.unit_id)
            .or_insert_with(|| {
                order.push(row.unit_id);
                Vec::new()
            })
            .push(event);
    }

    let mut outcomes = HashMap::with_capacity(rows.len());
    for unit_id in order {
        let events = by_unit.remove(&unit_id).unwrap_or_default();
        let unit_outcomes = engine
            .update_calendar(unit_id, &events)
            .await
            .map_err(engine_err)?;
        outcomes.extend(unit_outcomes);
    }
    Ok(outcomes)
}

fn outcome_response(rows: Vec<(String, UnitId, EventOutcome)>) -> Response {
    let schema = Arc::new(outcome_schema());
    let rows: Vec<PgWireResult<_>> = rows
        .into_iter()
        .map(|(id, unit_id, outcome)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&id)?;
            encoder.encode_field(&unit_id.to_string())?;
            encoder.encode_field(&outcome.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn units_response(units: Vec<UnitInfo>) -> Response {
    let schema = Arc::new(units_schema());
    let rows: Vec<PgWireResult<_>> = units
        .into_iter()
        .map(|unit| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&unit.id.to_string())?;
            encoder.encode_field(&unit.name)?;
            encoder.encode_field(&unit.default_state)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn units_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("default_state", Type::INT8),
    ]
}

fn outcome_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("unit_id", Type::VARCHAR),
        text_field("outcome", Type::VARCHAR),
    ]
}

fn events_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("unit_id", Type::VARCHAR),
        text_field("state", Type::INT8),
        text_field("start_date", Type::VARCHAR),
        text_field("end_date", Type::VARCHAR),
    ]
}

fn states_schema() -> Vec<FieldInfo> {
    vec![text_field("state", Type::INT8)]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("unit_id", Type::VARCHAR),
        text_field("available", Type::BOOL),
    ]
}

/// Rows a statement will return, decided from its text alone since
/// placeholders are not bound yet.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    if normalized.starts_with("SELECT") {
        if normalized.contains("FROM UNITS") {
            units_schema()
        } else if normalized.contains("FROM EVENTS") {
            events_schema()
        } else if normalized.contains("FROM STATES") {
            states_schema()
        } else if normalized.contains("FROM AVAILABILITY") {
            availability_schema()
        } else {
            vec![]
        }
    } else if normalized.starts_with("INSERT INTO EVENTS")
        || normalized.starts_with("INSERT INTO BOOKINGS")
        || normalized.starts_with("DELETE FROM BOOKINGS")
    {
        outcome_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomCalHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run_query(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomCalQueryParser;

#[async_trait]
impl QueryParser for RoomCalQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomCalHandler {
    type Statement = String;
    type QueryParser = RoomCalQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
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
        self.run_query(client, &sql).await
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Replace `$N` placeholders with bound parameters, quoted as text.
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        result = result.replace(&format!("${}", i + 1), &quote_param(param.as_deref()));
    }
    result
}

fn quote_param(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomCalFactory {
    handler: Arc<RoomCalHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RoomCalAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomCalFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = RoomCalAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomCalHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomCalFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = RoomCalFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

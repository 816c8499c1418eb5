use std::fmt::Debug;
use std::io;
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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{parse_login, ConciergeAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, Filter, SqlError};

pub struct ConciergeHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ConciergeQueryParser>,
}

impl ConciergeHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ConciergeQueryParser),
        }
    }

    /// Parse, execute and record one statement. `format` picks text or
    /// binary encoding per result column.
    async fn run<C: ClientInfo>(
        &self,
        client: &C,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Response> {
        let actor = actor_of(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(&actor, cmd, format).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        actor: &Actor,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            // ── Rooms ────────────────────────────────────────────
            Command::InsertRoom { id, number, status } => {
                engine
                    .register_room(actor, id, number, status)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("INSERT"))
            }
            Command::UpdateRoomStatus { id, status } => {
                engine
                    .set_room_status(actor, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("UPDATE"))
            }
            Command::DeleteRoom { id } => {
                engine.remove_room(actor, id).await.map_err(engine_err)?;
                Ok(affected("DELETE"))
            }

            // ── Bookings ─────────────────────────────────────────
            Command::InsertBooking(req) => {
                engine.create_booking(actor, req).await.map_err(engine_err)?;
                Ok(affected("INSERT"))
            }
            Command::TransitionBooking { id, action } => {
                engine
                    .apply_transition(actor, id, action)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("UPDATE"))
            }
            Command::ReviseBooking { id, patch } => {
                engine
                    .revise_booking(actor, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("UPDATE"))
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(actor, id).await.map_err(engine_err)?;
                Ok(affected("DELETE"))
            }

            // ── Guest access ─────────────────────────────────────
            Command::InsertGuestAccess(req) => {
                engine.grant_access(actor, req).await.map_err(engine_err)?;
                Ok(affected("INSERT"))
            }
            Command::SetAccessActive { id, active } => {
                engine
                    .set_access_active(actor, id, active)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("UPDATE"))
            }
            Command::ReviseGuestAccess { id, patch } => {
                engine
                    .revise_access(actor, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("UPDATE"))
            }
            Command::DeleteGuestAccess { id } => {
                engine.revoke_access(actor, id).await.map_err(engine_err)?;
                Ok(affected("DELETE"))
            }

            // ── Alarms ───────────────────────────────────────────
            Command::InsertAlarm(req) => {
                engine.set_alarm(actor, req).await.map_err(engine_err)?;
                Ok(affected("INSERT"))
            }
            Command::SetAlarmActive { id, active } => {
                engine
                    .set_alarm_active(actor, id, active)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("UPDATE"))
            }
            Command::ReviseAlarm { id, patch } => {
                engine
                    .revise_alarm(actor, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("UPDATE"))
            }
            Command::DeleteAlarm { id } => {
                engine.remove_alarm(actor, id).await.map_err(engine_err)?;
                Ok(affected("DELETE"))
            }

            // ── Controls ─────────────────────────────────────────
            Command::UpdateRoomControls { room_id, change } => {
                engine
                    .upsert_control(actor, room_id, change)
                    .await
                    .map_err(engine_err)?;
                Ok(affected("UPDATE"))
            }

            // ── Reads ────────────────────────────────────────────
            Command::SelectRooms { id } => {
                let rooms = match id {
                    Some(id) => vec![engine.get_room(id).await.map_err(engine_err)?],
                    None => engine.list_rooms().await,
                };
                Ok(rows(room_schema(format), &rooms, encode_room))
            }
            Command::SelectBookings(filter) => {
                let bookings = match filter {
                    Filter::All if actor.is_elevated() => engine.all_bookings(actor).await,
                    Filter::All => engine.bookings_for_user(actor, actor.user_id).await,
                    Filter::Id(id) => engine.get_booking(actor, id).await.map(|b| vec![b]),
                    Filter::Room(room) => engine.bookings_for_room(actor, room).await,
                    Filter::User(user) => engine.bookings_for_user(actor, user).await,
                    Filter::SharedWith(_) => return Err(unsupported_filter("bookings")),
                }
                .map_err(engine_err)?;
                Ok(rows(booking_schema(format), &bookings, encode_booking))
            }
            Command::SelectGuestAccess(filter) => {
                let access = match filter {
                    Filter::All if actor.is_elevated() => engine.all_access(actor).await,
                    Filter::All => self.own_access(actor).await,
                    Filter::Id(id) => engine.get_access(actor, id).await.map(|a| vec![a]),
                    Filter::Room(room) => engine.access_for_room(actor, room).await,
                    Filter::User(user) => engine.access_given_by(actor, user).await,
                    Filter::SharedWith(user) => engine.access_shared_with(actor, user).await,
                }
                .map_err(engine_err)?;
                Ok(rows(access_schema(format), &access, encode_access))
            }
            Command::SelectAlarms(filter) => {
                let alarms = match filter {
                    Filter::All if actor.is_elevated() => engine.all_alarms(actor).await,
                    Filter::All => engine.alarms_for_user(actor, actor.user_id).await,
                    Filter::Id(id) => engine.get_alarm(actor, id).await.map(|a| vec![a]),
                    Filter::Room(room) => engine.alarms_for_room(actor, room).await,
                    Filter::User(user) => engine.alarms_for_user(actor, user).await,
                    Filter::SharedWith(_) => return Err(unsupported_filter("alarms")),
                }
                .map_err(engine_err)?;
                Ok(rows(alarm_schema(format), &alarms, encode_alarm))
            }
            Command::SelectRoomControls { room_id } => {
                let controls = engine.get_controls(room_id).await.map_err(engine_err)?;
                let controls: Vec<_> = controls.into_iter().collect();
                Ok(rows(controls_schema(format), &controls, encode_controls))
            }
            Command::SelectAvailability { room_id, start, end } => {
                let slots = engine
                    .room_availability(room_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let rid = room_id.to_string();
                Ok(rows(availability_schema(format), &slots, |encoder, slot| {
                    encoder.encode_field(&rid)?;
                    encoder.encode_field(&slot.start)?;
                    encoder.encode_field(&slot.end)
                }))
            }
        }
    }

    /// A guest's unfiltered view: what they handed out and what was shared with them.
    async fn own_access(&self, actor: &Actor) -> Result<Vec<GuestAccess>, EngineError> {
        let mut out = self.engine.access_given_by(actor, actor.user_id).await?;
        for shared in self.engine.access_shared_with(actor, actor.user_id).await? {
            if !out.iter().any(|a| a.id == shared.id) {
                out.push(shared);
            }
        }
        Ok(out)
    }
}

fn actor_of<C: ClientInfo>(client: &C) -> PgWireResult<Actor> {
    client
        .metadata()
        .get("user")
        .and_then(|user| parse_login(user))
        .ok_or_else(|| user_error("28000", "no <role>:<ulid> identity on this connection".into()))
}

fn affected(tag: &str) -> Response {
    Response::Execution(Tag::new(tag).with_rows(1))
}

// ── Row encoding ─────────────────────────────────────────────────

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn ulid_text(id: Option<ulid::Ulid>) -> Option<String> {
    id.map(|id| id.to_string())
}

fn blob_text(blob: &Option<Blob>) -> Option<String> {
    blob.as_ref().map(|b| b.as_str().to_string())
}

fn encode_room(encoder: &mut DataRowEncoder, room: &RoomInfo) -> PgWireResult<()> {
    encoder.encode_field(&room.id.to_string())?;
    encoder.encode_field(&room.number)?;
    encoder.encode_field(&room.status.as_str())?;
    encoder.encode_field(&ulid_text(room.occupied_by))
}

fn encode_booking(encoder: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.room_id.to_string())?;
    encoder.encode_field(&b.user_id.to_string())?;
    encoder.encode_field(&b.stay.start)?;
    encoder.encode_field(&b.stay.end)?;
    encoder.encode_field(&b.status.as_str())?;
    encoder.encode_field(&i64::try_from(b.total_price).unwrap_or(i64::MAX))?;
    encoder.encode_field(&b.special_requests)?;
    encoder.encode_field(&b.created_at)
}

fn encode_access(encoder: &mut DataRowEncoder, a: &GuestAccess) -> PgWireResult<()> {
    encoder.encode_field(&a.id.to_string())?;
    encoder.encode_field(&a.booking_id.to_string())?;
    encoder.encode_field(&a.room_id.to_string())?;
    encoder.encode_field(&a.primary_guest_id.to_string())?;
    encoder.encode_field(&ulid_text(a.shared_with_user_id))?;
    encoder.encode_field(&a.shared_with_contact)?;
    encoder.encode_field(&a.window.start)?;
    encoder.encode_field(&a.window.end)?;
    encoder.encode_field(&blob_text(&a.temporary_key))?;
    encoder.encode_field(&a.active)
}

fn encode_alarm(encoder: &mut DataRowEncoder, a: &Alarm) -> PgWireResult<()> {
    let days: Vec<&str> = a.days.iter().map(Weekday::as_str).collect();
    encoder.encode_field(&a.id.to_string())?;
    encoder.encode_field(&a.booking_id.to_string())?;
    encoder.encode_field(&a.room_id.to_string())?;
    encoder.encode_field(&a.user_id.to_string())?;
    encoder.encode_field(&i32::from(a.time.hour))?;
    encoder.encode_field(&i32::from(a.time.minute))?;
    encoder.encode_field(&days.join(","))?;
    encoder.encode_field(&a.label)?;
    encoder.encode_field(&a.music.as_ref().map(|m| m.service.as_str()))?;
    encoder.encode_field(&a.music.as_ref().and_then(|m| m.uri.clone()))?;
    encoder.encode_field(&a.scenario)?;
    encoder.encode_field(&a.window.start)?;
    encoder.encode_field(&a.window.end)?;
    encoder.encode_field(&a.active)
}

fn encode_controls(encoder: &mut DataRowEncoder, c: &RoomControlState) -> PgWireResult<()> {
    encoder.encode_field(&c.room_id.to_string())?;
    encoder.encode_field(&blob_text(&c.lighting))?;
    encoder.encode_field(&blob_text(&c.climate))?;
    encoder.encode_field(&blob_text(&c.curtains))?;
    encoder.encode_field(&c.dnd)?;
    encoder.encode_field(&c.updated_at)?;
    encoder.encode_field(&c.changed_by.to_string())
}

// ── Schemas ──────────────────────────────────────────────────────

fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn room_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("number", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("occupied_by", Type::VARCHAR),
        ],
        format,
    )
}

fn booking_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("room_id", Type::VARCHAR),
            ("user_id", Type::VARCHAR),
            ("check_in", Type::INT8),
            ("check_out", Type::INT8),
            ("status", Type::VARCHAR),
            ("total_price", Type::INT8),
            ("special_requests", Type::VARCHAR),
            ("created_at", Type::INT8),
        ],
        format,
    )
}

fn access_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("booking_id", Type::VARCHAR),
            ("room_id", Type::VARCHAR),
            ("primary_guest_id", Type::VARCHAR),
            ("shared_with_user_id", Type::VARCHAR),
            ("shared_with_contact", Type::VARCHAR),
            ("access_start", Type::INT8),
            ("access_end", Type::INT8),
            ("temporary_key", Type::VARCHAR),
            ("active", Type::BOOL),
        ],
        format,
    )
}

fn alarm_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("booking_id", Type::VARCHAR),
            ("room_id", Type::VARCHAR),
            ("user_id", Type::VARCHAR),
            ("hour", Type::INT4),
            ("minute", Type::INT4),
            ("days", Type::VARCHAR),
            ("label", Type::VARCHAR),
            ("music_service", Type::VARCHAR),
            ("music_uri", Type::VARCHAR),
            ("scenario", Type::VARCHAR),
            ("active_from", Type::INT8),
            ("active_until", Type::INT8),
            ("active", Type::BOOL),
        ],
        format,
    )
}

fn controls_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("room_id", Type::VARCHAR),
            ("lighting", Type::VARCHAR),
            ("climate", Type::VARCHAR),
            ("curtains", Type::VARCHAR),
            ("dnd", Type::BOOL),
            ("updated_at", Type::INT8),
            ("changed_by", Type::VARCHAR),
        ],
        format,
    )
}

fn availability_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("room_id", Type::VARCHAR),
            ("start", Type::INT8),
            ("end", Type::INT8),
        ],
        format,
    )
}

/// Result columns for a statement, known before its parameters are bound.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let lower = sql.to_ascii_lowercase();
    if !lower.trim_start().starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_once(" from ")
        .and_then(|(_, rest)| {
            rest.trim_start()
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .next()
        })
        .unwrap_or_default();
    match table {
        "rooms" => room_schema(format),
        "bookings" => booking_schema(format),
        "guest_access" => access_schema(format),
        "alarms" => alarm_schema(format),
        "room_controls" => controls_schema(format),
        "availability" => availability_schema(format),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ConciergeHandler {
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
        Ok(vec![self.run(&*client, query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ConciergeQueryParser;

#[async_trait]
impl QueryParser for ConciergeQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(
            stmt,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ConciergeHandler {
    type Statement = String;
    type QueryParser = ConciergeQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&*client, &sql, &portal.result_column_format).await
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
            result_schema(&target.statement, &Format::UnifiedText),
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
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
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
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text
/// format). One left-to-right pass over the statement: bound values are
/// copied through verbatim, and `$N` inside a quoted literal is left alone.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let param = sql[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| params.get(idx));
                if let Some(param) = param {
                    out.push_str(&sql[copied..i]);
                    match param {
                        Some(value) => {
                            let text = String::from_utf8_lossy(value.as_ref());
                            out.push('\'');
                            out.push_str(&text.replace('\'', "''"));
                            out.push('\'');
                        }
                        None => out.push_str("NULL"),
                    }
                    copied = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ConciergeFactory {
    handler: Arc<ConciergeHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ConciergeAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ConciergeFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ConciergeAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ConciergeHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ConciergeFactory {
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
    factory: ConciergeFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine error kind.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(..) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Forbidden { .. } => "42501",
        EngineError::Conflict(_) => "23P01",
        EngineError::InvalidState { .. } => "55000",
        EngineError::InvalidTransition { .. } => "55P03",
        EngineError::OutOfRange { .. } => "23514",
        EngineError::InvalidField { .. } => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Unavailable(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_retryable() {
        tracing::error!(code = e.code(), "storage failure: {e}");
    } else {
        tracing::debug!(code = e.code(), "rejected: {e}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

fn unsupported_filter(table: &str) -> PgWireError {
    user_error("0A000", format!("{table} cannot be filtered by shared_with_user_id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Entity;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("UPDATE rooms SET status = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("SELECT $10, $3"), 10);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn substitute_params_quotes_and_escapes() {
        let params = vec![Some(b"O'Brien".to_vec()), None];
        assert_eq!(
            substitute_params("INSERT INTO x VALUES ($1, $2)", &params),
            "INSERT INTO x VALUES ('O''Brien', NULL)"
        );
    }

    #[test]
    fn substitute_params_handles_double_digit_indexes() {
        let params: Vec<_> = (1..=10)
            .map(|i| Some(i.to_string()))
            .collect();
        assert_eq!(substitute_params("$1 $10", &params), "'1' '10'");
    }

    #[test]
    fn bound_values_are_never_rescanned() {
        let params = vec![Some("01ROOMID".to_string()), Some("tip $1 please".to_string())];
        assert_eq!(
            substitute_params("INSERT INTO x VALUES ($1, $2)", &params),
            "INSERT INTO x VALUES ('01ROOMID', 'tip $1 please')"
        );
        let params = vec![Some("$2".to_string()), Some("it's".to_string())];
        assert_eq!(substitute_params("$2 $1", &params), "'it''s' '$2'");
    }

    #[test]
    fn placeholders_in_literals_and_unbound_indexes_stay_put() {
        let params = vec![Some("x".to_string())];
        assert_eq!(
            substitute_params("SELECT '$1', $1, $2, $0", &params),
            "SELECT '$1', 'x', $2, $0"
        );
    }

    #[test]
    fn result_schema_by_table() {
        let text = Format::UnifiedText;
        assert_eq!(result_schema("SELECT * FROM bookings WHERE id = $1", &text).len(), 9);
        assert_eq!(
            result_schema("select * from availability where room_id = $1", &text).len(),
            3
        );
        assert_eq!(result_schema("SELECT * FROM room_controls", &text).len(), 7);
        assert!(result_schema("INSERT INTO rooms (id) VALUES ($1)", &text).is_empty());
    }

    #[test]
    fn every_engine_error_has_a_distinct_sqlstate() {
        let id = Ulid::new();
        let errors = [
            EngineError::NotFound(Entity::Room, id),
            EngineError::AlreadyExists(id),
            EngineError::Forbidden { user: id, action: "x" },
            EngineError::Conflict(id),
            EngineError::InvalidState { id, reason: "x" },
            EngineError::InvalidTransition {
                id,
                from: BookingStatus::Cancelled,
                action: crate::engine::Transition::CheckIn,
            },
            EngineError::OutOfRange { window: Span::new(0, 1), stay: Span::new(0, 1) },
            EngineError::InvalidField { field: "x", reason: "y" },
            EngineError::LimitExceeded("x"),
            EngineError::Unavailable("disk".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(sqlstate).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}

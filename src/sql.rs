use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{
    AccessPatch, AlarmPatch, BookingPatch, NewAlarm, NewBooking, NewGuestAccess, Transition,
};
use crate::model::*;

/// Row filter for the listing tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// No WHERE clause.
    All,
    Id(Ulid),
    Room(Ulid),
    /// `user_id` on bookings and alarms, `primary_guest_id` on guest_access.
    User(Ulid),
    /// `shared_with_user_id` on guest_access.
    SharedWith(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        number: String,
        status: RoomStatus,
    },
    UpdateRoomStatus {
        id: Ulid,
        status: RoomStatus,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertBooking(NewBooking),
    TransitionBooking {
        id: Ulid,
        action: Transition,
    },
    ReviseBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    InsertGuestAccess(NewGuestAccess),
    SetAccessActive {
        id: Ulid,
        active: bool,
    },
    ReviseGuestAccess {
        id: Ulid,
        patch: AccessPatch,
    },
    DeleteGuestAccess {
        id: Ulid,
    },
    InsertAlarm(NewAlarm),
    SetAlarmActive {
        id: Ulid,
        active: bool,
    },
    ReviseAlarm {
        id: Ulid,
        patch: AlarmPatch,
    },
    DeleteAlarm {
        id: Ulid,
    },
    UpdateRoomControls {
        room_id: Ulid,
        change: ControlChange,
    },
    SelectRooms {
        id: Option<Ulid>,
    },
    SelectBookings(Filter),
    SelectGuestAccess(Filter),
    SelectAlarms(Filter),
    SelectRoomControls {
        room_id: Ulid,
    },
    SelectAvailability {
        room_id: Ulid,
        start: Ms,
        end: Ms,
    },
}

// Column order assumed when an INSERT omits its column list.
const ROOM_COLUMNS: &[&str] = &["id", "number", "status"];
const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "check_in",
    "check_out",
    "total_price",
    "special_requests",
];
const ACCESS_COLUMNS: &[&str] = &[
    "id",
    "booking_id",
    "access_start",
    "access_end",
    "shared_with_user_id",
    "shared_with_contact",
    "temporary_key",
];
const ALARM_COLUMNS: &[&str] = &[
    "id",
    "booking_id",
    "hour",
    "minute",
    "days",
    "label",
    "music_service",
    "music_uri",
    "scenario",
    "active_from",
    "active_until",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: &'static str,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    /// An absent column and an explicit NULL read the same.
    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.get(column).filter(|e| !is_null(e))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, columns): (&'static str, &[&str]) = match table.as_str() {
        "rooms" => ("rooms", ROOM_COLUMNS),
        "bookings" => ("bookings", BOOKING_COLUMNS),
        "guest_access" => ("guest_access", ACCESS_COLUMNS),
        "alarms" => ("alarms", ALARM_COLUMNS),
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let values = extract_insert_values(insert)?;
    let row = bind_row(table, columns, insert, values)?;

    match table {
        "rooms" => Ok(Command::InsertRoom {
            id: parse_ulid_expr(row.require("id")?)?,
            number: parse_text(row.require("number")?)?,
            status: match row.optional("status") {
                Some(e) => parse_room_status(e)?,
                None => RoomStatus::Available,
            },
        }),
        "bookings" => Ok(Command::InsertBooking(NewBooking {
            id: parse_ulid_expr(row.require("id")?)?,
            room_id: parse_ulid_expr(row.require("room_id")?)?,
            check_in: parse_i64_expr(row.require("check_in")?)?,
            check_out: parse_i64_expr(row.require("check_out")?)?,
            total_price: parse_u64(row.require("total_price")?)?,
            special_requests: row.optional("special_requests").map(parse_text).transpose()?,
        })),
        "guest_access" => Ok(Command::InsertGuestAccess(NewGuestAccess {
            id: parse_ulid_expr(row.require("id")?)?,
            booking_id: parse_ulid_expr(row.require("booking_id")?)?,
            access_start: parse_i64_expr(row.require("access_start")?)?,
            access_end: parse_i64_expr(row.require("access_end")?)?,
            shared_with_user_id: row
                .optional("shared_with_user_id")
                .map(parse_ulid_expr)
                .transpose()?,
            shared_with_contact: row.optional("shared_with_contact").map(parse_text).transpose()?,
            temporary_key: row
                .optional("temporary_key")
                .map(|e| parse_blob("temporary_key", e))
                .transpose()?,
        })),
        _ => {
            let music_service = row.optional("music_service");
            let music_uri = row.optional("music_uri");
            Ok(Command::InsertAlarm(NewAlarm {
                id: parse_ulid_expr(row.require("id")?)?,
                booking_id: parse_ulid_expr(row.require("booking_id")?)?,
                time: AlarmTime {
                    hour: parse_u8(row.require("hour")?)?,
                    minute: parse_u8(row.require("minute")?)?,
                },
                days: row.optional("days").map(parse_days).transpose()?.unwrap_or_default(),
                label: row.optional("label").map(parse_text).transpose()?,
                music: parse_music(music_service, music_uri)?,
                scenario: row.optional("scenario").map(parse_text).transpose()?,
                active_from: row.optional("active_from").map(parse_i64_expr).transpose()?,
                active_until: row.optional("active_until").map(parse_i64_expr).transpose()?,
            }))
        }
    }
}

/// Pair VALUES with the statement's column list, or with the table's
/// canonical order when the list is omitted.
fn bind_row<'a>(
    table: &'static str,
    canonical: &[&str],
    insert: &ast::Insert,
    values: &'a [Expr],
) -> Result<Row<'a>, SqlError> {
    let names: Vec<String> = if insert.columns.is_empty() {
        if values.len() > canonical.len() {
            return Err(SqlError::WrongArity(table, canonical.len(), values.len()));
        }
        canonical.iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let mut cells = Vec::with_capacity(values.len());
    for (name, expr) in names.into_iter().zip(values) {
        if !canonical.contains(&name.as_str()) {
            return Err(SqlError::UnknownColumn(table, name));
        }
        cells.push((name, expr));
    }
    Ok(Row { table, cells })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        set.push((assignment_column(a)?, &a.value));
    }
    if set.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table.as_str() {
        "rooms" => {
            let id = extract_where_eq(selection, "id")?;
            match set.as_slice() {
                [(col, value)] if col == "status" => Ok(Command::UpdateRoomStatus {
                    id,
                    status: parse_room_status(value)?,
                }),
                _ => Err(SqlError::Unsupported("rooms: only status can be updated".into())),
            }
        }
        "bookings" => {
            let id = extract_where_eq(selection, "id")?;
            if let [(col, value)] = set.as_slice()
                && col == "status"
                && let Some(action) = transition_for(&parse_text(value)?)
            {
                return Ok(Command::TransitionBooking { id, action });
            }
            let mut patch = BookingPatch::default();
            for (col, value) in set {
                match col.as_str() {
                    "check_in" => patch.check_in = Some(parse_i64_expr(value)?),
                    "check_out" => patch.check_out = Some(parse_i64_expr(value)?),
                    "status" => {
                        let s = parse_text(value)?;
                        patch.status = Some(
                            BookingStatus::parse(&s).ok_or(SqlError::BadValue("status", s))?,
                        );
                    }
                    "total_price" => patch.total_price = Some(parse_u64(value)?),
                    "special_requests" => {
                        patch.special_requests = Some(parse_text_or_null(value)?)
                    }
                    _ => return Err(SqlError::UnknownColumn("bookings", col)),
                }
            }
            Ok(Command::ReviseBooking { id, patch })
        }
        "guest_access" => {
            let id = extract_where_eq(selection, "id")?;
            if let Some(active) = lone_active(&set)? {
                return Ok(Command::SetAccessActive { id, active });
            }
            let mut patch = AccessPatch::default();
            for (col, value) in set {
                match col.as_str() {
                    "access_start" => patch.access_start = Some(parse_i64_expr(value)?),
                    "access_end" => patch.access_end = Some(parse_i64_expr(value)?),
                    "shared_with_user_id" => {
                        patch.shared_with_user_id = Some(parse_ulid_or_null(value)?)
                    }
                    "shared_with_contact" => {
                        patch.shared_with_contact = Some(parse_text_or_null(value)?)
                    }
                    "temporary_key" => {
                        patch.temporary_key = Some(if is_null(value) {
                            None
                        } else {
                            Some(parse_blob("temporary_key", value)?)
                        })
                    }
                    _ => return Err(SqlError::UnknownColumn("guest_access", col)),
                }
            }
            Ok(Command::ReviseGuestAccess { id, patch })
        }
        "alarms" => {
            let id = extract_where_eq(selection, "id")?;
            if let Some(active) = lone_active(&set)? {
                return Ok(Command::SetAlarmActive { id, active });
            }
            let (mut hour, mut minute) = (None, None);
            let (mut service, mut uri, mut music_touched) = (None, None, false);
            let mut patch = AlarmPatch::default();
            for (col, value) in set {
                match col.as_str() {
                    "hour" => hour = Some(parse_u8(value)?),
                    "minute" => minute = Some(parse_u8(value)?),
                    "days" => patch.days = Some(parse_days(value)?),
                    "label" => patch.label = Some(parse_text_or_null(value)?),
                    "scenario" => patch.scenario = Some(parse_text_or_null(value)?),
                    "music_service" => {
                        music_touched = true;
                        service = Some(value).filter(|v| !is_null(v));
                    }
                    "music_uri" => {
                        music_touched = true;
                        uri = Some(value).filter(|v| !is_null(v));
                    }
                    "active_from" => patch.active_from = Some(parse_i64_expr(value)?),
                    "active_until" => patch.active_until = Some(parse_i64_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn("alarms", col)),
                }
            }
            patch.time = match (hour, minute) {
                (Some(hour), Some(minute)) => Some(AlarmTime { hour, minute }),
                (None, None) => None,
                _ => {
                    return Err(SqlError::Unsupported(
                        "alarms: hour and minute must be set together".into(),
                    ));
                }
            };
            if music_touched {
                patch.music = Some(parse_music(service, uri)?);
            }
            Ok(Command::ReviseAlarm { id, patch })
        }
        "room_controls" => {
            let room_id = extract_where_eq(selection, "room_id")?;
            let [(col, value)] = set.as_slice() else {
                return Err(SqlError::Unsupported(
                    "room_controls: one field per statement".into(),
                ));
            };
            let change = match col.as_str() {
                "lighting" => ControlChange::Lighting(parse_blob("lighting", value)?),
                "climate" => ControlChange::Climate(parse_blob("climate", value)?),
                "curtains" => ControlChange::Curtains(parse_blob("curtains", value)?),
                "dnd" => ControlChange::DoNotDisturb(parse_bool(value)?),
                _ => return Err(SqlError::UnknownColumn("room_controls", col.clone())),
            };
            Ok(Command::UpdateRoomControls { room_id, change })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn transition_for(status: &str) -> Option<Transition> {
    match BookingStatus::parse(status)? {
        BookingStatus::CheckedIn => Some(Transition::CheckIn),
        BookingStatus::CheckedOut => Some(Transition::CheckOut),
        BookingStatus::Cancelled => Some(Transition::Cancel),
        BookingStatus::Confirmed => None,
    }
}

/// `SET active = …` toggles a grant and cannot be mixed with other columns.
fn lone_active(set: &[(String, &Expr)]) -> Result<Option<bool>, SqlError> {
    match set {
        [(col, value)] if col == "active" => Ok(Some(parse_bool(value)?)),
        _ if set.iter().any(|(col, _)| col == "active") => Err(SqlError::Unsupported(
            "active must be set on its own".into(),
        )),
        _ => Ok(None),
    }
}

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_eq(&delete.selection, "id")?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        "guest_access" => Ok(Command::DeleteGuestAccess { id }),
        "alarms" => Ok(Command::DeleteAlarm { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms {
            id: match &select.selection {
                Some(_) => Some(extract_where_eq(&select.selection, "id")?),
                None => None,
            },
        }),
        "bookings" => Ok(Command::SelectBookings(parse_filter(
            "bookings",
            &select.selection,
            owned_filter("user_id"),
        )?)),
        "guest_access" => Ok(Command::SelectGuestAccess(parse_filter(
            "guest_access",
            &select.selection,
            |col, id| match col {
                "shared_with_user_id" => Some(Filter::SharedWith(id)),
                _ => owned_filter("primary_guest_id")(col, id),
            },
        )?)),
        "alarms" => Ok(Command::SelectAlarms(parse_filter(
            "alarms",
            &select.selection,
            owned_filter("user_id"),
        )?)),
        "room_controls" => Ok(Command::SelectRoomControls {
            room_id: extract_where_eq(&select.selection, "room_id")?,
        }),
        "availability" => {
            let (mut room_id, mut start, mut end) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut room_id, &mut start, &mut end)?;
            }
            Ok(Command::SelectAvailability {
                room_id: room_id.ok_or(SqlError::MissingFilter("room_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Filters shared by every guest-owned table; `owner` names its user column.
fn owned_filter(owner: &'static str) -> impl Fn(&str, Ulid) -> Option<Filter> {
    move |col: &str, id: Ulid| match col {
        "id" => Some(Filter::Id(id)),
        "room_id" => Some(Filter::Room(id)),
        c if c == owner => Some(Filter::User(id)),
        _ => None,
    }
}

/// A single `column = value` predicate, or nothing at all. `column` maps
/// the predicate's column and value to a filter, `None` for columns the
/// table can't be filtered on.
fn parse_filter(
    table: &'static str,
    selection: &Option<Expr>,
    column: impl Fn(&str, Ulid) -> Option<Filter>,
) -> Result<Filter, SqlError> {
    let Some(sel) = selection else {
        return Ok(Filter::All);
    };
    let Expr::BinaryOp {
        left,
        op: ast::BinaryOperator::Eq,
        right,
    } = sel
    else {
        return Err(SqlError::Unsupported(format!(
            "{table}: WHERE must be a single equality"
        )));
    };
    let col = expr_column_name(left)
        .ok_or_else(|| SqlError::Parse("expected column on the left of =".into()))?;
    let id = parse_ulid_expr(right)?;
    column(&col, id).ok_or(SqlError::UnknownColumn(table, col))
}

fn extract_availability_filters(
    expr: &Expr,
    room_id: &mut Option<Ulid>,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, room_id, start, end)?;
                extract_availability_filters(right, room_id, start, end)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("room_id") {
                    *room_id = Some(parse_ulid_expr(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_i64_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("one row per INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter(column)),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_ulid_expr(expr).map(Some)
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64_expr(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_text(expr).map(Some)
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" | "on" => Ok(true),
                "false" | "f" | "0" | "off" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_room_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    let s = parse_text(expr)?;
    RoomStatus::parse(&s).ok_or(SqlError::BadValue("status", s))
}

fn parse_blob(column: &'static str, expr: &Expr) -> Result<Blob, SqlError> {
    let text = parse_text(expr)?;
    Blob::parse(&text).map_err(|e| SqlError::BadValue(column, e.to_string()))
}

/// `'mon,wed,fri'` or `ARRAY['mon','wed','fri']`. Empty means one-off.
fn parse_days(expr: &Expr) -> Result<Vec<Weekday>, SqlError> {
    let names: Vec<String> = match expr {
        Expr::Array(array) => array
            .elem
            .iter()
            .map(parse_text)
            .collect::<Result<_, _>>()?,
        _ => parse_text(expr)?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    };
    names
        .into_iter()
        .map(|n| Weekday::parse(&n).ok_or(SqlError::BadValue("days", n)))
        .collect()
}

fn parse_music(service: Option<&Expr>, uri: Option<&Expr>) -> Result<Option<Music>, SqlError> {
    match (service, uri) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(SqlError::MissingColumn("alarms", "music_service")),
        (Some(service), uri) => {
            let name = parse_text(service)?;
            let service =
                MusicService::parse(&name).ok_or(SqlError::BadValue("music_service", name))?;
            Ok(Some(Music {
                service,
                uri: uri.map(parse_text).transpose()?,
            }))
        }
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    BadValue(&'static str, String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadValue(col, v) => write!(f, "bad value for {col}: {v}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn other() -> Ulid {
        Ulid::from_string(OTHER).unwrap()
    }

    #[test]
    fn parse_insert_room_defaults_to_available() {
        let cmd = parse_sql(&format!("INSERT INTO rooms (id, number) VALUES ('{ID}', '101')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertRoom { id: id(), number: "101".into(), status: RoomStatus::Available }
        );
    }

    #[test]
    fn parse_insert_room_positional_with_status() {
        let cmd = parse_sql(&format!("INSERT INTO rooms VALUES ('{ID}', '204', 'maintenance')")).unwrap();
        assert!(matches!(
            cmd,
            Command::InsertRoom { status: RoomStatus::Maintenance, .. }
        ));
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, room_id, check_in, check_out, total_price, special_requests) \
             VALUES ('{ID}', '{OTHER}', 1000, 2000, 45000, 'late arrival')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking(NewBooking {
                id: id(),
                room_id: other(),
                check_in: 1000,
                check_out: 2000,
                total_price: 45000,
                special_requests: Some("late arrival".into()),
            })
        );
    }

    #[test]
    fn parse_insert_booking_columns_in_any_order() {
        let sql = format!(
            "INSERT INTO bookings (check_out, check_in, room_id, id, total_price) \
             VALUES (2000, 1000, '{OTHER}', '{ID}', 0)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(b) => {
                assert_eq!((b.id, b.room_id, b.check_in, b.check_out), (id(), other(), 1000, 2000));
                assert_eq!(b.special_requests, None);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_missing_column() {
        let sql = format!("INSERT INTO bookings (id, room_id, check_in) VALUES ('{ID}', '{OTHER}', 1)");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("bookings", "check_out"))
        ));
    }

    #[test]
    fn parse_insert_rejects_unknown_column() {
        let sql = format!("INSERT INTO rooms (id, floor) VALUES ('{ID}', 3)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("rooms", _))));
    }

    #[test]
    fn parse_insert_rejects_multi_row() {
        let sql = format!("INSERT INTO rooms (id, number) VALUES ('{ID}', '1'), ('{OTHER}', '2')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_insert_guest_access_with_key() {
        let sql = format!(
            "INSERT INTO guest_access (id, booking_id, access_start, access_end, shared_with_contact, temporary_key) \
             VALUES ('{ID}', '{OTHER}', 10, 20, 'ana@example.com', '{{\"ble\": \"a1b2\"}}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertGuestAccess(req) => {
                assert_eq!(req.shared_with_user_id, None);
                assert_eq!(req.shared_with_contact.as_deref(), Some("ana@example.com"));
                assert_eq!(req.temporary_key.unwrap().as_str(), r#"{"ble":"a1b2"}"#);
            }
            cmd => panic!("expected InsertGuestAccess, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_alarm() {
        let sql = format!(
            "INSERT INTO alarms (id, booking_id, hour, minute, days, label, music_service, music_uri) \
             VALUES ('{ID}', '{OTHER}', 7, 30, 'mon,wed', 'wake', 'spotify', 'spotify:track:1')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAlarm(req) => {
                assert_eq!(req.time, AlarmTime { hour: 7, minute: 30 });
                assert_eq!(req.days, vec![Weekday::Mon, Weekday::Wed]);
                assert_eq!(req.label.as_deref(), Some("wake"));
                assert_eq!(
                    req.music,
                    Some(Music {
                        service: MusicService::Spotify,
                        uri: Some("spotify:track:1".into())
                    })
                );
                assert_eq!((req.active_from, req.active_until), (None, None));
            }
            cmd => panic!("expected InsertAlarm, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_alarm_days_array() {
        let sql = format!(
            "INSERT INTO alarms (id, booking_id, hour, minute, days) \
             VALUES ('{ID}', '{OTHER}', 6, 0, ARRAY['sat', 'sun'])"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAlarm(req) => assert_eq!(req.days, vec![Weekday::Sat, Weekday::Sun]),
            cmd => panic!("expected InsertAlarm, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_alarm_uri_without_service_errors() {
        let sql = format!(
            "INSERT INTO alarms (id, booking_id, hour, minute, music_uri) \
             VALUES ('{ID}', '{OTHER}', 6, 0, 'x')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("alarms", "music_service"))
        ));
    }

    #[test]
    fn parse_update_room_status() {
        let sql = format!("UPDATE rooms SET status = 'cleaning' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateRoomStatus { id: id(), status: RoomStatus::Cleaning }
        );
    }

    #[test]
    fn parse_update_booking_status_is_a_transition() {
        for (status, action) in [
            ("checked_in", Transition::CheckIn),
            ("checked_out", Transition::CheckOut),
            ("cancelled", Transition::Cancel),
        ] {
            let sql = format!("UPDATE bookings SET status = '{status}' WHERE id = '{ID}'");
            assert_eq!(
                parse_sql(&sql).unwrap(),
                Command::TransitionBooking { id: id(), action }
            );
        }
    }

    #[test]
    fn parse_update_booking_other_columns_is_a_revision() {
        let sql = format!(
            "UPDATE bookings SET check_out = 5000, special_requests = NULL WHERE id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ReviseBooking {
                id: id(),
                patch: BookingPatch {
                    check_out: Some(5000),
                    special_requests: Some(None),
                    ..Default::default()
                }
            }
        );
    }

    #[test]
    fn parse_update_booking_back_to_confirmed_is_a_revision() {
        let sql = format!("UPDATE bookings SET status = 'confirmed' WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::ReviseBooking { patch: BookingPatch { status: Some(BookingStatus::Confirmed), .. }, .. }
        ));
    }

    #[test]
    fn parse_update_guest_access() {
        let sql = format!("UPDATE guest_access SET active = false WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetAccessActive { id: id(), active: false }
        );

        let sql = format!("UPDATE guest_access SET access_end = 99 WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::ReviseGuestAccess { patch, .. } => {
                assert_eq!(patch.access_end, Some(99));
                assert!(patch.moves_window());
            }
            cmd => panic!("expected ReviseGuestAccess, got {cmd:?}"),
        }

        let sql = format!("UPDATE guest_access SET active = true, access_end = 99 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_alarm() {
        let sql = format!("UPDATE alarms SET hour = 8, minute = 15, label = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::ReviseAlarm { patch, .. } => {
                assert_eq!(patch.time, Some(AlarmTime { hour: 8, minute: 15 }));
                assert_eq!(patch.label, Some(None));
                assert_eq!(patch.music, None);
            }
            cmd => panic!("expected ReviseAlarm, got {cmd:?}"),
        }

        let sql = format!("UPDATE alarms SET hour = 8 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));

        let sql = format!("UPDATE alarms SET music_service = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::ReviseAlarm { patch, .. } => assert_eq!(patch.music, Some(None)),
            cmd => panic!("expected ReviseAlarm, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_room_controls() {
        let sql = format!(r#"UPDATE room_controls SET climate = '{{"target_c": 21}}' WHERE room_id = '{ID}'"#);
        match parse_sql(&sql).unwrap() {
            Command::UpdateRoomControls { room_id, change: ControlChange::Climate(blob) } => {
                assert_eq!(room_id, id());
                assert_eq!(blob.to_value()["target_c"], 21);
            }
            cmd => panic!("expected climate update, got {cmd:?}"),
        }

        let sql = format!("UPDATE room_controls SET dnd = true WHERE room_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateRoomControls { room_id: id(), change: ControlChange::DoNotDisturb(true) }
        );
    }

    #[test]
    fn parse_update_room_controls_rejects_bad_json() {
        let sql = format!("UPDATE room_controls SET lighting = 'not json' WHERE room_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::BadValue("lighting", _))));
    }

    #[test]
    fn parse_update_requires_id_filter() {
        let sql = "UPDATE rooms SET status = 'cleaning'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
        let sql = format!("UPDATE room_controls SET dnd = true WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("room_id"))));
    }

    #[test]
    fn parse_deletes() {
        for (table, expected) in [
            ("rooms", Command::DeleteRoom { id: id() }),
            ("bookings", Command::DeleteBooking { id: id() }),
            ("guest_access", Command::DeleteGuestAccess { id: id() }),
            ("alarms", Command::DeleteAlarm { id: id() }),
        ] {
            let sql = format!("DELETE FROM {table} WHERE id = '{ID}'");
            assert_eq!(parse_sql(&sql).unwrap(), expected);
        }
    }

    #[test]
    fn parse_select_filters() {
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms { id: None });
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings(Filter::All)
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE room_id = '{ID}'")).unwrap(),
            Command::SelectBookings(Filter::Room(id()))
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM guest_access WHERE shared_with_user_id = '{ID}'"))
                .unwrap(),
            Command::SelectGuestAccess(Filter::SharedWith(id()))
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM alarms WHERE user_id = '{ID}'")).unwrap(),
            Command::SelectAlarms(Filter::User(id()))
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM room_controls WHERE room_id = '{ID}'")).unwrap(),
            Command::SelectRoomControls { room_id: id() }
        );
    }

    #[test]
    fn parse_select_unknown_filter_column() {
        let sql = format!("SELECT * FROM bookings WHERE total_price = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("bookings", _))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_id = '{ID}' AND start >= 1000 AND \"end\" <= 2000"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability { room_id: id(), start: 1000, end: 2000 }
        );
    }

    #[test]
    fn parse_select_availability_missing_bound() {
        let sql = format!("SELECT * FROM availability WHERE room_id = '{ID}' AND start >= 1000");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("end"))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}

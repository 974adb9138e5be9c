use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{
    MenuItemPatch, NewMenuItem, NewReservation, NewRoom, NewSocialEvent, NewUser,
    PaymentConfigPatch, Period, ReservationFilter, ReservationPatch, RoomPatch, SocialEventPatch,
};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom(NewRoom),
    UpdateRoom { id: Ulid, patch: RoomPatch },
    DeleteRoom { id: Ulid },
    SelectRooms { id: Option<Ulid> },

    InsertReservation(NewReservation),
    UpdateReservation { id: Ulid, patch: ReservationPatch },
    DeleteReservation { id: Ulid },
    SelectReservation { id: Ulid },
    SelectReservations(ReservationFilter),

    SelectAvailability { start: Ms, end: Ms },
    SelectRoomCalendar { room_id: Ulid, start: Ms, end: Ms },
    SelectConflict {
        room_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    },
    SelectQuote { room_id: Ulid, start: Ms, end: Ms },

    InsertEvent(NewSocialEvent),
    UpdateEvent { id: Ulid, patch: SocialEventPatch },
    DeleteEvent { id: Ulid },
    SelectEvents,

    InsertCategory { id: Ulid, name: Option<String> },
    SelectCategories,
    InsertMenuItem(NewMenuItem),
    UpdateMenuItem { id: Ulid, patch: MenuItemPatch },
    DeleteMenuItem { id: Ulid },
    SelectMenuItems { category_id: Option<Ulid> },

    InsertUser(NewUser),
    SelectUsers,
    Login { username: String, password: String },

    SelectPaymentConfig,
    UpdatePaymentConfig(PaymentConfigPatch),
}

const ROOM_COLUMNS: &[&str] = &["id", "number", "kind", "nightly_rate", "images"];
const RESERVATION_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "start",
    "end",
    "payment_method",
    "guest_name",
    "guest_email",
    "guest_phone",
    "user_id",
];
const EVENT_COLUMNS: &[&str] = &[
    "id",
    "client_name",
    "event_date",
    "starts_at",
    "ends_at",
    "usage",
    "attendee_limit",
    "area",
    "amount",
    "status",
];
const CATEGORY_COLUMNS: &[&str] = &["id", "name"];
const MENU_ITEM_COLUMNS: &[&str] = &["id", "name", "description", "price", "category_id"];
const USER_COLUMNS: &[&str] = &["id", "username", "password", "role", "phone"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [one] => one,
        _ => return Err(SqlError::Unsupported("one statement per query".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, used to describe result columns before execution.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

// ── Literals ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Number(String),
    Text(String),
    Bool(bool),
}

fn literal(expr: &Expr) -> Result<Literal, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::Null => Ok(Literal::Null),
            Value::Number(n, _) => Ok(Literal::Number(n.clone())),
            Value::SingleQuotedString(s) => Ok(Literal::Text(s.clone())),
            Value::Boolean(b) => Ok(Literal::Bool(*b)),
            Value::Placeholder(p) => Err(SqlError::Parse(format!("unbound parameter {p}"))),
            other => Err(SqlError::Parse(format!("unsupported literal {other}"))),
        },
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Literal::Number(n) => Ok(Literal::Number(format!("-{n}"))),
            other => Err(SqlError::Parse(format!("cannot negate {other:?}"))),
        },
        Expr::Nested(inner) => literal(inner),
        other => Err(SqlError::Parse(format!("expected a literal, got {other}"))),
    }
}

impl Literal {
    fn raw(&self, col: &str) -> Result<String, SqlError> {
        match self {
            Literal::Number(s) | Literal::Text(s) => Ok(s.clone()),
            Literal::Bool(b) => Ok(b.to_string()),
            Literal::Null => Err(SqlError::NullValue(col.to_string())),
        }
    }
}

fn bad(col: &str, expected: &str, got: &str) -> SqlError {
    SqlError::BadValue {
        column: col.to_string(),
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

fn as_text(lit: &Literal, col: &str) -> Result<String, SqlError> {
    lit.raw(col)
}

fn as_ulid(lit: &Literal, col: &str) -> Result<Ulid, SqlError> {
    let s = lit.raw(col)?;
    Ulid::from_string(s.trim()).map_err(|_| bad(col, "a ULID", &s))
}

fn as_i64(lit: &Literal, col: &str) -> Result<i64, SqlError> {
    let s = lit.raw(col)?;
    s.trim().parse().map_err(|_| bad(col, "an integer", &s))
}

fn as_u32(lit: &Literal, col: &str) -> Result<u32, SqlError> {
    let v = as_i64(lit, col)?;
    u32::try_from(v).map_err(|_| bad(col, "a non-negative 32-bit integer", &v.to_string()))
}

fn as_time(lit: &Literal, col: &str) -> Result<Ms, SqlError> {
    let s = lit.raw(col)?;
    parse_time(&s).ok_or_else(|| bad(col, "milliseconds, YYYY-MM-DD or RFC 3339", &s))
}

fn as_cents(lit: &Literal, col: &str) -> Result<Cents, SqlError> {
    let s = lit.raw(col)?;
    parse_cents(&s).ok_or_else(|| bad(col, "an amount with at most two decimals", &s))
}

fn as_images(lit: &Literal, col: &str) -> Result<Vec<String>, SqlError> {
    match lit {
        Literal::Null => Ok(Vec::new()),
        other => parse_images(&other.raw(col)?).map_err(|e| bad(col, "a JSON array of paths", &e)),
    }
}

fn as_status(lit: &Literal, col: &str) -> Result<BookingStatus, SqlError> {
    let s = lit.raw(col)?;
    BookingStatus::parse(s.trim()).ok_or_else(|| bad(col, "pending, confirmed or cancelled", &s))
}

fn as_method(lit: &Literal, col: &str) -> Result<PaymentMethod, SqlError> {
    let s = lit.raw(col)?;
    PaymentMethod::parse(s.trim()).ok_or_else(|| bad(col, "cash or transfer", &s))
}

fn as_role(lit: &Literal, col: &str) -> Result<UserRole, SqlError> {
    let s = lit.raw(col)?;
    UserRole::parse(s.trim()).ok_or_else(|| bad(col, "admin, employee or guest", &s))
}

fn as_period(lit: &Literal, col: &str) -> Result<Period, SqlError> {
    let s = lit.raw(col)?;
    Period::parse(s.trim()).ok_or_else(|| bad(col, "week, month, year or all", &s))
}

/// Integer milliseconds, a calendar date (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_time(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.timestamp_millis())
}

/// `"500"`, `"500.5"`, `"500.50"` → cents. More than two decimals is rejected.
pub fn parse_cents(s: &str) -> Option<Cents> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) || frac.len() > 2 {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let cents = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -cents } else { cents })
}

/// A JSON array of strings, or a comma-separated list.
fn parse_images(s: &str) -> Result<Vec<String>, String> {
    let s = s.trim();
    if s.starts_with('[') {
        return serde_json::from_str(s).map_err(|e| e.to_string());
    }
    Ok(s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect())
}

// ── Column sets ───────────────────────────────────────────────

/// Column → literal pairs of one INSERT row or UPDATE's SET list.
/// Readers remove what they understand; anything left over is an unknown column.
struct Fields {
    table: String,
    values: Vec<(String, Literal)>,
}

type Conv<T> = fn(&Literal, &str) -> Result<T, SqlError>;

impl Fields {
    fn take(&mut self, col: &str) -> Option<Literal> {
        let pos = self.values.iter().position(|(c, _)| c == col)?;
        Some(self.values.remove(pos).1)
    }

    /// Absent and NULL both read as `None`.
    fn opt<T>(&mut self, col: &str, conv: Conv<T>) -> Result<Option<T>, SqlError> {
        match self.take(col) {
            None | Some(Literal::Null) => Ok(None),
            Some(lit) => conv(&lit, col).map(Some),
        }
    }

    /// Absent is `None`; NULL is rejected.
    fn set<T>(&mut self, col: &str, conv: Conv<T>) -> Result<Option<T>, SqlError> {
        match self.take(col) {
            None => Ok(None),
            Some(Literal::Null) => Err(SqlError::NullValue(col.to_string())),
            Some(lit) => conv(&lit, col).map(Some),
        }
    }

    /// Absent is `None`; NULL clears the column.
    fn clearable<T>(&mut self, col: &str, conv: Conv<T>) -> Result<Option<Option<T>>, SqlError> {
        match self.take(col) {
            None => Ok(None),
            Some(Literal::Null) => Ok(Some(None)),
            Some(lit) => conv(&lit, col).map(|v| Some(Some(v))),
        }
    }

    fn id_or_new(&mut self) -> Result<Ulid, SqlError> {
        Ok(self.opt("id", as_ulid)?.unwrap_or_else(Ulid::new))
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.values.into_iter().next() {
            Some((col, _)) => Err(SqlError::UnknownColumn(self.table, col)),
            None => Ok(()),
        }
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let order = match table.as_str() {
        "rooms" => ROOM_COLUMNS,
        "reservations" => RESERVATION_COLUMNS,
        "events" => EVENT_COLUMNS,
        "menu_categories" => CATEGORY_COLUMNS,
        "menu_items" => MENU_ITEM_COLUMNS,
        "users" => USER_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = extract_single_row(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        if row.len() > order.len() {
            return Err(SqlError::WrongArity(table, order.len(), row.len()));
        }
        order.iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != row.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), row.len()));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let values = columns
        .into_iter()
        .zip(row.iter())
        .map(|(col, expr)| Ok((col, literal(expr)?)))
        .collect::<Result<Vec<_>, SqlError>>()?;
    let mut f = Fields { table, values };

    let cmd = match f.table.as_str() {
        "rooms" => Command::InsertRoom(NewRoom {
            id: f.id_or_new()?,
            number: f.opt("number", as_u32)?,
            kind: f.opt("kind", as_text)?,
            nightly_rate: f.opt("nightly_rate", as_cents)?,
            images: f.opt("images", as_images)?.unwrap_or_default(),
        }),
        "reservations" => Command::InsertReservation(NewReservation {
            id: f.id_or_new()?,
            room_id: f.opt("room_id", as_ulid)?,
            start: f.opt("start", as_time)?,
            end: f.opt("end", as_time)?,
            payment_method: f.opt("payment_method", as_method)?,
            guest_name: f.opt("guest_name", as_text)?,
            guest_email: f.opt("guest_email", as_text)?,
            guest_phone: f.opt("guest_phone", as_text)?,
            user_id: f.opt("user_id", as_ulid)?,
        }),
        "events" => Command::InsertEvent(NewSocialEvent {
            id: f.id_or_new()?,
            client_name: f.opt("client_name", as_text)?,
            event_date: f.opt("event_date", as_time)?,
            starts_at: f.opt("starts_at", as_time)?,
            ends_at: f.opt("ends_at", as_time)?,
            usage: f.opt("usage", as_text)?,
            attendee_limit: f.opt("attendee_limit", as_u32)?,
            area: f.opt("area", as_text)?,
            amount: f.opt("amount", as_cents)?,
            status: f.opt("status", as_status)?,
        }),
        "menu_categories" => Command::InsertCategory {
            id: f.id_or_new()?,
            name: f.opt("name", as_text)?,
        },
        "menu_items" => Command::InsertMenuItem(NewMenuItem {
            id: f.id_or_new()?,
            name: f.opt("name", as_text)?,
            description: f.opt("description", as_text)?,
            price: f.opt("price", as_cents)?,
            category_id: f.opt("category_id", as_ulid)?,
        }),
        _ => Command::InsertUser(NewUser {
            id: f.id_or_new()?,
            username: f.opt("username", as_text)?,
            password: f.opt("password", as_text)?,
            role: f.opt("role", as_role)?,
            phone: f.opt("phone", as_text)?,
        }),
    };
    f.finish()?;
    Ok(cmd)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut values = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        values.push((col, literal(&a.value)?));
    }

    if table == "payment_config" {
        if selection.is_some() {
            return Err(SqlError::Unsupported("payment_config has a single row; drop the WHERE".into()));
        }
        let mut f = Fields { table, values };
        let patch = PaymentConfigPatch {
            bank: f.set("bank", as_text)?,
            account_number: f.set("account_number", as_text)?,
            clabe: f.set("clabe", as_text)?,
            whatsapp_url: f.set("whatsapp_url", as_text)?,
        };
        f.finish()?;
        return Ok(Command::UpdatePaymentConfig(patch));
    }

    let id = where_id(&table, selection)?;
    let mut f = Fields { table, values };
    let cmd = match f.table.as_str() {
        "rooms" => Command::UpdateRoom {
            id,
            patch: RoomPatch {
                number: f.set("number", as_u32)?,
                kind: f.set("kind", as_text)?,
                nightly_rate: f.set("nightly_rate", as_cents)?,
                images: f.opt_images()?,
            },
        },
        "reservations" => Command::UpdateReservation {
            id,
            patch: ReservationPatch {
                room_id: f.set("room_id", as_ulid)?,
                user_id: f.clearable("user_id", as_ulid)?,
                guest_name: f.clearable("guest_name", as_text)?,
                guest_email: f.clearable("guest_email", as_text)?,
                guest_phone: f.clearable("guest_phone", as_text)?,
                start: f.set("start", as_time)?,
                end: f.set("end", as_time)?,
                status: f.set("status", as_status)?,
                payment_method: f.set("payment_method", as_method)?,
            },
        },
        "events" => Command::UpdateEvent {
            id,
            patch: SocialEventPatch {
                client_name: f.set("client_name", as_text)?,
                event_date: f.set("event_date", as_time)?,
                starts_at: f.set("starts_at", as_time)?,
                ends_at: f.set("ends_at", as_time)?,
                usage: f.clearable("usage", as_text)?,
                attendee_limit: f.clearable("attendee_limit", as_u32)?,
                area: f.set("area", as_text)?,
                amount: f.set("amount", as_cents)?,
                status: f.set("status", as_status)?,
            },
        },
        "menu_items" => Command::UpdateMenuItem {
            id,
            patch: MenuItemPatch {
                name: f.set("name", as_text)?,
                description: f.clearable("description", as_text)?,
                price: f.set("price", as_cents)?,
                category_id: f.set("category_id", as_ulid)?,
            },
        },
        _ => return Err(SqlError::UnknownTable(f.table)),
    };
    f.finish()?;
    Ok(cmd)
}

impl Fields {
    /// `images = NULL` empties the list.
    fn opt_images(&mut self) -> Result<Option<Vec<String>>, SqlError> {
        self.take("images")
            .map(|lit| as_images(&lit, "images"))
            .transpose()
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = where_id(&table, delete.selection.as_ref())?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        "events" => Ok(Command::DeleteEvent { id }),
        "menu_items" => Ok(Command::DeleteMenuItem { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    AtLeast,
    AtMost,
}

/// Conjunction of `column op literal` terms from a WHERE clause.
struct Filters {
    table: String,
    terms: Vec<(String, Op, Literal)>,
}

impl Filters {
    fn parse(table: String, selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Self { table, terms })
    }

    fn take(&mut self, col: &str, ops: &[Op]) -> Option<Literal> {
        let pos = self
            .terms
            .iter()
            .position(|(c, op, _)| c == col && ops.contains(op))?;
        Some(self.terms.remove(pos).2)
    }

    fn opt<T>(&mut self, col: &str, ops: &[Op], conv: Conv<T>) -> Result<Option<T>, SqlError> {
        match self.take(col, ops) {
            None | Some(Literal::Null) => Ok(None),
            Some(lit) => conv(&lit, col).map(Some),
        }
    }

    fn required<T>(&mut self, col: &'static str, ops: &[Op], conv: Conv<T>) -> Result<T, SqlError> {
        self.opt(col, ops, conv)?.ok_or(SqlError::MissingFilter(col))
    }

    /// `start >= ..` (or `=`) and `"end" <= ..` (or `=`).
    fn range(&mut self) -> Result<(Ms, Ms), SqlError> {
        let start = self.required("start", &[Op::AtLeast, Op::Eq], as_time)?;
        let end = self.required("end", &[Op::AtMost, Op::Eq], as_time)?;
        Ok((start, end))
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.terms.into_iter().next() {
            Some((col, _, _)) => Err(SqlError::UnknownColumn(self.table, col)),
            None => Ok(()),
        }
    }
}

fn collect_terms(expr: &Expr, out: &mut Vec<(String, Op, Literal)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_terms(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_terms(left, out)?;
                    return collect_terms(right, out);
                }
                ast::BinaryOperator::Eq => Op::Eq,
                ast::BinaryOperator::GtEq => Op::AtLeast,
                ast::BinaryOperator::LtEq => Op::AtMost,
                other => return Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
            };
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("expected a column, got {left}")))?;
            out.push((col, op, literal(right)?));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let mut w = Filters::parse(table, select.selection.as_ref())?;
    const EQ: &[Op] = &[Op::Eq];

    let cmd = match w.table.as_str() {
        "rooms" => Command::SelectRooms {
            id: w.opt("id", EQ, as_ulid)?,
        },
        "reservations" => match w.opt("id", EQ, as_ulid)? {
            Some(id) => Command::SelectReservation { id },
            None => Command::SelectReservations(ReservationFilter {
                room_id: w.opt("room_id", EQ, as_ulid)?,
                period: w.opt("period", EQ, as_period)?.unwrap_or_default(),
                status: w.opt("status", EQ, as_status)?,
            }),
        },
        "availability" => {
            let (start, end) = w.range()?;
            Command::SelectAvailability { start, end }
        }
        "room_calendar" => {
            let room_id = w.required("room_id", EQ, as_ulid)?;
            let (start, end) = w.range()?;
            Command::SelectRoomCalendar { room_id, start, end }
        }
        "conflicts" => {
            let room_id = w.required("room_id", EQ, as_ulid)?;
            let (start, end) = w.range()?;
            Command::SelectConflict {
                room_id,
                start,
                end,
                exclude: w.opt("exclude_id", EQ, as_ulid)?,
            }
        }
        "quotes" => {
            let room_id = w.required("room_id", EQ, as_ulid)?;
            let (start, end) = w.range()?;
            Command::SelectQuote { room_id, start, end }
        }
        "events" => Command::SelectEvents,
        "menu_categories" => Command::SelectCategories,
        "menu_items" => Command::SelectMenuItems {
            category_id: w.opt("category_id", EQ, as_ulid)?,
        },
        "users" => Command::SelectUsers,
        "login" => Command::Login {
            username: w.required("username", EQ, as_text)?,
            password: w.required("password", EQ, as_text)?,
        },
        "payment_config" => Command::SelectPaymentConfig,
        _ => return Err(SqlError::UnknownTable(w.table)),
    };
    w.finish()?;
    Ok(cmd)
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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_single_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match source.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("one row per INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE id = '...'`, the only row selector for writes.
fn where_id(table: &str, selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let mut w = Filters::parse(table.to_string(), selection)?;
    let id = w
        .opt("id", &[Op::Eq], as_ulid)?
        .ok_or(SqlError::MissingFilter("id"))?;
    w.finish()?;
    Ok(id)
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String, String),
    WrongArity(String, usize, usize),
    MissingFilter(&'static str),
    NullValue(String),
    BadValue {
        column: String,
        expected: String,
        got: String,
    },
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} in {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::NullValue(col) => write!(f, "{col} cannot be NULL"),
            SqlError::BadValue {
                column,
                expected,
                got,
            } => write!(f, "{column}: expected {expected}, got {got:?}"),
        }
    }
}

impl std::error::Error for SqlError {}

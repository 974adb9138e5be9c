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
use tracing::debug;

use crate::auth::InnkeepAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, command_label};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

// ── Result shapes ────────────────────────────────────────────────

type Columns = &'static [(&'static str, Type)];

const ROOM_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("number", Type::INT8),
    ("kind", Type::VARCHAR),
    ("nightly_rate", Type::VARCHAR),
    ("images", Type::VARCHAR),
];

const RESERVATION_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("room_id", Type::VARCHAR),
    ("user_id", Type::VARCHAR),
    ("guest_name", Type::VARCHAR),
    ("guest_email", Type::VARCHAR),
    ("guest_phone", Type::VARCHAR),
    ("start", Type::INT8),
    ("end", Type::INT8),
    ("status", Type::VARCHAR),
    ("total_price", Type::VARCHAR),
    ("payment_method", Type::VARCHAR),
    ("created_at", Type::INT8),
];

const CALENDAR_COLUMNS: Columns = &[
    ("room_id", Type::VARCHAR),
    ("start", Type::INT8),
    ("end", Type::INT8),
];

const CONFLICT_COLUMNS: Columns = &[("room_id", Type::VARCHAR), ("conflict", Type::BOOL)];

const QUOTE_COLUMNS: Columns = &[
    ("room_id", Type::VARCHAR),
    ("nights", Type::INT8),
    ("nightly_rate", Type::VARCHAR),
    ("total", Type::VARCHAR),
];

const EVENT_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("client_name", Type::VARCHAR),
    ("event_date", Type::INT8),
    ("starts_at", Type::INT8),
    ("ends_at", Type::INT8),
    ("usage", Type::VARCHAR),
    ("attendee_limit", Type::INT8),
    ("area", Type::VARCHAR),
    ("amount", Type::VARCHAR),
    ("status", Type::VARCHAR),
];

const CATEGORY_COLUMNS: Columns = &[("id", Type::VARCHAR), ("name", Type::VARCHAR)];

const MENU_ITEM_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("name", Type::VARCHAR),
    ("description", Type::VARCHAR),
    ("price", Type::VARCHAR),
    ("category_id", Type::VARCHAR),
];

const USER_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("username", Type::VARCHAR),
    ("role", Type::VARCHAR),
    ("phone", Type::VARCHAR),
];

const PAYMENT_CONFIG_COLUMNS: Columns = &[
    ("bank", Type::VARCHAR),
    ("account_number", Type::VARCHAR),
    ("clabe", Type::VARCHAR),
    ("whatsapp_url", Type::VARCHAR),
];

fn table_columns(table: &str) -> Option<Columns> {
    Some(match table {
        "rooms" | "availability" => ROOM_COLUMNS,
        "reservations" => RESERVATION_COLUMNS,
        "room_calendar" => CALENDAR_COLUMNS,
        "conflicts" => CONFLICT_COLUMNS,
        "quotes" => QUOTE_COLUMNS,
        "events" => EVENT_COLUMNS,
        "menu_categories" => CATEGORY_COLUMNS,
        "menu_items" => MENU_ITEM_COLUMNS,
        "users" | "login" => USER_COLUMNS,
        "payment_config" => PAYMENT_CONFIG_COLUMNS,
        _ => return None,
    })
}

/// Field descriptions in the format the client asked for (text for simple queries).
fn schema(columns: Columns, format: Option<&Format>) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            let fmt = format.map_or(FieldFormat::Text, |f| f.format_for(i));
            FieldInfo::new((*name).into(), None, None, ty.clone(), fmt)
        })
        .collect()
}

fn describe(sql: &str, format: Option<&Format>) -> Vec<FieldInfo> {
    sql::select_table(sql)
        .and_then(|t| table_columns(&t))
        .map(|cols| schema(cols, format))
        .unwrap_or_default()
}

fn rows<T>(
    columns: Columns,
    format: Option<&Format>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema(columns, format));
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_room(enc: &mut DataRowEncoder, room: Room) -> PgWireResult<()> {
    let images = serde_json::to_string(&room.images).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    enc.encode_field(&room.id.to_string())?;
    enc.encode_field(&i64::from(room.number))?;
    enc.encode_field(&room.kind)?;
    enc.encode_field(&format_cents(room.nightly_rate))?;
    enc.encode_field(&images)
}

fn encode_reservation(enc: &mut DataRowEncoder, r: Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.room_id.to_string())?;
    enc.encode_field(&r.user_id.map(|u| u.to_string()))?;
    enc.encode_field(&r.guest_name)?;
    enc.encode_field(&r.guest_email)?;
    enc.encode_field(&r.guest_phone)?;
    enc.encode_field(&r.span.start)?;
    enc.encode_field(&r.span.end)?;
    enc.encode_field(&r.status.as_str())?;
    enc.encode_field(&format_cents(r.total_price))?;
    enc.encode_field(&r.payment_method.as_str())?;
    enc.encode_field(&r.created_at)
}

fn encode_event(enc: &mut DataRowEncoder, e: SocialEvent) -> PgWireResult<()> {
    enc.encode_field(&e.id.to_string())?;
    enc.encode_field(&e.client_name)?;
    enc.encode_field(&e.event_date)?;
    enc.encode_field(&e.window.map(|w| w.start))?;
    enc.encode_field(&e.window.map(|w| w.end))?;
    enc.encode_field(&e.usage)?;
    enc.encode_field(&e.attendee_limit.map(i64::from))?;
    enc.encode_field(&e.area)?;
    enc.encode_field(&format_cents(e.amount))?;
    enc.encode_field(&e.status.as_str())
}

fn encode_user(enc: &mut DataRowEncoder, u: UserInfo) -> PgWireResult<()> {
    enc.encode_field(&u.id.to_string())?;
    enc.encode_field(&u.username)?;
    enc.encode_field(&u.role.as_str())?;
    enc.encode_field(&u.phone)
}

fn executed(tag: &str) -> Response {
    Response::Execution(Tag::new(tag).with_rows(1))
}

// ── Handler ──────────────────────────────────────────────────────

pub struct InnkeepHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    /// The connection's database name selects the property.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("property {db}: {e}")))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, sql: &str, format: Option<&Format>) -> PgWireResult<Response> {
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(SqlError::Empty) => return Ok(Response::EmptyQuery),
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        format: Option<&Format>,
    ) -> PgWireResult<Response> {
        match cmd {
            // ── Rooms ──
            Command::InsertRoom(new) => {
                engine.create_room(new).await.map_err(engine_err)?;
                Ok(executed("INSERT"))
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(executed("UPDATE"))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(executed("DELETE"))
            }
            Command::SelectRooms { id } => {
                let rooms = match id {
                    Some(id) => vec![engine.get_room_record(id).await.map_err(engine_err)?],
                    None => engine.list_rooms().await,
                };
                Ok(rows(ROOM_COLUMNS, format, rooms, encode_room))
            }

            // ── Reservations ──
            Command::InsertReservation(new) => {
                engine.create_reservation(new).await.map_err(engine_err)?;
                Ok(executed("INSERT"))
            }
            Command::UpdateReservation { id, patch } => {
                engine.update_reservation(id, patch).await.map_err(engine_err)?;
                Ok(executed("UPDATE"))
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(executed("DELETE"))
            }
            Command::SelectReservation { id } => {
                let r = engine.get_reservation(id).await.map_err(engine_err)?;
                Ok(rows(RESERVATION_COLUMNS, format, [r], encode_reservation))
            }
            Command::SelectReservations(filter) => {
                let list = engine.list_reservations(&filter).await.map_err(engine_err)?;
                Ok(rows(RESERVATION_COLUMNS, format, list, encode_reservation))
            }

            // ── Availability ──
            Command::SelectAvailability { start, end } => {
                let free = engine.available_rooms(start, end).await.map_err(engine_err)?;
                Ok(rows(ROOM_COLUMNS, format, free, encode_room))
            }
            Command::SelectRoomCalendar { room_id, start, end } => {
                let gaps = engine
                    .room_calendar(room_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let room = room_id.to_string();
                Ok(rows(CALENDAR_COLUMNS, format, gaps, |enc, span| {
                    enc.encode_field(&room)?;
                    enc.encode_field(&span.start)?;
                    enc.encode_field(&span.end)
                }))
            }
            Command::SelectConflict {
                room_id,
                start,
                end,
                exclude,
            } => {
                let conflict = engine
                    .has_conflict(room_id, start, end, exclude)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(CONFLICT_COLUMNS, format, [conflict], |enc, c| {
                    enc.encode_field(&room_id.to_string())?;
                    enc.encode_field(&c)
                }))
            }
            Command::SelectQuote { room_id, start, end } => {
                let quote = engine
                    .compute_price(room_id, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(QUOTE_COLUMNS, format, [quote], |enc, q| {
                    enc.encode_field(&q.room_id.to_string())?;
                    enc.encode_field(&q.nights)?;
                    enc.encode_field(&format_cents(q.nightly_rate))?;
                    enc.encode_field(&format_cents(q.total))
                }))
            }

            // ── Social area ──
            Command::InsertEvent(new) => {
                engine.create_social_event(new).await.map_err(engine_err)?;
                Ok(executed("INSERT"))
            }
            Command::UpdateEvent { id, patch } => {
                engine.update_social_event(id, patch).await.map_err(engine_err)?;
                Ok(executed("UPDATE"))
            }
            Command::DeleteEvent { id } => {
                engine.delete_social_event(id).await.map_err(engine_err)?;
                Ok(executed("DELETE"))
            }
            Command::SelectEvents => Ok(rows(
                EVENT_COLUMNS,
                format,
                engine.list_social_events(),
                encode_event,
            )),

            // ── Menu ──
            Command::InsertCategory { id, name } => {
                engine.create_category(id, name).await.map_err(engine_err)?;
                Ok(executed("INSERT"))
            }
            Command::SelectCategories => Ok(rows(
                CATEGORY_COLUMNS,
                format,
                engine.list_categories(),
                |enc, c| {
                    enc.encode_field(&c.id.to_string())?;
                    enc.encode_field(&c.name)
                },
            )),
            Command::InsertMenuItem(new) => {
                engine.create_menu_item(new).await.map_err(engine_err)?;
                Ok(executed("INSERT"))
            }
            Command::UpdateMenuItem { id, patch } => {
                engine.update_menu_item(id, patch).await.map_err(engine_err)?;
                Ok(executed("UPDATE"))
            }
            Command::DeleteMenuItem { id } => {
                engine.delete_menu_item(id).await.map_err(engine_err)?;
                Ok(executed("DELETE"))
            }
            Command::SelectMenuItems { category_id } => {
                let items = engine.list_menu_items(category_id).map_err(engine_err)?;
                Ok(rows(MENU_ITEM_COLUMNS, format, items, |enc, item| {
                    enc.encode_field(&item.id.to_string())?;
                    enc.encode_field(&item.name)?;
                    enc.encode_field(&item.description)?;
                    enc.encode_field(&format_cents(item.price))?;
                    enc.encode_field(&item.category_id.to_string())
                }))
            }

            // ── Users ──
            Command::InsertUser(new) => {
                engine.create_user(new).await.map_err(engine_err)?;
                Ok(executed("INSERT"))
            }
            Command::SelectUsers => Ok(rows(USER_COLUMNS, format, engine.list_users(), encode_user)),
            Command::Login { username, password } => match engine.login(&username, &password).await {
                Ok(user) => Ok(rows(USER_COLUMNS, format, [user], encode_user)),
                Err(e) => {
                    metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                    debug!("login refused for {username}");
                    Err(engine_err(e))
                }
            },

            // ── Payment config ──
            Command::SelectPaymentConfig => {
                let config = engine.payment_config().await;
                Ok(rows(PAYMENT_CONFIG_COLUMNS, format, [config], |enc, c| {
                    enc.encode_field(&c.bank)?;
                    enc.encode_field(&c.account_number)?;
                    enc.encode_field(&c.clabe)?;
                    enc.encode_field(&c.whatsapp_url)
                }))
            }
            Command::UpdatePaymentConfig(patch) => {
                engine.update_payment_config(patch).await.map_err(engine_err)?;
                Ok(executed("UPDATE"))
            }
        }
    }
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
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
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query, None).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
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
        Ok(describe(stmt, column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql, Some(&portal.result_column_format))
            .await
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
            describe(&target.statement, None),
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
        Ok(DescribePortalResponse::new(describe(
            &target.statement.statement,
            Some(&target.result_column_format),
        )))
    }
}

/// Walk `sql`, copying quoted text verbatim and handing each `$N` placeholder
/// outside quotes to `on_param`, which writes its replacement.
fn scan_placeholders(sql: &str, mut on_param: impl FnMut(usize, &mut String)) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' | '"' => {
                // '' and "" inside a quoted run close and reopen it, which copies the same bytes.
                out.push(c);
                for (_, q) in chars.by_ref() {
                    out.push(q);
                    if q == c {
                        break;
                    }
                }
            }
            '$' => {
                let digits_start = i + 1;
                let mut digits_end = digits_start;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits_end = j + 1;
                    chars.next();
                }
                match sql[digits_start..digits_end].parse::<usize>() {
                    Ok(n) => on_param(n, &mut out),
                    Err(_) => out.push('$'),
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    scan_placeholders(sql, |n, _| max = max.max(n));
    max
}

/// Replace each `$N` outside quotes with the bound value as a quoted text literal.
/// Values are inserted once and never rescanned.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    scan_placeholders(sql, |n, out| match n.checked_sub(1).and_then(|i| params.get(i)) {
        Some(Some(value)) => {
            out.push('\'');
            out.push_str(&value.replace('\'', "''"));
            out.push('\'');
        }
        Some(None) => out.push_str("NULL"),
        // Unbound placeholders are left for the parser to reject.
        None => {
            out.push('$');
            out.push_str(&n.to_string());
        }
    })
}

// ── Factory ──────────────────────────────────────────────────────

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(InnkeepFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory)
        .await
        .map_err(|e| io::Error::other(e.to_string()))
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each engine failure.
fn engine_code(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRange { .. } => "22007",
        EngineError::InvalidStay { .. } => "22008",
        EngineError::RoomNotFound(_)
        | EngineError::ReservationNotFound(_)
        | EngineError::NotFound(..) => "P0002",
        EngineError::DoubleBooking { .. } => "23P01",
        EngineError::Conflict(_) => "23505",
        EngineError::Validation(_) => "23514",
        EngineError::InvalidTransition { .. } | EngineError::RoomInUse(_) => "55000",
        EngineError::Unauthorized => "28P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_code(&e), e.to_string())
}

fn sql_code(e: &SqlError) -> &'static str {
    match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) => "42703",
        SqlError::NullValue(_) => "23502",
        SqlError::BadValue { .. } => "22P02",
        SqlError::Unsupported(_) => "0A000",
        SqlError::Parse(_) | SqlError::Empty | SqlError::WrongArity(..) | SqlError::MissingFilter(_) => {
            "42601"
        }
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_code(&e), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn params_are_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM quotes WHERE room_id = $1 AND start >= $2 AND \"end\" <= $3"), 3);
        assert_eq!(count_params("UPDATE rooms SET kind = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("SELECT '$' FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM rooms WHERE kind = '$4'"), 0);
        assert_eq!(count_params("SELECT * FROM quotes WHERE room_id = $10"), 10);
    }

    #[test]
    fn bound_values_are_never_rescanned() {
        let sql = "INSERT INTO reservations (id, guest_name, guest_email) VALUES ($1, $2, $3)";
        let params = vec![
            Some("01J0000000000000000000000A".to_string()),
            Some("Suite $1 guest".to_string()),
            None,
        ];
        assert_eq!(
            bind_params(sql, &params),
            "INSERT INTO reservations (id, guest_name, guest_email) \
             VALUES ('01J0000000000000000000000A', 'Suite $1 guest', NULL)"
        );
    }

    #[test]
    fn quotes_in_values_are_escaped() {
        let params = vec![Some("O'Brien $2".to_string()), Some("x".to_string())];
        assert_eq!(
            bind_params("SELECT * FROM login WHERE username = $1 AND password = $2", &params),
            "SELECT * FROM login WHERE username = 'O''Brien $2' AND password = 'x'"
        );
    }

    #[test]
    fn placeholders_inside_literals_stay_put() {
        let params = vec![Some("a".to_string())];
        assert_eq!(bind_params("SELECT '$1', \"$1\", $1", &params), "SELECT '$1', \"$1\", 'a'");
        assert_eq!(bind_params("SELECT $2", &params), "SELECT $2");
    }

    #[test]
    fn engine_errors_have_stable_codes() {
        let id = Ulid::new();
        let cases = [
            (EngineError::InvalidRange { start: 2, end: 1 }, "22007"),
            (EngineError::InvalidStay { start: 0, end: 1 }, "22008"),
            (EngineError::RoomNotFound(id), "P0002"),
            (EngineError::NotFound("menu item", id), "P0002"),
            (
                EngineError::DoubleBooking {
                    room_id: id,
                    conflicting: id,
                },
                "23P01",
            ),
            (EngineError::Conflict("dup".into()), "23505"),
            (EngineError::Validation("bad".into()), "23514"),
            (
                EngineError::InvalidTransition {
                    from: BookingStatus::Cancelled,
                    to: BookingStatus::Confirmed,
                },
                "55000",
            ),
            (EngineError::RoomInUse(id), "55000"),
            (EngineError::Unauthorized, "28P01"),
            (EngineError::LimitExceeded("rooms"), "54000"),
            (EngineError::WalError("disk".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(engine_code(&err), code, "{err}");
        }
    }

    #[test]
    fn sql_errors_distinguish_tables_from_syntax() {
        assert_eq!(sql_code(&SqlError::UnknownTable("x".into())), "42P01");
        assert_eq!(sql_code(&SqlError::Parse("x".into())), "42601");
        assert_eq!(sql_code(&SqlError::MissingFilter("id")), "42601");
    }

    #[test]
    fn describe_known_tables() {
        let fields = describe("SELECT * FROM quotes WHERE room_id = $1", None);
        assert_eq!(fields.len(), QUOTE_COLUMNS.len());
        assert_eq!(fields[1].name(), "nights");
        assert!(describe("INSERT INTO rooms (number) VALUES (1)", None).is_empty());
        assert!(describe("SELECT * FROM nowhere", None).is_empty());
    }
}

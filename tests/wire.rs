use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use innkeep::notify::{Confirmation, Notifier, NotifyError, RetryPolicy};
use innkeep::tenant::TenantManager;
use innkeep::wire;

const PASSWORD: &str = "innkeep";

// ── Test infrastructure ──────────────────────────────────────

/// Forwards every confirmation to the test.
struct ChannelNotifier(mpsc::UnboundedSender<Confirmation>);

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn deliver(&self, confirmation: &Confirmation) -> Result<(), NotifyError> {
        self.0
            .send(confirmation.clone())
            .map_err(|e| NotifyError(e.to_string()))
    }
}

async fn start_test_server() -> (SocketAddr, mpsc::UnboundedReceiver<Confirmation>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let tm = Arc::new(
        TenantManager::new(dir, 1000).with_notifier(Arc::new(ChannelNotifier(tx)), RetryPolicy::default()),
    );

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, PASSWORD.to_string(), None).await;
            });
        }
    });

    (addr, rx)
}

async fn connect(addr: SocketAddr, dbname: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("front_desk")
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn select(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.batch_execute(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

async fn add_room(client: &Client, number: u32, rate: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, number, kind, nightly_rate) VALUES ('{id}', {number}, 'Double', {rate})"
        ))
        .await
        .unwrap();
    id
}

fn reservation_sql(id: Ulid, room: Ulid, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO reservations (id, room_id, start, "end", payment_method, guest_name, guest_email)
           VALUES ('{id}', '{room}', '{start}', '{end}', 'transfer', 'Ana Ruiz', 'ana@example.com')"#
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn quote_book_and_list() {
    let (addr, mut confirmations) = start_test_server().await;
    let client = connect(addr, "test").await;
    let room = add_room(&client, 101, "500").await;

    let quote = select(
        &client,
        &format!(r#"SELECT * FROM quotes WHERE room_id = '{room}' AND start >= '2025-03-10' AND "end" <= '2025-03-13'"#),
    )
    .await;
    assert_eq!(quote.len(), 1);
    assert_eq!(quote[0].get("nights"), Some("3"));
    assert_eq!(quote[0].get("total"), Some("1500.00"));

    let rid = Ulid::new();
    client
        .batch_execute(&reservation_sql(rid, room, "2025-03-10", "2025-03-13"))
        .await
        .unwrap();

    let listed = select(&client, &format!("SELECT * FROM reservations WHERE id = '{rid}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("status"), Some("pending"));
    assert_eq!(listed[0].get("total_price"), Some("1500.00"));
    assert_eq!(listed[0].get("guest_phone"), None);

    let conflict = select(
        &client,
        &format!(r#"SELECT * FROM conflicts WHERE room_id = '{room}' AND start >= '2025-03-12' AND "end" <= '2025-03-14'"#),
    )
    .await;
    assert_eq!(conflict[0].get("conflict"), Some("t"));

    let free = select(&client, r#"SELECT * FROM availability WHERE start >= '2025-03-11' AND "end" <= '2025-03-12'"#).await;
    assert!(free.is_empty());
    let free = select(&client, r#"SELECT * FROM availability WHERE start >= '2025-03-13' AND "end" <= '2025-03-15'"#).await;
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].get("number"), Some("101"));

    let sent = tokio::time::timeout(Duration::from_secs(5), confirmations.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.reservation.id, rid);
    assert_eq!(sent.guest_email, "ana@example.com");
}

#[tokio::test]
async fn double_booking_is_an_exclusion_violation() {
    let (addr, _confirmations) = start_test_server().await;
    let client = connect(addr, "test").await;
    let room = add_room(&client, 7, "650.50").await;

    client
        .batch_execute(&reservation_sql(Ulid::new(), room, "2025-05-01", "2025-05-04"))
        .await
        .unwrap();
    let code = sqlstate(&client, &reservation_sql(Ulid::new(), room, "2025-05-03", "2025-05-05")).await;
    assert_eq!(code, "23P01");

    // Checking out the day the next guest checks in is fine.
    client
        .batch_execute(&reservation_sql(Ulid::new(), room, "2025-05-04", "2025-05-05"))
        .await
        .unwrap();
}

#[tokio::test]
async fn status_lifecycle_over_sql() {
    let (addr, _confirmations) = start_test_server().await;
    let client = connect(addr, "test").await;
    let room = add_room(&client, 12, "400").await;
    let rid = Ulid::new();
    client
        .batch_execute(&reservation_sql(rid, room, "2025-06-01", "2025-06-03"))
        .await
        .unwrap();

    client
        .batch_execute(&format!("UPDATE reservations SET status = 'confirmed' WHERE id = '{rid}'"))
        .await
        .unwrap();
    client
        .batch_execute(&format!("UPDATE reservations SET status = 'cancelled' WHERE id = '{rid}'"))
        .await
        .unwrap();

    let code = sqlstate(&client, &format!("UPDATE reservations SET status = 'confirmed' WHERE id = '{rid}'")).await;
    assert_eq!(code, "55000");

    // The cancelled stay no longer blocks the room.
    client
        .batch_execute(&reservation_sql(Ulid::new(), room, "2025-06-01", "2025-06-03"))
        .await
        .unwrap();

    // A room with an active reservation cannot be deleted.
    assert_eq!(sqlstate(&client, &format!("DELETE FROM rooms WHERE id = '{room}'")).await, "55000");
}

#[tokio::test]
async fn extended_protocol_parameters() {
    let (addr, _confirmations) = start_test_server().await;
    let client = connect(addr, "test").await;
    let room = add_room(&client, 21, "300").await;
    let room_str = room.to_string();

    let rows = client
        .query(
            r#"SELECT * FROM quotes WHERE room_id = $1 AND start >= $2 AND "end" <= $3"#,
            &[&room_str, &"2025-07-01", &"2025-07-03"],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let nights: i64 = rows[0].get("nights");
    let total: &str = rows[0].get("total");
    assert_eq!(nights, 2);
    assert_eq!(total, "600.00");

    let rows = client
        .query("SELECT * FROM rooms WHERE id = $1", &[&room_str])
        .await
        .unwrap();
    let number: i64 = rows[0].get("number");
    let images: &str = rows[0].get("images");
    assert_eq!(number, 21);
    assert_eq!(images, "[]");
}

#[tokio::test]
async fn parameter_values_that_look_like_placeholders() {
    let (addr, _confirmations) = start_test_server().await;
    let client = connect(addr, "test").await;
    let room = add_room(&client, 22, "300").await;
    let (id, room_str) = (Ulid::new().to_string(), room.to_string());

    let inserted = client
        .execute(
            r#"INSERT INTO reservations (id, room_id, start, "end", payment_method, guest_name)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
            &[&id, &room_str, &"2025-08-01", &"2025-08-03", &"cash", &"Suite $1 guest'); --"],
        )
        .await;
    assert!(inserted.is_ok(), "{inserted:?}");

    let rows = select(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("guest_name"), Some("Suite $1 guest'); --"));
    assert_eq!(rows[0].get("room_id"), Some(room_str.as_str()));
}

#[tokio::test]
async fn databases_are_separate_properties() {
    let (addr, _confirmations) = start_test_server().await;
    let hotel_a = connect(addr, "hotel_a").await;
    let hotel_b = connect(addr, "hotel_b").await;

    add_room(&hotel_a, 1, "500").await;
    add_room(&hotel_a, 2, "500").await;
    add_room(&hotel_b, 1, "800").await;

    assert_eq!(select(&hotel_a, "SELECT * FROM rooms").await.len(), 2);
    let b_rooms = select(&hotel_b, "SELECT * FROM rooms").await;
    assert_eq!(b_rooms.len(), 1);
    assert_eq!(b_rooms[0].get("nightly_rate"), Some("800.00"));
}

#[tokio::test]
async fn staff_login() {
    let (addr, _confirmations) = start_test_server().await;
    let client = connect(addr, "test").await;

    client
        .batch_execute("INSERT INTO users (username, password, role) VALUES ('maria', 'recepcion-2025', 'employee')")
        .await
        .unwrap();

    let rows = select(&client, "SELECT * FROM login WHERE username = 'maria' AND password = 'recepcion-2025'").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("role"), Some("employee"));

    let code = sqlstate(&client, "SELECT * FROM login WHERE username = 'maria' AND password = 'wrong-password'").await;
    assert_eq!(code, "28P01");

    let users = select(&client, "SELECT * FROM users").await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].columns().len(), 4);
}

#[tokio::test]
async fn catalog_and_payment_config() {
    let (addr, _confirmations) = start_test_server().await;
    let client = connect(addr, "test").await;

    let category = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO menu_categories (id, name) VALUES ('{category}', 'Breakfast')"))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO menu_items (name, description, price, category_id) VALUES ('Chilaquiles', 'Green salsa', '95.5', '{category}')"
        ))
        .await
        .unwrap();
    let items = select(&client, &format!("SELECT * FROM menu_items WHERE category_id = '{category}'")).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("price"), Some("95.50"));

    client
        .batch_execute("INSERT INTO events (client_name, event_date, area, amount) VALUES ('Familia Ruiz', '2025-08-15', 'Garden', 12000)")
        .await
        .unwrap();
    let events = select(&client, "SELECT * FROM events").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].get("status"), Some("pending"));
    assert_eq!(events[0].get("amount"), Some("12000.00"));

    client
        .batch_execute("UPDATE payment_config SET bank = 'Banco del Centro', clabe = '012180001234567891'")
        .await
        .unwrap();
    let config = select(&client, "SELECT * FROM payment_config").await;
    assert_eq!(config[0].get("bank"), Some("Banco del Centro"));
    assert_eq!(config[0].get("clabe"), Some("012180001234567891"));
}

#[tokio::test]
async fn sql_errors_carry_sqlstate() {
    let (addr, _confirmations) = start_test_server().await;
    let client = connect(addr, "test").await;

    assert_eq!(sqlstate(&client, "SELECT * FROM guests").await, "42P01");
    assert_eq!(sqlstate(&client, "SELEKT nothing").await, "42601");
    let missing = Ulid::new();
    assert_eq!(sqlstate(&client, &format!("DELETE FROM reservations WHERE id = '{missing}'")).await, "P0002");
    let room = add_room(&client, 5, "500").await;
    assert_eq!(sqlstate(&client, &reservation_sql(Ulid::new(), room, "2025-03-10", "2025-03-10")).await, "22007");
    assert_eq!(
        sqlstate(&client, "INSERT INTO rooms (number, kind, nightly_rate) VALUES (5, 'Suite', 900)").await,
        "23505"
    );
}

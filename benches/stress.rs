use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const DAY: i64 = 86_400_000;
/// 2025-01-01T00:00:00Z
const EPOCH_2025: i64 = 1_735_689_600_000;

async fn connect(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("bench")
        .password(std::env::var("INNKEEP_PASSWORD").unwrap_or_else(|_| "innkeep".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_property() -> String {
    format!("bench_{}", Ulid::new())
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn add_rooms(client: &tokio_postgres::Client, count: u32) -> Vec<Ulid> {
    let mut rooms = Vec::new();
    for number in 1..=count {
        let id = Ulid::new();
        client
            .batch_execute(&format!(
                "INSERT INTO rooms (id, number, kind, nightly_rate) VALUES ('{id}', {number}, 'Double', 500)"
            ))
            .await
            .expect("room insert failed");
        rooms.push(id);
    }
    rooms
}

fn booking_sql(room: Ulid, night: i64) -> String {
    let id = Ulid::new();
    let start = EPOCH_2025 + night * DAY;
    let end = start + DAY;
    format!(
        r#"INSERT INTO reservations (id, room_id, start, "end", payment_method, guest_name) VALUES ('{id}', '{room}', {start}, {end}, 'cash', 'Bench Guest')"#
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_property()).await;
    let room = add_rooms(&client, 1).await[0];

    let n = 300;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for night in 0..n as i64 {
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(room, night))
            .await
            .expect("booking failed");
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    println!(
        "  {n} one-night stays in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

/// Many clients race for the same nights of the same rooms; exactly one wins each.
async fn phase2_contention(host: &str, port: u16) {
    let property = fresh_property();
    let setup = connect(host, port, &property).await;
    let rooms = add_rooms(&setup, 5).await;
    let nights = 60i64;
    let n_tasks = 20;

    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let property = property.clone();
        let rooms = rooms.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &property).await;
            for night in 0..nights {
                for &room in &rooms {
                    match client.batch_execute(&booking_sql(room, night)).await {
                        Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                        Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                    };
                }
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let expected = rooms.len() * nights as usize;
    println!(
        "  {n_tasks} clients, {} attempts in {:.2}s: {won} booked (expected {expected}), {} rejected",
        won + lost.load(Ordering::Relaxed),
        elapsed.as_secs_f64(),
        lost.load(Ordering::Relaxed),
    );
    if won != expected {
        println!("  !! double booking or lost write detected");
    }
}

async fn phase3_reads_under_load(host: &str, port: u16) {
    let property = fresh_property();
    let setup = connect(host, port, &property).await;
    let rooms = add_rooms(&setup, 20).await;
    for (i, &room) in rooms.iter().enumerate() {
        for night in (0..90).step_by(i % 3 + 2) {
            setup
                .batch_execute(&booking_sql(room, night))
                .await
                .expect("prefill failed");
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4 {
        let host = host.to_string();
        let property = property.clone();
        let stop = stop.clone();
        let room = rooms[w];
        writers.push(tokio::spawn(async move {
            let client = connect(&host, port, &property).await;
            let mut night = 365;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&booking_sql(room, night)).await;
                night += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for r in 0..8 {
        let host = host.to_string();
        let property = property.clone();
        readers.push(tokio::spawn(async move {
            let client = connect(&host, port, &property).await;
            let mut latencies = Vec::with_capacity(300);
            for i in 0..300i64 {
                let start = EPOCH_2025 + ((i + r) % 80) * DAY;
                let end = start + 3 * DAY;
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        r#"SELECT * FROM availability WHERE start >= {start} AND "end" <= {end}"#
                    ))
                    .await
                    .expect("availability query failed");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        if let Ok(latencies) = h.await {
            all.extend(latencies);
        }
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("availability query", &mut all);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let success = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_property()).await;
            let room = add_rooms(&client, 1).await[0];
            for night in 0..10 {
                client
                    .batch_execute(&booking_sql(room, night))
                    .await
                    .expect("booking failed");
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }
    println!(
        "  {n_conns} connections: {}/{n_conns} succeeded in {:.2}s",
        success.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("INNKEEP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("INNKEEP_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid INNKEEP_PORT");

    println!("=== innkeep stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential bookings");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contention on shared rooms");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_reads_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}

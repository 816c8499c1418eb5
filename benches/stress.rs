use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;
/// 2026-01-01T00:00:00Z
const EPOCH: i64 = 1_767_225_600_000;

async fn connect(host: &str, port: u16, role: &str) -> Client {
    let password = std::env::var("CONCIERGE_PASSWORD").unwrap_or_else(|_| "concierge".into());
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("concierge")
        .user(format!("{role}:{}", Ulid::new()))
        .password(password);

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
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

fn booking_sql(room: Ulid, check_in: i64, check_out: i64) -> String {
    format!(
        "INSERT INTO bookings (id, room_id, check_in, check_out, total_price) \
         VALUES ('{}', '{room}', {check_in}, {check_out}, 12000)",
        Ulid::new()
    )
}

async fn setup(admin: &Client, n: usize) -> Vec<Ulid> {
    let mut rooms = Vec::with_capacity(n);
    for i in 0..n {
        let room = Ulid::new();
        admin
            .batch_execute(&format!(
                "INSERT INTO rooms (id, number) VALUES ('{room}', 'bench-{i}')"
            ))
            .await
            .unwrap();
        rooms.push(room);
    }
    println!("  registered {} rooms", rooms.len());
    rooms
}

/// One guest books back-to-back nights on one room.
async fn phase1_sequential(host: &str, port: u16, room: Ulid) {
    let client = connect(host, port, "guest").await;
    let n = 300;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as i64 {
        let check_in = EPOCH + i * DAY;
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(room, check_in, check_in + DAY))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create_booking", &mut latencies);
}

/// Many guests race for the same nights. Exactly one booking per night
/// must be admitted; everyone else gets a conflict.
async fn phase2_contention(host: &str, port: u16, rooms: &[Ulid]) {
    let n_tasks = 32;
    let nights = 50;
    let admitted = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let rooms = rooms.to_vec();
        let admitted = admitted.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, "guest").await;
            for night in 0..nights {
                let room = rooms[night as usize % rooms.len()];
                let check_in = EPOCH + 400 * DAY + night * DAY;
                match client
                    .batch_execute(&booking_sql(room, check_in + 14 * HOUR, check_in + DAY + 12 * HOUR))
                    .await
                {
                    Ok(()) => {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code().map(|c| c.code()) == Some("23P01") => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * nights as usize;
    let admitted = admitted.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} guests x {nights} nights = {total} attempts in {:.2}s ({:.0} ops/sec)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  admitted={admitted}, conflicts={}",
        conflicts.load(Ordering::Relaxed)
    );
    assert_eq!(admitted, nights as usize, "each night must be sold exactly once");
}

/// Availability reads while a writer keeps booking the same room.
async fn phase3_read_under_load(host: &str, port: u16, room: Ulid) {
    let writer_host = host.to_string();
    let writer = tokio::spawn(async move {
        let client = connect(&writer_host, port, "guest").await;
        for i in 0..300i64 {
            let check_in = EPOCH + 900 * DAY + i * DAY;
            let _ = client
                .batch_execute(&booking_sql(room, check_in, check_in + DAY))
                .await;
        }
    });

    let reader = connect(host, port, "hotel_staff").await;
    let mut latencies = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && !writer.is_finished() {
        let t = Instant::now();
        reader
            .simple_query(&format!(
                r#"SELECT * FROM availability WHERE room_id = '{room}' AND start >= {} AND "end" <= {}"#,
                EPOCH + 900 * DAY,
                EPOCH + 1200 * DAY
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();
    print_latency("availability", &mut latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n = 200;
    let start = Instant::now();
    let mut handles = Vec::with_capacity(n);
    for _ in 0..n {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let client = connect(&host, port, "guest").await;
            client.simple_query("SELECT * FROM rooms").await.unwrap();
            t.elapsed()
        }));
    }
    let mut latencies = Vec::with_capacity(n);
    for h in handles {
        latencies.push(h.await.unwrap());
    }
    println!("  {n} connections in {:.2}s", start.elapsed().as_secs_f64());
    print_latency("connect + query", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CONCIERGE_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CONCIERGE_PORT")
        .unwrap_or_else(|_| "5434".into())
        .parse()
        .expect("invalid CONCIERGE_PORT");

    println!("=== concierge stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[setup]");
    let admin = connect(&host, port, "admin").await;
    let rooms = setup(&admin, 10).await;
    drop(admin);

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&host, port, rooms[0]).await;

    println!("\n[phase 2] contended bookings");
    phase2_contention(&host, port, &rooms[1..]).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port, rooms[0]).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}

use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

async fn connect(host: &str, port: u16, password: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("billboard")
        .user("bench")
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

async fn total_slots(client: &Client) -> u32 {
    let msgs = client.simple_query("SELECT * FROM summary").await.unwrap();
    msgs.iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("total_slots").and_then(|v| v.parse().ok()),
            _ => None,
        })
        .expect("summary row")
}

fn quick_add_sql(slot: u32, i: usize) -> String {
    format!(
        "INSERT INTO bookings (slot_number, overwrite, client_name, location, start_date, end_date, rent, advance) \
         VALUES ({slot}, true, 'Client {i}', 'Site {slot}', '2026-01-01', '2026-12-31', 120000, 40000)"
    )
}

/// Every write is a full-table replace, so latency grows with the pool.
async fn phase1_sequential(client: &Client, slots: u32) {
    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let slot = (i as u32 % slots) + 1;
        let t = Instant::now();
        client.batch_execute(&quick_add_sql(slot, i)).await.unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} quick-adds in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_archive_cycle(client: &Client, slots: u32) {
    let cycles = 100;
    let mut latencies = Vec::with_capacity(cycles * 2);
    for i in 0..cycles {
        let slot = (i as u32 % slots) + 1;
        client.batch_execute(&quick_add_sql(slot, i)).await.unwrap();

        let t = Instant::now();
        client
            .simple_query(&format!("INSERT INTO archive (slot_number) VALUES ({slot})"))
            .await
            .unwrap();
        latencies.push(t.elapsed());

        let t = Instant::now();
        client.simple_query("UNDO 0").await.unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("archive + undo latency", &mut latencies);
}

async fn phase3_read_under_load(host: &str, port: u16, password: &str, slots: u32) {
    let writer_host = host.to_string();
    let writer_pw = password.to_string();
    let writer = tokio::spawn(async move {
        let client = connect(&writer_host, port, &writer_pw).await;
        for i in 0..300 {
            let slot = (i as u32 % slots) + 1;
            client.batch_execute(&quick_add_sql(slot, i)).await.unwrap();
        }
    });

    let reader = connect(host, port, password).await;
    let mut latencies = Vec::new();
    while !writer.is_finished() {
        for sql in ["SELECT * FROM active", "SELECT * FROM summary", "SELECT * FROM report"] {
            let t = Instant::now();
            reader.simple_query(sql).await.unwrap();
            latencies.push(t.elapsed());
        }
    }
    writer.await.unwrap();
    print_latency("read latency", &mut latencies);
}

async fn phase4_connection_storm(host: &str, port: u16, password: &str) {
    let n_conns = 32;
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_conns {
        let host = host.to_string();
        let password = password.to_string();
        handles.push(tokio::spawn(async move {
            let mut config = Config::new();
            config.host(&host).port(port).dbname("billboard").user("bench").password(&password);
            let Ok((client, conn)) = config.connect(NoTls).await else {
                return false;
            };
            tokio::spawn(conn);
            client.simple_query("SELECT * FROM first_empty").await.is_ok()
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap_or(false) {
            ok += 1;
        }
    }
    println!(
        "  {n_conns} connections: {ok}/{n_conns} served in {:.2}s (the rest hit the connection limit)",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("BILLBOARD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("BILLBOARD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid BILLBOARD_PORT");
    let password = std::env::var("BILLBOARD_PASSWORD").unwrap_or_else(|_| "billboard".into());

    println!("=== billboard stress benchmark ===");
    println!("target: {host}:{port} (state is reset first)\n");

    let client = connect(&host, port, &password).await;
    client.batch_execute("RESET; DELETE FROM archive").await.unwrap();
    let slots = total_slots(&client).await;
    println!("[setup] {slots} slots");

    println!("\n[phase 1] sequential quick-add throughput");
    phase1_sequential(&client, slots).await;

    println!("\n[phase 2] archive / undo cycle");
    phase2_archive_cycle(&client, slots).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port, &password, slots).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port, &password).await;

    client.batch_execute("RESET; DELETE FROM archive").await.unwrap();
    println!("\n=== benchmark complete ===");
}

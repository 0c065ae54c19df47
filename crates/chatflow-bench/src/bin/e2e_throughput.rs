//! End-to-end throughput benchmark for ChatFlow.
//!
//! Every client joins the room and sends broadcast chat messages as fast as
//! it can; the count is of `message` events received across all clients.

use chatflow_protocol::{codec, ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("ChatFlow end-to-end throughput");
    println!("  server:  {url} (start it with: cargo run --release)");
    println!("  clients: {num_clients}");
    println!("  warmup {WARMUP_SECS}s, measure {BENCH_SECS}s");
    println!();

    run_room_benchmark(&url, num_clients).await;
}

async fn run_room_benchmark(url: &str, num_clients: usize) {
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::with_capacity(num_clients);
    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let url = url.to_string();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(&url, client_id, received, barrier).await {
                eprintln!("client {client_id} error: {e}");
            }
        }));
    }

    barrier.wait().await;
    println!("all {num_clients} clients identified");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = received.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("duration:        {:>10.2}s", elapsed.as_secs_f64());
    println!("events received: {total:>10}");
    println!("throughput:      {per_sec:>10.0} msg/s");
    println!(
        "per client:      {:>10.0} msg/s",
        per_sec / num_clients as f64
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    client_id: usize,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // `connected` is always the first frame.
    receiver.next().await;

    let identify = codec::encode_json(&ClientEvent::identify(format!("bench-{client_id}")))?;
    sender.send(Message::Text(identify)).await?;

    // Wait until our own name shows up in a user list.
    while let Some(frame) = receiver.next().await {
        if let Message::Text(text) = frame? {
            if let Ok(ServerEvent::UserList { .. }) = codec::decode_json(&text) {
                break;
            }
        }
    }

    barrier.wait().await;

    let chat = Message::Text(codec::encode_json(&ClientEvent::text("x".repeat(64)))?);

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if let Message::Text(text) = frame {
                // Cheaper than a full decode; other event types never carry this tag.
                if text.starts_with("{\"type\":\"message\"") {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    loop {
        if sender.send(chat.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}

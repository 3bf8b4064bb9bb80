//! Live Feed Example
//!
//! Starts a local poll server, publishes a few chess moves and a clock tick,
//! and follows them with a poller. Halfway through the server is stopped and
//! restarted on the same port to show the disconnect and reconnect callbacks.
//!
//! Run with: `cargo run -p poller-client --example live_feed`
//! Set `POLLER_LOG_MODE=debug` to see the poll loop's own logging.

use std::time::Duration;

use poller_client::logging::init_logging_from_env;
use poller_client::{Poller, PollerConfig};
use poller_server::{Hub, HubConfig, PollServer};
use serde::Deserialize;
use tokio::time::sleep;

#[derive(Debug, Deserialize)]
struct Move {
    from: String,
    to: String,
}

fn hub() -> Result<Hub, Box<dyn std::error::Error>> {
    Ok(Hub::new(
        HubConfig::default().with_hold_timeout(Duration::from_secs(2)),
    )?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    println!("📡 Poller Live Feed Example");
    println!("===========================\n");

    let server = PollServer::start("127.0.0.1:0".parse()?, hub()?).await?;
    let addr = server.local_addr();
    let url = server.poll_url()?;
    println!("✅ Poll server listening on {}", url);

    let config = PollerConfig::default().with_backoff(Duration::from_millis(500));
    let mut poller = Poller::new(url.as_str(), config)?;
    poller
        .on_message_as::<Move, _>("boardChange", |m| {
            println!("♟️  {} -> {}", m.from, m.to);
        })
        .on_connect(|| println!("🟢 connected"))
        .on_disconnect(|| println!("🔴 disconnected"));

    let handle = poller.start();
    handle.on_message("clock", |data| println!("⏰ {}", data))?;

    for (from, to) in [("e2", "e4"), ("e7", "e5"), ("g1", "f3")] {
        sleep(Duration::from_millis(300)).await;
        server
            .hub()
            .broadcast("boardChange", serde_json::json!({"from": from, "to": to}))?;
    }
    server.hub().broadcast("clock", "12:00:00")?;
    sleep(Duration::from_millis(300)).await;

    println!("\n🛑 Stopping the server...");
    server.shutdown().await?;
    sleep(Duration::from_secs(2)).await;

    println!("🔁 Restarting the server on {}", addr);
    let server = PollServer::start(addr, hub()?).await?;
    sleep(Duration::from_secs(1)).await;
    server.hub().broadcast("boardChange", serde_json::json!({"from": "b8", "to": "c6"}))?;
    sleep(Duration::from_millis(500)).await;

    let poller = handle.shutdown().await?;
    server.shutdown().await?;

    println!("\n📊 Final versions:");
    for (name, version) in poller.versions().iter() {
        println!("  - {}: {}", name, version);
    }

    Ok(())
}

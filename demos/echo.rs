//! Echo server and client in one process.
//!
//! This example demonstrates:
//! - Starting a `Server` whose receiver replies to every frame
//! - Connecting a `Client` that forwards frames into a tokio channel
//! - Shutting both down with `end`
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example echo -- 9876 "hello"
//! ```

use std::sync::Arc;
use std::time::Duration;

use socwire::{receiver, Client, PeerId, Server, TransportConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => socwire::config::DEFAULT_PORT,
    };
    let text = args.next().unwrap_or_else(|| "hello".to_string());
    let config = TransportConfig::default().with_port(port);

    // Reply with the same bytes to whoever sent them
    let server = Arc::new(Server::new(config.clone()));
    let replies = Arc::downgrade(&server);
    server.start(Arc::new(move |peer: PeerId, data: &[u8]| {
        if let Some(server) = replies.upgrade() {
            if let Err(e) = server.send_data(peer, data) {
                eprintln!("echo to {} failed: {}", peer, e);
            }
        }
    }))?;

    let (rx_side, mut messages) = receiver::channel();
    let client = Client::new(config);
    client.start(Arc::new(rx_side))?;

    // The client connects in the background; retry until it is up
    while client.send_data(text.as_bytes()).is_err() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let reply = tokio::time::timeout(Duration::from_secs(5), messages.recv())
        .await?
        .ok_or("client receiver closed")?;
    println!("echo: {}", String::from_utf8_lossy(&reply.payload));

    client.end();
    server.end();
    Ok(())
}

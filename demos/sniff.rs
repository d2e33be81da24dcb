//! Sniffer - capture frames on one interface and print a line per frame.
//!
//! This example demonstrates:
//! - Loading a `BpfConfig` from JSON, or using defaults
//! - Opening a layer-2 socket with a filter-free configuration
//! - Polling with `select` so queued frames are drained before re-polling
//!
//! # Running
//!
//! ```sh
//! sudo RUST_LOG=bpfsock=debug cargo run --example sniff -- en0 [config.json]
//! ```

use bpfsock::{select, Backend, BpfConfig, Layer2Socket, SocketOptions};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let iface = args.next();
    let config = match args.next() {
        Some(path) => BpfConfig::from_file(path)?,
        None => BpfConfig::default(),
    };

    let mut options = SocketOptions::new().nofilter(true);
    if let Some(iface) = iface.as_deref() {
        options = options.iface(iface);
    }

    let backend = Backend::system();
    let mut socket = Layer2Socket::open(&backend, &config, options)?;
    tracing::info!(
        iface = socket.iface(),
        link = ?socket.link(),
        fd = socket.fileno(),
        "Capturing"
    );

    let max_len = socket.buffer_length() as usize;
    for _ in 0..100 {
        if select(&[&socket], Some(config.select_timeout()))?.is_empty() {
            continue;
        }
        if let Some(frame) = socket.recv(max_len) {
            println!(
                "{:.6} {:?} {} bytes (queued: {})",
                frame.timestamp,
                frame.link,
                frame.len(),
                socket.buffered_frames()
            );
        }
    }

    let (received, dropped) = socket.get_stats();
    tracing::info!(?received, ?dropped, "Done");
    socket.close();
    Ok(())
}

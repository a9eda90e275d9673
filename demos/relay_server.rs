//! Standalone voice relay
//!
//! Run with: cargo run --example relay_server [CONTROL_ADDR] [MEDIA_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                          # 0.0.0.0:4444 / 0.0.0.0:5555
//!   cargo run --example relay_server localhost                # 127.0.0.1:4444 / 0.0.0.0:5555
//!   cargo run --example relay_server 0.0.0.0:7000 0.0.0.0:7001
//!
//! ## Talking to it by hand
//!
//!   nc localhost 4444
//!   REGISTER 40000 alice
//!   SYNC
//!   MUTE
//!
//! Audio goes to the media port as `id(u32) seq(u32) len(u16) payload`,
//! all big-endian.

use std::net::SocketAddr;

use voice_relay::protocol::constants::{DEFAULT_CONTROL_PORT, DEFAULT_MEDIA_PORT};
use voice_relay::{RelayServer, ServerConfig};

/// Parse a bind address, filling in `default_port` when none is given.
///
/// Accepts "localhost", "localhost:PORT", "IP" and "IP:PORT".
fn parse_bind_addr(arg: &str, default_port: u16) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: relay_server [CONTROL_ADDR] [MEDIA_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  CONTROL_ADDR    TCP control address (default: 0.0.0.0:{})", DEFAULT_CONTROL_PORT);
    eprintln!("  MEDIA_ADDR      UDP media address (default: 0.0.0.0:{})", DEFAULT_MEDIA_PORT);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = ServerConfig::default();
    let addrs = [(1, DEFAULT_CONTROL_PORT), (2, DEFAULT_MEDIA_PORT)];
    for (index, default_port) in addrs {
        let Some(arg) = args.get(index) else {
            continue;
        };
        match parse_bind_addr(arg, default_port) {
            Ok(addr) if index == 1 => config = config.control_addr(addr),
            Ok(addr) => config = config.media_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voice_relay=info".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let server = RelayServer::bind(config).await?;
    println!(
        "Voice relay listening: control tcp://{} media udp://{}",
        server.control_addr(),
        server.media_addr()
    );

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    let stats = server.stats_snapshot();
    println!(
        "Stats: uptime={:?} received={} forwarded={} dropped={} registrations={}",
        stats.uptime,
        stats.datagrams_received,
        stats.frames_forwarded,
        stats.total_dropped(),
        stats.registrations,
    );

    Ok(())
}

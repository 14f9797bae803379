//! Frame server demo: streams synthetic frames to every connected client
//!
//! Run with: cargo run --example frame_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example frame_server                  # binds to 0.0.0.0:8002
//!   cargo run --example frame_server localhost        # binds to 127.0.0.1:8002
//!   cargo run --example frame_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! Pair with the `frame_client` demo. The frames are fake JPEGs: an SOI
//! marker, a frame counter, some filler and an EOI marker, so clients can
//! check ordering without an image codec.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use framecast::producer::DEFAULT_TARGET_FPS;
use framecast::server::config::DEFAULT_PORT;
use framecast::{run_producer, FrameServer, FrameSource, ServerConfig, ServerEvent};

/// Produces numbered fake JPEG frames forever
struct SyntheticCamera {
    next: u64,
}

impl FrameSource for SyntheticCamera {
    async fn next_frame(&mut self) -> Option<Bytes> {
        let n = self.next;
        self.next += 1;

        // Vary the size a little, like real compressed frames
        let filler = 20_000 + (n % 7) as usize * 1_500;
        let mut frame = BytesMut::with_capacity(filler + 12);
        frame.put_slice(&[0xFF, 0xD8]);
        frame.put_u64(n);
        frame.put_bytes(0x55, filler);
        frame.put_slice(&[0xFF, 0xD9]);
        Some(frame.freeze())
    }
}

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: frame_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:{})", DEFAULT_PORT);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => ServerConfig::with_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framecast=debug".parse()?)
                .add_directive("frame_server=debug".parse()?),
        )
        .init();

    let (server, mut events) = FrameServer::bind(config).await?;
    let server = Arc::new(server);
    println!("Streaming synthetic frames on {}", server.local_addr());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::SessionOpened {
                    session_id,
                    peer_addr,
                } => println!("[{}] Client connected from {}", session_id, peer_addr),
                ServerEvent::SessionClosed { stats, reason } => println!(
                    "[{}] Client closed ({}): {} frames, {} dropped",
                    stats.session_id, reason, stats.frames_sent, stats.dropped_frames
                ),
                ServerEvent::CapacityExceeded { peer_addr } => {
                    println!("Rejected {}: server full", peer_addr)
                }
            }
        }
    });

    let producer = tokio::spawn(run_producer(
        SyntheticCamera { next: 0 },
        Arc::clone(server.channel()),
        DEFAULT_TARGET_FPS,
        server.shutdown_token(),
    ));

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    let stats = producer.await??;
    println!(
        "Published {} frames ({} evicted unread)",
        stats.frames_published, stats.evicted
    );

    Ok(())
}

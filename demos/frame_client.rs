//! Frame client demo: receives frames and checks their order
//!
//! Run with: cargo run --example frame_client [SERVER_ADDR]
//!
//! Connects to a `frame_server` demo (default 127.0.0.1:8002), reconnecting
//! if the server goes away. Press Ctrl+C to stop and print a summary.

use std::net::SocketAddr;

use framecast::server::config::DEFAULT_PORT;
use framecast::{frame_sink, ClientConfig, Error, FrameReceiver};

/// Frame counter embedded by the demo server after the SOI marker
fn frame_number(jpeg: &[u8]) -> Option<u64> {
    let bytes = jpeg.get(2..10)?;
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

fn parse_server_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!("Invalid server address: '{}'", arg))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let server_addr = match args.get(1) {
        Some(arg) => parse_server_addr(arg)?,
        None => SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framecast=info".parse()?)
                .add_directive("frame_client=debug".parse()?),
        )
        .init();

    let (sink, mut frames) = frame_sink(30)?;
    let (receiver, _stats) = FrameReceiver::new(ClientConfig::new(server_addr), sink)?;
    let cancel = receiver.cancel_token();

    // Stand-in for decode + render
    let consumer = tokio::spawn(async move {
        let mut count = 0u64;
        let mut gaps = 0u64;
        let mut last = None;

        while let Some(jpeg) = frames.recv().await {
            count += 1;
            if let (Some(prev), Some(n)) = (last, frame_number(&jpeg)) {
                if n != prev + 1 {
                    gaps += 1;
                }
            }
            last = frame_number(&jpeg).or(last);
        }
        (count, gaps)
    });

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        println!("\nStopping...");
        cancel.cancel();
    });

    match receiver.run().await {
        Ok(stats) => println!(
            "Received {} frames at {:.1} fps, quality {}",
            stats.frames_received,
            stats.average_fps(),
            stats.quality()
        ),
        Err(Error::ConnectionExhausted { attempts }) => {
            eprintln!("Server unreachable after {} attempts", attempts)
        }
        Err(e) => return Err(e.into()),
    }

    let (count, gaps) = consumer.await?;
    println!("Consumer rendered {} frames, {} sequence gaps", count, gaps);

    Ok(())
}

//! PCM Bridge demo
//!
//! Connects to a remote PCM tunnel and plays the downlink on the default
//! output device. `r` + Enter toggles the microphone uplink, `q` + Enter
//! or Ctrl-C tears the stream down.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcm_bridge::audio::device::list_output_device_names;
use pcm_bridge::config::BridgeConfig;
use pcm_bridge::{StreamController, StreamFault, StreamState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PCM Bridge");

    let config = BridgeConfig::load()?;

    println!("\n=== Available Output Devices ===");
    for (i, name) in list_output_device_names().iter().enumerate() {
        let marker = if i == 0 { " [DEFAULT]" } else { "" };
        println!("  {name}{marker}");
    }
    println!();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args
        .next()
        .unwrap_or_else(|| "7100".to_string())
        .parse()
        .expect("Invalid port");

    let on_fault: Arc<dyn Fn(StreamFault) + Send + Sync> = Arc::new(|fault| match fault {
        StreamFault::RingBufferFull { dropped } => {
            tracing::warn!("jitter buffer saturated, dropped {} bytes", dropped);
        }
        other => tracing::warn!("stream fault: {}", other),
    });

    let controller = Arc::new(StreamController::with_default_output(config, on_fault)?);
    controller.connect_to(&host, port)?;
    tracing::info!("Connecting to {}:{}", host, port);

    // Keyboard control on a blocking thread.
    let (key_tx, mut key_rx) = tokio::sync::mpsc::unbounded_channel::<char>();
    std::thread::spawn(move || {
        let mut line = String::new();
        while std::io::stdin().read_line(&mut line).is_ok() {
            if let Some(c) = line.trim().chars().next() {
                if key_tx.send(c).is_err() {
                    break;
                }
            }
            line.clear();
        }
    });

    let mut stats_tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            Some(key) = key_rx.recv() => match key {
                'r' => {
                    if controller.state() == StreamState::Recording {
                        controller.stop_recording();
                    } else {
                        controller.start_recording()?;
                    }
                }
                'q' => break,
                _ => {}
            },
            _ = stats_tick.tick() => {
                let stats = controller.stats();
                tracing::info!(
                    "state: {}, {} KB received, {} chunks dropped",
                    controller.state(),
                    stats.bytes_received / 1024,
                    stats.chunks_dropped
                );
            }
        }
    }

    controller.close();
    Ok(())
}

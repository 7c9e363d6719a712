//! Standalone authority binary.
//!
//! Usage:
//!   cargo run -p netmove_server -- [--addr 127.0.0.1:40100] [--tick-hz 60] [--config movement.json] [--host]
//!
//! The server accepts joining clients, applies their move requests with the
//! shared movement kernel and replicates the results. With `--host` it also
//! spawns and drives its own avatar from a scripted turn-in-place pattern.
//!
//! Console commands:
//!   status  - Show entities and counters
//!   config  - Print the active movement config as JSON
//!   quit    - Shutdown server

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use netmove_server::server::{pump_console, MovementServer};
use netmove_shared::{config::MovementConfig, math::Vec2};
use tokio::sync::mpsc;
use tracing::info;

struct Args {
    cfg: MovementConfig,
    host: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => MovementConfig::load(&PathBuf::from(&args[i + 1]))?,
        _ => MovementConfig::default(),
    };
    let mut host = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            "--host" => {
                host = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    cfg.validate()?;
    Ok(Args { cfg, host })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, host } = parse_args()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, host, "Starting server");

    let mut server = MovementServer::new(cfg.clone())
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let avatar = if host {
        Some(server.spawn_local().await)
    } else {
        None
    };

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || pump_console(std::io::stdin().lock(), std::io::stdout(), console_tx));

    println!("Server ready. Type 'status' or 'config' for info, 'quit' to exit.");
    println!();

    // Poll at twice the tick rate; the host avatar's gate fires once per tick.
    let frame_interval = std::time::Duration::from_secs_f32(cfg.tick_duration() * 0.5);
    let mut next_frame = tokio::time::Instant::now();
    let mut last = next_frame;

    loop {
        let now = tokio::time::Instant::now();
        let dt = (now - last).as_secs_f32();
        last = now;

        if let Some(id) = avatar {
            server.drive_local(id, dt, Vec2::ZERO, Vec2::new(0.1, 0.0))?;
        }
        server.step().await?;

        next_frame += frame_interval;
        tokio::time::sleep_until(next_frame).await;
    }
}

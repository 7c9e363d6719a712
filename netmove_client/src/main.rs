//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p netmove_client -- [--addr 127.0.0.1:40100] [--tick-hz 60] [--config movement.json] [--frames N]
//!
//! The client joins the authority, drives its own entity from a scripted
//! input pattern (predicting locally), and follows every other entity the
//! authority replicates.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use netmove_client::client::{ClientState, MovementClient};
use netmove_client::input::InputScript;
use netmove_shared::config::MovementConfig;
use tracing::info;

struct Args {
    cfg: MovementConfig,
    frames: Option<u64>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // the config file is the base, flags override it
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => MovementConfig::load(&PathBuf::from(&args[i + 1]))?,
        _ => MovementConfig::default(),
    };
    let mut frames = None;

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
            "--frames" if i + 1 < args.len() => {
                frames = Some(args[i + 1].parse().context("parse --frames")?);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg.validate()?;
    Ok(Args { cfg, frames })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, frames } = parse_args()?;
    info!(server = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting client");

    let mut client = MovementClient::connect(&cfg).await.context("connect")?;
    info!(entity = ?client.entity(), "Connected to authority");

    // render at roughly twice the tick rate so the gate sees uneven frames
    let frame_interval = Duration::from_secs_f32(cfg.tick_duration() * 0.5);
    let mut script = InputScript::default();
    let mut last = tokio::time::Instant::now();
    let mut frame: u64 = 0;

    loop {
        let now = tokio::time::Instant::now();
        let dt = (now - last).as_secs_f32();
        last = now;

        let input = script.sample(dt);
        client.frame(dt, input).await?;
        client.poll(Duration::from_millis(1)).await?;

        if client.state == ClientState::Disconnected {
            println!("Disconnected from authority.");
            break;
        }

        frame += 1;
        if frame % 120 == 0 {
            let own = client.own().transform();
            info!(
                tick = client.own().tick().0,
                position = ?own.position,
                observed = client.observed_entities().count(),
                "Client status"
            );
        }
        if frames.is_some_and(|n| frame >= n) {
            client.disconnect().await?;
            break;
        }

        tokio::time::sleep(frame_interval).await;
    }

    Ok(())
}

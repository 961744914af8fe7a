//! Car Dashboard - Main Entry Point

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use clap::Parser;
use dashboard::config::AppConfig;
use dashboard::{create_router, init_logging, run_server, AppState, Dashboard};
use input::{KeyboardListener, TouchReader};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};

/// Camera multiplexer for the car dashboard display
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); defaults to ./dashboard.toml when present
    #[arg(short, long, env = "DASHBOARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.log).context("Failed to initialize logging")?;
    info!("=== Car Dashboard v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    // Checked by validation; nothing is running yet if these fail
    let api_addr = config.api.addr()?;
    let startup = config.startup.display_mode()?;
    let keymap = config.keymap()?;

    let dashboard = Arc::new(Dashboard::from_config(&config).context("Failed to start dashboard")?);
    {
        let dashboard = dashboard.clone();
        let result = tokio::task::spawn_blocking(move || dashboard.controller().switch_mode(startup)).await?;
        if let Err(e) = result {
            error!(mode = %startup, error = %e, "Startup mode failed");
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut listeners: Vec<JoinHandle<()>> = Vec::new();

    if config.input.keyboard {
        match KeyboardListener::spawn(keymap, dashboard.clone(), stop.clone()) {
            Ok(handle) => listeners.push(handle),
            Err(e) => warn!(error = %e, "Keyboard hotkeys unavailable"),
        }
    }
    if let Some(device) = &config.input.touch.device {
        match TouchReader::spawn(
            &config.input.touch,
            device,
            config.canvas,
            dashboard.controller().subscribe(),
            dashboard.clone(),
            stop.clone(),
        ) {
            Ok(handle) => listeners.push(handle),
            Err(e) => warn!(device = %device, error = %e, "Touch input unavailable"),
        }
    }

    let server = api_addr.map(|addr| {
        let state = Arc::new(AppState::new(dashboard.clone(), metrics));
        let app = create_router(state);
        tokio::spawn(run_server(app, addr, dashboard.shutdown_signal()))
    });

    let mut shutdown_signal = dashboard.shutdown_signal();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Interrupted");
        }
        _ = shutdown_signal.wait_for(|done| *done) => {}
    }

    {
        let dashboard = dashboard.clone();
        tokio::task::spawn_blocking(move || dashboard.shutdown()).await?;
    }

    stop.store(true, Ordering::SeqCst);
    for handle in listeners {
        if handle.join().is_err() {
            warn!("Input listener panicked");
        }
    }

    if let Some(server) = server {
        server.await?.context("API server failed")?;
    }

    info!("Stopped");
    Ok(())
}

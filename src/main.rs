//! Perforation-counting capture service.

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use miniola::camera::{FrameSource, SimOptions, SimulatedGate};
use miniola::config::Config;
use miniola::console::Console;
use miniola::record;
use miniola::scanner::{ControlMsg, Scanner};
use miniola::stats::ScanStats;
use miniola::stream::StreamServer;

#[derive(Parser, Debug)]
#[command(name = "miniola")]
#[command(about = "Perforation-counting capture service for a film-scanning rig")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Run without the interactive console
    #[arg(long)]
    headless: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    info!("miniola starting");
    let mut config = match &cli.config {
        Some(path) => {
            info!(config_path = %path.display(), "loading configuration");
            Config::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.stream.listen = listen;
        config.validate().context("listen override")?;
    }

    let tuning = config.detect.to_tuning()?;
    let stats = ScanStats::new_handle();
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut source: Box<dyn FrameSource> = Box::new(SimulatedGate::new(
        config.camera.width,
        config.camera.height,
        SimOptions {
            fps: config.camera.fps,
            ..SimOptions::default()
        },
    ));
    source.apply(config.camera.initial_settings());
    info!(
        width = config.camera.width,
        height = config.camera.height,
        fps = config.camera.fps,
        exposure_us = config.camera.exposure_us,
        "frame source ready"
    );

    let (control_tx, control_rx) = mpsc::channel(32);
    let (snapshot_tx, snapshot_rx) = watch::channel(None);

    let (recorder, writer) = record::channel(&config.record, stats.clone());
    let writer_task = tokio::spawn(writer.run());

    let server = StreamServer::bind(config.stream.clone(), snapshot_rx.clone(), stats.clone())
        .await
        .context("binding http server")?;
    let server_task = tokio::spawn(server.run());

    if cli.headless {
        info!("console disabled");
    } else {
        Console::new(control_tx.clone(), config.detect.threshold.clone()).spawn();
    }

    let stats_task = {
        let stats = stats.clone();
        let snapshot_rx = snapshot_rx.clone();
        tokio::spawn(async move {
            const PERIOD_S: u64 = 10;
            let mut tick = tokio::time::interval(Duration::from_secs(PERIOD_S));
            tick.tick().await;
            let mut last_grabbed = 0u64;
            loop {
                tick.tick().await;
                let snap = stats.snapshot();
                let fps = (snap.frames_grabbed - last_grabbed) as f64 / PERIOD_S as f64;
                last_grabbed = snap.frames_grabbed;
                let (perforations, film_frames) = snapshot_rx
                    .borrow()
                    .as_ref()
                    .map(|s| (s.report.perforations, s.report.film_frames))
                    .unwrap_or((0, 0));
                info!(
                    grabbed = snap.frames_grabbed,
                    fps,
                    perforations,
                    film_frames,
                    saved = snap.frames_saved,
                    dropped = snap.frames_dropped,
                    clients = snap.clients_active,
                    "stats"
                );
            }
        })
    };

    let scanner = Scanner::new(
        source,
        &config,
        tuning,
        recorder,
        stats.clone(),
        control_rx,
        snapshot_tx,
        shutdown.clone(),
    );
    let mut scan_task = tokio::task::spawn_blocking(move || scanner.run());

    info!("running, press Ctrl+C to stop");
    let scan_outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            shutdown.store(true, Ordering::Relaxed);
            let _ = control_tx.send(ControlMsg::Shutdown).await;
            (&mut scan_task).await
        }
        result = &mut scan_task => {
            info!("scan loop ended on its own");
            result
        }
    };

    // The scan loop owned the only recorder handle; once it is gone the
    // writer drains what is queued and returns.
    drop(control_tx);
    if let Err(error) = writer_task.await {
        warn!(%error, "writer task panicked");
    }
    server_task.abort();
    stats_task.abort();

    let snap = stats.snapshot();
    info!(
        grabbed = snap.frames_grabbed,
        saved = snap.frames_saved,
        dropped = snap.frames_dropped,
        "stopped"
    );
    scan_outcome
        .context("scan task panicked")?
        .context("scan loop failed")?;
    Ok(())
}

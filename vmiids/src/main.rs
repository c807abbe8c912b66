// src/main.rs

//! Daemon entry-point.
//!
//! 1. Parse the command line and load `vmiids.toml`
//! 2. Set up structured logging and, if configured, the metrics exporter
//! 3. Open the QEMU monitor console and drain its banner
//! 4. Build the orchestrator, install the signal watcher and start
//! 5. Block until a signal or `StopIds` stops the orchestrator

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::Level;
use tokio::signal::unix::{SignalKind, signal};

use vmiids::{
    config::{self, Config, MonitorConfig},
    logging,
    monitor::{MonitorProtocol, StreamConsole, VmState},
    orchestrator::{Orchestrator, OrchestratorSettings},
    telemetry, vmiids_log,
};

#[derive(Debug, Parser)]
#[command(name = "vmiids", version, about = "VM introspection intrusion detection daemon")]
struct Cli {
    /// Configuration file; defaults to `vmiids.toml` next to the executable.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Directory that contains the running executable.
fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        eprintln!("[vmiids] {} not found, using defaults", path.display());
        Ok(config::parse("")?)
    }
}

fn open_monitor(cfg: &MonitorConfig) -> Result<Option<VmState>> {
    if !cfg.enabled {
        vmiids_log!(Level::Warn, "main", "monitor disabled, guest state is unavailable");
        return Ok(None);
    }
    let console = StreamConsole::open(&cfg.endpoint)
        .with_context(|| format!("opening monitor console {:?}", cfg.endpoint))?;
    let monitor = Arc::new(MonitorProtocol::new(console, cfg.prompt.clone(), cfg.timeout));
    if cfg.handshake {
        monitor.handshake().context("monitor handshake")?;
    }
    vmiids_log!(Level::Info, "main", "monitor session open on {:?}", cfg.endpoint);
    Ok(Some(VmState::new(monitor)))
}

/// SIGINT / SIGTERM → `stop(signal)` on a dedicated thread.
fn watch_signals(orchestrator: Arc<Orchestrator>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("signal runtime")?;

    thread::Builder::new()
        .name("vmiids-signals".into())
        .spawn(move || {
            let received = rt.block_on(async {
                let mut term = signal(SignalKind::terminate())?;
                let mut int = signal(SignalKind::interrupt())?;
                let kind = tokio::select! {
                    _ = term.recv() => SignalKind::terminate(),
                    _ = int.recv() => SignalKind::interrupt(),
                };
                Ok::<_, std::io::Error>(kind.as_raw_value())
            });
            match received {
                Ok(signum) => {
                    vmiids_log!(Level::Warn, "main", "signal {} received", signum);
                    orchestrator.stop(signum);
                }
                Err(e) => vmiids_log!(Level::Error, "main", "cannot install signal handlers: {}", e),
            }
        })
        .context("spawning signal watcher")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1 ─ Config
    let config_path = cli.config.unwrap_or_else(|| exe_dir().join("vmiids.toml"));
    let cfg = load_config(&config_path)?;
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(exe_dir);

    // 2 ─ Logging & metrics
    logging::setup_logging(&base_dir, &cfg.logging).context("logging setup failed")?;
    if let Some(addr) = cfg.control.metrics_listen {
        telemetry::install_prometheus(addr).context("metrics exporter")?;
        vmiids_log!(Level::Info, "main", "metrics on http://{}/metrics", addr);
    }

    // 3 ─ Monitor
    let vm = open_monitor(&cfg.monitor)?;

    // 4 ─ Orchestrator
    let orchestrator = Orchestrator::new(OrchestratorSettings::from_config(&cfg), vm)?;
    watch_signals(Arc::clone(&orchestrator))?;
    orchestrator.start()?;

    // 5 ─ Wait for shutdown
    orchestrator.wait();
    vmiids_log!(Level::Info, "main", "IDS stopped cleanly");
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use logic_engine::config::{self as cfg, KeyBinding};
use logic_engine::executor::{Engine, EngineDeps, EngineEvent};
use logic_engine::guard::{ProcessFinder, ProcessGuard};
use logic_engine::store::{self, MemoryLogicStore};

/// logic-engine CLI
#[derive(Debug, Parser)]
#[command(
    name = logic_engine::PKG_NAME,
    version = logic_engine::PKG_VERSION,
    about = "Replay recorded input Logics on hotkey release"
)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short = 'c', long = "config", default_value = "config/logics.json")]
    config: PathBuf,

    /// Target process name (case-insensitive substring); overrides `target_process`
    #[arg(short = 'p', long = "process")]
    process: Option<String>,

    /// Force-stop key name (e.g. "F12"); overrides `settings.force_stop_key`
    #[arg(long = "force-stop-key")]
    force_stop_key: Option<String>,

    /// Enable dry-run mode (log actions instead of simulating input)
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Set log level or filter (e.g., debug, logic_engine=trace). Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print the JSON Schema for the configuration and exit
    #[arg(long = "print-schema")]
    print_schema: bool,

    /// Reload Logics when the config file changes
    #[arg(long = "watch")]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_schema {
        cfg::write_schema_to_writer(std::io::stdout())?;
        println!();
        return Ok(());
    }

    logic_engine::init_tracing(args.log_level.as_deref());
    info!(
        version = logic_engine::PKG_VERSION,
        config = %args.config.display(),
        dry_run = args.dry_run,
        "Starting logic-engine"
    );

    // Load configuration
    let mut config = cfg::load_from_path_async(&args.config).await?;
    if args.dry_run {
        config.settings.dry_run = true;
    }
    if let Some(key) = &args.force_stop_key {
        config.settings.force_stop_key = Some(KeyBinding::new(key.clone()));
        cfg::validate_config(&config).context("Invalid --force-stop-key")?;
    }
    debug!(target: "logic_engine", logics = config.logics.len(), "Configuration loaded successfully");

    // Bind the target process
    let guard = Arc::new(ProcessGuard::system());
    let Some(process_name) = args.process.clone().or_else(|| config.target_process.clone()) else {
        bail!("No target process: pass --process or set `target_process` in the config");
    };
    match ProcessFinder::new().find(&process_name) {
        Some(process) => guard.set_selected(Some(process)),
        None => bail!("Target process '{process_name}' is not running"),
    }

    let store = Arc::new(MemoryLogicStore::new(config.logics.clone()));
    let _watch = if args.watch {
        Some(store::watch_config(&args.config, Arc::clone(&store))?)
    } else {
        None
    };

    let engine = Engine::new(config.settings.clone(), EngineDeps::system(store, guard));
    let mut events = engine.subscribe();
    engine.start_monitoring()?;

    // Main loop: log engine events until Ctrl+C
    tokio::select! {
        _ = async {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::StepLog { message }) => info!(target: "logic_engine::steps", "{message}"),
                    Ok(EngineEvent::ExecutionFailed { logic_id, error }) => {
                        error!(?logic_id, %error, "Logic failed");
                    }
                    Ok(EngineEvent::StateChanged(_)) => {}
                    Ok(event) => info!(?event, "Engine event"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event listener lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Idle shutdown must not sweep: Ctrl from Ctrl+C is still held
    engine.shutdown();
    info!("logic-engine exited");
    Ok(())
}

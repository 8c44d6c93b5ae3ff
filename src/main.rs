//! scanlab command line entry point
//!
//! Runs recipe configurations against the simulated `dummy` device and
//! writes one CSV file per recipe.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use scanlab::{
    config::{AppState, ScannerSettings},
    data::DataCollector,
    device::{create_shared_registry, dummy_device, DeviceRegistry, SharedDeviceRegistry},
    recipe::ConfigManager,
    scan::{ScanEngine, ScanEvent, ScanState},
    types::Value,
    variables::{create_shared_store, VariableStore},
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Interval at which the result queue is drained
const DRAIN_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "scanlab", version, about = "Recipe-based parameter scans")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a configuration to completion
    Run {
        /// Recipe configuration file
        config: PathBuf,
        /// Directory receiving one CSV file per recipe
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Set a variable before the run (`name=value`, repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
        /// Persist datasets to a run folder while scanning
        #[arg(long)]
        save_temp: bool,
    },
    /// Import and validate a configuration without running it
    Check {
        /// Recipe configuration file
        config: PathBuf,
    },
    /// List the available device elements
    Devices,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scanlab=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = ScannerSettings::load_or_default();
    let registry = build_registry()?;

    match cli.command {
        Command::Run {
            config,
            output,
            vars,
            save_temp,
        } => run(&settings, registry, &config, output.as_deref(), &vars, save_temp),
        Command::Check { config } => check(&settings, &registry, &config),
        Command::Devices => {
            let registry = registry
                .read()
                .map_err(|e| anyhow!("device registry lock poisoned: {}", e))?;
            for address in registry.addresses() {
                let element = registry.element(address)?;
                println!("{}\t{}\t{:?}", address, element.value_type(), element.kind());
            }
            Ok(())
        }
    }
}

fn build_registry() -> anyhow::Result<SharedDeviceRegistry> {
    let mut registry = DeviceRegistry::new();
    registry.insert_device(dummy_device())?;
    Ok(create_shared_registry(registry))
}

fn load_config(
    settings: &ScannerSettings,
    registry: &SharedDeviceRegistry,
    path: &Path,
) -> anyhow::Result<ConfigManager> {
    let mut manager = ConfigManager::new();
    manager.set_precision(settings.precision);
    let registry = registry
        .read()
        .map_err(|e| anyhow!("device registry lock poisoned: {}", e))?;
    manager
        .load_from_file(path, &*registry)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(manager)
}

fn check(settings: &ScannerSettings, registry: &SharedDeviceRegistry, path: &Path) -> anyhow::Result<()> {
    let manager = load_config(settings, registry, path)?;
    let config = manager.config();
    config.validate()?;
    for recipe in config.recipes() {
        println!(
            "{}{}: {} points, {} steps",
            recipe.name,
            if recipe.active { "" } else { " (inactive)" },
            recipe.parameter.nb_points(),
            recipe.steps.len()
        );
    }
    println!("{} points in total", config.total_points());
    Ok(())
}

fn run(
    settings: &ScannerSettings,
    registry: SharedDeviceRegistry,
    path: &Path,
    output: Option<&Path>,
    vars: &[String],
    save_temp: bool,
) -> anyhow::Result<()> {
    let mut app_state = AppState::load_or_default();

    let mut store = VariableStore::new(registry.clone());
    if let Err(e) = app_state.restore_variables(&mut store) {
        tracing::warn!("Failed to restore saved variables: {}", e);
    }
    for assignment in vars {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", assignment))?;
        store.set(name.trim(), Value::parse_literal(value.trim()))?;
    }

    let mut manager = load_config(settings, &registry, path)?;
    let store = create_shared_store(store);
    let mut engine = ScanEngine::new(store.clone(), settings.scan_options());
    manager.attach_activity(engine.activity());
    store
        .write()
        .map_err(|e| anyhow!("variable store lock poisoned: {}", e))?
        .attach_activity(engine.activity());

    let mut collector = DataCollector::new().with_precision(settings.precision);
    if save_temp || settings.save_temp {
        let root = settings
            .resolved_data_root()
            .ok_or_else(|| anyhow!("could not determine the data directory"))?;
        collector = collector.with_data_root(root);
    }

    let config = manager.config();
    collector.begin_run(&config)?;
    let points = engine.start(config)?;
    let events = engine.events();

    loop {
        match events.recv_timeout(DRAIN_TICK) {
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        collector.drain(&points)?;
        if !engine.state().is_active() {
            break;
        }
    }
    let state = engine.wait();
    collector.drain(&points)?;
    for event in events.try_iter() {
        log_event(&event);
    }

    let (collected, total) = collector.progress();
    tracing::info!("Collected {}/{} points", collected, total);

    if let Some(dir) = output {
        std::fs::create_dir_all(dir)?;
        if let Some(run) = collector.last_run() {
            for dataset in run.datasets() {
                let file = dir.join(format!("{}.csv", dataset.recipe()));
                dataset.save(&file)?;
                println!("{}", file.display());
            }
        }
        if settings.save_config {
            manager.save_to_file(&dir.join(format!("config.{}", scanlab::config::CONFIG_EXTENSION)))?;
        }
    }

    app_state.add_recent_config(path);
    if let Ok(store) = store.read() {
        app_state.capture_variables(&store);
    }
    if let Err(e) = app_state.save() {
        tracing::warn!("Failed to save app state: {}", e);
    }

    if state == ScanState::Errored {
        let error = engine
            .take_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("scan failed: {}", error);
    }
    Ok(())
}

fn log_event(event: &ScanEvent) {
    match event {
        ScanEvent::SweepCompleted { recipe } => tracing::info!("Recipe '{}' completed", recipe),
        ScanEvent::Errored { error } => tracing::error!("Scan errored: {}", error),
        other => tracing::trace!("{:?}", other),
    }
}

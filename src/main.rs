use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use objective_engine::objective::{ObjectiveSet, SetOutcome};
use objective_engine::runner::{Command, spawn_tick_loop};
use objective_engine::{DefinitionCatalog, EngineConfig, ObjectiveManager, Result};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("objective_engine=info")),
        )
        .init();

    match run().await {
        Ok(Some(SetOutcome::AnyFailed(_))) => ExitCode::from(2),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<Option<SetOutcome>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("objectives.toml"));
    let config = EngineConfig::load(&config_path)?;

    let catalog = DefinitionCatalog::load_from_directory(&config.data_dir)?;
    if catalog.is_empty() {
        warn!("No objective definitions under {:?}, nothing to track", config.data_dir);
        return Ok(None);
    }

    let mut manager = ObjectiveManager::with_config(&config);
    let mut events = manager.subscribe();
    let mut set = ObjectiveSet::new(catalog.roots());
    set.attach(&mut manager);
    info!("Tracking {}", catalog.root_ids().join(", "));

    let manager = Arc::new(Mutex::new(manager));
    let ticker = spawn_tick_loop(manager.clone(), config.tick_interval());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    info!(
                        "event {}",
                        serde_json::to_string(&event).unwrap_or_else(|_| event.event_type().to_string())
                    );
                    let manager = manager.lock().await;
                    if let Some(outcome) = set.handle_event(&event, &manager) {
                        break Some(outcome);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event receiver lagged, {} events skipped", skipped);
                    let manager = manager.lock().await;
                    if let Some(id) = set.first_failed(&manager) {
                        break Some(SetOutcome::AnyFailed(id.to_string()));
                    }
                    if set.all_completed(&manager) {
                        break Some(SetOutcome::AllCompleted);
                    }
                }
                Err(RecvError::Closed) => break None,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match Command::parse(&line) {
                    Ok(command) => {
                        let mut manager = manager.lock().await;
                        if let Some(output) = command.apply(&mut manager) {
                            println!("{}", output);
                        }
                    }
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => {
                    info!("stdin closed, running on conditions only");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break None;
            }
        }
    };

    ticker.abort();

    match &outcome {
        Some(SetOutcome::AllCompleted) => info!("All objectives completed"),
        Some(SetOutcome::AnyFailed(id)) => warn!("Objective '{}' failed", id),
        None => {}
    }

    let manager = manager.lock().await;
    match serde_json::to_string_pretty(&manager.snapshot()) {
        Ok(snapshot) => println!("{}", snapshot),
        Err(e) => warn!("Failed to render final status: {}", e),
    }

    Ok(outcome)
}

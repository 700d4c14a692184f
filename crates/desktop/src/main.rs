use std::env;

use desktop::commands;
use desktop::config::config_path_from_env;
use desktop::watch::configure_watcher;
use desktop::{AppState, CatalogEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = config_path_from_env();
    let state = AppState::open(config_path)?;

    if let Some(root) = env::args().nth(1) {
        commands::set_library_root(&state, &root)?;
    }

    let mut events = state.events.subscribe();
    commands::rescan(&state)?;
    stream_until_terminal(&mut events).await?;

    let stats = commands::get_library_stats(&state)?;
    println!("{}", serde_json::to_string(&stats)?);

    if state.config.read().watch_library {
        configure_watcher(&state);
        info!("Watching for changes; press Ctrl-C to exit");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("Failed to listen for Ctrl-C: {}", err);
                }
            }
            result = stream_forever(&mut events) => result?,
        }
    }

    state.coordinator.shutdown().await;
    Ok(())
}

/// Prints events as JSON lines until one ends a scan run. Returns false if
/// the bus closed first.
async fn stream_until_terminal(
    events: &mut Receiver<CatalogEvent>,
) -> Result<bool, serde_json::Error> {
    loop {
        match events.recv().await {
            Ok(event) => {
                println!("{}", serde_json::to_string(&event)?);
                if event.is_terminal() {
                    return Ok(true);
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
            Err(RecvError::Closed) => return Ok(false),
        }
    }
}

async fn stream_forever(events: &mut Receiver<CatalogEvent>) -> Result<(), serde_json::Error> {
    while stream_until_terminal(events).await? {}
    Ok(())
}

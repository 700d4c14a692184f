use std::path::PathBuf;
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::commands::{configured_root, rescan, CommandError};
use crate::state::AppState;

/// Installs or removes the folder watcher to match the current config.
pub fn configure_watcher(state: &AppState) {
    let config = state.config.read().clone();
    if !config.watch_library {
        debug!("Watcher disabled (watch_library=false)");
        *state.watcher.write() = None;
        return;
    }
    let root = match configured_root(state) {
        Some(root) => root,
        None => {
            info!("Watcher idle: no library root configured");
            *state.watcher.write() = None;
            return;
        }
    };

    let debounce = config.watch_debounce();
    match setup_watcher(state.clone(), root.clone(), debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} for changes (debounce {}s)",
                root.display(),
                debounce.as_secs()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => {
            warn!("Failed to start watcher: {}", err);
            *state.watcher.write() = None;
        }
    }
}

fn setup_watcher(
    state: AppState,
    root: PathBuf,
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    watcher.watch(&root, RecursiveMode::Recursive)?;

    tokio::spawn(async move {
        watch_loop(state, rx, debounce).await;
    });

    Ok(watcher)
}

async fn watch_loop(state: AppState, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    match rescan(&state) {
                        Ok(()) => info!("Auto-rescan started"),
                        Err(CommandError::AlreadyScanning) => {
                            info!("Auto-rescan skipped: scan already running; next change retries");
                        }
                        Err(err) => warn!("Auto-rescan failed: {}", err),
                    }
                    break;
                }
                maybe_event = rx.recv() => {
                    if maybe_event.is_none() {
                        return;
                    }
                }
            }
        }
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

use std::path::PathBuf;
use std::sync::Arc;

use library::Library;
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use tracing::info;

use crate::commands::CommandError;
use crate::config::{load_or_create_config, resolve_path, AppConfig};
use crate::events::EventBus;
use crate::scan::{ProgressPolicy, ScanCoordinator};

/// Everything a command needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub config_path: PathBuf,
    pub config: Arc<RwLock<AppConfig>>,
    pub coordinator: ScanCoordinator,
    pub events: EventBus,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
}

impl AppState {
    /// Loads (or creates) the config at `config_path` and opens the catalog
    /// it points at.
    pub fn open(config_path: PathBuf) -> Result<Self, CommandError> {
        let (config, created) = load_or_create_config(&config_path)?;
        if created {
            info!("Created default config at {:?}", config_path);
        } else {
            info!("Loaded config from {:?}", config_path);
        }

        let index_path = resolve_path(&config_path, config.index_path.trim());
        let library = Library::open(&index_path)?;

        let events = EventBus::new();
        let policy = ProgressPolicy {
            step_percent: config.progress_step_percent,
            interval: config.progress_interval(),
        };
        let coordinator = ScanCoordinator::new(events.clone(), policy);

        Ok(Self {
            library,
            config_path,
            config: Arc::new(RwLock::new(config)),
            coordinator,
            events,
            watcher: Arc::new(RwLock::new(None)),
        })
    }
}

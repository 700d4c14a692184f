use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "MUSICTHING_CONFIG";

const DEFAULT_INDEX_PATH: &str = "library.redb";
const DEFAULT_STEP_PERCENT: f64 = 1.0;
const DEFAULT_INTERVAL_MS: u64 = 250;
const DEFAULT_DEBOUNCE_SECS: u64 = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    /// Configured music folder; empty when unset.
    pub library_root: String,
    pub index_path: String,
    pub extensions: Vec<String>,
    pub progress_step_percent: f64,
    pub progress_interval_ms: u64,
    pub watch_library: bool,
    pub watch_debounce_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            library_root: "".to_string(),
            index_path: DEFAULT_INDEX_PATH.to_string(),
            extensions: library::DEFAULT_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            progress_step_percent: DEFAULT_STEP_PERCENT,
            progress_interval_ms: DEFAULT_INTERVAL_MS,
            watch_library: false,
            watch_debounce_secs: DEFAULT_DEBOUNCE_SECS,
        }
    }
}

impl AppConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        let secs = if self.watch_debounce_secs == 0 {
            DEFAULT_DEBOUNCE_SECS
        } else {
            self.watch_debounce_secs
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Loads the config at `path`, writing defaults first if it does not exist.
/// The flag is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(AppConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: AppConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.index_path.trim().is_empty() {
            config.index_path = DEFAULT_INDEX_PATH.to_string();
        }
        config.extensions.retain(|ext| !ext.trim().is_empty());
        if config.extensions.is_empty() {
            config.extensions = AppConfig::default().extensions;
        }
        if !(config.progress_step_percent > 0.0) {
            config.progress_step_percent = DEFAULT_STEP_PERCENT;
        }
        if config.progress_interval_ms == 0 {
            config.progress_interval_ms = DEFAULT_INTERVAL_MS;
        }
        config.library_root = config.library_root.trim().to_string();
        return Ok((config, false));
    }

    let config = AppConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_library_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}

/// Launcher settings loading from relaunch.json
use crate::config::types::{LaunchError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the optional settings file inside the base directory
pub const SETTINGS_FILE: &str = "relaunch.json";

/// Environment variable naming an explicit settings file
pub const SETTINGS_ENV: &str = "RELAUNCH_CONFIG";

/// Full relaunch.json structure. Every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    /// Root directory holding the `cache/` tree
    pub base_dir: PathBuf,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Attempts per cache update before giving up
    pub retry_attempts: usize,
    /// Base delay between attempts; jitter of up to the same amount is added
    pub retry_backoff_ms: u64,
    /// Accept TLS peers whose chain does not verify (pinned hosts)
    pub accept_invalid_certs: bool,
    /// Runtime installation directory (contains `bin/java`)
    pub runtime_home: Option<PathBuf>,
    /// Inherited library search path appended after extracted libraries
    pub library_path: Option<String>,
    /// Where `command-file` scripts are written
    pub command_file_dir: Option<PathBuf>,
    pub max_chain_depth: usize,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
            retry_attempts: 3,
            retry_backoff_ms: 250,
            accept_invalid_certs: false,
            runtime_home: std::env::var_os("JAVA_HOME").map(PathBuf::from),
            library_path: inherited_library_path(),
            command_file_dir: None,
            max_chain_depth: 16,
        }
    }
}

/// Pick the cache base directory: the platform cache dir, then `~/.cache`.
fn default_base_dir() -> PathBuf {
    if let Some(dir) = dirs::cache_dir() {
        return dir.join("relaunch");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cache").join("relaunch");
    }
    std::env::temp_dir().join("relaunch")
}

fn inherited_library_path() -> Option<String> {
    let var = if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else if cfg!(windows) {
        return None;
    } else {
        "LD_LIBRARY_PATH"
    };
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

impl LauncherSettings {
    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LaunchError::Config(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;

        let settings: LauncherSettings = serde_json::from_str(&content).map_err(|e| {
            LaunchError::Config(format!(
                "Failed to parse settings JSON {}: {}",
                path.display(),
                e
            ))
        })?;

        info!("Loaded launcher settings from {}", path.display());
        Ok(settings)
    }

    /// Resolve settings from an explicit path, `RELAUNCH_CONFIG`, or the
    /// default base directory, in that order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        if let Some(path) = std::env::var_os(SETTINGS_ENV) {
            return Self::load_from_file(PathBuf::from(path));
        }

        let defaults = Self::default();
        let candidate = defaults.base_dir.join(SETTINGS_FILE);
        if candidate.is_file() {
            return Self::load_from_file(candidate);
        }

        debug!("No settings file found, using defaults");
        Ok(defaults)
    }

    /// Root of the mangled cache tree
    pub fn cache_root(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Settings rooted at `base_dir` with no backoff, for tests and tools.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            retry_backoff_ms: 0,
            ..Self::default()
        }
    }
}

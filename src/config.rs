//! Demo configuration.
//!
//! Read from the JSON file named by `UMARELL_CONFIG`. A missing file is
//! created with the defaults; an unreadable or invalid one falls back to them.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the config file path.
pub const CONFIG_ENV: &str = "UMARELL_CONFIG";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Channel the demo publishes on and listens to.
    pub channel_name: String,
    /// Period of the counter ticker.
    pub tick_interval_ms: u64,
    /// How many ticks the demo runs before tearing down.
    pub run_ticks: u32,
    /// Publish with `PublishOption::KeepInMemory`.
    pub keep_in_memory: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            channel_name: "My channel name".to_string(),
            tick_interval_ms: 1000,
            run_ticks: 5,
            keep_in_memory: false,
        }
    }
}

impl DemoConfig {
    /// Load the config at `path`, writing the defaults there on first run.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::init(path),
            Err(e) => {
                warn!("Cannot read demo config {}: {}", path.display(), e);
                return Self::default();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Invalid demo config {}: {}, using defaults", path.display(), e);
            Self::default()
        })
    }

    /// Load from the file named by `UMARELL_CONFIG`, if set.
    pub fn from_env() -> Self {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(&PathBuf::from(path)),
            None => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)
    }

    /// Ticker period, never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    fn init(path: &Path) -> Self {
        let config = Self::default();
        match config.save(path) {
            Ok(()) => info!("Wrote default demo config to {}", path.display()),
            Err(e) => warn!("Cannot write demo config {}: {}", path.display(), e),
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Use a mutex to ensure tests that modify env vars don't race
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("first").join("run.json");
        let config = DemoConfig::load(&path);
        assert_eq!(config, DemoConfig::default());

        let written: DemoConfig = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, DemoConfig::default());
    }

    #[test]
    fn test_invalid_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(DemoConfig::load(&path), DemoConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "channel_name": "news" }"#).unwrap();

        let config = DemoConfig::load(&path);
        assert_eq!(config.channel_name, "news");
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.run_ticks, 5);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("demo.json");
        let config = DemoConfig {
            channel_name: "news".to_string(),
            tick_interval_ms: 10,
            run_ticks: 2,
            keep_in_memory: true,
        };
        config.save(&path).unwrap();
        assert_eq!(DemoConfig::load(&path), config);
    }

    #[test]
    fn test_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.json");
        fs::write(&path, r#"{ "run_ticks": 9 }"#).unwrap();

        unsafe {
            env::set_var(CONFIG_ENV, &path);
        }
        assert_eq!(DemoConfig::from_env().run_ticks, 9);

        unsafe {
            env::remove_var(CONFIG_ENV);
        }
        assert_eq!(DemoConfig::from_env(), DemoConfig::default());
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = DemoConfig {
            tick_interval_ms: 0,
            ..DemoConfig::default()
        };
        assert_eq!(config.tick_interval().as_millis(), 1);
    }
}

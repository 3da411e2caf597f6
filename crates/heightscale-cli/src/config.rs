//! Configuration file management.
//!
//! The file holds loosely typed values so that a hand-edited typo in one
//! field never discards the rest: a field of the wrong type is dropped with
//! a warning and takes its default. [`Config::settings`] validates the
//! result once into [`Settings`], which is what the commands consume.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use heightscale_core::collector::DEFAULT_COLLECTOR_URL;
use heightscale_core::mode::DEFAULT_POLL_INTERVAL;
use heightscale_core::session::DEFAULT_SCAN_TIMEOUT;
use heightscale_core::{ScaleAddress, TargetBmi};
use heightscale_store::DEFAULT_RETENTION_DAYS;
use heightscale_types::uuids::DEFAULT_SCALE_ADDRESS;

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Target BMI used to derive height from weight
    #[serde(default = "default_target_bmi", deserialize_with = "string_or_number")]
    pub target_bmi: String,

    /// Address of the scale (MAC, or peripheral UUID on macOS)
    #[serde(default = "default_scale_address")]
    pub scale_address: String,

    /// Display kg and cm (false: lbs and feet/inches)
    #[serde(default = "default_true")]
    pub use_metric: bool,

    /// Push live measurements to the collector
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    /// Label language: "en" or "fi"
    #[serde(default = "default_language")]
    pub language: String,

    /// Use the BLE data path at all
    #[serde(default = "default_true")]
    pub ble_enabled: bool,

    /// Base URL of the measurement collector
    #[serde(default = "default_collector_url")]
    pub collector_url: String,

    /// How long a connect scans for the scale
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,

    /// Connection mode poll interval
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Default window for `prune`
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Measurement database path (defaults to the platform data directory)
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_target_bmi() -> String {
    TargetBmi::default().to_string()
}

/// Accept `target_bmi = 23.5` as well as `target_bmi = "23.5"`.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match toml::Value::deserialize(deserializer)? {
        toml::Value::String(text) => text,
        toml::Value::Float(value) => value.to_string(),
        toml::Value::Integer(value) => value.to_string(),
        // Unusable; settings() falls back to the default BMI.
        other => other.to_string(),
    })
}

fn default_scale_address() -> String {
    DEFAULT_SCALE_ADDRESS.to_string()
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    Language::default().to_string()
}

fn default_collector_url() -> String {
    DEFAULT_COLLECTOR_URL.to_string()
}

fn default_scan_timeout_secs() -> u64 {
    DEFAULT_SCAN_TIMEOUT.as_secs()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_bmi: default_target_bmi(),
            scale_address: default_scale_address(),
            use_metric: true,
            auto_sync: true,
            language: default_language(),
            ble_enabled: true,
            collector_url: default_collector_url(),
            scan_timeout_secs: default_scan_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            retention_days: default_retention_days(),
            database: None,
        }
    }
}

/// Display language for labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    En,
    Fi,
}

impl Language {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "fi" => Some(Self::Fi),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::En => f.write_str("en"),
            Self::Fi => f.write_str("fi"),
        }
    }
}

/// Validated settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub target_bmi: TargetBmi,
    pub scale_address: ScaleAddress,
    pub use_metric: bool,
    pub auto_sync: bool,
    pub language: Language,
    pub ble_enabled: bool,
    pub collector_url: String,
    pub scan_timeout: Duration,
    pub poll_interval: Duration,
    pub retention_days: u32,
    pub database: PathBuf,
}

impl Config {
    /// Get the default config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heightscale")
            .join("config.toml")
    }

    /// The explicit path if given, else the default one.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit.map_or_else(Self::path, Path::to_path_buf)
    }

    /// Load config from `path`, or return the default if missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<toml::Table>(&content) {
                    Ok(table) => return Self::from_table(table),
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Build a config from a parsed file, keeping every field that
    /// deserializes and defaulting the ones that do not.
    fn from_table(table: toml::Table) -> Self {
        let mut accepted = toml::Table::new();
        for (key, value) in table {
            let mut candidate = accepted.clone();
            candidate.insert(key.clone(), value);
            match toml::Value::Table(candidate.clone()).try_into::<Self>() {
                Ok(_) => accepted = candidate,
                Err(e) => eprintln!("Warning: Ignoring config field '{}': {}", key, e.message()),
            }
        }
        toml::Value::Table(accepted)
            .try_into()
            .unwrap_or_default()
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Validate into [`Settings`]. `database` overrides the configured path.
    pub fn settings(&self, database: Option<&Path>) -> Settings {
        let scale_address = self.scale_address.parse().unwrap_or_else(|e| {
            warn!("{e}; using {DEFAULT_SCALE_ADDRESS}");
            ScaleAddress::default()
        });

        let language = Language::parse(&self.language).unwrap_or_else(|| {
            warn!(language = %self.language, "unsupported language, using en");
            Language::default()
        });

        let database = database
            .map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .unwrap_or_else(heightscale_store::default_db_path);

        Settings {
            target_bmi: TargetBmi::parse_or_default(&self.target_bmi),
            scale_address,
            use_metric: self.use_metric,
            auto_sync: self.auto_sync,
            language,
            ble_enabled: self.ble_enabled,
            collector_url: self.collector_url.clone(),
            scan_timeout: secs_or("scan_timeout_secs", self.scan_timeout_secs, DEFAULT_SCAN_TIMEOUT),
            poll_interval: secs_or(
                "poll_interval_secs",
                self.poll_interval_secs,
                DEFAULT_POLL_INTERVAL,
            ),
            retention_days: self.retention_days,
            database,
        }
    }
}

fn secs_or(field: &str, secs: u64, default: Duration) -> Duration {
    if secs == 0 {
        warn!(field, "must be positive, using {}s", default.as_secs());
        default
    } else {
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.target_bmi, "21");
        assert_eq!(config.scale_address, "0C:95:41:CB:23:FF");
        assert_eq!(config.collector_url, "http://localhost:8000");
        assert_eq!(config.language, "en");
        assert!(config.use_metric && config.auto_sync && config.ble_enabled);
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("use_metric = false\nlanguage = \"fi\"\n").unwrap();
        assert!(!config.use_metric);
        assert_eq!(config.language, "fi");
        assert_eq!(config.target_bmi, "21");
        assert_eq!(config.poll_interval_secs, 5);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            target_bmi: "23.5".to_string(),
            auto_sync: false,
            database: Some(PathBuf::from("/var/lib/heightscale.db")),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from(&dir.path().join("absent.toml")), Config::default());
    }

    #[test]
    fn test_numeric_target_bmi_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "target_bmi = 23.5\nscale_address = \"AA:BB:CC:DD:EE:FF\"\nauto_sync = false\n",
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.target_bmi, "23.5");
        assert_eq!(config.scale_address, "AA:BB:CC:DD:EE:FF");
        assert!(!config.auto_sync);
        assert_eq!(config.settings(None).target_bmi.value(), 23.5);

        fs::write(&path, "target_bmi = 22\n").unwrap();
        assert_eq!(Config::load_from(&path).settings(None).target_bmi.value(), 22.0);

        fs::write(&path, "target_bmi = true\n").unwrap();
        assert_eq!(Config::load_from(&path).settings(None).target_bmi, TargetBmi::default());
    }

    #[test]
    fn test_mistyped_field_only_resets_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "auto_sync = \"yes\"\nscan_timeout_secs = -3\nlanguage = \"fi\"\ncollector_url = \"http://10.0.0.2:8000\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert!(config.auto_sync);
        assert_eq!(config.scan_timeout_secs, 10);
        assert_eq!(config.language, "fi");
        assert_eq!(config.collector_url, "http://10.0.0.2:8000");
    }

    #[test]
    fn test_load_malformed_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "target_bmi = [not toml").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_settings_valid_values() {
        let config = Config {
            target_bmi: "25".to_string(),
            scale_address: "aa-bb-cc-dd-ee-ff".to_string(),
            language: "FI".to_string(),
            scan_timeout_secs: 20,
            ..Config::default()
        };
        let settings = config.settings(None);
        assert_eq!(settings.target_bmi.value(), 25.0);
        assert_eq!(settings.scale_address.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(settings.language, Language::Fi);
        assert_eq!(settings.scan_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_settings_fall_back_on_invalid_values() {
        let config = Config {
            target_bmi: "abc".to_string(),
            scale_address: "not-an-address".to_string(),
            language: "sv".to_string(),
            scan_timeout_secs: 0,
            poll_interval_secs: 0,
            ..Config::default()
        };
        let settings = config.settings(None);
        assert_eq!(settings.target_bmi, TargetBmi::default());
        assert_eq!(settings.scale_address, ScaleAddress::default());
        assert_eq!(settings.language, Language::En);
        assert_eq!(settings.scan_timeout, DEFAULT_SCAN_TIMEOUT);
        assert_eq!(settings.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_database_override_precedence() {
        let config = Config {
            database: Some(PathBuf::from("from-config.db")),
            ..Config::default()
        };
        assert_eq!(config.settings(None).database, PathBuf::from("from-config.db"));
        assert_eq!(
            config.settings(Some(Path::new("from-flag.db"))).database,
            PathBuf::from("from-flag.db")
        );
        assert_eq!(
            Config::default().settings(None).database,
            heightscale_store::default_db_path()
        );
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(
            Config::resolve_path(Some(Path::new("/etc/hs.toml"))),
            PathBuf::from("/etc/hs.toml")
        );
        assert!(Config::resolve_path(None).ends_with("heightscale/config.toml"));
    }
}

//! Supervisor settings and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for settings operations
#[derive(Debug, Error)]
pub enum SettingsError {
    /// IO error reading the settings file
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Identity of the supervisor instance
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InstanceSettings {
    /// Stable identifier of this instance
    #[serde(default)]
    pub id: String,
    /// Human-readable name of this instance
    #[serde(default)]
    pub name: String,
}

/// Limits applied across all supervised processes
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LimitSettings {
    /// Maximum number of simultaneously running processes (0 = unlimited)
    #[serde(default)]
    pub max_processes: i64,
}

/// A filesystem made available to supervised processes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesystemSettings {
    /// Name the filesystem is referenced by in cleanup patterns
    pub name: String,
    /// Filesystem kind ("disk" or "mem")
    pub kind: String,
    /// Base directory outputs must stay inside of
    pub base: PathBuf,
}

/// Settings for the disk observer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObserverSettings {
    /// Poll interval for disk filesystems, in seconds
    #[serde(default = "default_observer_interval_secs")]
    pub interval_secs: u64,
}

fn default_observer_interval_secs() -> u64 {
    10
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_observer_interval_secs(),
        }
    }
}

/// Settings for catalog persistence
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StorageSettings {
    /// Path of the JSON catalog file (in-memory store when absent)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub instance: InstanceSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub observer: ObserverSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub filesystems: Vec<FilesystemSettings>,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Apply environment variable overrides to the settings
    ///
    /// Overrides the following values if environment variables are set:
    /// - RESTREAMD_ID -> instance.id
    /// - RESTREAMD_NAME -> instance.name
    /// - RESTREAMD_MAX_PROCESSES -> limits.max_processes
    /// - RESTREAMD_OBSERVER_INTERVAL_SECS -> observer.interval_secs
    /// - RESTREAMD_STORAGE_PATH -> storage.path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RESTREAMD_ID") {
            self.instance.id = val;
        }

        if let Ok(val) = env::var("RESTREAMD_NAME") {
            self.instance.name = val;
        }

        if let Ok(val) = env::var("RESTREAMD_MAX_PROCESSES") {
            if let Ok(max) = val.parse::<i64>() {
                self.limits.max_processes = max;
            }
        }

        if let Ok(val) = env::var("RESTREAMD_OBSERVER_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.observer.interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("RESTREAMD_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(val));
        }
    }

    /// Load settings from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let mut settings = Self::load_from_file(path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all settings-related env vars
    fn clear_env_vars() {
        env::remove_var("RESTREAMD_ID");
        env::remove_var("RESTREAMD_NAME");
        env::remove_var("RESTREAMD_MAX_PROCESSES");
        env::remove_var("RESTREAMD_OBSERVER_INTERVAL_SECS");
        env::remove_var("RESTREAMD_STORAGE_PATH");
    }

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = Settings::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(settings.instance.id, "");
        assert_eq!(settings.instance.name, "");
        assert_eq!(settings.limits.max_processes, 0);
        assert_eq!(settings.observer.interval_secs, 10);
        assert_eq!(settings.storage.path, None);
        assert!(settings.filesystems.is_empty());
    }

    #[test]
    fn test_full_settings_parse() {
        let toml_str = r#"
[instance]
id = "node-1"
name = "edge restreamer"

[limits]
max_processes = 12

[observer]
interval_secs = 5

[storage]
path = "/var/lib/restreamd/db.json"

[[filesystems]]
name = "disk"
kind = "disk"
base = "/srv/media"

[[filesystems]]
name = "mem"
kind = "mem"
base = "/memfs"
"#;
        let settings = Settings::parse_toml(toml_str).expect("Valid TOML should parse");

        assert_eq!(settings.instance.id, "node-1");
        assert_eq!(settings.instance.name, "edge restreamer");
        assert_eq!(settings.limits.max_processes, 12);
        assert_eq!(settings.observer.interval_secs, 5);
        assert_eq!(
            settings.storage.path,
            Some(PathBuf::from("/var/lib/restreamd/db.json"))
        );
        assert_eq!(settings.filesystems.len(), 2);
        assert_eq!(settings.filesystems[0].name, "disk");
        assert_eq!(settings.filesystems[0].kind, "disk");
        assert_eq!(settings.filesystems[1].base, PathBuf::from("/memfs"));
    }

    #[test]
    fn test_partial_settings_use_defaults_for_missing() {
        let toml_str = r#"
[limits]
max_processes = 3
"#;
        let settings = Settings::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(settings.limits.max_processes, 3);
        assert_eq!(settings.observer.interval_secs, 10); // default
        assert_eq!(settings.instance.id, ""); // default
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut settings = Settings::parse_toml("").expect("Valid TOML");

        env::set_var("RESTREAMD_ID", "override-id");
        env::set_var("RESTREAMD_MAX_PROCESSES", "7");
        env::set_var("RESTREAMD_OBSERVER_INTERVAL_SECS", "2");
        env::set_var("RESTREAMD_STORAGE_PATH", "/tmp/db.json");
        settings.apply_env_overrides();
        clear_env_vars();

        assert_eq!(settings.instance.id, "override-id");
        assert_eq!(settings.limits.max_processes, 7);
        assert_eq!(settings.observer.interval_secs, 2);
        assert_eq!(settings.storage.path, Some(PathBuf::from("/tmp/db.json")));
    }

    #[test]
    fn test_env_override_ignores_unparsable_numbers() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut settings = Settings::parse_toml("[limits]\nmax_processes = 4").expect("Valid TOML");

        env::set_var("RESTREAMD_MAX_PROCESSES", "not-a-number");
        settings.apply_env_overrides();
        clear_env_vars();

        assert_eq!(settings.limits.max_processes, 4);
    }
}

//! Codehive configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CodehiveError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodehiveConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
}

impl CodehiveConfig {
    /// Load config from the default path (~/.codehive/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CodehiveError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CodehiveError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        tracing::debug!("📄 Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CodehiveError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker.poll_interval_ms == 0 {
            return Err(CodehiveError::Config(
                "worker.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.sync.enabled && self.sync.interval_secs == 0 {
            return Err(CodehiveError::Config(
                "sync.interval_secs must be greater than zero when sync is enabled".into(),
            ));
        }
        if self.sync.enabled && self.sync.check_interval_secs == Some(0) {
            return Err(CodehiveError::Config(
                "sync.check_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Codehive home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codehive")
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.codehive/codehive.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Queue worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 { 1000 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { poll_interval_ms: default_poll_interval_ms() }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Periodic repository re-sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// A repository is due once its last sync is older than this.
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
    /// How often to look for due repositories. Defaults to `interval_secs`.
    #[serde(default)]
    pub check_interval_secs: Option<u64>,
}

fn bool_true() -> bool { true }
fn default_sync_interval_secs() -> u64 { 1800 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sync_interval_secs(),
            check_interval_secs: None,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.unwrap_or(self.interval_secs))
    }
}

/// Progress reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Minimum gap between two non-terminal status deliveries per status.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Also log every status change.
    #[serde(default = "bool_true")]
    pub log_progress: bool,
}

fn default_cooldown_ms() -> u64 { 1000 }

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            log_progress: true,
        }
    }
}

impl ReportingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CodehiveConfig::default();
        assert_eq!(config.worker.poll_interval(), Duration::from_secs(1));
        assert!(config.sync.enabled);
        assert_eq!(config.sync.check_interval(), config.sync.interval());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: CodehiveConfig = toml::from_str(
            r#"
            [sync]
            interval_secs = 60
            check_interval_secs = 5

            [reporting]
            cooldown_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.interval(), Duration::from_secs(60));
        assert_eq!(config.sync.check_interval(), Duration::from_secs(5));
        assert_eq!(config.reporting.cooldown(), Duration::from_millis(250));
        assert!(config.reporting.log_progress);
        assert_eq!(config.worker.poll_interval_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = CodehiveConfig::default();
        config.sync.interval_secs = 0;
        assert!(config.validate().is_err());

        config.sync.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("codehive-test-config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[worker]\npoll_interval_ms = 200\n").unwrap();

        let config = CodehiveConfig::load_from(&path).unwrap();
        assert_eq!(config.worker.poll_interval(), Duration::from_millis(200));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_resolved_path_absolute() {
        let db = DatabaseConfig { path: "/tmp/codehive.db".into() };
        assert_eq!(db.resolved_path(), PathBuf::from("/tmp/codehive.db"));
    }
}

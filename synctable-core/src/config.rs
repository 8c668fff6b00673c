//! Configuration for live tables.
//!
//! Config files must set every field; programmatic callers start from
//! `SyncConfig::default()` and adjust with the `with_*` setters.

use crate::error::ConfigError;
use crate::query::DEFAULT_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a table decides that a data change was caused by its own save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionStrategy {
    /// Suppress any refresh within `save_guard_ms` of the latest save.
    #[default]
    SaveWindow,
    /// Suppress refreshes whose change echoes a pending write token.
    WriteToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Leading+trailing debounce window for (re)subscriptions.
    pub debounce_ms: u64,
    /// Window after a save during which refreshes are suppressed.
    pub save_guard_ms: u64,
    /// Limit used when the caller does not set one.
    pub default_limit: u32,
    /// Request a live changefeed after the initial result.
    pub changes: bool,
    pub suppression: SuppressionStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            save_guard_ms: 1000,
            default_limit: DEFAULT_LIMIT,
            changes: true,
            suppression: SuppressionStrategy::SaveWindow,
        }
    }
}

impl SyncConfig {
    /// Load from the path given by `--config` or `SYNCTABLE_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "debounce_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.default_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_limit",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn save_guard_window(&self) -> Duration {
        Duration::from_millis(self.save_guard_ms)
    }

    /// Windows beyond `u64::MAX` milliseconds saturate.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce_ms = duration_ms(window);
        self
    }

    pub fn with_save_guard(mut self, window: Duration) -> Self {
        self.save_guard_ms = duration_ms(window);
        self
    }

    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn with_changes(mut self, changes: bool) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_suppression(mut self, suppression: SuppressionStrategy) -> Self {
        self.suppression = suppression;
        self
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("SYNCTABLE_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

fn duration_ms(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
debounce_ms = 750
save_guard_ms = 1000
default_limit = 50
changes = true
suppression = "write_token"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = SyncConfig::from_toml(FULL).unwrap();
        assert_eq!(config.debounce_window(), Duration::from_millis(750));
        assert_eq!(config.default_limit, 50);
        assert_eq!(config.suppression, SuppressionStrategy::WriteToken);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let err = SyncConfig::from_toml("debounce_ms = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let input = format!("{}\nretry = 3\n", FULL);
        assert!(matches!(
            SyncConfig::from_toml(&input),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_debounce_is_invalid() {
        let input = FULL.replace("debounce_ms = 750", "debounce_ms = 0");
        assert!(matches!(
            SyncConfig::from_toml(&input),
            Err(ConfigError::InvalidValue { field: "debounce_ms", .. })
        ));
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = SyncConfig::from_path(file.path()).unwrap();
        assert_eq!(config.save_guard_window(), Duration::from_secs(1));
    }

    #[test]
    fn test_oversized_windows_saturate() {
        let config = SyncConfig::default()
            .with_debounce(Duration::MAX)
            .with_save_guard(Duration::from_millis(250));
        assert_eq!(config.debounce_ms, u64::MAX);
        assert_eq!(config.save_guard_ms, 250);
    }

    #[test]
    fn test_default_matches_documented_windows() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce_window(), Duration::from_secs(1));
        assert_eq!(config.save_guard_window(), Duration::from_secs(1));
        assert_eq!(config.default_limit, DEFAULT_LIMIT);
        assert!(config.validate().is_ok());
    }
}

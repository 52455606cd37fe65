//! Configuration system for the portal.
//!
//! TOML-based configuration with built-in defaults, plus the environment
//! variables the deployment scripts actually set: `PORT`,
//! `CPOR_DRIVE_FILE_ID`, `CPOR_DRIVE_BOOT_SYNC` and `CPOR_DRIVE_SYNC_TOKEN`.
//! Environment values win over file values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::contracts::ContractsConfig;
use crate::error::{PortalError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PortalConfig {
    pub server: ServerConfig,
    pub pivot: PivotConfig,
    pub drive: DriveConfig,
    pub contracts: ContractsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind port.
    pub port: u16,
    /// Path of the dashboard projection file.
    pub snapshot_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PivotConfig {
    /// Soft deadline in milliseconds; exceeding it adds a warning.
    pub soft_deadline_ms: u64,
    /// Hard deadline in milliseconds; exceeding it aborts the query.
    pub hard_deadline_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Identifier of the primary workbook at the remote file provider.
    /// Remote refresh is disabled when unset.
    pub file_id: Option<String>,
    /// Fetch the primary workbook at startup (only meaningful with a
    /// configured `file_id`).
    pub boot_sync: bool,
    /// When set, `/api/dashboard/refresh-drive` requires a matching
    /// `X-Portal-Token` header.
    pub sync_token: Option<String>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            file_id: None,
            boot_sync: true,
            sync_token: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8050,
            snapshot_file: "dashboard_data.json".to_string(),
        }
    }
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            soft_deadline_ms: 30_000,
            hard_deadline_ms: 60_000,
        }
    }
}

impl PortalConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PortalError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| PortalError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or
    /// defaults), then apply environment overrides.
    ///
    /// Search order:
    /// 1. `CPOR_CONFIG` environment variable
    /// 2. `./cpor.toml` (current directory)
    /// 3. `~/.config/cpor/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut config = Self::load_file_or_defaults();
        config.apply_env(&|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn load_file_or_defaults() -> Self {
        if let Ok(path) = std::env::var("CPOR_CONFIG") {
            if let Ok(cfg) = Self::from_file(&path) {
                tracing::info!(path = %path, "loaded config from CPOR_CONFIG");
                return cfg;
            }
        }
        if let Ok(cfg) = Self::from_file("cpor.toml") {
            tracing::info!("loaded config from ./cpor.toml");
            return cfg;
        }
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("cpor").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }
        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Apply environment-variable overrides through an injectable lookup.
    pub fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse::<u16>()
                .map_err(|_| PortalError::Config(format!("invalid PORT value '{port}'")))?;
        }
        if let Some(file_id) = lookup("CPOR_DRIVE_FILE_ID") {
            if !file_id.trim().is_empty() {
                self.drive.file_id = Some(file_id.trim().to_string());
            }
        }
        if let Some(flag) = lookup("CPOR_DRIVE_BOOT_SYNC") {
            self.drive.boot_sync = parse_flag(&flag)
                .ok_or_else(|| {
                    PortalError::Config(format!("invalid CPOR_DRIVE_BOOT_SYNC value '{flag}'"))
                })?;
        }
        if let Some(token) = lookup("CPOR_DRIVE_SYNC_TOKEN") {
            if !token.is_empty() {
                self.drive.sync_token = Some(token);
            }
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let cfg = PortalConfig::default();
        assert_eq!(cfg.server.port, 8050);
        assert_eq!(cfg.pivot.soft_deadline_ms, 30_000);
        assert_eq!(cfg.pivot.hard_deadline_ms, 60_000);
        assert_eq!(cfg.contracts.expiring_window_days, 60);
        assert!(cfg.drive.file_id.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[server]
port = 9000

[pivot]
soft_deadline_ms = 10000

[contracts]
expiring_window_days = 90
"#;
        let cfg = PortalConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.pivot.soft_deadline_ms, 10_000);
        assert_eq!(cfg.contracts.expiring_window_days, 90);
        // untouched sections keep their defaults
        assert_eq!(cfg.pivot.hard_deadline_ms, 60_000);
    }

    #[test]
    fn env_overrides_file() {
        let mut cfg = PortalConfig::from_toml("[server]\nport = 9000\n").unwrap();
        let vars = env(&[
            ("PORT", "8051"),
            ("CPOR_DRIVE_FILE_ID", "abc123"),
            ("CPOR_DRIVE_SYNC_TOKEN", "s3cret"),
        ]);
        cfg.apply_env(&|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.server.port, 8051);
        assert_eq!(cfg.drive.file_id.as_deref(), Some("abc123"));
        assert!(cfg.drive.boot_sync);
        assert_eq!(cfg.drive.sync_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn boot_sync_flag_values() {
        for disabled in ["0", "false", "no", "OFF"] {
            let mut cfg = PortalConfig::default();
            let vars = env(&[("CPOR_DRIVE_BOOT_SYNC", disabled)]);
            cfg.apply_env(&|k| vars.get(k).cloned()).unwrap();
            assert!(!cfg.drive.boot_sync, "{disabled} should disable boot sync");
        }
        let mut cfg = PortalConfig::default();
        let vars = env(&[("CPOR_DRIVE_BOOT_SYNC", "sim")]);
        assert!(cfg.apply_env(&|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn invalid_port_is_config_error() {
        let mut cfg = PortalConfig::default();
        let vars = env(&[("PORT", "eighty")]);
        let err = cfg.apply_env(&|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, PortalError::Config(_)));
    }
}

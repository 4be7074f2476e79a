use crate::calendar::DEFAULT_UTC_OFFSET_MINUTES;
use clap::Parser;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

const MIN_UTC_OFFSET_MINUTES: i32 = -12 * 60;
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Command-line flags. Each one overrides its environment variable.
#[derive(Parser, Debug, Default)]
#[command(
    name = "gradesheetd",
    about = "Monthly grade aggregation sidecar speaking JSON lines over stdio",
    version
)]
pub struct Cli {
    /// Workspace directory to open on startup
    #[arg(long)]
    pub workspace: Option<PathBuf>,
    /// Log level or tracing filter directive (RUST_LOG wins when set)
    #[arg(long)]
    pub log_level: Option<String>,
    /// School clock offset from UTC, in minutes
    #[arg(long, allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,
}

/// Process configuration for the sidecar.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub workspace: Option<PathBuf>,
    pub utc_offset_minutes: i32,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl DaemonConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let workspace = env::var("GRADESHEETD_WORKSPACE")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let log_level = env::var("GRADESHEETD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let utc_offset_minutes = match env::var("GRADESHEETD_UTC_OFFSET_MINUTES") {
            Ok(raw) => raw
                .trim()
                .parse::<i32>()
                .map_err(|_| ConfigError::InvalidOffset(raw.clone()))?,
            Err(_) => DEFAULT_UTC_OFFSET_MINUTES,
        };
        check_offset(utc_offset_minutes)?;

        Ok(Self {
            workspace,
            utc_offset_minutes,
            telemetry: TelemetryConfig { log_level },
        })
    }

    pub fn apply_cli(mut self, cli: Cli) -> Result<Self, ConfigError> {
        if let Some(workspace) = cli.workspace {
            self.workspace = Some(workspace);
        }
        if let Some(level) = cli.log_level {
            self.telemetry.log_level = level;
        }
        if let Some(offset) = cli.utc_offset_minutes {
            check_offset(offset)?;
            self.utc_offset_minutes = offset;
        }
        Ok(self)
    }
}

fn check_offset(minutes: i32) -> Result<(), ConfigError> {
    if (MIN_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(ConfigError::OffsetOutOfRange(minutes))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GRADESHEETD_UTC_OFFSET_MINUTES must be an integer, got '{0}'")]
    InvalidOffset(String),
    #[error("utc offset {0} minutes is outside -720..=840")]
    OffsetOutOfRange(i32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("GRADESHEETD_WORKSPACE");
        env::remove_var("GRADESHEETD_LOG_LEVEL");
        env::remove_var("GRADESHEETD_UTC_OFFSET_MINUTES");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = DaemonConfig::load().expect("config loads with defaults");
        assert_eq!(config.workspace, None);
        assert_eq!(config.utc_offset_minutes, 210);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn rejects_non_numeric_offset() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("GRADESHEETD_UTC_OFFSET_MINUTES", "tehran");
        let err = DaemonConfig::load().expect_err("offset must be numeric");
        assert!(matches!(err, ConfigError::InvalidOffset(_)));
        reset_env();
    }

    #[test]
    fn cli_flags_override_environment() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("GRADESHEETD_LOG_LEVEL", "warn");
        env::set_var("GRADESHEETD_WORKSPACE", "/tmp/from-env");

        let cli = Cli::parse_from([
            "gradesheetd",
            "--log-level",
            "debug",
            "--utc-offset-minutes",
            "-300",
        ]);
        let config = DaemonConfig::load()
            .and_then(|c| c.apply_cli(cli))
            .expect("config loads");
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.utc_offset_minutes, -300);
        assert_eq!(config.workspace, Some(PathBuf::from("/tmp/from-env")));
        reset_env();
    }

    #[test]
    fn cli_offset_is_range_checked() {
        let cli = Cli {
            utc_offset_minutes: Some(900),
            ..Cli::default()
        };
        let base = DaemonConfig {
            workspace: None,
            utc_offset_minutes: 210,
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
            },
        };
        let err = base.apply_cli(cli).expect_err("900 minutes is out of range");
        assert!(matches!(err, ConfigError::OffsetOutOfRange(900)));
    }
}

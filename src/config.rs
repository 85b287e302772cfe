//! Monitor configuration from environment variables

use crate::standings_core::{ScoringRules, TeamStyle};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
    Directory { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigError::Directory { path, source } => {
                write!(f, "Cannot create directory {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the standings monitor
///
/// Loaded from environment variables with defaults matching a stock
/// observer setup.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory holding the log being written right now
    pub live_log_dir: PathBuf,

    /// Directory of finished logs counted toward cumulative standings
    pub archive_log_dir: PathBuf,

    pub log_extensions: Vec<String>,

    /// Published snapshot
    pub output_json: PathBuf,

    /// Restart checkpoint; `None` disables checkpointing
    pub checkpoint_path: Option<PathBuf>,

    pub team_config_file: PathBuf,
    pub logo_url_prefix: String,
    pub default_team_logo: String,
    pub default_team_color: String,

    pub poll_interval_ms: u64,

    /// Finalize a running match after this long without new lines; 0 disables
    pub inactivity_timeout_secs: u64,

    pub scoring: ScoringRules,
    pub top_players: usize,
    pub max_read_bytes: u64,

    /// Creating this file ends the running match; `None` disables the check
    pub force_end_flag: Option<PathBuf>,
}

impl MonitorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LIVE_LOG_DIR` (default: .)
    /// - `ARCHIVE_LOG_DIR` (default: logs)
    /// - `LOG_EXTENSIONS` (default: txt)
    /// - `OUTPUT_JSON` (default: live_scoreboard.json)
    /// - `CHECKPOINT_PATH` (default: .standings_checkpoint.json, empty disables)
    /// - `TEAM_CONFIG_FILE` (default: TeamLogoAndColor.ini)
    /// - `LOGO_URL_PREFIX` (default: /assets/LOGO/)
    /// - `DEFAULT_TEAM_LOGO` (default: /assets/default-team-logo.jpg)
    /// - `DEFAULT_TEAM_COLOR` (default: #FFFFFF)
    /// - `POLL_INTERVAL_MS` (default: 2000)
    /// - `INACTIVITY_TIMEOUT_SECS` (default: 60)
    /// - `PLACEMENT_POINTS` (default: 10,6,5,4,3,2,1,1)
    /// - `KILL_POINTS` (default: 1)
    /// - `TOP_PLAYERS` (default: 5)
    /// - `MAX_READ_BYTES` (default: 4194304)
    /// - `FORCE_END_FLAG` (default: force_end.flag, empty disables)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional_path = |key: &str, default: &str| {
            let value = text(key, default);
            if value.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            }
        };

        let placement_points = match lookup("PLACEMENT_POINTS") {
            Some(raw) => parse_points(&raw)?,
            None => ScoringRules::default().placement_points,
        };

        let poll_interval_ms = number(&lookup, "POLL_INTERVAL_MS", 2_000);
        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let log_extensions: Vec<String> = text("LOG_EXTENSIONS", "txt")
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self {
            live_log_dir: PathBuf::from(text("LIVE_LOG_DIR", ".")),
            archive_log_dir: PathBuf::from(text("ARCHIVE_LOG_DIR", "logs")),
            log_extensions,
            output_json: PathBuf::from(text("OUTPUT_JSON", "live_scoreboard.json")),
            checkpoint_path: optional_path("CHECKPOINT_PATH", ".standings_checkpoint.json"),
            team_config_file: PathBuf::from(text("TEAM_CONFIG_FILE", "TeamLogoAndColor.ini")),
            logo_url_prefix: text("LOGO_URL_PREFIX", "/assets/LOGO/"),
            default_team_logo: text("DEFAULT_TEAM_LOGO", "/assets/default-team-logo.jpg"),
            default_team_color: text("DEFAULT_TEAM_COLOR", "#FFFFFF"),
            poll_interval_ms,
            inactivity_timeout_secs: number(&lookup, "INACTIVITY_TIMEOUT_SECS", 60),
            scoring: ScoringRules {
                placement_points,
                kill_points: number(&lookup, "KILL_POINTS", 1),
            },
            top_players: number(&lookup, "TOP_PLAYERS", 5),
            max_read_bytes: number(&lookup, "MAX_READ_BYTES", 4 * 1024 * 1024).max(1024),
            force_end_flag: optional_path("FORCE_END_FLAG", "force_end.flag"),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_secs > 0).then(|| Duration::from_secs(self.inactivity_timeout_secs))
    }

    pub fn default_team_style(&self) -> TeamStyle {
        TeamStyle {
            logo: self.default_team_logo.clone(),
            color: self.default_team_color.clone(),
        }
    }

    /// Create the log directories; failure here is fatal for the monitor
    pub fn prepare_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.live_log_dir, &self.archive_log_dir] {
            ensure_dir(dir)?;
        }
        if let Some(parent) = self.output_json.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        Ok(())
    }
}

fn ensure_dir(path: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(path).map_err(|source| ConfigError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

/// Unparsable numbers fall back to the default with a warning
fn number<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("⚠️  Invalid {}={:?}, using default {}", key, raw, default);
            default
        }),
    }
}

fn parse_points(raw: &str) -> Result<Vec<u32>, ConfigError> {
    let points = raw
        .split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue(format!("PLACEMENT_POINTS entry {:?} is not a number", p))
            })
        })
        .collect::<Result<Vec<u32>, ConfigError>>()?;

    if points.is_empty() {
        return Err(ConfigError::InvalidValue(
            "PLACEMENT_POINTS must list at least one value".to_string(),
        ));
    }
    Ok(points)
}

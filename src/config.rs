use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// IANA timezone identifier used for edition civil dates and the
    /// daily publish trigger.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Local wall-clock time (HH:MM) of the daily assemble job.
    #[serde(default = "default_publish_time")]
    pub publish_time: String,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_assemble_timeout_secs")]
    pub assemble_timeout_secs: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedpress");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("feedpress.db").to_string_lossy().to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_publish_time() -> String {
    "08:00".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_assemble_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            timezone: default_timezone(),
            publish_time: default_publish_time(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            assemble_timeout_secs: default_assemble_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FEEDPRESS_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feedpress")
            .join("config.toml")
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| AppError::Config(format!("unknown timezone: {}", self.timezone)))
    }

    pub fn publish_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.publish_time, "%H:%M")
            .map_err(|_| AppError::Config(format!("invalid publish_time: {}", self.publish_time)))
    }
}

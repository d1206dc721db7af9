use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Configuration for the reward engine and its scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate]
    pub database: DatabaseConfig,
    #[validate]
    pub schedule: ScheduleConfig,
    #[validate]
    pub uptime: UptimeConfig,
    pub claims: ClaimsConfig,
    #[validate]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    #[validate(range(min = 1))]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/rewards".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 10,
        }
    }
}

/// When and how the daily cycle runs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ScheduleConfig {
    #[validate(range(max = 23))]
    pub hour: u32,
    #[validate(range(max = 59))]
    pub minute: u32,
    /// Reference timezone for both the trigger time and cycle ids.
    pub timezone: Tz,
    #[validate(range(max = 10))]
    pub max_retries: u32,
    #[validate(range(min = 1))]
    pub retry_base_secs: u64,
    #[validate(range(min = 1))]
    pub cycle_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub shutdown_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hour: 15,
            minute: 22,
            timezone: chrono_tz::Asia::Jerusalem,
            max_retries: 3,
            retry_base_secs: 60,
            cycle_timeout_secs: 600,
            shutdown_grace_secs: 10,
        }
    }
}

impl ScheduleConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UptimeConfig {
    /// Heartbeats older than this are pruned after each scheduled cycle.
    /// `None` keeps them forever.
    #[validate(range(min = 1))]
    pub heartbeat_retention_days: Option<i64>,
}

impl Default for UptimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_retention_days: Some(performance_monitoring::window::ALL_TIME_HISTORY_DAYS),
        }
    }
}

impl UptimeConfig {
    /// Retention as a duration, if pruning is enabled.
    pub fn retention(&self) -> Option<chrono::Duration> {
        self.heartbeat_retention_days.map(chrono::Duration::days)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Refuse claims instead of falling back to sequential writes when the
    /// store cannot group them.
    pub require_transactions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for each individual store call.
    #[validate(range(min = 1))]
    pub store_timeout_secs: u64,
    /// Delegators processed concurrently within a cycle.
    #[validate(range(min = 1, max = 256))]
    pub delegator_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_secs: 10,
            delegator_concurrency: 8,
        }
    }
}

impl EngineConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

impl Config {
    /// Defaults, then the TOML file if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Parses a TOML document; missing sections keep their defaults.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing config TOML")
    }

    /// Applies `DATABASE_URL` and `REWARD_*` values returned by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(hour) = lookup("REWARD_HOUR") {
            self.schedule.hour = hour.trim().parse().context("REWARD_HOUR must be an integer")?;
        }
        if let Some(minute) = lookup("REWARD_MINUTE") {
            self.schedule.minute = minute.trim().parse().context("REWARD_MINUTE must be an integer")?;
        }
        if let Some(tz) = lookup("REWARD_TIMEZONE") {
            self.schedule.timezone = tz
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("REWARD_TIMEZONE: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!((config.schedule.hour, config.schedule.minute), (15, 22));
        assert_eq!(config.schedule.timezone, chrono_tz::Asia::Jerusalem);
        assert_eq!(config.uptime.retention(), Some(chrono::Duration::days(60)));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [schedule]
            hour = 3
            timezone = "UTC"

            [uptime]
            "#,
        )
        .unwrap();

        assert_eq!(config.schedule.hour, 3);
        assert_eq!(config.schedule.minute, 22);
        assert_eq!(config.schedule.timezone, chrono_tz::UTC);
        assert_eq!(config.engine.store_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [("REWARD_HOUR", "7"), ("REWARD_TIMEZONE", "Europe/London")]
            .into_iter()
            .collect();
        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.schedule.hour, 7);
        assert_eq!(config.schedule.timezone, chrono_tz::Europe::London);
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let mut config = Config::default();
        assert!(config.apply_overrides(|_| Some("noon".to_string())).is_err());

        config.schedule = ScheduleConfig {
            hour: 24,
            ..ScheduleConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Process configuration
//!
//! Everything is environment-driven (a `.env` file is honored at startup),
//! matching how the daemon is deployed: a container with secrets mounted and
//! Consul coordinates injected. Every knob is optional; the static interval
//! default keeps the system schedulable with no configuration at all.

use crate::schedule::ScheduleSpec;
use std::path::PathBuf;

/// Hard-coded sweep interval when nothing else is configured anywhere.
pub const DEFAULT_INTERVAL_MINUTES: u64 = 60;

#[derive(Clone)]
pub struct Config {
    /// Root directory for backup artifacts, one subdirectory per router.
    pub backup_dir: PathBuf,
    /// Directory of per-router YAML secret files (tier 2).
    pub secrets_dir: PathBuf,
    /// Legacy static XML document (tier 3).
    pub static_config_path: PathBuf,
    /// Consul HTTP address; unset disables the KV tier and the live schedule.
    pub consul_addr: Option<String>,
    pub consul_token: Option<String>,
    pub consul_kv_prefix: String,
    pub consul_settings_prefix: String,
    pub consul_basic_auth: Option<(String, String)>,
    /// Static cron fallback, consulted when the live spec is entirely empty.
    pub backup_cron: Option<String>,
    pub backup_interval_minutes: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            backup_dir: env_or("BACKUP_DIR", "backup").into(),
            secrets_dir: env_or("SECRETS_DIR", "/run/secrets").into(),
            static_config_path: env_or("STATIC_CONFIG_PATH", "config.xml").into(),
            consul_addr: env_opt("CONSUL_HTTP_ADDR"),
            consul_token: env_opt("CONSUL_HTTP_TOKEN"),
            consul_kv_prefix: env_or("CONSUL_KV_PREFIX", "routers/"),
            consul_settings_prefix: env_or("CONSUL_SETTINGS_PREFIX", "settings/"),
            consul_basic_auth: match (
                env_opt("CONSUL_BASIC_USER"),
                env_opt("CONSUL_BASIC_PASS"),
            ) {
                (Some(user), Some(pass)) => Some((user, pass)),
                _ => None,
            },
            backup_cron: env_opt("BACKUP_CRON"),
            backup_interval_minutes: env_opt("BACKUP_INTERVAL_MINUTES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_INTERVAL_MINUTES),
        }
    }

    /// The static fallback schedule, used whenever the live spec carries
    /// neither a cron expression nor an interval.
    pub fn static_schedule(&self) -> ScheduleSpec {
        ScheduleSpec {
            cron: self.backup_cron.clone(),
            interval_minutes: Some(self.backup_interval_minutes),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

//! Backup cadence read from the live config store
//!
//! The desired cadence lives in two KV keys under the settings prefix:
//! `backup_cron` and `backup_interval_minutes`. A missing or failing key
//! yields `None` for that field — an entirely unreachable store therefore
//! reads as "no override", which the scheduler maps to the static default
//! interval.

use crate::kv::KvClient;
use std::sync::Arc;

/// Desired cadence as a value type. Exactly one side is "active": a present,
/// non-empty cron expression takes priority over the interval.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScheduleSpec {
    pub cron: Option<String>,
    pub interval_minutes: Option<u64>,
}

impl ScheduleSpec {
    /// The cron expression, if present and non-blank.
    pub fn active_cron(&self) -> Option<&str> {
        self.cron.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

pub struct ScheduleStore {
    kv: Option<Arc<KvClient>>,
    settings_prefix: String,
}

impl ScheduleStore {
    pub fn new(kv: Option<Arc<KvClient>>, settings_prefix: String) -> Self {
        Self {
            kv,
            settings_prefix,
        }
    }

    /// Read the current cadence. Never fails; degraded reads come back as
    /// `None` fields.
    pub async fn read(&self) -> ScheduleSpec {
        let Some(kv) = &self.kv else {
            return ScheduleSpec::default();
        };
        let cron = kv
            .get(&format!("{}backup_cron", self.settings_prefix))
            .await;
        let interval_minutes = kv
            .get(&format!("{}backup_interval_minutes", self.settings_prefix))
            .await
            .and_then(|raw| raw.trim().parse().ok());
        ScheduleSpec {
            cron,
            interval_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_equality_detects_changes() {
        let a = ScheduleSpec {
            cron: Some("*/5 * * * *".into()),
            interval_minutes: None,
        };
        let b = ScheduleSpec {
            cron: None,
            interval_minutes: Some(30),
        };
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_blank_cron_is_not_active() {
        let spec = ScheduleSpec {
            cron: Some("   ".into()),
            interval_minutes: Some(30),
        };
        assert!(spec.active_cron().is_none());
    }

    #[test]
    fn test_active_cron_is_trimmed() {
        let spec = ScheduleSpec {
            cron: Some(" */5 * * * * ".into()),
            interval_minutes: None,
        };
        assert_eq!(spec.active_cron(), Some("*/5 * * * *"));
    }

    #[tokio::test]
    async fn test_read_without_store_is_empty_spec() {
        let store = ScheduleStore::new(None, "settings/".into());
        assert_eq!(store.read().await, ScheduleSpec::default());
    }
}

//! Sync configuration types.
//!
//! Supplied by the host application's settings store; this subsystem only
//! reads them. The `sync_period_days` value can additionally be overridden
//! per device through the `settings` table.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings governing sync and queue behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Lookback window for initial syncs, in days.
    pub sync_period_days: u32,
    /// Attempts allowed before a queued operation fails terminally.
    pub max_retries: u32,
    /// Interval between periodic sync passes.
    #[serde(with = "duration_serde")]
    pub sync_interval: Duration,
    /// Interval between offline queue drains.
    #[serde(with = "duration_serde")]
    pub queue_drain_interval: Duration,
    /// Whether background sync is enabled at all.
    pub background_sync_enabled: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_period_days: 365,
            max_retries: 3,
            sync_interval: Duration::from_secs(60),
            queue_drain_interval: Duration::from_secs(30),
            background_sync_enabled: true,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_intervals() {
        let settings = SyncSettings::default();
        assert_eq!(settings.sync_period_days, 365);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.sync_interval, Duration::from_secs(60));
        assert_eq!(settings.queue_drain_interval, Duration::from_secs(30));
        assert!(settings.background_sync_enabled);
    }

    #[test]
    fn serialization_round_trips_durations() {
        let settings = SyncSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"sync_interval\":60"));

        let parsed: SyncSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sync_interval, Duration::from_secs(60));
        assert_eq!(parsed.queue_drain_interval, Duration::from_secs(30));
    }
}

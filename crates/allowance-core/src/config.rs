//! Metering configuration
//!
//! Read-only settings supplied to the core: the trust threshold used by the
//! pre-consumption gate, the reference timezone for usage windows, and the
//! daily check-in rules.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default trust threshold (balance above which reservation may be skipped)
pub const DEFAULT_TRUST_THRESHOLD: i64 = 500_000;

/// Default reference timezone offset (UTC+08:00)
pub const DEFAULT_TZ_OFFSET_SECONDS: i32 = 8 * 60 * 60;

/// Default smallest check-in bonus
pub const DEFAULT_MIN_BONUS: i64 = 1_000;

/// Default largest check-in bonus
pub const DEFAULT_MAX_BONUS: i64 = 10_000;

const MAX_TZ_OFFSET_SECONDS: i32 = 24 * 60 * 60 - 1;

// ============================================================================
// Check-in Settings
// ============================================================================

/// Daily check-in rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckinSettings {
    /// Whether the check-in feature is enabled
    pub enabled: bool,
    /// Smallest bonus that can be awarded
    pub min_bonus: i64,
    /// Largest bonus that can be awarded
    pub max_bonus: i64,
    /// Usage required over yesterday's window (0 = no requirement)
    pub min_required_usage: i64,
}

impl Default for CheckinSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            min_bonus: DEFAULT_MIN_BONUS,
            max_bonus: DEFAULT_MAX_BONUS,
            min_required_usage: 0,
        }
    }
}

// ============================================================================
// Metering Config
// ============================================================================

/// Process-wide metering configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Balance level above which trusted calls skip reservation (strict `>`)
    pub trust_threshold: i64,
    /// Reference timezone as seconds east of UTC
    pub timezone_offset_seconds: i32,
    /// Check-in rules
    pub checkin: CheckinSettings,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            trust_threshold: DEFAULT_TRUST_THRESHOLD,
            timezone_offset_seconds: DEFAULT_TZ_OFFSET_SECONDS,
            checkin: CheckinSettings::default(),
        }
    }
}

impl MeteringConfig {
    /// Build a configuration from defaults overlaid with `ALLOWANCE_*` env vars
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// Split out from [`MeteringConfig::from_env`] so tests don't have to
    /// mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<i64>(&lookup, "ALLOWANCE_TRUST_QUOTA")? {
            config.trust_threshold = v;
        }
        if let Some(v) = parse_var::<i32>(&lookup, "ALLOWANCE_TZ_OFFSET_SECONDS")? {
            config.timezone_offset_seconds = v;
        }
        if let Some(v) = parse_var::<bool>(&lookup, "ALLOWANCE_CHECKIN_ENABLED")? {
            config.checkin.enabled = v;
        }
        if let Some(v) = parse_var::<i64>(&lookup, "ALLOWANCE_CHECKIN_MIN_BONUS")? {
            config.checkin.min_bonus = v;
        }
        if let Some(v) = parse_var::<i64>(&lookup, "ALLOWANCE_CHECKIN_MAX_BONUS")? {
            config.checkin.max_bonus = v;
        }
        if let Some(v) = parse_var::<i64>(&lookup, "ALLOWANCE_CHECKIN_MIN_USAGE")? {
            config.checkin.min_required_usage = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for internally inconsistent values
    pub fn validate(&self) -> Result<()> {
        if self.trust_threshold < 0 {
            return Err(Error::config(format!(
                "trust threshold must be non-negative, got {}",
                self.trust_threshold
            )));
        }
        if self.timezone_offset_seconds.abs() > MAX_TZ_OFFSET_SECONDS {
            return Err(Error::config(format!(
                "timezone offset {}s is outside +/-24h",
                self.timezone_offset_seconds
            )));
        }

        let checkin = &self.checkin;
        if checkin.min_bonus < 0 || checkin.max_bonus < 0 {
            return Err(Error::config("check-in bonus bounds must be non-negative"));
        }
        if checkin.min_bonus > checkin.max_bonus {
            return Err(Error::config(format!(
                "check-in min bonus {} exceeds max bonus {}",
                checkin.min_bonus, checkin.max_bonus
            )));
        }
        if checkin.min_required_usage < 0 {
            return Err(Error::config("check-in minimum usage must be non-negative"));
        }
        Ok(())
    }

    /// The reference timezone used for every usage window and check-in day
    pub fn reference_timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.timezone_offset_seconds).ok_or_else(|| {
            Error::config(format!(
                "invalid timezone offset: {}s",
                self.timezone_offset_seconds
            ))
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("{} has an invalid value: {:?}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MeteringConfig::default();
        assert_eq!(config.trust_threshold, DEFAULT_TRUST_THRESHOLD);
        assert_eq!(config.timezone_offset_seconds, 8 * 3600);
        assert!(!config.checkin.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = MeteringConfig::from_lookup(lookup_from(&[
            ("ALLOWANCE_TRUST_QUOTA", "1000"),
            ("ALLOWANCE_TZ_OFFSET_SECONDS", "0"),
            ("ALLOWANCE_CHECKIN_ENABLED", "true"),
            ("ALLOWANCE_CHECKIN_MIN_BONUS", "10"),
            ("ALLOWANCE_CHECKIN_MAX_BONUS", "20"),
            ("ALLOWANCE_CHECKIN_MIN_USAGE", "300"),
        ]))
        .unwrap();

        assert_eq!(config.trust_threshold, 1000);
        assert_eq!(config.timezone_offset_seconds, 0);
        assert!(config.checkin.enabled);
        assert_eq!(config.checkin.min_bonus, 10);
        assert_eq!(config.checkin.max_bonus, 20);
        assert_eq!(config.checkin.min_required_usage, 300);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = MeteringConfig::from_lookup(lookup_from(&[("ALLOWANCE_TRUST_QUOTA", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("ALLOWANCE_TRUST_QUOTA"));
    }

    #[test]
    fn test_validate_bonus_bounds() {
        let mut config = MeteringConfig::default();
        config.checkin.min_bonus = 50;
        config.checkin.max_bonus = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_timezone_range() {
        let config = MeteringConfig {
            timezone_offset_seconds: 90_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reference_timezone() {
        let tz = MeteringConfig::default().reference_timezone().unwrap();
        assert_eq!(tz.local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: MeteringConfig =
            serde_json::from_str(r#"{"trust_threshold": 42, "checkin": {"enabled": true}}"#)
                .unwrap();
        assert_eq!(config.trust_threshold, 42);
        assert!(config.checkin.enabled);
        assert_eq!(config.checkin.max_bonus, DEFAULT_MAX_BONUS);
        assert_eq!(config.timezone_offset_seconds, DEFAULT_TZ_OFFSET_SECONDS);
    }
}

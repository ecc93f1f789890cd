//! Config commands
//!
//! Shows the effective metering configuration and where each value came from.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use allowance_core::MeteringConfig;

use super::Context;
use crate::output::print_output;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let rows = config_rows(&ctx.metering.config, |key| std::env::var(key).is_ok());
            print_output(&rows, ctx.format)
        }
    }
}

fn config_rows(config: &MeteringConfig, is_set: impl Fn(&str) -> bool) -> Vec<ConfigRow> {
    let row = |key: &str, value: String| ConfigRow {
        key: key.to_string(),
        value,
        source: if is_set(key) { "env" } else { "default" }.to_string(),
    };

    let db_path = allowance_core::get_db_path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "Unknown".to_string());

    let checkin = &config.checkin;
    vec![
        row("ALLOWANCE_DB_PATH", db_path),
        row("ALLOWANCE_TRUST_QUOTA", config.trust_threshold.to_string()),
        row(
            "ALLOWANCE_TZ_OFFSET_SECONDS",
            config.timezone_offset_seconds.to_string(),
        ),
        row("ALLOWANCE_CHECKIN_ENABLED", checkin.enabled.to_string()),
        row("ALLOWANCE_CHECKIN_MIN_BONUS", checkin.min_bonus.to_string()),
        row("ALLOWANCE_CHECKIN_MAX_BONUS", checkin.max_bonus.to_string()),
        row(
            "ALLOWANCE_CHECKIN_MIN_USAGE",
            checkin.min_required_usage.to_string(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_rows_sources() {
        let config = MeteringConfig {
            trust_threshold: 42,
            ..Default::default()
        };
        let rows = config_rows(&config, |key| key == "ALLOWANCE_TRUST_QUOTA");

        let trust = rows
            .iter()
            .find(|r| r.key == "ALLOWANCE_TRUST_QUOTA")
            .unwrap();
        assert_eq!(trust.value, "42");
        assert_eq!(trust.source, "env");

        let tz = rows
            .iter()
            .find(|r| r.key == "ALLOWANCE_TZ_OFFSET_SECONDS")
            .unwrap();
        assert_eq!(tz.value, "28800");
        assert_eq!(tz.source, "default");
    }
}

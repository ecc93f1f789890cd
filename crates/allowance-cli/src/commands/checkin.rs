//! Check-in commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use allowance_core::{format_quota, CheckinStatus};

use super::Context;
use crate::output::{print_json, print_output, print_single, print_success, FieldRow, OutputFormat};

#[derive(Subcommand)]
pub enum CheckinAction {
    /// Claim today's bonus
    Do {
        /// Account ID
        account: String,
    },

    /// Show check-in settings, yesterday's usage and month history
    Status {
        /// Account ID
        account: String,

        /// Month to show (YYYY-MM), defaults to the current month
        #[arg(long)]
        month: Option<String>,
    },
}

/// Receipt row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ReceiptRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Awarded")]
    pub awarded: i64,
    #[tabled(rename = "Display")]
    pub display: String,
}

/// History row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct DayRow {
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Awarded")]
    pub awarded: i64,
}

pub async fn execute(ctx: &Context, action: CheckinAction) -> Result<()> {
    match action {
        CheckinAction::Do { account } => do_checkin(ctx, &account).await,
        CheckinAction::Status { account, month } => show_status(ctx, &account, month.as_deref()).await,
    }
}

async fn do_checkin(ctx: &Context, account: &str) -> Result<()> {
    let receipt = ctx.metering.checkin.checkin(account).await?;

    if ctx.format == OutputFormat::Table {
        print_success(
            &format!(
                "Checked in, awarded {}",
                format_quota(receipt.quota_awarded)
            ),
            ctx.quiet,
        );
    }

    print_single(
        &ReceiptRow {
            account: receipt.account_id,
            date: receipt.checkin_date,
            awarded: receipt.quota_awarded,
            display: format_quota(receipt.quota_awarded),
        },
        ctx.format,
    )
}

async fn show_status(ctx: &Context, account: &str, month: Option<&str>) -> Result<()> {
    let status = ctx.metering.checkin.status(account, month).await?;

    if ctx.format == OutputFormat::Json {
        return print_json(&status);
    }

    print_output(&summary_rows(&status), ctx.format)?;

    let days: Vec<DayRow> = status
        .stats
        .records
        .iter()
        .map(|d| DayRow {
            date: d.checkin_date.clone(),
            awarded: d.quota_awarded,
        })
        .collect();
    print_output(&days, ctx.format)
}

fn summary_rows(status: &CheckinStatus) -> Vec<FieldRow> {
    let stats = &status.stats;
    vec![
        FieldRow::new("enabled", status.enabled),
        FieldRow::new(
            "bonus range",
            format!(
                "{} - {}",
                format_quota(status.min_bonus),
                format_quota(status.max_bonus)
            ),
        ),
        FieldRow::new("required usage", format_quota(status.min_required_usage)),
        FieldRow::new("yesterday usage", format_quota(status.yesterday_usage)),
        FieldRow::new("month", &stats.month),
        FieldRow::new(
            "month check-ins",
            format!("{} ({})", stats.checkin_count, format_quota(stats.total_awarded)),
        ),
        FieldRow::new(
            "all-time check-ins",
            format!(
                "{} ({})",
                stats.all_time_count,
                format_quota(stats.all_time_awarded)
            ),
        ),
        FieldRow::new("checked in today", stats.checked_in_today),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use allowance_core::CheckinStats;

    #[test]
    fn test_summary_rows() {
        let status = CheckinStatus {
            enabled: true,
            min_bonus: 1_000,
            max_bonus: 10_000,
            min_required_usage: 0,
            yesterday_usage: 500_000,
            stats: CheckinStats {
                month: "2026-02".to_string(),
                records: Vec::new(),
                checkin_count: 0,
                total_awarded: 0,
                all_time_count: 3,
                all_time_awarded: 9_000,
                checked_in_today: false,
            },
        };

        let rows = summary_rows(&status);
        let yesterday = rows.iter().find(|r| r.field == "yesterday usage").unwrap();
        assert_eq!(yesterday.value, "$1.000000");
        let month = rows.iter().find(|r| r.field == "month").unwrap();
        assert_eq!(month.value, "2026-02");
    }
}

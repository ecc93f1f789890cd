//! Usage commands
//!
//! Usage totals over windows in the reference timezone.

use anyhow::{Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use allowance_core::{format_quota, ReferenceClock, UsageRecord, UsageWindow};

use super::Context;
use crate::output::{print_output, print_single, OutputFormat};

#[derive(Subcommand)]
pub enum UsageAction {
    /// Usage over yesterday (00:00:00 to 23:59:59)
    Yesterday {
        /// Account ID
        account: String,
    },

    /// Usage since today's midnight
    Today {
        /// Account ID
        account: String,
    },

    /// Usage over a range of whole days
    Range {
        /// Account ID
        account: String,

        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// Also list individual records
        #[arg(long)]
        records: bool,

        /// Max records to list
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

/// Window total row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct UsageRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Window")]
    pub window: String,
    #[tabled(rename = "From")]
    pub from: String,
    #[tabled(rename = "To")]
    pub to: String,
    #[tabled(rename = "Usage")]
    pub usage: i64,
    #[tabled(rename = "Display")]
    pub display: String,
}

/// Usage record row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct RecordRow {
    #[tabled(rename = "Time")]
    pub time: String,
    #[tabled(rename = "Cost")]
    pub cost: i64,
    #[tabled(rename = "Model")]
    pub model: String,
}

pub async fn execute(ctx: &Context, action: UsageAction) -> Result<()> {
    match action {
        UsageAction::Yesterday { account } => {
            let window = ctx.metering.usage.clock().yesterday_window();
            let usage = ctx.metering.usage.yesterday_usage(&account).await?;
            show_window(ctx, &account, "yesterday", window, usage)
        }
        UsageAction::Today { account } => {
            let window = ctx.metering.usage.clock().today_window();
            let usage = ctx.metering.usage.today_usage(&account).await?;
            show_window(ctx, &account, "today", window, usage)
        }
        UsageAction::Range {
            account,
            from,
            to,
            records,
            limit,
        } => show_range(ctx, &account, &from, &to, records, limit).await,
    }
}

fn show_window(
    ctx: &Context,
    account: &str,
    label: &str,
    window: UsageWindow,
    usage: i64,
) -> Result<()> {
    let clock = ctx.metering.usage.clock();
    let row = UsageRow {
        account: account.to_string(),
        window: label.to_string(),
        from: local_time(clock, window.start),
        to: local_time(clock, window.end),
        usage,
        display: format_quota(usage),
    };
    print_single(&row, ctx.format)
}

async fn show_range(
    ctx: &Context,
    account: &str,
    from: &str,
    to: &str,
    records: bool,
    limit: i64,
) -> Result<()> {
    let window = range_window(ctx.metering.usage.clock(), from, to)?;
    let usage = ctx
        .metering
        .usage
        .sum_usage(account, window.start, window.end)
        .await?;

    if !records {
        return show_window(ctx, account, "range", window, usage);
    }

    let entries = ctx
        .metering
        .usage
        .log()
        .list(account, window.start, window.end, limit)
        .await?;

    if ctx.format == OutputFormat::Json {
        #[derive(Serialize)]
        struct RangeReport<'a> {
            account: &'a str,
            from: &'a str,
            to: &'a str,
            usage: i64,
            records: &'a [UsageRecord],
        }
        return crate::output::print_json(&RangeReport {
            account,
            from,
            to,
            usage,
            records: &entries,
        });
    }

    show_window(ctx, account, "range", window, usage)?;
    let clock = ctx.metering.usage.clock();
    let rows: Vec<RecordRow> = entries
        .iter()
        .map(|r| RecordRow {
            time: local_time(clock, r.timestamp()),
            cost: r.cost,
            model: r.model.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    print_output(&rows, ctx.format)
}

/// `[00:00:00 from, 23:59:59 to]` in the reference timezone
fn range_window(clock: &ReferenceClock, from: &str, to: &str) -> Result<UsageWindow> {
    let first = parse_day(from)?;
    let last = parse_day(to)?;
    if first > last {
        anyhow::bail!("--from {} is after --to {}", from, to);
    }
    Ok(UsageWindow::new(
        clock.start_of(first),
        clock.day_window(last).end,
    ))
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", raw))
}

fn local_time(clock: &ReferenceClock, at: DateTime<Utc>) -> String {
    at.with_timezone(&clock.timezone())
        .format("%Y-%m-%d %H:%M:%S %:z")
        .to_string()
}

//! Call commands
//!
//! Drives one metered call through the gate and settles it with a given
//! outcome. Stands in for the upstream request so the reservation protocol
//! can be exercised from the shell.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use allowance_core::{format_quota, QuotaLedger, SettlementOutcome, TokenLimits};

use super::Context;
use crate::output::{print_info, print_single, OutputFormat};

#[derive(Subcommand)]
pub enum CallAction {
    /// Reserve, "run" and settle one call
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Account ID
    pub account: String,

    /// Pre-call cost estimate (amount requested from the gate)
    #[arg(long)]
    pub estimate: i64,

    /// Actual cost reported when the call succeeds
    #[arg(long, default_value_t = 0)]
    pub cost: i64,

    /// Treat the call as failed (the reservation is refunded)
    #[arg(long)]
    pub fail: bool,

    /// Remaining allowance on the calling token; omit for an unlimited token
    #[arg(long)]
    pub token_remaining: Option<i64>,

    /// Model name recorded with the usage entry
    #[arg(long)]
    pub model: Option<String>,
}

/// Settlement row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct CallRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Reserved")]
    pub reserved: i64,
    #[tabled(rename = "Trusted")]
    pub trusted: bool,
    #[tabled(rename = "Outcome")]
    pub outcome: String,
    #[tabled(rename = "Charged")]
    pub charged: i64,
    #[tabled(rename = "Balance")]
    pub balance: i64,
}

pub async fn execute(ctx: &Context, action: CallAction) -> Result<()> {
    match action {
        CallAction::Run(args) => run_call(ctx, args).await,
    }
}

async fn run_call(ctx: &Context, args: RunArgs) -> Result<()> {
    let token = match args.token_remaining {
        Some(remaining) => TokenLimits::limited(remaining),
        None => TokenLimits::unlimited(),
    };

    let pending = ctx
        .metering
        .gate
        .decide_reservation(&args.account, args.estimate, token)
        .await?;

    let reserved = pending.reserved();
    let trusted = pending.is_trusted();
    print_info(
        &format!(
            "Reserved {} for {}{}",
            format_quota(reserved),
            args.account,
            if trusted { " (trusted)" } else { "" }
        ),
        ctx.quiet || ctx.format == OutputFormat::Json,
    );

    let outcome = if args.fail {
        pending.fail()
    } else {
        pending.complete(args.cost, args.model.as_deref()).await?
    };

    // Let a scheduled refund land before reading the balance back.
    ctx.metering.worker.drain().await;
    let balance = ctx.metering.ledger.balance(&args.account).await?;

    let (label, charged) = match outcome {
        SettlementOutcome::Settled { actual, .. } => ("settled", actual),
        SettlementOutcome::Refunded { .. } => ("refunded", 0),
    };

    print_single(
        &CallRow {
            account: args.account,
            reserved,
            trusted,
            outcome: label.to_string(),
            charged,
            balance,
        },
        ctx.format,
    )
}

//! Account commands
//!
//! Open accounts, read balances and apply manual credits.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use allowance_core::{format_quota, QuotaLedger};

use super::Context;
use crate::output::{print_output, print_single, print_success, print_warning, OutputFormat};

#[derive(Subcommand)]
pub enum AccountAction {
    /// Open a new account
    Open {
        /// Account ID
        account: String,

        /// Starting balance in quota units
        #[arg(long, default_value_t = 0)]
        balance: i64,
    },

    /// Show an account's balance
    Balance {
        /// Account ID
        account: String,
    },

    /// Add (or with a negative amount, remove) quota
    Credit {
        /// Account ID
        account: String,

        /// Signed amount in quota units
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },

    /// List all accounts
    List,
}

/// Balance row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct BalanceRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Balance")]
    pub balance: i64,
    #[tabled(rename = "Display")]
    pub display: String,
}

impl BalanceRow {
    fn new(account: &str, balance: i64) -> Self {
        Self {
            account: account.to_string(),
            balance,
            display: format_quota(balance),
        }
    }
}

pub async fn execute(ctx: &Context, action: AccountAction) -> Result<()> {
    match action {
        AccountAction::Open { account, balance } => open_account(ctx, &account, balance).await,
        AccountAction::Balance { account } => show_balance(ctx, &account).await,
        AccountAction::Credit { account, amount } => credit(ctx, &account, amount).await,
        AccountAction::List => list_accounts(ctx).await,
    }
}

async fn open_account(ctx: &Context, account: &str, balance: i64) -> Result<()> {
    if balance < 0 {
        anyhow::bail!("Starting balance must be non-negative, got {}", balance);
    }

    if ctx.metering.ledger.open_account(account, balance).await? {
        print_success(
            &format!("Opened {} with {}", account, format_quota(balance)),
            ctx.quiet,
        );
    } else {
        print_warning(&format!("Account {} already exists", account), ctx.quiet);
    }
    Ok(())
}

async fn show_balance(ctx: &Context, account: &str) -> Result<()> {
    let balance = ctx.metering.ledger.balance(account).await?;
    print_single(&BalanceRow::new(account, balance), ctx.format)
}

async fn credit(ctx: &Context, account: &str, amount: i64) -> Result<()> {
    ctx.metering.ledger.adjust(account, amount).await?;
    let balance = ctx.metering.ledger.balance(account).await?;

    if ctx.format == OutputFormat::Table {
        print_success(&format!("Applied {} to {}", amount, account), ctx.quiet);
    }
    print_single(&BalanceRow::new(account, balance), ctx.format)
}

async fn list_accounts(ctx: &Context) -> Result<()> {
    let rows: Vec<BalanceRow> = ctx
        .metering
        .ledger
        .list_accounts()
        .await?
        .iter()
        .map(|(account, balance)| BalanceRow::new(account, *balance))
        .collect();
    print_output(&rows, ctx.format)
}

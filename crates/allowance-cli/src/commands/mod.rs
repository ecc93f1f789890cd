//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod account;
pub mod call;
pub mod checkin;
pub mod config;
pub mod usage;

use crate::output::OutputFormat;
use allowance_core::Metering;

/// Shared context for all commands
pub struct Context {
    pub metering: Metering,
    pub format: OutputFormat,
    pub quiet: bool,
}

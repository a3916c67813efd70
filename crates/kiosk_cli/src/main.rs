//! Kiosk operator CLI.
//!
//! # Responsibility
//! - Run one-off kiosk operations (checkout, monthly summary, token lookup)
//!   against the configured database without the kiosk UI.
//! - Keep output line-oriented (`key=value`) for scripting.
//!
//! # Invariants
//! - One-off commands never start the monthly trigger.
//! - The kiosk context is always shut down before the process exits, after
//!   the queued notifications were delivered or the shutdown timeout expired.

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use kiosk_core::{
    core_version, init_from_config, CartLine, KioskConfig, KioskContext, SqliteStorage,
};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "kiosk", author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON config file; built-in defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for queued notifications before exiting.
    #[arg(long, global = true, default_value_t = 30)]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the core version.
    Version,
    /// Resolve a scanned token (hex) to its account.
    Login {
        token: String,
    },
    /// Charge an account for a cart.
    Checkout {
        #[arg(long)]
        account: i64,
        /// Cart line as `ITEM_ID:QUANTITY`; repeat for several lines.
        #[arg(long = "line", required = true, value_parser = parse_cart_line)]
        lines: Vec<CartLine>,
    },
    /// Build and enqueue last month's summaries now.
    MonthlySummary {
        /// Run as if today were this date (YYYY-MM-DD).
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

fn parse_cart_line(raw: &str) -> Result<CartLine, String> {
    let (item, quantity) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected ITEM_ID:QUANTITY, got `{raw}`"))?;
    let item_id = item
        .trim()
        .parse()
        .map_err(|err| format!("invalid item id `{item}`: {err}"))?;
    let quantity = quantity
        .trim()
        .parse()
        .map_err(|err| format!("invalid quantity `{quantity}`: {err}"))?;
    Ok(CartLine::new(item_id, quantity))
}

fn load_config(path: Option<&PathBuf>) -> CliResult<KioskConfig> {
    let mut config = match path {
        Some(path) => KioskConfig::load(path)?,
        None => KioskConfig::default(),
    };
    config.monthly_summary.enabled = false;
    Ok(config)
}

fn open_context(config: KioskConfig) -> CliResult<KioskContext> {
    init_from_config(&config.logging)?;
    let storage = Arc::new(SqliteStorage::open(&config.database.path)?);
    Ok(KioskContext::build(config, storage)?)
}

fn run(cli: Cli) -> CliResult<()> {
    if let Command::Version = cli.command {
        println!("kiosk_core version={}", core_version());
        return Ok(());
    }

    let context = open_context(load_config(cli.config.as_ref())?)?;
    info!("event=cli_command module=cli status=start");
    let result = run_with_context(&context, cli.command);
    if !context.shutdown(Some(Duration::from_secs(cli.shutdown_timeout))) {
        eprintln!("warning: not every queued notification was delivered before exit");
    }
    result
}

fn run_with_context(context: &KioskContext, command: Command) -> CliResult<()> {
    match command {
        Command::Version => {}
        Command::Login { token } => match context.login(&token)? {
            Some(account) => println!(
                "account_id={} name={} credit={} role={}",
                account.id,
                account.name,
                account.credit,
                account.role.as_str()
            ),
            None => println!("account_id=none"),
        },
        Command::Checkout { account, lines } => {
            let receipt = context.engine().checkout(account, &lines)?;
            for record in &receipt.records {
                println!(
                    "record_id={} item_id={} quantity={} cost={}",
                    record.id, record.item_id, record.quantity, record.cost
                );
            }
            println!(
                "total={} new_credit={} notifications={}",
                receipt.total, receipt.new_credit, receipt.notifications_enqueued
            );
        }
        Command::MonthlySummary { today } => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let report = context.monthly_summary_job().run(today)?;
            println!(
                "accounts={} enqueued={} skipped_without_handle={} failed={}",
                report.accounts,
                report.summaries_enqueued,
                report.skipped_without_handle,
                report.failed_accounts
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_cart_line, Cli};
    use clap::CommandFactory;
    use kiosk_core::CartLine;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cart_line_parses_item_and_quantity() {
        assert_eq!(parse_cart_line("12:3"), Ok(CartLine::new(12, 3)));
        assert_eq!(parse_cart_line(" 7 : 1 "), Ok(CartLine::new(7, 1)));
        assert!(parse_cart_line("12").is_err());
        assert!(parse_cart_line("x:1").is_err());
        assert!(parse_cart_line("1:-2").is_err());
    }
}

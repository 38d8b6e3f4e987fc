use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use genealogy_cli::{init_tracing, open_platform, Config};
use genealogy_core::lifecycle::TerminationReason;
use genealogy_core::money::parse_amount;
use genealogy_core::PaymentProvider;
use ledger_store::{LedgerRead, LedgerSnapshot};
use tree_layout::{layout, render_text, EMPTY_STATE};

#[derive(Parser)]
#[command(name = "genealogy", version)]
#[command(about = "Referral genealogy ledger: members, deposits, investments and multi-level commissions")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "GENEALOGY_CONFIG", default_value = "genealogy.toml")]
    config: PathBuf,

    /// Ledger database (overrides config file)
    #[arg(long, env = "GENEALOGY_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the ledger and install the configured plans
    Init,
    /// List installed plans
    Plans,
    /// Register a member, optionally under a sponsor's referral code
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        sponsor_code: Option<String>,
    },
    /// Book a deposit confirmed by a payment provider
    Deposit {
        #[arg(long)]
        user: Uuid,
        #[arg(long, value_parser = parse_amount)]
        amount: Decimal,
        #[arg(long)]
        provider: PaymentProvider,
        /// Provider transaction id
        #[arg(long)]
        reference: String,
    },
    /// Buy into a plan from the member's wallet
    Invest {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        plan: String,
        #[arg(long, value_parser = parse_amount)]
        amount: Decimal,
    },
    /// Withdraw from the member's wallet
    Withdraw {
        #[arg(long)]
        user: Uuid,
        #[arg(long, value_parser = parse_amount)]
        amount: Decimal,
        #[arg(long)]
        provider: PaymentProvider,
    },
    /// Close an active investment before maturity
    Terminate {
        #[arg(long)]
        investment: Uuid,
        #[arg(long, value_enum)]
        reason: Reason,
    },
    /// Print a member's downline
    Tree {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        depth: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Print node positions for a viewport as JSON
    Layout {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        depth: Option<u32>,
        #[arg(long, default_value_t = 1200.0)]
        width: f64,
        #[arg(long, default_value_t = 800.0)]
        height: f64,
    },
    /// Wallet, investments, commissions and team summary
    Dashboard {
        #[arg(long)]
        user: Uuid,
    },
    /// Balances with a Merkle digest, for reconciliation
    Snapshot {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Reason {
    EarlyWithdrawal,
    Violation,
}

impl From<Reason> for TerminationReason {
    fn from(reason: Reason) -> Self {
        match reason {
            Reason::EarlyWithdrawal => TerminationReason::EarlyWithdrawal,
            Reason::Violation => TerminationReason::Violation,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_all(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let platform = open_platform(&config, cli.db.as_deref())?;
    let now = Utc::now();

    match cli.command {
        Command::Init => {
            let path = cli.db.as_deref().unwrap_or(config.store.path.as_path());
            info!(path = %path.display(), plans = config.plans.len(), "ledger ready");
            println!("ledger ready at {}", path.display());
        }
        Command::Plans => print_json(&platform.store().plans()?)?,
        Command::Register { name, sponsor_code } => {
            let user = platform.register_user(&name, sponsor_code.as_deref(), now)?;
            print_json(&user)?;
        }
        Command::Deposit {
            user,
            amount,
            provider,
            reference,
        } => {
            let outcome = platform.on_deposit_confirmed(&user, amount, provider, &reference, now)?;
            print_json(&outcome)?;
        }
        Command::Invest { user, plan, amount } => {
            let purchase = platform.on_investment_purchased(&user, &plan, amount, now)?;
            print_json(&purchase)?;
        }
        Command::Withdraw {
            user,
            amount,
            provider,
        } => {
            let entry = platform.request_withdrawal(&user, amount, provider, now)?;
            print_json(&entry)?;
        }
        Command::Terminate { investment, reason } => {
            let termination = platform.terminate_investment(&investment, reason.into(), now)?;
            print_json(&termination)?;
        }
        Command::Tree { user, depth, json } => match platform.genealogy(&user, depth) {
            Ok(tree) if json => print_json(&tree)?,
            Ok(tree) => print!("{}", render_text(&tree)),
            Err(err) => {
                warn!(%user, error = %err, "genealogy unavailable");
                println!("{EMPTY_STATE}");
            }
        },
        Command::Layout {
            user,
            depth,
            width,
            height,
        } => match platform.genealogy(&user, depth) {
            Ok(tree) => print_json(&layout(&tree, width, height))?,
            Err(err) => {
                warn!(%user, error = %err, "genealogy unavailable");
                println!("{EMPTY_STATE}");
            }
        },
        Command::Dashboard { user } => print_json(&platform.dashboard(&user, now)?)?,
        Command::Snapshot { out } => {
            let snapshot = LedgerSnapshot::capture(platform.store(), now)?;
            let json = serde_json::to_string_pretty(&snapshot)?;
            match out {
                Some(path) => {
                    write_all(&path, json.as_bytes())?;
                    info!(path = %path.display(), root = %snapshot.root_hex(), "snapshot written");
                }
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}

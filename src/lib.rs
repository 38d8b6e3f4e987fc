//! Command-line front end for the genealogy ledger.
//!
//! The binaries share this crate: [`config`] loads the TOML configuration,
//! [`handlers`] holds the payment and investment entry points, and
//! [`open_platform`] wires both onto a SQLite ledger.

use std::path::Path;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use ledger_store::SqliteLedger;

pub mod config;
pub mod handlers;

pub use config::Config;
pub use handlers::Platform;

/// Install the stderr subscriber: `info` for the workspace crates unless
/// `RUST_LOG` says otherwise.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let mut filter = EnvFilter::new("warn");
            for target in WORKSPACE_TARGETS {
                filter = filter.add_directive(format!("{target}=info").parse()?);
            }
            filter
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

const WORKSPACE_TARGETS: [&str; 5] = [
    "genealogy",
    "genealogy_cli",
    "genealogy_settle",
    "ledger_store",
    "referral_module",
];

/// Open the ledger named by `config` (or `db_override`) and install the
/// configured plans.
pub fn open_platform(
    config: &Config,
    db_override: Option<&Path>,
) -> anyhow::Result<Platform<SqliteLedger>> {
    let path = db_override.unwrap_or(config.store.path.as_path());
    let store = SqliteLedger::open(path)
        .with_context(|| format!("opening ledger {}", path.display()))?;
    let schedule = config.referral.schedule()?;
    let platform = Platform::new(store, schedule, config.referral.tree_depth);
    platform
        .install_plans(&config.plans)
        .context("installing plans")?;
    Ok(platform)
}

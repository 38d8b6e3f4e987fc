use std::{path::PathBuf, thread, time::Duration};

use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

use genealogy_cli::{init_tracing, open_platform, Config};

/// Complete matured investments and credit principal plus return.
#[derive(Parser)]
#[command(name = "genealogy-settle", version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "GENEALOGY_CONFIG", default_value = "genealogy.toml")]
    config: PathBuf,

    /// Ledger database (overrides config file)
    #[arg(long, env = "GENEALOGY_DB")]
    db: Option<PathBuf>,

    /// Keep sweeping instead of exiting after one pass
    #[arg(long = "loop")]
    do_loop: bool,

    /// Seconds between sweeps with --loop
    #[arg(long, default_value_t = 3600)]
    interval_secs: u64,
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let platform = open_platform(&config, args.db.as_deref())?;
    let interval = Duration::from_secs(args.interval_secs.max(1));
    info!(do_loop = args.do_loop, interval_secs = interval.as_secs(), "settlement started");

    loop {
        match platform.settle_matured(Utc::now()) {
            Ok(settled) => {
                for s in &settled {
                    println!("{}\t{}\t{}", s.investment.id, s.investment.user_id, s.payout);
                }
                info!(settled = settled.len(), "sweep finished");
            }
            // a failed sweep is retried on the next tick
            Err(err) if args.do_loop => error!(error = %err, "sweep failed"),
            Err(err) => return Err(err.into()),
        }
        if !args.do_loop {
            break;
        }
        thread::sleep(interval);
    }
    Ok(())
}

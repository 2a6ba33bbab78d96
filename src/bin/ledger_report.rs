//! ledger_report - JSON dump of the parking ledger
//!
//! The database is opened read-only, so the report never creates tables or
//! takes the write lock from a running `ledgerd`.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;

use vehicle_ledger::identity::plate_lookup_key;
use vehicle_ledger::{Clock, ParkingLedger, SystemClock};

const DEFAULT_EVENT_WINDOW_S: u64 = 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the ledger database.
    #[arg(long, env = "LEDGER_DB_PATH", default_value = "ledger.db")]
    db_path: String,
    /// Number of most recent closed sessions to include.
    #[arg(long, default_value_t = 20)]
    limit: usize,
    /// Report a single plate: registry row and all of its sessions.
    #[arg(long)]
    plate: Option<String>,
    /// Start of the crossing log window (default: 24 hours before --until).
    #[arg(long, value_name = "UNIX_SECONDS")]
    since: Option<u64>,
    /// End of the crossing log window, inclusive (default: now).
    #[arg(long, value_name = "UNIX_SECONDS")]
    until: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !args.db_path.starts_with("file:") && !std::path::Path::new(&args.db_path).exists() {
        return Err(anyhow!("ledger database {} does not exist", args.db_path));
    }
    let clock = Arc::new(SystemClock);
    let ledger = ParkingLedger::open_sqlite_read_only(&args.db_path, clock.clone())?;

    let report = match &args.plate {
        Some(plate) => {
            let plate = plate_lookup_key(plate);
            json!({
                "plate": plate,
                "active": ledger
                    .active_vehicles()?
                    .into_iter()
                    .find(|v| v.plate == plate),
                "registry": ledger.registry_entry(&plate)?,
                "sessions": ledger.sessions_for(&plate)?,
            })
        }
        None => {
            let until = match args.until {
                Some(until) => until,
                None => clock.now_s()?,
            };
            let since = args
                .since
                .unwrap_or_else(|| until.saturating_sub(DEFAULT_EVENT_WINDOW_S));
            json!({
                "occupancy": ledger.occupancy()?,
                "active": ledger.active_vehicles()?,
                "recent_sessions": ledger.recent_sessions(args.limit)?,
                "events": {
                    "since": since,
                    "until": until,
                    "crossings": ledger.events_between(since, until)?,
                },
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

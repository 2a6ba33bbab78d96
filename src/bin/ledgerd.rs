//! ledgerd - replays recorded detections into the parking ledger
//!
//! Each input file is one source session: the pipeline is reset between
//! files so track ids, identities and line history never leak across
//! sources, while every file writes into the same ledger database. The file
//! path is the source id recorded in the crossing log.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vehicle_ledger::config::LedgerdConfig;
use vehicle_ledger::{
    Clock, ManualClock, ParkingLedger, Pipeline, ReplaySource, StubClassifier, SystemClock,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON-lines detection recordings, processed in order.
    #[arg(required = true, value_name = "FILE")]
    inputs: Vec<String>,
    /// Ledger database path (overrides LEDGER_DB_PATH and the config file).
    #[arg(long)]
    db_path: Option<String>,
    /// Derive time from frame numbers at this rate instead of the wall clock.
    #[arg(long, value_name = "FPS")]
    replay_fps: Option<u32>,
    /// Unix time of frame 0 when --replay-fps is set (default: now).
    #[arg(long, value_name = "UNIX_SECONDS", requires = "replay_fps")]
    start_time: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = LedgerdConfig::load().context("loading ledgerd config")?;
    if let Some(db_path) = args.db_path {
        cfg.db_path = db_path;
    }

    let replay_clock = match args.replay_fps {
        Some(0) => return Err(anyhow!("--replay-fps must be greater than zero")),
        Some(fps) => {
            let start = match args.start_time {
                Some(start) => start,
                None => SystemClock.now_s()?,
            };
            Some((Arc::new(ManualClock::new(start)), start, u64::from(fps)))
        }
        None => None,
    };
    let clock: Arc<dyn Clock> = match &replay_clock {
        Some((manual, _, _)) => manual.clone() as Arc<dyn Clock>,
        None => Arc::new(SystemClock) as Arc<dyn Clock>,
    };

    let ledger = Arc::new(
        ParkingLedger::open_sqlite(&cfg.db_path, clock.clone())
            .with_context(|| format!("opening ledger {}", cfg.db_path))?,
    );
    let mut pipeline = Pipeline::new(
        cfg.pipeline_config(),
        Box::new(StubClassifier::new()),
        ledger.clone(),
        clock,
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    log::info!(
        "ledgerd running. writing to {} (line={} entry={} max_age={} min_hits={} iou={})",
        cfg.db_path,
        cfg.line.position,
        cfg.line.entry_direction,
        cfg.tracker.max_age,
        cfg.tracker.min_hits,
        cfg.tracker.iou_threshold
    );

    'inputs: for input in &args.inputs {
        let mut source = ReplaySource::open(input)?;
        pipeline.reset();
        pipeline.set_source_id(input)?;

        while let Some(frame) = source.next_frame()? {
            if stop.load(Ordering::SeqCst) {
                log::info!("shutdown signal received, stopping after {}", input);
                break 'inputs;
            }
            if let Some((manual, start, fps)) = &replay_clock {
                manual.set(start + frame.frame / fps);
            }

            let image = frame.image();
            match pipeline.process_frame(&image, &frame.detections) {
                Ok(report) => {
                    for outcome in &report.ledger {
                        log::debug!("frame {}: {:?}", frame.frame, outcome);
                    }
                }
                Err(err) => {
                    log::error!(
                        "frame {} of {}: {} ({} tracks, {} events, {} applied, {} unapplied)",
                        frame.frame,
                        input,
                        err,
                        err.report.tracks.len(),
                        err.report.events.len(),
                        err.report.ledger.len(),
                        err.unapplied.len()
                    );
                    return Err(anyhow::Error::new(err))
                        .with_context(|| format!("ledger write failed while replaying {}", input));
                }
            }
        }

        let stats = pipeline.stats();
        let read = source.stats();
        log::info!(
            "{}: {} frames, {} events, {} identity failures, {} skipped",
            read.path,
            read.frames_read,
            stats.events,
            stats.identity_failures,
            stats.skipped_events
        );
    }

    log::info!("occupancy: {} vehicles inside", ledger.occupancy()?);
    Ok(())
}

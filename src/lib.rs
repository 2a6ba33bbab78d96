//! Vehicle Ledger
//!
//! This crate implements the core of an access-point vehicle monitor.
//!
//! # Architecture
//!
//! Each frame flows through four stages, leaves first:
//!
//! 1. **Tracker**: assigns persistent integer identities to detections by
//!    greedy IoU matching.
//! 2. **Identity resolution**: each confirmed track is classified exactly once
//!    (plate, brand, color); unreadable plates get a placeholder key.
//! 3. **EventDetector**: watches centroid history against a virtual line and
//!    emits debounced entry/exit events.
//! 4. **ParkingLedger**: applies entry/exit to the "currently inside" set, the
//!    session history and the per-plate registry, atomically per call.
//!
//! # Module Structure
//!
//! - `detect`: Detection input types and box geometry
//! - `tracker`: multi-object tracker
//! - `events`: boundary-crossing event detector
//! - `identity`: classification boundary, plate rules, memoization table
//! - `ledger`: parking ledger state machine and its storage backends
//! - `pipeline`: per-source orchestrator
//! - `config`, `ingest`, `clock`: daemon plumbing

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};

pub mod clock;
pub mod config;
pub mod detect;
pub mod events;
pub mod identity;
pub mod ingest;
pub mod ledger;
pub mod pipeline;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use detect::{BBox, Detection, DetectionGate};
pub use events::{CrossingEvent, EntryDirection, EventDetector, EventKind};
pub use identity::{
    FrameImage, IdentityCache, IdentityClassifier, IdentityOutcome, ResolvedIdentity,
    StubClassifier, VehicleIdentity,
};
pub use ingest::{ReplayFrame, ReplaySource, ReplayStats};
pub use ledger::{
    ActiveVehicle, CrossingRecord, EntryOutcome, ExitOutcome, InMemoryLedgerStore, LedgerAnomaly,
    LedgerStore, LedgerTx, ParkingLedger, ParkingSession, SqliteLedgerStore, VehicleRecord,
    DEFAULT_SOURCE_ID,
};
pub use pipeline::{
    FrameError, FrameReport, LedgerOutcome, Pipeline, PipelineConfig, PipelineStats, TrackIdentity,
};
pub use tracker::{Track, TrackState, Tracker, TrackerConfig};

/// Returns a unique shared-cache in-memory SQLite URI.
///
/// Every connection opened on the returned URI sees the same database, which
/// lets tests share one ledger between several handles.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:vehicle_ledger_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Opens `db_path` without write access. The file must already exist.
pub(crate) fn open_db_connection_read_only(db_path: &str) -> Result<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_ONLY;
    if db_path.starts_with("file:") {
        flags |= OpenFlags::SQLITE_OPEN_URI;
    }
    Ok(Connection::open_with_flags(db_path, flags)?)
}

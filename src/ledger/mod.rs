//! Parking ledger.
//!
//! Keeps the authoritative "currently inside" set, the closed-session history
//! and per-plate aggregates. For any plate exactly one of these holds: it is
//! active, it has only closed sessions, or it was never seen.
//!
//! Every `apply_*` call is one read-modify-write executed under the ledger
//! mutex and inside one store transaction, so several pipelines may share a
//! ledger. The same transaction appends the crossing to the audit log.

mod store;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::events::EventKind;

pub use store::{InMemoryLedgerStore, LedgerStore, LedgerTx, SqliteLedgerStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveVehicle {
    pub plate: String,
    pub track_id: u64,
    pub brand: Option<String>,
    pub color: Option<String>,
    pub entry_time_s: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParkingSession {
    pub plate: String,
    pub brand: Option<String>,
    pub color: Option<String>,
    pub entry_time_s: u64,
    pub exit_time_s: u64,
    /// floor((exit - entry) / 60)
    pub duration_minutes: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VehicleRecord {
    pub plate: String,
    pub first_seen_s: u64,
    pub last_seen_s: u64,
    pub total_visits: u64,
    pub avg_duration_minutes: f64,
}

/// Source id used by callers that do not name their camera.
pub const DEFAULT_SOURCE_ID: &str = "default";

/// One applied crossing in the append-only audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CrossingRecord {
    pub plate: String,
    pub track_id: u64,
    pub kind: EventKind,
    pub timestamp_s: u64,
    pub source_id: String,
    pub anomaly: Option<LedgerAnomaly>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAnomaly {
    /// Entry for a plate that is already inside.
    DuplicateEntry,
    /// Exit for a plate that is not inside.
    ExitWithoutEntry,
}

impl fmt::Display for LedgerAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerAnomaly::DuplicateEntry => f.write_str("duplicate_entry"),
            LedgerAnomaly::ExitWithoutEntry => f.write_str("exit_without_entry"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    pub created: bool,
    pub anomaly: Option<LedgerAnomaly>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExitOutcome {
    pub session: Option<ParkingSession>,
    pub anomaly: Option<LedgerAnomaly>,
}

pub struct ParkingLedger {
    store: Mutex<Box<dyn LedgerStore>>,
    clock: Arc<dyn Clock>,
}

impl ParkingLedger {
    pub fn new(store: Box<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(store),
            clock,
        }
    }

    pub fn open_sqlite(db_path: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = SqliteLedgerStore::open(db_path)?;
        Ok(Self::new(Box::new(store), clock))
    }

    /// Query-only handle on an existing SQLite ledger; `apply_*` fails.
    pub fn open_sqlite_read_only(db_path: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = SqliteLedgerStore::open_read_only(db_path)?;
        Ok(Self::new(Box::new(store), clock))
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Box::new(InMemoryLedgerStore::new()), clock)
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut dyn LedgerStore) -> Result<T>) -> Result<T> {
        let mut guard = self
            .store
            .lock()
            .map_err(|_| anyhow!("ledger store lock poisoned"))?;
        f(&mut **guard)
    }

    /// Records that `plate` entered, attributed to the default source.
    pub fn apply_entry(
        &self,
        plate: &str,
        track_id: u64,
        brand: Option<&str>,
        color: Option<&str>,
    ) -> Result<EntryOutcome> {
        self.apply_entry_from(DEFAULT_SOURCE_ID, plate, track_id, brand, color)
    }

    /// Records that `plate` entered past the camera `source_id`.
    ///
    /// A plate that is already inside keeps its row and entry time; only the
    /// track id moves to the new sighting, and brand/color are filled in if
    /// they were unknown. That case is reported as `duplicate_entry`. Both
    /// cases are appended to the crossing log.
    pub fn apply_entry_from(
        &self,
        source_id: &str,
        plate: &str,
        track_id: u64,
        brand: Option<&str>,
        color: Option<&str>,
    ) -> Result<EntryOutcome> {
        if plate.trim().is_empty() {
            return Err(anyhow!("ledger plate must not be empty"));
        }
        let now = self.clock.now_s()?;
        let mut record = CrossingRecord {
            plate: plate.to_string(),
            track_id,
            kind: EventKind::Entry,
            timestamp_s: now,
            source_id: source_id.to_string(),
            anomaly: None,
        };
        let mut outcome = None;

        self.with_store(|store| {
            store.atomically(&mut |tx| {
                if let Some(mut row) = tx.active(plate)? {
                    row.track_id = track_id;
                    if row.brand.is_none() {
                        row.brand = brand.map(str::to_string);
                    }
                    if row.color.is_none() {
                        row.color = color.map(str::to_string);
                    }
                    tx.update_active(&row)?;
                    record.anomaly = Some(LedgerAnomaly::DuplicateEntry);
                    tx.append_event(&record)?;
                    outcome = Some(EntryOutcome {
                        created: false,
                        anomaly: Some(LedgerAnomaly::DuplicateEntry),
                    });
                    return Ok(());
                }

                tx.insert_active(&ActiveVehicle {
                    plate: plate.to_string(),
                    track_id,
                    brand: brand.map(str::to_string),
                    color: color.map(str::to_string),
                    entry_time_s: now,
                })?;

                let registry = match tx.registry(plate)? {
                    Some(mut rec) => {
                        rec.total_visits += 1;
                        rec.last_seen_s = now;
                        rec
                    }
                    None => VehicleRecord {
                        plate: plate.to_string(),
                        first_seen_s: now,
                        last_seen_s: now,
                        total_visits: 1,
                        avg_duration_minutes: 0.0,
                    },
                };
                tx.put_registry(&registry)?;
                tx.append_event(&record)?;

                outcome = Some(EntryOutcome {
                    created: true,
                    anomaly: None,
                });
                Ok(())
            })
        })?;

        let outcome = outcome.ok_or_else(|| anyhow!("ledger entry produced no outcome"))?;
        if outcome.created {
            log::info!("ledger: {} entered (track {})", plate, track_id);
        } else {
            log::warn!(
                "ledger: duplicate_entry for {} (now track {})",
                plate,
                track_id
            );
        }
        Ok(outcome)
    }

    /// Records that `plate` left, attributed to the default source.
    pub fn apply_exit(&self, plate: &str) -> Result<ExitOutcome> {
        self.apply_exit_from(DEFAULT_SOURCE_ID, plate, None)
    }

    /// Records that `plate` left past the camera `source_id`, closing its
    /// session. `track_id` is the track that crossed; without one the log
    /// carries the track id stored on the active row.
    ///
    /// A plate that is not inside is reported as `exit_without_entry` and
    /// nothing is written.
    pub fn apply_exit_from(
        &self,
        source_id: &str,
        plate: &str,
        track_id: Option<u64>,
    ) -> Result<ExitOutcome> {
        if plate.trim().is_empty() {
            return Err(anyhow!("ledger plate must not be empty"));
        }
        let now = self.clock.now_s()?;
        let mut outcome = None;

        self.with_store(|store| {
            store.atomically(&mut |tx| {
                let Some(row) = tx.active(plate)? else {
                    outcome = Some(ExitOutcome {
                        session: None,
                        anomaly: Some(LedgerAnomaly::ExitWithoutEntry),
                    });
                    return Ok(());
                };

                // A clock that stepped backwards must not yield exit < entry.
                let exit_time_s = now.max(row.entry_time_s);
                let duration_minutes = (exit_time_s - row.entry_time_s) / 60;
                let session = ParkingSession {
                    plate: row.plate.clone(),
                    brand: row.brand.clone(),
                    color: row.color.clone(),
                    entry_time_s: row.entry_time_s,
                    exit_time_s,
                    duration_minutes,
                };

                tx.remove_active(plate)?;
                tx.append_session(&session)?;
                tx.append_event(&CrossingRecord {
                    plate: row.plate.clone(),
                    track_id: track_id.unwrap_or(row.track_id),
                    kind: EventKind::Exit,
                    timestamp_s: exit_time_s,
                    source_id: source_id.to_string(),
                    anomaly: None,
                })?;

                let mut record = tx.registry(plate)?.unwrap_or_else(|| VehicleRecord {
                    plate: plate.to_string(),
                    first_seen_s: row.entry_time_s,
                    last_seen_s: row.entry_time_s,
                    total_visits: 1,
                    avg_duration_minutes: 0.0,
                });
                let n = record.total_visits.max(1) as f64;
                record.avg_duration_minutes =
                    (record.avg_duration_minutes * (n - 1.0) + duration_minutes as f64) / n;
                record.last_seen_s = exit_time_s;
                tx.put_registry(&record)?;

                outcome = Some(ExitOutcome {
                    session: Some(session),
                    anomaly: None,
                });
                Ok(())
            })
        })?;

        let outcome = outcome.ok_or_else(|| anyhow!("ledger exit produced no outcome"))?;
        match &outcome.session {
            Some(session) => log::info!(
                "ledger: {} left after {} min",
                plate,
                session.duration_minutes
            ),
            None => log::warn!("ledger: exit_without_entry for {}", plate),
        }
        Ok(outcome)
    }

    pub fn active_vehicles(&self) -> Result<Vec<ActiveVehicle>> {
        self.with_store(|store| store.active_vehicles())
    }

    pub fn occupancy(&self) -> Result<usize> {
        Ok(self.active_vehicles()?.len())
    }

    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<ParkingSession>> {
        self.with_store(|store| store.recent_sessions(limit))
    }

    pub fn sessions_for(&self, plate: &str) -> Result<Vec<ParkingSession>> {
        self.with_store(|store| store.sessions_for(plate))
    }

    pub fn registry_entry(&self, plate: &str) -> Result<Option<VehicleRecord>> {
        self.with_store(|store| store.registry_entry(plate))
    }

    /// Crossings applied with `from_s <= timestamp <= to_s`, oldest first.
    pub fn events_between(&self, from_s: u64, to_s: u64) -> Result<Vec<CrossingRecord>> {
        self.with_store(|store| store.events_between(from_s, to_s))
    }
}

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::time::Duration;

use crate::events::EventKind;
use crate::ledger::{ActiveVehicle, CrossingRecord, LedgerAnomaly, ParkingSession, VehicleRecord};
use crate::{open_db_connection, open_db_connection_read_only};

/// Row-level operations available inside one atomic ledger operation.
pub trait LedgerTx {
    fn active(&mut self, plate: &str) -> Result<Option<ActiveVehicle>>;

    fn insert_active(&mut self, vehicle: &ActiveVehicle) -> Result<()>;

    /// Replaces the stored row for `vehicle.plate`.
    fn update_active(&mut self, vehicle: &ActiveVehicle) -> Result<()>;

    fn remove_active(&mut self, plate: &str) -> Result<()>;

    fn append_session(&mut self, session: &ParkingSession) -> Result<()>;

    fn registry(&mut self, plate: &str) -> Result<Option<VehicleRecord>>;

    fn put_registry(&mut self, record: &VehicleRecord) -> Result<()>;

    fn append_event(&mut self, event: &CrossingRecord) -> Result<()>;
}

/// Storage behind the parking ledger: active vehicles keyed by plate, an
/// append-only session history, and the per-plate registry.
pub trait LedgerStore: Send {
    /// Runs `op` as one all-or-nothing unit. If `op` fails nothing it wrote
    /// is kept.
    fn atomically(&mut self, op: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<()>) -> Result<()>;

    /// Currently inside, oldest entry first.
    fn active_vehicles(&mut self) -> Result<Vec<ActiveVehicle>>;

    /// Closed sessions, newest first.
    fn recent_sessions(&mut self, limit: usize) -> Result<Vec<ParkingSession>>;

    /// Closed sessions for one plate, oldest first.
    fn sessions_for(&mut self, plate: &str) -> Result<Vec<ParkingSession>>;

    fn registry_entry(&mut self, plate: &str) -> Result<Option<VehicleRecord>>;

    /// Recorded crossings with `from_s <= timestamp <= to_s`, in the order
    /// they were written.
    fn events_between(&mut self, from_s: u64, to_s: u64) -> Result<Vec<CrossingRecord>>;
}

fn to_i64(v: u64, what: &str) -> Result<i64> {
    i64::try_from(v).map_err(|_| anyhow!("{} exceeds i64 range", what))
}

fn to_u64(v: i64, what: &str) -> Result<u64> {
    u64::try_from(v).map_err(|_| anyhow!("corrupt ledger: negative {}", what))
}

/// Query bound; anything past i64::MAX matches every stored time.
fn bound_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// How long a writer waits for another connection's transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteLedgerStore {
    conn: Connection,
}

impl SqliteLedgerStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Opens an existing ledger for queries only. The schema is not touched
    /// and every write fails.
    pub fn open_read_only(db_path: &str) -> Result<Self> {
        let conn = open_db_connection_read_only(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS active_vehicles (
              plate TEXT PRIMARY KEY,
              track_id INTEGER NOT NULL,
              brand TEXT,
              color TEXT,
              entry_time INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS parking_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plate TEXT NOT NULL,
              brand TEXT,
              color TEXT,
              entry_time INTEGER NOT NULL,
              exit_time INTEGER NOT NULL,
              duration_minutes INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vehicle_registry (
              plate TEXT PRIMARY KEY,
              first_seen INTEGER NOT NULL,
              last_seen INTEGER NOT NULL,
              total_visits INTEGER NOT NULL,
              avg_duration_minutes REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS crossing_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plate TEXT NOT NULL,
              track_id INTEGER NOT NULL,
              kind TEXT NOT NULL,
              timestamp INTEGER NOT NULL,
              source_id TEXT NOT NULL,
              anomaly TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_history_plate ON parking_history(plate);
            CREATE INDEX IF NOT EXISTS idx_history_exit ON parking_history(exit_time);
            CREATE INDEX IF NOT EXISTS idx_events_time ON crossing_events(timestamp);
            "#,
        )?;
        Ok(())
    }
}

type ActiveParts = (String, i64, Option<String>, Option<String>, i64);
type SessionParts = (String, Option<String>, Option<String>, i64, i64, i64);
type RegistryParts = (String, i64, i64, i64, f64);
type EventParts = (String, i64, String, i64, String, Option<String>);

fn active_from_row(row: &Row<'_>) -> rusqlite::Result<ActiveParts> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn active_from_parts(parts: ActiveParts) -> Result<ActiveVehicle> {
    let (plate, track_id, brand, color, entry_time) = parts;
    Ok(ActiveVehicle {
        plate,
        track_id: to_u64(track_id, "track_id")?,
        brand,
        color,
        entry_time_s: to_u64(entry_time, "entry_time")?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn session_from_parts(parts: SessionParts) -> Result<ParkingSession> {
    let (plate, brand, color, entry_time, exit_time, duration) = parts;
    Ok(ParkingSession {
        plate,
        brand,
        color,
        entry_time_s: to_u64(entry_time, "entry_time")?,
        exit_time_s: to_u64(exit_time, "exit_time")?,
        duration_minutes: to_u64(duration, "duration_minutes")?,
    })
}

fn registry_from_row(row: &Row<'_>) -> rusqlite::Result<RegistryParts> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn registry_from_parts(parts: RegistryParts) -> Result<VehicleRecord> {
    let (plate, first_seen, last_seen, total_visits, avg) = parts;
    Ok(VehicleRecord {
        plate,
        first_seen_s: to_u64(first_seen, "first_seen")?,
        last_seen_s: to_u64(last_seen, "last_seen")?,
        total_visits: to_u64(total_visits, "total_visits")?,
        avg_duration_minutes: avg,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn event_from_parts(parts: EventParts) -> Result<CrossingRecord> {
    let (plate, track_id, kind, timestamp, source_id, anomaly) = parts;
    let kind = match kind.as_str() {
        "entry" => EventKind::Entry,
        "exit" => EventKind::Exit,
        other => return Err(anyhow!("corrupt ledger: unknown event kind '{}'", other)),
    };
    let anomaly = match anomaly.as_deref() {
        None => None,
        Some("duplicate_entry") => Some(LedgerAnomaly::DuplicateEntry),
        Some("exit_without_entry") => Some(LedgerAnomaly::ExitWithoutEntry),
        Some(other) => return Err(anyhow!("corrupt ledger: unknown anomaly '{}'", other)),
    };
    Ok(CrossingRecord {
        plate,
        track_id: to_u64(track_id, "track_id")?,
        kind,
        timestamp_s: to_u64(timestamp, "timestamp")?,
        source_id,
        anomaly,
    })
}

const SELECT_SESSION: &str =
    "SELECT plate, brand, color, entry_time, exit_time, duration_minutes FROM parking_history";

fn select_active(conn: &Connection, plate: &str) -> Result<Option<ActiveVehicle>> {
    conn.query_row(
        "SELECT plate, track_id, brand, color, entry_time FROM active_vehicles WHERE plate = ?1",
        params![plate],
        active_from_row,
    )
    .optional()?
    .map(active_from_parts)
    .transpose()
}

fn select_registry(conn: &Connection, plate: &str) -> Result<Option<VehicleRecord>> {
    conn.query_row(
        r#"
        SELECT plate, first_seen, last_seen, total_visits, avg_duration_minutes
        FROM vehicle_registry WHERE plate = ?1
        "#,
        params![plate],
        registry_from_row,
    )
    .optional()?
    .map(registry_from_parts)
    .transpose()
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl LedgerTx for SqliteTx<'_> {
    fn active(&mut self, plate: &str) -> Result<Option<ActiveVehicle>> {
        select_active(self.conn, plate)
    }

    fn insert_active(&mut self, vehicle: &ActiveVehicle) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO active_vehicles(plate, track_id, brand, color, entry_time)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                vehicle.plate,
                to_i64(vehicle.track_id, "track_id")?,
                vehicle.brand,
                vehicle.color,
                to_i64(vehicle.entry_time_s, "entry_time")?
            ],
        )?;
        Ok(())
    }

    fn update_active(&mut self, vehicle: &ActiveVehicle) -> Result<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE active_vehicles SET track_id = ?2, brand = ?3, color = ?4, entry_time = ?5
            WHERE plate = ?1
            "#,
            params![
                vehicle.plate,
                to_i64(vehicle.track_id, "track_id")?,
                vehicle.brand,
                vehicle.color,
                to_i64(vehicle.entry_time_s, "entry_time")?
            ],
        )?;
        if changed != 1 {
            return Err(anyhow!("active vehicle {} vanished mid-update", vehicle.plate));
        }
        Ok(())
    }

    fn remove_active(&mut self, plate: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM active_vehicles WHERE plate = ?1", params![plate])?;
        Ok(())
    }

    fn append_session(&mut self, session: &ParkingSession) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO parking_history(plate, brand, color, entry_time, exit_time, duration_minutes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                session.plate,
                session.brand,
                session.color,
                to_i64(session.entry_time_s, "entry_time")?,
                to_i64(session.exit_time_s, "exit_time")?,
                to_i64(session.duration_minutes, "duration_minutes")?
            ],
        )?;
        Ok(())
    }

    fn registry(&mut self, plate: &str) -> Result<Option<VehicleRecord>> {
        select_registry(self.conn, plate)
    }

    fn put_registry(&mut self, record: &VehicleRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO vehicle_registry(plate, first_seen, last_seen, total_visits, avg_duration_minutes)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(plate) DO UPDATE SET
              first_seen = excluded.first_seen,
              last_seen = excluded.last_seen,
              total_visits = excluded.total_visits,
              avg_duration_minutes = excluded.avg_duration_minutes
            "#,
            params![
                record.plate,
                to_i64(record.first_seen_s, "first_seen")?,
                to_i64(record.last_seen_s, "last_seen")?,
                to_i64(record.total_visits, "total_visits")?,
                record.avg_duration_minutes
            ],
        )?;
        Ok(())
    }

    fn append_event(&mut self, event: &CrossingRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO crossing_events(plate, track_id, kind, timestamp, source_id, anomaly)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.plate,
                to_i64(event.track_id, "track_id")?,
                event.kind.to_string(),
                to_i64(event.timestamp_s, "timestamp")?,
                event.source_id,
                event.anomaly.map(|a| a.to_string())
            ],
        )?;
        Ok(())
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn atomically(&mut self, op: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<()>) -> Result<()> {
        // IMMEDIATE takes the write lock up front so two connections on the
        // same file serialize instead of failing at commit.
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        {
            let mut handle = SqliteTx { conn: &tx };
            op(&mut handle)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn active_vehicles(&mut self) -> Result<Vec<ActiveVehicle>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT plate, track_id, brand, color, entry_time
            FROM active_vehicles ORDER BY entry_time ASC, plate ASC
            "#,
        )?;
        let rows = stmt.query_map([], active_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(active_from_parts(row?)?);
        }
        Ok(out)
    }

    fn recent_sessions(&mut self, limit: usize) -> Result<Vec<ParkingSession>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_SESSION))?;
        let rows = stmt.query_map(params![limit as i64], session_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(session_from_parts(row?)?);
        }
        Ok(out)
    }

    fn sessions_for(&mut self, plate: &str) -> Result<Vec<ParkingSession>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE plate = ?1 ORDER BY id ASC", SELECT_SESSION))?;
        let rows = stmt.query_map(params![plate], session_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(session_from_parts(row?)?);
        }
        Ok(out)
    }

    fn registry_entry(&mut self, plate: &str) -> Result<Option<VehicleRecord>> {
        select_registry(&self.conn, plate)
    }

    fn events_between(&mut self, from_s: u64, to_s: u64) -> Result<Vec<CrossingRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT plate, track_id, kind, timestamp, source_id, anomaly
            FROM crossing_events WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![bound_i64(from_s), bound_i64(to_s)], event_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(event_from_parts(row?)?);
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, Default)]
struct LedgerTables {
    active: HashMap<String, ActiveVehicle>,
    history: Vec<ParkingSession>,
    registry: HashMap<String, VehicleRecord>,
    events: Vec<CrossingRecord>,
}

/// Prior value of a keyed row touched inside an operation.
enum Undo {
    Active(String, Option<ActiveVehicle>),
    Registry(String, Option<VehicleRecord>),
}

/// Writes straight into the live tables and remembers how to take them back.
/// Append-only tables are rolled back by truncating to their starting length.
struct MemoryTx<'a> {
    tables: &'a mut LedgerTables,
    undo: Vec<Undo>,
    history_len: usize,
    events_len: usize,
}

impl<'a> MemoryTx<'a> {
    fn begin(tables: &'a mut LedgerTables) -> Self {
        let history_len = tables.history.len();
        let events_len = tables.events.len();
        Self {
            tables,
            undo: Vec::new(),
            history_len,
            events_len,
        }
    }

    fn rollback(self) {
        let MemoryTx {
            tables,
            undo,
            history_len,
            events_len,
        } = self;
        tables.history.truncate(history_len);
        tables.events.truncate(events_len);
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Active(plate, Some(prev)) => {
                    tables.active.insert(plate, prev);
                }
                Undo::Active(plate, None) => {
                    tables.active.remove(&plate);
                }
                Undo::Registry(plate, Some(prev)) => {
                    tables.registry.insert(plate, prev);
                }
                Undo::Registry(plate, None) => {
                    tables.registry.remove(&plate);
                }
            }
        }
    }
}

impl LedgerTx for MemoryTx<'_> {
    fn active(&mut self, plate: &str) -> Result<Option<ActiveVehicle>> {
        Ok(self.tables.active.get(plate).cloned())
    }

    fn insert_active(&mut self, vehicle: &ActiveVehicle) -> Result<()> {
        if self.tables.active.contains_key(&vehicle.plate) {
            return Err(anyhow!("active vehicle {} already present", vehicle.plate));
        }
        self.tables
            .active
            .insert(vehicle.plate.clone(), vehicle.clone());
        self.undo.push(Undo::Active(vehicle.plate.clone(), None));
        Ok(())
    }

    fn update_active(&mut self, vehicle: &ActiveVehicle) -> Result<()> {
        let Some(row) = self.tables.active.get_mut(&vehicle.plate) else {
            return Err(anyhow!("active vehicle {} vanished mid-update", vehicle.plate));
        };
        let prev = std::mem::replace(row, vehicle.clone());
        self.undo
            .push(Undo::Active(vehicle.plate.clone(), Some(prev)));
        Ok(())
    }

    fn remove_active(&mut self, plate: &str) -> Result<()> {
        if let Some(prev) = self.tables.active.remove(plate) {
            self.undo.push(Undo::Active(plate.to_string(), Some(prev)));
        }
        Ok(())
    }

    fn append_session(&mut self, session: &ParkingSession) -> Result<()> {
        self.tables.history.push(session.clone());
        Ok(())
    }

    fn registry(&mut self, plate: &str) -> Result<Option<VehicleRecord>> {
        Ok(self.tables.registry.get(plate).cloned())
    }

    fn put_registry(&mut self, record: &VehicleRecord) -> Result<()> {
        let prev = self
            .tables
            .registry
            .insert(record.plate.clone(), record.clone());
        self.undo.push(Undo::Registry(record.plate.clone(), prev));
        Ok(())
    }

    fn append_event(&mut self, event: &CrossingRecord) -> Result<()> {
        self.tables.events.push(event.clone());
        Ok(())
    }
}

/// Process-local store. A failed operation is undone row by row, so the cost
/// of an operation does not grow with the size of the history.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: LedgerTables,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn atomically(&mut self, op: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<()>) -> Result<()> {
        let mut tx = MemoryTx::begin(&mut self.tables);
        match op(&mut tx) {
            Ok(()) => Ok(()),
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    fn active_vehicles(&mut self) -> Result<Vec<ActiveVehicle>> {
        let mut out: Vec<ActiveVehicle> = self.tables.active.values().cloned().collect();
        out.sort_by(|a, b| {
            a.entry_time_s
                .cmp(&b.entry_time_s)
                .then_with(|| a.plate.cmp(&b.plate))
        });
        Ok(out)
    }

    fn recent_sessions(&mut self, limit: usize) -> Result<Vec<ParkingSession>> {
        Ok(self.tables.history.iter().rev().take(limit).cloned().collect())
    }

    fn sessions_for(&mut self, plate: &str) -> Result<Vec<ParkingSession>> {
        Ok(self
            .tables
            .history
            .iter()
            .filter(|s| s.plate == plate)
            .cloned()
            .collect())
    }

    fn registry_entry(&mut self, plate: &str) -> Result<Option<VehicleRecord>> {
        Ok(self.tables.registry.get(plate).cloned())
    }

    fn events_between(&mut self, from_s: u64, to_s: u64) -> Result<Vec<CrossingRecord>> {
        Ok(self
            .tables
            .events
            .iter()
            .filter(|e| (from_s..=to_s).contains(&e.timestamp_s))
            .cloned()
            .collect())
    }
}

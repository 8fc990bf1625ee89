// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite measurement backend

use crate::store::{table_name, MeasurementStore, StoreError};
use rusqlite::{ffi, params, Connection, ErrorCode, Transaction};
use sensorlink_proto::{PlugReading, PowerReading, Reading, ReadingKind, TempHumReading};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite measurement store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE power    (id, deviceid,   ts, power1, power2, power3, power4, vrms, temp,
///                        PRIMARY KEY (id, deviceid, ts));
/// CREATE TABLE plug     (id, macaddress, ts, load, irms, vrms, freq, pow, work,
///                        PRIMARY KEY (id, macaddress, ts));
/// CREATE TABLE temp_hum (id, deviceid,   ts, temperature, externaltemp, humidity, battery,
///                        PRIMARY KEY (id, deviceid, ts));
/// ```
///
/// Timestamps are stored as RFC 3339 text.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a file-based database.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS power (
                id TEXT NOT NULL,
                deviceid TEXT NOT NULL,
                ts TEXT NOT NULL,
                power1 REAL NOT NULL,
                power2 REAL NOT NULL,
                power3 REAL NOT NULL,
                power4 REAL NOT NULL,
                vrms REAL NOT NULL,
                temp REAL NOT NULL,
                PRIMARY KEY (id, deviceid, ts)
            );
            CREATE TABLE IF NOT EXISTS plug (
                id TEXT NOT NULL,
                macaddress TEXT NOT NULL,
                ts TEXT NOT NULL,
                load REAL,
                irms REAL,
                vrms REAL,
                freq REAL,
                pow TEXT NOT NULL,
                work REAL,
                PRIMARY KEY (id, macaddress, ts)
            );
            CREATE TABLE IF NOT EXISTS temp_hum (
                id TEXT NOT NULL,
                deviceid TEXT NOT NULL,
                ts TEXT NOT NULL,
                temperature REAL NOT NULL,
                externaltemp REAL NOT NULL,
                humidity REAL NOT NULL,
                battery REAL NOT NULL,
                PRIMARY KEY (id, deviceid, ts)
            );",
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn insert_row(tx: &Transaction<'_>, reading: &Reading) -> rusqlite::Result<usize> {
        match reading {
            Reading::Power(r) => Self::insert_power(tx, r),
            Reading::TempHum(r) => Self::insert_temp_hum(tx, r),
            Reading::Plug(r) => Self::insert_plug(tx, r),
        }
    }

    fn insert_power(tx: &Transaction<'_>, r: &PowerReading) -> rusqlite::Result<usize> {
        tx.execute(
            "INSERT INTO power (id, deviceid, ts, power1, power2, power3, power4, vrms, temp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                r.id,
                r.deviceid,
                r.ts.to_rfc3339(),
                r.power1,
                r.power2,
                r.power3,
                r.power4,
                r.vrms,
                r.temp,
            ],
        )
    }

    fn insert_temp_hum(tx: &Transaction<'_>, r: &TempHumReading) -> rusqlite::Result<usize> {
        tx.execute(
            "INSERT INTO temp_hum (id, deviceid, ts, temperature, externaltemp, humidity, battery)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                r.id,
                r.deviceid,
                r.ts.to_rfc3339(),
                r.temp,
                r.temp_external,
                r.humidity,
                r.battery,
            ],
        )
    }

    fn insert_plug(tx: &Transaction<'_>, r: &PlugReading) -> rusqlite::Result<usize> {
        tx.execute(
            "INSERT INTO plug (id, macaddress, ts, load, irms, vrms, freq, pow, work)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                r.id,
                r.mac_address,
                r.ts.to_rfc3339(),
                r.load,
                r.irms,
                r.vrms,
                r.freq,
                r.pow,
                r.work,
            ],
        )
    }
}

/// Map a primary-key conflict to [`StoreError::Duplicate`].
fn classify(err: rusqlite::Error, table: &'static str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE) =>
        {
            StoreError::Duplicate { table }
        }
        other => StoreError::Database(other),
    }
}

impl MeasurementStore for SqliteStore {
    fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
        let table = table_name(reading.kind());
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if let Err(e) = Self::insert_row(&tx, reading) {
            tx.rollback()?;
            return Err(classify(e, table));
        }

        tx.commit()?;
        Ok(())
    }

    fn count(&self, kind: ReadingKind) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table_name(kind));
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;

        Ok(count as u64)
    }
}

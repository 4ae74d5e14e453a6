//! Driver location repository for the `driver_locations` table.
//!
//! Durable history for the live cache: one row per driver, overwritten on
//! every update.

use rescue_core::DriverId;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::{DriverLocationRow, now};

/// Driver location repository: stateless, every method takes `&Connection`.
pub struct DriverLocationRepo;

impl DriverLocationRepo {
    /// Insert or overwrite the driver's row.
    pub fn upsert(conn: &Connection, driver_id: DriverId, latitude: f64, longitude: f64) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO driver_locations (driver_id, latitude, longitude, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(driver_id) DO UPDATE SET
                 latitude = excluded.latitude,
                 longitude = excluded.longitude,
                 updated_at = excluded.updated_at",
            params![driver_id.get(), latitude, longitude, now()],
        )?;
        Ok(())
    }

    /// Last durable location of a driver.
    pub fn get(conn: &Connection, driver_id: DriverId) -> Result<Option<DriverLocationRow>> {
        let row = conn
            .query_row(
                "SELECT driver_id, latitude, longitude, updated_at
                 FROM driver_locations WHERE driver_id = ?1",
                params![driver_id.get()],
                |row| {
                    Ok(DriverLocationRow {
                        driver_id: DriverId::new(row.get(0)?),
                        latitude: row.get(1)?,
                        longitude: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

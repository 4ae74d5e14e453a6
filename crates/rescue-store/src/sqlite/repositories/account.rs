//! Driver and rider account repositories for the `drivers` and `riders` tables.
//!
//! Accounts are provisioned by the auth collaborator; this layer reads them,
//! applies profile edits, and tracks driver availability.

use rescue_core::{DriverId, RiderId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};
use crate::sqlite::row_types::{DriverRow, NewDriver, NewRider, ProfileUpdate, RiderRow, now};

const DRIVER_COLUMNS: &str =
    "driver_id, name, mobile, email, ratings, is_available, created_at";
const RIDER_COLUMNS: &str = "rider_id, name, mobile, email, created_at";

/// Driver repository: stateless, every method takes `&Connection`.
pub struct DriverRepo;

impl DriverRepo {
    /// Insert a driver. Duplicate email/mobile fails with a constraint error.
    pub fn create(conn: &Connection, new: &NewDriver) -> Result<DriverRow> {
        let _ = conn.execute(
            "INSERT INTO drivers (name, mobile, email, ratings, is_available, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![new.name, new.mobile, new.email, new.ratings, now()],
        )?;
        let id = DriverId::new(conn.last_insert_rowid());
        Self::get(conn, id)?.ok_or_else(|| StoreError::not_found("driver", id))
    }

    /// Get a driver by ID.
    pub fn get(conn: &Connection, id: DriverId) -> Result<Option<DriverRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE driver_id = ?1"),
                params![id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Apply a partial profile update. Returns the updated row, or `None`
    /// if the driver does not exist.
    pub fn update_profile(
        conn: &Connection,
        id: DriverId,
        update: &ProfileUpdate,
    ) -> Result<Option<DriverRow>> {
        let changed = conn.execute(
            "UPDATE drivers
             SET name = COALESCE(?1, name),
                 mobile = COALESCE(?2, mobile),
                 email = COALESCE(?3, email)
             WHERE driver_id = ?4",
            params![update.name, update.mobile, update.email, id.get()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Self::get(conn, id)
    }

    /// Set availability. Returns whether the driver exists.
    pub fn set_available(conn: &Connection, id: DriverId, available: bool) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE drivers SET is_available = ?1 WHERE driver_id = ?2",
            params![i32::from(available), id.get()],
        )?;
        Ok(changed > 0)
    }

    /// All drivers currently available, ordered by ID.
    pub fn list_available(conn: &Connection) -> Result<Vec<DriverRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {DRIVER_COLUMNS} FROM drivers WHERE is_available = 1 ORDER BY driver_id"
        ))?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `(total, available)` driver counts.
    pub fn counts(conn: &Connection) -> Result<(i64, i64)> {
        let counts = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_available), 0) FROM drivers",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DriverRow> {
        Ok(DriverRow {
            driver_id: DriverId::new(row.get(0)?),
            name: row.get(1)?,
            mobile: row.get(2)?,
            email: row.get(3)?,
            ratings: row.get(4)?,
            is_available: row.get::<_, i32>(5)? == 1,
            created_at: row.get(6)?,
        })
    }
}

/// Rider repository: stateless, every method takes `&Connection`.
pub struct RiderRepo;

impl RiderRepo {
    /// Insert a rider. Duplicate email/mobile fails with a constraint error.
    pub fn create(conn: &Connection, new: &NewRider) -> Result<RiderRow> {
        let _ = conn.execute(
            "INSERT INTO riders (name, mobile, email, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![new.name, new.mobile, new.email, now()],
        )?;
        let id = RiderId::new(conn.last_insert_rowid());
        Self::get(conn, id)?.ok_or_else(|| StoreError::not_found("rider", id))
    }

    /// Get a rider by ID.
    pub fn get(conn: &Connection, id: RiderId) -> Result<Option<RiderRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {RIDER_COLUMNS} FROM riders WHERE rider_id = ?1"),
                params![id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Apply a partial profile update.
    pub fn update_profile(
        conn: &Connection,
        id: RiderId,
        update: &ProfileUpdate,
    ) -> Result<Option<RiderRow>> {
        let changed = conn.execute(
            "UPDATE riders
             SET name = COALESCE(?1, name),
                 mobile = COALESCE(?2, mobile),
                 email = COALESCE(?3, email)
             WHERE rider_id = ?4",
            params![update.name, update.mobile, update.email, id.get()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Self::get(conn, id)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RiderRow> {
        Ok(RiderRow {
            rider_id: RiderId::new(row.get(0)?),
            name: row.get(1)?,
            mobile: row.get(2)?,
            email: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

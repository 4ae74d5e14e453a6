//! Trip request repository for the `trip_requests` table.
//!
//! Requests are never deleted, only transitioned.

use rescue_core::status::TripRequestStatus;
use rescue_core::{DriverId, RequestId, RiderId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};
use crate::sqlite::row_types::{NewTripRequest, TripRequestRow, now, text_column};

const COLUMNS: &str =
    "req_id, rider_id, pickup_location, destination, fare, latitude, longitude, status, created_at";

/// Trip request repository: stateless, every method takes `&Connection`.
pub struct TripRequestRepo;

impl TripRequestRepo {
    /// Insert a pending request.
    pub fn create(conn: &Connection, new: &NewTripRequest) -> Result<TripRequestRow> {
        let _ = conn.execute(
            "INSERT INTO trip_requests
                 (rider_id, pickup_location, destination, fare, latitude, longitude, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
            params![
                new.rider_id.get(),
                new.pickup_location,
                new.destination,
                new.fare,
                new.latitude,
                new.longitude,
                now()
            ],
        )?;
        let id = RequestId::new(conn.last_insert_rowid());
        Self::get(conn, id)?.ok_or_else(|| StoreError::not_found("trip request", id))
    }

    /// Get a request by ID.
    pub fn get(conn: &Connection, id: RequestId) -> Result<Option<TripRequestRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM trip_requests WHERE req_id = ?1"),
                params![id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Move a request from `from` to `to`. Returns `false` when the request
    /// was not in `from` (including when it does not exist).
    pub fn transition(
        conn: &Connection,
        id: RequestId,
        from: TripRequestStatus,
        to: TripRequestStatus,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE trip_requests SET status = ?1 WHERE req_id = ?2 AND status = ?3",
            params![to.as_str(), id.get(), from.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// A rider's own requests, newest first, optionally filtered by status.
    pub fn list_for_rider(
        conn: &Connection,
        rider_id: RiderId,
        status: Option<TripRequestStatus>,
    ) -> Result<Vec<TripRequestRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM trip_requests
             WHERE rider_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, req_id DESC"
        ))?;
        let rows = stmt
            .query_map(params![rider_id.get(), status.map(|s| s.as_str())], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Pending requests the driver has not yet responded to, newest first.
    pub fn list_open_for_driver(conn: &Connection, driver_id: DriverId) -> Result<Vec<TripRequestRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM trip_requests t
             WHERE t.status = 'pending'
               AND NOT EXISTS (
                   SELECT 1 FROM driver_responses r
                   WHERE r.req_id = t.req_id AND r.driver_id = ?1)
             ORDER BY t.created_at DESC, t.req_id DESC"
        ))?;
        let rows = stmt
            .query_map(params![driver_id.get()], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TripRequestRow> {
        Ok(TripRequestRow {
            req_id: RequestId::new(row.get(0)?),
            rider_id: RiderId::new(row.get(1)?),
            pickup_location: row.get(2)?,
            destination: row.get(3)?,
            fare: row.get(4)?,
            latitude: row.get(5)?,
            longitude: row.get(6)?,
            status: text_column(row, 7)?,
            created_at: row.get(8)?,
        })
    }
}

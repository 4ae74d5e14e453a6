//! Ongoing trip repository for the `ongoing_trips` table.

use rescue_core::status::TripStatus;
use rescue_core::{DriverId, Participant, RequestId, RiderId, Role, TripId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};
use crate::sqlite::row_types::{OngoingTripRow, TripRequestRow, now, text_column};

const COLUMNS: &str = "trip_id, req_id, rider_id, driver_id, pickup_location, destination, fare,
                       status, start_time, end_time, rider_latitude, rider_longitude,
                       driver_latitude, driver_longitude";

/// Starting coordinates for a new trip.
#[derive(Clone, Copy, Debug, Default)]
pub struct TripStartPositions {
    /// Rider latitude.
    pub rider_latitude: Option<f64>,
    /// Rider longitude.
    pub rider_longitude: Option<f64>,
    /// Driver latitude.
    pub driver_latitude: Option<f64>,
    /// Driver longitude.
    pub driver_longitude: Option<f64>,
}

/// Ongoing trip repository: stateless, every method takes `&Connection`.
pub struct OngoingTripRepo;

impl OngoingTripRepo {
    /// Start a trip for `request` with `driver_id`. A second ongoing trip for
    /// the same request violates the partial unique index.
    pub fn start(
        conn: &Connection,
        request: &TripRequestRow,
        driver_id: DriverId,
        fare: f64,
        positions: TripStartPositions,
    ) -> Result<OngoingTripRow> {
        let _ = conn.execute(
            "INSERT INTO ongoing_trips
                 (req_id, rider_id, driver_id, pickup_location, destination, fare, status,
                  start_time, rider_latitude, rider_longitude, driver_latitude, driver_longitude)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'ongoing', ?7, ?8, ?9, ?10, ?11)",
            params![
                request.req_id.get(),
                request.rider_id.get(),
                driver_id.get(),
                request.pickup_location,
                request.destination,
                fare,
                now(),
                positions.rider_latitude.or(request.latitude),
                positions.rider_longitude.or(request.longitude),
                positions.driver_latitude,
                positions.driver_longitude
            ],
        )?;
        let id = TripId::new(conn.last_insert_rowid());
        Self::get(conn, id)?.ok_or_else(|| StoreError::not_found("trip", id))
    }

    /// Get a trip by ID.
    pub fn get(conn: &Connection, id: TripId) -> Result<Option<OngoingTripRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM ongoing_trips WHERE trip_id = ?1"),
                params![id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// The trip currently in progress for a request, if any.
    pub fn active_for_request(conn: &Connection, req_id: RequestId) -> Result<Option<OngoingTripRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM ongoing_trips WHERE req_id = ?1 AND status = 'ongoing'"
                ),
                params![req_id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Move an ongoing trip to a terminal status and stamp `end_time`.
    /// Returns `false` if the trip was already terminal.
    pub fn finish(conn: &Connection, id: TripId, to: TripStatus) -> Result<bool> {
        if !to.is_terminal() {
            return Err(StoreError::InvalidOperation(format!(
                "trips can only finish as completed or cancelled, not {to}"
            )));
        }
        let changed = conn.execute(
            "UPDATE ongoing_trips SET status = ?1, end_time = ?2
             WHERE trip_id = ?3 AND status = 'ongoing'",
            params![to.as_str(), now(), id.get()],
        )?;
        Ok(changed > 0)
    }

    /// Record one party's live position on an ongoing trip.
    pub fn update_position(
        conn: &Connection,
        id: TripId,
        role: Role,
        latitude: f64,
        longitude: f64,
    ) -> Result<bool> {
        let sql = match role {
            Role::Rider => {
                "UPDATE ongoing_trips SET rider_latitude = ?1, rider_longitude = ?2
                 WHERE trip_id = ?3 AND status = 'ongoing'"
            }
            Role::Driver => {
                "UPDATE ongoing_trips SET driver_latitude = ?1, driver_longitude = ?2
                 WHERE trip_id = ?3 AND status = 'ongoing'"
            }
        };
        let changed = conn.execute(sql, params![latitude, longitude, id.get()])?;
        Ok(changed > 0)
    }

    /// Trips where `party` is the rider or the driver, newest first.
    pub fn list_for_party(
        conn: &Connection,
        party: Participant,
        status: Option<TripStatus>,
    ) -> Result<Vec<OngoingTripRow>> {
        let column = match party.role {
            Role::Rider => "rider_id",
            Role::Driver => "driver_id",
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM ongoing_trips
             WHERE {column} = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY start_time DESC, trip_id DESC"
        ))?;
        let rows = stmt
            .query_map(params![party.id, status.map(|s| s.as_str())], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OngoingTripRow> {
        Ok(OngoingTripRow {
            trip_id: TripId::new(row.get(0)?),
            req_id: RequestId::new(row.get(1)?),
            rider_id: RiderId::new(row.get(2)?),
            driver_id: DriverId::new(row.get(3)?),
            pickup_location: row.get(4)?,
            destination: row.get(5)?,
            fare: row.get(6)?,
            status: text_column(row, 7)?,
            start_time: row.get(8)?,
            end_time: row.get(9)?,
            rider_latitude: row.get(10)?,
            rider_longitude: row.get(11)?,
            driver_latitude: row.get(12)?,
            driver_longitude: row.get(13)?,
        })
    }
}

//! Driver response repository for the `driver_responses` table.
//!
//! One row per `(req_id, driver_id)`. Status only moves forward out of
//! `pending`; every transition here is guarded by a `status = 'pending'`
//! predicate so an illegal move changes nothing.

use rescue_core::status::ResponseStatus;
use rescue_core::{DriverId, RequestId, ResponseId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};
use crate::sqlite::row_types::{BidDetails, DriverResponseRow, now, text_column};

const COLUMNS: &str = "response_id, req_id, driver_id, driver_name, driver_mobile, amount, rating,
                       vehicle, eta, specialty, status, created_at, updated_at";

/// Default rating shown on a bid when the driver supplies none.
pub const DEFAULT_BID_RATING: f64 = 4.5;

/// Driver response repository: stateless, every method takes `&Connection`.
pub struct DriverResponseRepo;

impl DriverResponseRepo {
    /// The response a driver gave to a request, if any.
    pub fn find(
        conn: &Connection,
        req_id: RequestId,
        driver_id: DriverId,
    ) -> Result<Option<DriverResponseRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM driver_responses WHERE req_id = ?1 AND driver_id = ?2"),
                params![req_id.get(), driver_id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Get a response by ID.
    pub fn get(conn: &Connection, id: ResponseId) -> Result<Option<DriverResponseRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM driver_responses WHERE response_id = ?1"),
                params![id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert a decline. A second response for the same pair violates the
    /// `UNIQUE (req_id, driver_id)` constraint.
    pub fn insert_decline(
        conn: &Connection,
        req_id: RequestId,
        driver_id: DriverId,
        driver_name: Option<&str>,
    ) -> Result<DriverResponseRow> {
        let ts = now();
        let _ = conn.execute(
            "INSERT INTO driver_responses
                 (req_id, driver_id, driver_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'declined', ?4, ?4)",
            params![req_id.get(), driver_id.get(), driver_name, ts],
        )?;
        Self::fetch_inserted(conn)
    }

    /// Insert a pending bid.
    pub fn insert_bid(
        conn: &Connection,
        req_id: RequestId,
        driver_id: DriverId,
        bid: &BidDetails,
    ) -> Result<DriverResponseRow> {
        let ts = now();
        let _ = conn.execute(
            "INSERT INTO driver_responses
                 (req_id, driver_id, driver_name, driver_mobile, amount, rating,
                  vehicle, eta, specialty, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?10)",
            params![
                req_id.get(),
                driver_id.get(),
                bid.driver_name,
                bid.driver_mobile,
                bid.amount,
                bid.rating.unwrap_or(DEFAULT_BID_RATING),
                bid.vehicle,
                bid.eta,
                bid.specialty,
                ts
            ],
        )?;
        Self::fetch_inserted(conn)
    }

    /// Replace the contents of a still-pending bid. Returns `false` if the
    /// response is no longer pending.
    pub fn revise_pending_bid(conn: &Connection, id: ResponseId, bid: &BidDetails) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE driver_responses
             SET amount = ?1,
                 rating = COALESCE(?2, rating),
                 vehicle = COALESCE(?3, vehicle),
                 eta = COALESCE(?4, eta),
                 specialty = COALESCE(?5, specialty),
                 driver_name = COALESCE(?6, driver_name),
                 driver_mobile = COALESCE(?7, driver_mobile),
                 updated_at = ?8
             WHERE response_id = ?9 AND status = 'pending'",
            params![
                bid.amount,
                bid.rating,
                bid.vehicle,
                bid.eta,
                bid.specialty,
                bid.driver_name,
                bid.driver_mobile,
                now(),
                id.get()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Move a pending response to `to`, optionally replacing its amount.
    /// Returns `false` if the response was not pending.
    pub fn resolve_pending(
        conn: &Connection,
        id: ResponseId,
        to: ResponseStatus,
        amount: Option<f64>,
    ) -> Result<bool> {
        if !ResponseStatus::Pending.can_transition_to(to) {
            return Err(StoreError::InvalidOperation(format!(
                "responses cannot move from pending to {to}"
            )));
        }
        let changed = conn.execute(
            "UPDATE driver_responses
             SET status = ?1, amount = COALESCE(?2, amount), updated_at = ?3
             WHERE response_id = ?4 AND status = 'pending'",
            params![to.as_str(), amount, now(), id.get()],
        )?;
        Ok(changed > 0)
    }

    /// Reject every pending or accepted bid on a request except `keep`'s (all
    /// of them when `keep` is `None`). Returns the drivers whose bids were
    /// rejected.
    pub fn reject_open(
        conn: &Connection,
        req_id: RequestId,
        keep: Option<DriverId>,
    ) -> Result<Vec<DriverId>> {
        let mut stmt = conn.prepare(
            "UPDATE driver_responses
             SET status = 'rejected', updated_at = ?1
             WHERE req_id = ?2 AND (?3 IS NULL OR driver_id != ?3)
               AND status IN ('pending', 'accepted')
             RETURNING driver_id",
        )?;
        let drivers = stmt
            .query_map(params![now(), req_id.get(), keep.map(DriverId::get)], |row| {
                row.get::<_, i64>(0).map(DriverId::new)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(drivers)
    }

    /// Reject one driver's pending or accepted bid. Returns `false` if the
    /// driver had no open bid on the request.
    pub fn reject_driver(conn: &Connection, req_id: RequestId, driver_id: DriverId) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE driver_responses
             SET status = 'rejected', updated_at = ?1
             WHERE req_id = ?2 AND driver_id = ?3 AND status IN ('pending', 'accepted')",
            params![now(), req_id.get(), driver_id.get()],
        )?;
        Ok(changed > 0)
    }

    /// Responses on a request, oldest first, optionally filtered.
    pub fn list_for_request(
        conn: &Connection,
        req_id: RequestId,
        driver_id: Option<DriverId>,
        status: Option<ResponseStatus>,
    ) -> Result<Vec<DriverResponseRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM driver_responses
             WHERE req_id = ?1
               AND (?2 IS NULL OR driver_id = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY created_at, response_id"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    req_id.get(),
                    driver_id.map(DriverId::get),
                    status.map(|s| s.as_str())
                ],
                Self::map_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fetch_inserted(conn: &Connection) -> Result<DriverResponseRow> {
        let id = ResponseId::new(conn.last_insert_rowid());
        Self::get(conn, id)?.ok_or_else(|| StoreError::not_found("driver response", id))
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DriverResponseRow> {
        Ok(DriverResponseRow {
            response_id: ResponseId::new(row.get(0)?),
            req_id: RequestId::new(row.get(1)?),
            driver_id: DriverId::new(row.get(2)?),
            driver_name: row.get(3)?,
            driver_mobile: row.get(4)?,
            amount: row.get(5)?,
            rating: row.get(6)?,
            vehicle: row.get(7)?,
            eta: row.get(8)?,
            specialty: row.get(9)?,
            status: text_column(row, 10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

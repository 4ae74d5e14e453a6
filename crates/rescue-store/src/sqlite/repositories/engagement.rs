//! Engaged driver repository for the `engaged_drivers` table.
//!
//! A row marks a driver as committed to a request; the composite primary key
//! keeps at most one row per pair.

use rescue_core::{DriverId, RequestId};
use rusqlite::{Connection, params};

use crate::errors::Result;
use crate::sqlite::row_types::now;

/// Engaged driver repository: stateless, every method takes `&Connection`.
pub struct EngagedDriverRepo;

impl EngagedDriverRepo {
    /// Mark a driver engaged. Returns `false` if the pair already existed.
    pub fn engage(conn: &Connection, req_id: RequestId, driver_id: DriverId) -> Result<bool> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO engaged_drivers (req_id, driver_id, engaged_at)
             VALUES (?1, ?2, ?3)",
            params![req_id.get(), driver_id.get(), now()],
        )?;
        Ok(changed > 0)
    }

    /// Release one pair. Returns whether a row was removed.
    pub fn release(conn: &Connection, req_id: RequestId, driver_id: DriverId) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM engaged_drivers WHERE req_id = ?1 AND driver_id = ?2",
            params![req_id.get(), driver_id.get()],
        )?;
        Ok(changed > 0)
    }

    /// Release every driver engaged on a request.
    pub fn release_request(conn: &Connection, req_id: RequestId) -> Result<usize> {
        let changed = conn.execute(
            "DELETE FROM engaged_drivers WHERE req_id = ?1",
            params![req_id.get()],
        )?;
        Ok(changed)
    }

    /// Every driver engaged on any request.
    pub fn engaged_drivers(conn: &Connection) -> Result<Vec<DriverId>> {
        let mut stmt = conn.prepare("SELECT DISTINCT driver_id FROM engaged_drivers")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(DriverId::new))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

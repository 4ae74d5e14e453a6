//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`
//! parameter, so every operation runs inside whatever transaction the caller
//! opened on that connection.

pub mod account;
pub mod driver_response;
pub mod engagement;
pub mod location;
pub mod notification;
pub mod ongoing_trip;
pub mod trip_request;

pub use account::{DriverRepo, RiderRepo};
pub use driver_response::DriverResponseRepo;
pub use engagement::EngagedDriverRepo;
pub use location::DriverLocationRepo;
pub use notification::NotificationRepo;
pub use ongoing_trip::{OngoingTripRepo, TripStartPositions};
pub use trip_request::TripRequestRepo;

#[cfg(test)]
pub(crate) mod test_support {
    use rescue_core::{DriverId, RequestId, RiderId};
    use rusqlite::Connection;

    use super::{DriverRepo, RiderRepo, TripRequestRepo};
    use crate::sqlite::migrations::run_migrations;
    use crate::sqlite::row_types::{NewDriver, NewRider, NewTripRequest};

    pub(crate) fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    pub(crate) fn seed_driver(conn: &Connection, n: u32) -> DriverId {
        DriverRepo::create(
            conn,
            &NewDriver {
                name: format!("Driver {n}"),
                mobile: format!("0170000{n:04}"),
                email: format!("driver{n}@example.com"),
                ratings: 4.7,
            },
        )
        .unwrap()
        .driver_id
    }

    pub(crate) fn seed_rider(conn: &Connection, n: u32) -> RiderId {
        RiderRepo::create(
            conn,
            &NewRider {
                name: format!("Rider {n}"),
                mobile: format!("0180000{n:04}"),
                email: format!("rider{n}@example.com"),
            },
        )
        .unwrap()
        .rider_id
    }

    pub(crate) fn seed_request(conn: &Connection, rider_id: RiderId) -> RequestId {
        TripRequestRepo::create(
            conn,
            &NewTripRequest {
                rider_id,
                pickup_location: "A".into(),
                destination: "B".into(),
                fare: 500.0,
                latitude: Some(23.8),
                longitude: Some(90.4),
            },
        )
        .unwrap()
        .req_id
    }
}

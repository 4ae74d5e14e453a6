//! # rescue-store
//!
//! Durable state for the dispatch coordinator, backed by `SQLite`.
//!
//! - **Accounts**: drivers and riders, with profile updates and availability
//! - **Negotiation**: trip requests, driver responses (bids and declines),
//!   ongoing trips, and the engaged-driver set
//! - **Notifications**: the per-recipient inbox that survives disconnects
//! - **[`DispatchStore`]**: transactional facade over the repositories
//! - **Migrations**: version-tracked schema evolution embedded at compile time

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use sqlite::repositories::TripStartPositions;
pub use sqlite::row_types::{
    BidDetails, DriverLocationRow, DriverResponseRow, DriverRow, NewDriver, NewNotification,
    NewRider, NewTripRequest, NotificationRow, OngoingTripRow, ProfileUpdate, RiderRow,
    TripRequestRow,
};
pub use sqlite::{ConnectionConfig, ConnectionPool};
pub use store::{BidOutcome, CancelledRequest, ConfirmTrip, Confirmation, DispatchStore};

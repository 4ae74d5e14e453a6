//! # rescue-core
//!
//! Foundation types, errors, typed IDs, and geo utilities for the Rapid Rescue
//! dispatcher.
//!
//! This crate provides the shared vocabulary that all other crates depend on:
//!
//! - **Typed IDs**: `DriverId`, `RiderId`, `RequestId`, ... as newtypes over the
//!   store's integer keys, plus the opaque `ConnectionId`
//! - **Identity**: [`Role`], [`Participant`] and [`Identity`] for bound users
//! - **Status enums**: trip request, driver response, trip, and notification
//!   lifecycles with their legal transitions
//! - **Geo**: haversine distance and coordinate validation
//! - **Errors**: the [`DispatchError`] taxonomy with wire codes
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod errors;
pub mod geo;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod status;

pub use errors::{DispatchError, Result};
pub use identity::{Identity, Participant, Role};
pub use ids::{ConnectionId, DriverId, NotificationId, RequestId, ResponseId, RiderId, TripId};

//! High-level `DispatchStore` API.
//!
//! The [`DispatchStore`] composes the repository layer into the negotiation
//! steps the dispatcher performs. Every multi-row step runs inside one
//! `SQLite` transaction, so a half-applied confirmation is never visible.

mod dispatch_store;

pub use dispatch_store::*;

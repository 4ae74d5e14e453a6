//! Live presence: driver positions, nearby queries, connection greetings,
//! and free-form broadcasts.

use std::collections::HashSet;

use metrics::counter;
use rescue_core::geo::GeoPoint;
use rescue_core::{DispatchError, DriverId, Identity, Result, Role};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{Caller, NegotiationRouter, now_rfc3339, to_value};
use crate::location::{DriverLocationRecord, NearbyDriver};
use crate::metrics::{LOCATION_STORE_FAILURES_TOTAL, LOCATION_UPDATES_TOTAL};
use crate::protocol::{Coordinates, Envelope, LocationEventKind, event_types as et};

/// A nearby driver enriched with their stored profile.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NearbyDriverInfo {
    /// Cached position and distance.
    #[serde(flatten)]
    pub nearby: NearbyDriver,
    /// Display name.
    pub name: Option<String>,
    /// Contact number.
    pub mobile: Option<String>,
    /// Average rating.
    pub rating: Option<f64>,
}

/// A driver's last known position, live or from history.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DriverLocationView {
    /// Driver ID.
    pub driver_id: DriverId,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// When the position was reported.
    pub timestamp: String,
    /// `live` for the cache, `stored` for the durable row.
    pub source: &'static str,
}

impl NegotiationRouter {
    /// A driver reports their position.
    ///
    /// The cache is updated first and always; the durable write is
    /// best-effort. Riders receive the new position.
    pub fn driver_location(
        &self,
        caller: &Caller,
        kind: LocationEventKind,
        coordinates: Coordinates,
    ) -> Result<Option<Envelope>> {
        let identity = caller.require(et::DRIVER_LOCATION, Role::Driver)?;
        let driver_id = DriverId::new(identity.participant.id);
        let point = GeoPoint::new(coordinates.latitude, coordinates.longitude)?;

        let record = self.locations.update(driver_id, point);
        counter!(LOCATION_UPDATES_TOTAL).increment(1);
        if let Err(e) = self
            .store
            .record_driver_location(driver_id, point.latitude, point.longitude)
        {
            counter!(LOCATION_STORE_FAILURES_TOTAL).increment(1);
            warn!(driver_id = %driver_id, error = %e, "failed to persist driver location");
        }

        let update = location_payload(&record);
        let _ = self
            .registry
            .broadcast_by_role(Role::Rider, &Envelope::new(et::DRIVER_LOCATION, update.clone()));

        Ok(match kind {
            LocationEventKind::DriverLocation => None,
            LocationEventKind::AddLocation => Some(Envelope::new(et::LOCATION_UPDATED, update)),
            LocationEventKind::UpdateLocation => {
                let _ = self
                    .registry
                    .broadcast_by_role(Role::Rider, &self.nearby_snapshot());
                Some(Envelope::new(et::LOCATION_UPDATED, update))
            }
        })
    }

    /// Active drivers within `radius_km` (default from configuration) of a
    /// point, nearest first, excluding drivers engaged on any request.
    pub fn nearby_drivers(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: Option<f64>,
    ) -> Result<Vec<NearbyDriverInfo>> {
        let center = GeoPoint::new(latitude, longitude)?;
        let radius_km = radius_km.unwrap_or(self.default_radius_km);
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(DispatchError::Validation(
                "radius_km must be a non-negative number".into(),
            ));
        }
        let engaged = self.store.engaged_drivers()?;

        self.locations
            .find_nearby(center, radius_km)
            .into_iter()
            .filter(|n| !engaged.contains(&n.record.driver_id))
            .map(|nearby| -> Result<NearbyDriverInfo> {
                let profile = self.store.driver(nearby.record.driver_id)?;
                Ok(NearbyDriverInfo {
                    name: profile.as_ref().map(|p| p.name.clone()),
                    mobile: profile.as_ref().map(|p| p.mobile.clone()),
                    rating: profile.map(|p| p.ratings),
                    nearby,
                })
            })
            .collect()
    }

    /// A driver's live position, falling back to the last stored one.
    pub fn locate_driver(&self, driver_id: DriverId) -> Result<DriverLocationView> {
        if let Some(record) = self.locations.get(driver_id) {
            return Ok(DriverLocationView {
                driver_id,
                latitude: record.latitude,
                longitude: record.longitude,
                timestamp: record.timestamp.to_rfc3339(),
                source: "live",
            });
        }
        self.store
            .driver_location(driver_id)?
            .map(|row| DriverLocationView {
                driver_id,
                latitude: row.latitude,
                longitude: row.longitude,
                timestamp: row.updated_at,
                source: "stored",
            })
            .ok_or_else(|| DispatchError::not_found("driver location", driver_id))
    }

    /// Messages sent to a connection right after it is accepted.
    pub fn welcome(&self, caller: &Caller) -> Vec<Envelope> {
        let identity = caller.identity.as_ref();
        let mut greeting = vec![Envelope::new(
            et::CONNECTION_ESTABLISHED,
            json!({
                "connection_id": caller.connection_id,
                "user_id": identity.map(|i| i.participant.id),
                "user_role": identity.map(Identity::role),
                "message": "Connected to Rapid Rescue dispatch",
            }),
        )];
        if identity.is_some_and(|i| i.role() == Role::Rider) {
            greeting.push(self.nearby_snapshot());
        }
        greeting
    }

    pub(super) fn client_registered(&self, caller: &Caller) -> Envelope {
        let identity = caller.identity.as_ref();
        debug!(bound = identity.is_some(), "client registered");
        Envelope::new(
            et::CLIENT_REGISTERED,
            json!({
                "connection_id": caller.connection_id,
                "user_id": identity.map(|i| i.participant.id),
                "user_role": identity.map(Identity::role),
                "connections": self.registry.connection_count(),
            }),
        )
    }

    pub(super) fn broadcast_message(&self, caller: &Caller, message: Value) -> Result<()> {
        let identity = caller.authenticated(et::BROADCAST)?;
        let delivered = self.registry.broadcast_all(&Envelope::new(
            et::BROADCAST_MESSAGE,
            json!({
                "from_id": identity.participant.id,
                "from_role": identity.role(),
                "message": message,
                "timestamp": now_rfc3339(),
            }),
        ));
        debug!(delivered, "broadcast relayed");
        Ok(())
    }

    /// `nearby-drivers` with every active, non-engaged driver.
    fn nearby_snapshot(&self) -> Envelope {
        let engaged = self.store.engaged_drivers().unwrap_or_else(|e| {
            warn!(error = %e, "failed to load engaged drivers for snapshot");
            HashSet::new()
        });
        let drivers: Vec<DriverLocationRecord> = self
            .locations
            .query_active()
            .into_iter()
            .filter(|r| !engaged.contains(&r.driver_id))
            .collect();
        Envelope::new(
            et::NEARBY_DRIVERS,
            json!({
                "count": drivers.len(),
                "drivers": to_value(&drivers),
                "timestamp": now_rfc3339(),
            }),
        )
    }
}

fn location_payload(record: &DriverLocationRecord) -> Value {
    json!({
        "driver_id": record.driver_id,
        "latitude": record.latitude,
        "longitude": record.longitude,
        "timestamp": record.timestamp.to_rfc3339(),
    })
}

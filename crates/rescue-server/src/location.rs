//! In-memory driver location cache.
//!
//! The cache is authoritative for live routing; the durable
//! `driver_locations` table only records history. Entries older than the
//! staleness window are purged lazily, whenever active records are queried.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::gauge;
use parking_lot::RwLock;
use rescue_core::DriverId;
use rescue_core::geo::GeoPoint;
use serde::Serialize;

use crate::metrics::ACTIVE_DRIVER_LOCATIONS;

/// Last known position of a driver.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DriverLocationRecord {
    /// Driver ID.
    pub driver_id: DriverId,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Wall-clock time of the update.
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    seen: Instant,
}

impl DriverLocationRecord {
    /// Position as a point.
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// An active record annotated with its distance from a query point.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NearbyDriver {
    /// The cached record.
    #[serde(flatten)]
    pub record: DriverLocationRecord,
    /// Haversine distance from the query point.
    pub distance_km: f64,
}

/// Shared driver location cache.
pub struct LocationCache {
    records: RwLock<HashMap<DriverId, DriverLocationRecord>>,
    staleness: Duration,
}

impl LocationCache {
    /// Create an empty cache with the given staleness window.
    pub fn new(staleness: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            staleness,
        }
    }

    /// The staleness window.
    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Upsert a driver's position, stamped now.
    pub fn update(&self, driver_id: DriverId, point: GeoPoint) -> DriverLocationRecord {
        self.update_at(driver_id, point, Instant::now())
    }

    /// Upsert a driver's position as seen at `now`.
    pub fn update_at(&self, driver_id: DriverId, point: GeoPoint, now: Instant) -> DriverLocationRecord {
        let record = DriverLocationRecord {
            driver_id,
            latitude: point.latitude,
            longitude: point.longitude,
            timestamp: Utc::now(),
            seen: now,
        };
        let _ = self.records.write().insert(driver_id, record.clone());
        record
    }

    /// A driver's record, if it is still fresh.
    pub fn get(&self, driver_id: DriverId) -> Option<DriverLocationRecord> {
        let now = Instant::now();
        self.records
            .read()
            .get(&driver_id)
            .filter(|r| self.is_fresh(r, now))
            .cloned()
    }

    /// Drop a driver's record. Returns whether one existed.
    pub fn remove(&self, driver_id: DriverId) -> bool {
        self.records.write().remove(&driver_id).is_some()
    }

    /// Every fresh record, ordered by driver ID. Stale entries are purged.
    pub fn query_active(&self) -> Vec<DriverLocationRecord> {
        self.query_active_at(Instant::now())
    }

    /// [`Self::query_active`] evaluated at `now`.
    pub fn query_active_at(&self, now: Instant) -> Vec<DriverLocationRecord> {
        let mut records = self.records.write();
        records.retain(|_, r| self.is_fresh(r, now));
        gauge!(ACTIVE_DRIVER_LOCATIONS)
            .set(u32::try_from(records.len()).map_or(f64::from(u32::MAX), f64::from));
        let mut active: Vec<_> = records.values().cloned().collect();
        drop(records);
        active.sort_by_key(|r| r.driver_id);
        active
    }

    /// Fresh records within `radius_km` of `center`, nearest first.
    pub fn find_nearby(&self, center: GeoPoint, radius_km: f64) -> Vec<NearbyDriver> {
        self.find_nearby_at(center, radius_km, Instant::now())
    }

    /// [`Self::find_nearby`] evaluated at `now`.
    pub fn find_nearby_at(&self, center: GeoPoint, radius_km: f64, now: Instant) -> Vec<NearbyDriver> {
        let mut nearby: Vec<NearbyDriver> = self
            .query_active_at(now)
            .into_iter()
            .filter_map(|record| {
                let distance_km = center.distance_km(&record.point());
                (distance_km <= radius_km).then_some(NearbyDriver {
                    record,
                    distance_km,
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        nearby
    }

    /// Number of cached records, fresh or not.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn is_fresh(&self, record: &DriverLocationRecord, now: Instant) -> bool {
        now.saturating_duration_since(record.seen) <= self.staleness
    }
}

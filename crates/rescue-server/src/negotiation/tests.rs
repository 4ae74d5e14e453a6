use std::sync::Arc;
use std::time::Duration;

use rescue_core::status::{ResponseStatus, TripRequestStatus, TripStatus};
use rescue_core::{ConnectionId, DriverId, Identity, Participant, RequestId, RiderId};
use rescue_store::{DispatchStore, NewDriver, NewRider, StoreError};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::*;
use crate::notifications::MockNotificationSink;
use crate::websocket::connection::ClientConnection;

struct Harness {
    router: NegotiationRouter,
    store: Arc<DispatchStore>,
    registry: Arc<ConnectionRegistry>,
    locations: Arc<LocationCache>,
}

struct Client {
    caller: Caller,
    rx: mpsc::Receiver<Arc<String>>,
}

impl Client {
    fn next(&mut self) -> Value {
        let msg = self.rx.try_recv().expect("expected a message");
        serde_json::from_str(&msg).unwrap()
    }

    fn next_of(&mut self, event_type: &str) -> Value {
        loop {
            let msg = self.next();
            if msg["type"] == event_type {
                return msg;
            }
        }
    }

    fn assert_silent(&mut self) {
        assert!(self.rx.try_recv().is_err(), "unexpected message");
    }
}

fn harness() -> Harness {
    let store = Arc::new(DispatchStore::open_in_memory().unwrap());
    harness_with_sink(Arc::clone(&store), Arc::clone(&store) as Arc<dyn NotificationSink>)
}

fn harness_with_sink(store: Arc<DispatchStore>, sink: Arc<dyn NotificationSink>) -> Harness {
    let locations = Arc::new(LocationCache::new(Duration::from_secs(300)));
    let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&locations)));
    let router = NegotiationRouter::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&locations),
        sink,
        5.0,
    );
    Harness {
        router,
        store,
        registry,
        locations,
    }
}

impl Harness {
    fn connect(&self, identity: Option<Identity>) -> Client {
        let (tx, rx) = mpsc::channel(64);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
        self.registry.register(Arc::clone(&conn));
        if let Some(identity) = identity.clone() {
            self.registry.bind(&conn, identity);
        }
        Client {
            caller: Caller::connection(conn.id.clone(), identity),
            rx,
        }
    }

    fn driver(&self, n: i64) -> (DriverId, Client) {
        let row = self
            .store
            .create_driver(&NewDriver {
                name: format!("Driver {n}"),
                mobile: format!("0170000000{n}"),
                email: format!("driver{n}@example.com"),
                ratings: 4.5,
            })
            .unwrap();
        let identity = Identity::new(Participant::driver(row.driver_id), row.name);
        (row.driver_id, self.connect(Some(identity)))
    }

    fn rider(&self, n: i64) -> (RiderId, Client) {
        let row = self
            .store
            .create_rider(&NewRider {
                name: format!("Rider {n}"),
                mobile: format!("0180000000{n}"),
                email: format!("rider{n}@example.com"),
            })
            .unwrap();
        let identity = Identity::new(Participant::rider(row.rider_id), row.name);
        (row.rider_id, self.connect(Some(identity)))
    }

    fn send(&self, client: &Client, message: Value) -> Option<Value> {
        self.router
            .handle(&client.caller, &message.to_string())
            .map(|reply| serde_json::from_str(&reply.encode().unwrap()).unwrap())
    }

    fn open_request(&self, rider: &mut Client, drivers: &mut [&mut Client]) -> RequestId {
        let reply = self
            .send(
                rider,
                json!({"type": "new-trip-request", "data": {
                    "pickup_location": "A", "destination": "B", "fare": 500,
                    "latitude": 23.8, "longitude": 90.4,
                }}),
            )
            .unwrap();
        for driver in drivers.iter_mut() {
            let _ = driver.next_of("new-trip-request");
        }
        RequestId::new(reply["data"]["req_id"].as_i64().unwrap())
    }

    fn bid(&self, driver: &Client, req_id: RequestId, amount: f64) -> Option<Value> {
        self.send(
            driver,
            json!({"type": "bid-from-driver", "data": {"req_id": req_id, "amount": amount}}),
        )
    }
}

fn error_code(reply: Option<Value>) -> String {
    let reply = reply.expect("expected an error reply");
    assert_eq!(reply["type"], "error");
    reply["data"]["code"].as_str().unwrap().to_string()
}

#[test]
fn full_negotiation_scenario() {
    let h = harness();
    let (rider_id, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);

    let created = h
        .send(
            &rider,
            json!({"type": "new-trip-request", "data": {
                "pickup_location": "A", "destination": "B", "fare": 500, "lat": 23.8, "lon": 90.4,
            }}),
        )
        .unwrap();
    assert_eq!(created["type"], "trip-request-created");
    let broadcast = driver.next();
    assert_eq!(broadcast["type"], "new-trip-request");
    assert_eq!(broadcast["data"]["fare"], 500.0);
    assert_eq!(broadcast["data"]["status"], "pending");
    let req_id = RequestId::new(broadcast["data"]["req_id"].as_i64().unwrap());
    assert_eq!(created["data"]["req_id"], req_id.get());

    assert!(h.bid(&driver, req_id, 600.0).is_none());
    let bid = rider.next();
    assert_eq!(bid["type"], "bid-from-driver");
    assert_eq!(bid["data"]["amount"], 600.0);
    assert_eq!(bid["data"]["driver_id"], driver_id.get());
    let inbox = h.store.notifications(Participant::rider(rider_id), None).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].bid_amount, Some(600.0));

    assert!(
        h.send(
            &rider,
            json!({"type": "rider-accepted-bid", "data": {"req_id": req_id, "driver_id": driver_id}}),
        )
        .is_none()
    );
    let accepted = driver.next();
    assert_eq!(accepted["type"], "rider-accepted-bid");
    assert_eq!(accepted["data"]["amount"], 600.0);
    let driver_inbox = h.store.notifications(Participant::driver(driver_id), None).unwrap();
    assert_eq!(driver_inbox[0].title, "Rider Accepted Your Bid!");

    assert!(
        h.send(&driver, json!({"type": "trip-confirmed", "data": {"req_id": req_id}}))
            .is_none()
    );
    let to_rider = rider.next();
    let to_driver = driver.next();
    assert_eq!(to_rider["type"], "trip-confirmed");
    assert_eq!(to_driver["type"], "trip-confirmed");
    assert_eq!(to_rider["data"]["status"], "ongoing");
    let trip_id = TripId::new(to_rider["data"]["trip_id"].as_i64().unwrap());
    let request = h.store.trip_request(req_id).unwrap().unwrap();
    assert_eq!(request.status, TripRequestStatus::Accepted);

    assert!(
        h.send(&rider, json!({"type": "trip-ended", "data": {"trip_id": trip_id}}))
            .is_none()
    );
    for client in [&mut rider, &mut driver] {
        let ended = client.next();
        assert_eq!(ended["type"], "trip-ended");
        assert_eq!(ended["data"]["status"], "completed");
        assert!(ended["data"]["end_time"].is_string());
    }
    let trip = h.store.trip(trip_id).unwrap().unwrap();
    assert_eq!(trip.status, TripStatus::Completed);
    assert!(trip.end_time.is_some());
}

#[test]
fn decline_after_bid_is_duplicate_response() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (_, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);

    assert!(h.bid(&driver, req_id, 600.0).is_none());
    let reply = h.send(&driver, json!({"type": "decline", "data": {"req_id": req_id}}));
    assert_eq!(error_code(reply), "CONFLICT");
}

#[test]
fn second_decline_is_conflict() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (_, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);

    let first = h
        .send(&driver, json!({"type": "decline", "data": {"req_id": req_id}}))
        .unwrap();
    assert_eq!(first["type"], "decline-recorded");
    assert_eq!(first["data"]["status"], "declined");
    let again = h.send(&driver, json!({"type": "decline", "data": {"req_id": req_id}}));
    assert_eq!(error_code(again), "CONFLICT");
    rider.assert_silent();
}

#[test]
fn decline_of_unknown_request_is_not_found() {
    let h = harness();
    let (_, driver) = h.driver(1);
    let reply = h.send(&driver, json!({"type": "decline", "data": {"req_id": 999}}));
    assert_eq!(error_code(reply), "NOT_FOUND");
}

#[test]
fn wrong_role_is_forbidden_and_names_the_event() {
    let h = harness();
    let (_, driver) = h.driver(1);
    let reply = h
        .send(
            &driver,
            json!({"type": "new-trip-request", "data": {
                "pickup_location": "A", "destination": "B", "fare": 500,
            }}),
        )
        .unwrap();
    assert_eq!(reply["data"]["code"], "FORBIDDEN");
    assert_eq!(reply["data"]["event"], "new-trip-request");
}

#[test]
fn anonymous_connection_can_ping_but_not_bid() {
    let h = harness();
    let anon = h.connect(None);
    let pong = h
        .send(&anon, json!({"type": "ping", "data": {"timestamp": 1234}}))
        .unwrap();
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["data"]["timestamp"], 1234);

    let reply = h.bid(&anon, RequestId::new(1), 600.0);
    assert_eq!(error_code(reply), "FORBIDDEN");
    let reply = h.send(&anon, json!({"type": "broadcast", "data": {"message": "hi"}}));
    assert_eq!(error_code(reply), "FORBIDDEN");
}

#[test]
fn malformed_message_is_validation_error() {
    let h = harness();
    let anon = h.connect(None);
    let reply = h.router.handle(&anon.caller, "{oops").unwrap();
    let json: Value = serde_json::from_str(&reply.encode().unwrap()).unwrap();
    assert_eq!(json["data"]["code"], "VALIDATION_ERROR");
    assert!(json["data"].get("event").is_none());
}

#[test]
fn unrecognized_event_is_echoed_verbatim() {
    let h = harness();
    let (_, rider) = h.rider(1);
    let original = json!({"type": "rider-typing", "data": {"req_id": 1}, "v": 2});
    assert_eq!(h.send(&rider, original.clone()), Some(original));
}

#[test]
fn revised_bid_updates_in_place() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);

    assert!(h.bid(&driver, req_id, 600.0).is_none());
    assert!(h.bid(&driver, req_id, 550.0).is_none());
    let _ = rider.next();
    let revised = rider.next();
    assert_eq!(revised["data"]["revised"], true);
    let responses = h.store.responses(req_id, Some(driver_id), None).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].amount, Some(550.0));
}

#[test]
fn confirmation_rejects_losing_bids_and_notifies_them() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (winner_id, mut winner) = h.driver(1);
    let (loser_id, mut loser) = h.driver(2);
    let req_id = h.open_request(&mut rider, &mut [&mut winner, &mut loser]);

    assert!(h.bid(&winner, req_id, 600.0).is_none());
    assert!(h.bid(&loser, req_id, 650.0).is_none());
    assert!(
        h.send(
            &rider,
            json!({"type": "rider-accepted-bid", "data": {"req_id": req_id, "driver_id": winner_id, "amount": 580}}),
        )
        .is_none()
    );
    assert!(
        h.send(&winner, json!({"type": "trip-confirmed", "data": {"req_id": req_id}}))
            .is_none()
    );

    let rejected = loser.next_of("bid-rejected");
    assert_eq!(rejected["data"]["driver_id"], loser_id.get());
    let confirmed = winner.next_of("trip-confirmed");
    assert_eq!(confirmed["data"]["fare"], 580.0);
    let losing = h.store.responses(req_id, Some(loser_id), None).unwrap();
    assert_eq!(losing[0].status, ResponseStatus::Rejected);
}

#[test]
fn confirmation_releases_other_accepted_bidders() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (winner_id, mut winner) = h.driver(1);
    let (loser_id, mut loser) = h.driver(2);
    for driver in [&winner, &loser] {
        let _ = h.send(
            driver,
            json!({"type": "driver-location", "data": {"latitude": 23.81, "longitude": 90.42}}),
        );
    }
    let req_id = h.open_request(&mut rider, &mut [&mut winner, &mut loser]);
    assert!(h.bid(&winner, req_id, 600.0).is_none());
    assert!(h.bid(&loser, req_id, 580.0).is_none());
    for driver_id in [winner_id, loser_id] {
        assert!(
            h.send(
                &rider,
                json!({"type": "rider-accepted-bid", "data": {"req_id": req_id, "driver_id": driver_id}}),
            )
            .is_none()
        );
    }
    assert!(h.router.nearby_drivers(23.81, 90.42, None).unwrap().is_empty());

    assert!(
        h.send(&winner, json!({"type": "trip-confirmed", "data": {"req_id": req_id}}))
            .is_none()
    );
    let rejected = loser.next_of("bid-rejected");
    assert_eq!(rejected["data"]["driver_id"], loser_id.get());
    let losing = h.store.responses(req_id, Some(loser_id), None).unwrap();
    assert_eq!(losing[0].status, ResponseStatus::Rejected);
    let nearby = h.router.nearby_drivers(23.81, 90.42, None).unwrap();
    assert_eq!(nearby.len(), 1);
    assert_eq!(nearby[0].nearby.record.driver_id, loser_id);

    let trip_id = winner.next_of("trip-confirmed")["data"]["trip_id"].as_i64().unwrap();
    assert!(
        h.send(&winner, json!({"type": "trip-ended", "data": {"trip_id": trip_id}}))
            .is_none()
    );
    assert_eq!(h.router.nearby_drivers(23.81, 90.42, None).unwrap().len(), 2);
}

#[test]
fn driver_cannot_confirm_after_cancelling() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());
    let _ = h.send(
        &rider,
        json!({"type": "rider-accepted-bid", "data": {"req_id": req_id, "driver_id": driver_id}}),
    );
    assert!(
        h.send(
            &driver,
            json!({"type": "trip-cancelled-by-driver", "data": {"req_id": req_id}}),
        )
        .is_none()
    );
    let notice = rider.next_of("trip-cancelled-by-driver");
    assert!(notice["data"]["trip_id"].is_null());

    let reply = h.send(&driver, json!({"type": "trip-confirmed", "data": {"req_id": req_id}}));
    assert_eq!(error_code(reply), "CONFLICT");
    assert!(
        h.store
            .trips_for(Participant::driver(driver_id), None)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn driver_cannot_confirm_without_acceptance() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());

    let reply = h.send(&driver, json!({"type": "trip-confirmed", "data": {"req_id": req_id}}));
    assert_eq!(error_code(reply), "CONFLICT");
    assert!(
        h.store
            .trips_for(Participant::driver(driver_id), None)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn rider_can_confirm_pending_bid_on_drivers_behalf() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());

    let confirmation = h
        .router
        .confirm_trip(
            &rider.caller,
            Some(driver_id),
            &crate::protocol::TripConfirmation {
                req_id,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(confirmation.trip.driver_id, driver_id);
    assert_eq!(driver.next_of("trip-confirmed")["data"]["confirmed_by"], "rider");
}

#[test]
fn counter_offers_reach_the_other_party() {
    let h = harness();
    let (rider_id, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());
    let _ = rider.next();

    assert!(
        h.send(
            &rider,
            json!({"type": "rider-counter-offer", "data": {"req_id": req_id, "driver_id": driver_id, "amount": 520}}),
        )
        .is_none()
    );
    let counter = driver.next();
    assert_eq!(counter["type"], "rider-counter-offer");
    assert_eq!(counter["data"]["original_amount"], 600.0);

    assert!(
        h.send(
            &driver,
            json!({"type": "driver-counter-offer", "data": {"req_id": req_id, "amount": 560}}),
        )
        .is_none()
    );
    let counter = rider.next();
    assert_eq!(counter["type"], "driver-counter-offer");
    assert_eq!(counter["data"]["amount"], 560.0);
    let inbox = h.store.notifications(Participant::rider(rider_id), None).unwrap();
    assert_eq!(inbox[0].title, "Driver Counter Offer");
}

#[test]
fn counter_offer_on_someone_elses_request_is_forbidden() {
    let h = harness();
    let (_, mut owner) = h.rider(1);
    let (_, intruder) = h.rider(2);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut owner, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());

    let reply = h.send(
        &intruder,
        json!({"type": "rider-counter-offer", "data": {"req_id": req_id, "driver_id": driver_id, "amount": 1}}),
    );
    assert_eq!(error_code(reply), "FORBIDDEN");
    driver.assert_silent();
}

#[test]
fn notification_failure_does_not_block_delivery() {
    let store = Arc::new(DispatchStore::open_in_memory().unwrap());
    let mut sink = MockNotificationSink::new();
    let _ = sink
        .expect_record()
        .returning(|_| Err(StoreError::Conflict("disk full".into())));
    let h = harness_with_sink(store, Arc::new(sink));
    let (_, mut rider) = h.rider(1);
    let (_, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);

    assert!(h.bid(&driver, req_id, 600.0).is_none());
    let bid = rider.next();
    assert_eq!(bid["type"], "bid-from-driver");
    assert!(bid["data"]["notification_id"].is_null());
}

#[test]
fn trip_location_update_goes_to_counterpart_only() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let (_, mut outsider) = h.driver(2);
    let req_id = h.open_request(&mut rider, &mut [&mut driver, &mut outsider]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());
    let _ = h.send(
        &rider,
        json!({"type": "rider-accepted-bid", "data": {"req_id": req_id, "driver_id": driver_id}}),
    );
    let _ = h.send(&driver, json!({"type": "trip-confirmed", "data": {"req_id": req_id}}));
    let trip_id = rider.next_of("trip-confirmed")["data"]["trip_id"].as_i64().unwrap();
    let _ = driver.next_of("trip-confirmed");

    assert!(
        h.send(
            &driver,
            json!({"type": "trip-location-update", "data": {"trip_id": trip_id, "lat": 23.81, "lon": 90.41}}),
        )
        .is_none()
    );
    let update = rider.next();
    assert_eq!(update["type"], "trip-location-update");
    assert_eq!(update["data"]["role"], "driver");
    driver.assert_silent();
    let trip = h.store.trip(TripId::new(trip_id)).unwrap().unwrap();
    assert_eq!(trip.driver_latitude, Some(23.81));

    let reply = h.send(
        &outsider,
        json!({"type": "trip-location-update", "data": {"trip_id": trip_id, "latitude": 1.0, "longitude": 1.0}}),
    );
    assert_eq!(error_code(reply), "FORBIDDEN");
}

#[test]
fn ending_a_finished_trip_is_conflict() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());
    let _ = h.send(
        &rider,
        json!({"type": "rider-accepted-bid", "data": {"req_id": req_id, "driver_id": driver_id}}),
    );
    let _ = h.send(&driver, json!({"type": "trip-confirmed", "data": {"req_id": req_id}}));
    let trip_id = rider.next_of("trip-confirmed")["data"]["trip_id"].as_i64().unwrap();

    assert!(
        h.send(&driver, json!({"type": "trip-ended", "data": {"trip_id": trip_id}}))
            .is_none()
    );
    let reply = h.send(&driver, json!({"type": "trip-ended", "data": {"trip_id": trip_id}}));
    assert_eq!(error_code(reply), "CONFLICT");
    let reply = h.send(&driver, json!({"type": "trip-ended", "data": {"trip_id": 4242}}));
    assert_eq!(error_code(reply), "NOT_FOUND");
}

#[test]
fn driver_cancellation_cancels_trip_and_tells_rider() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());
    let _ = h.send(
        &rider,
        json!({"type": "rider-accepted-bid", "data": {"req_id": req_id, "driver_id": driver_id}}),
    );
    let _ = h.send(&driver, json!({"type": "trip-confirmed", "data": {"req_id": req_id}}));
    let trip_id = rider.next_of("trip-confirmed")["data"]["trip_id"].as_i64().unwrap();

    assert!(
        h.send(
            &driver,
            json!({"type": "trip-cancelled-by-driver", "data": {"req_id": req_id, "reason": "flat tyre"}}),
        )
        .is_none()
    );
    let notice = rider.next_of("trip-cancelled-by-driver");
    assert_eq!(notice["data"]["reason"], "flat tyre");
    assert_eq!(notice["data"]["trip_status"], "cancelled");
    let trip = h.store.trip(TripId::new(trip_id)).unwrap().unwrap();
    assert_eq!(trip.status, TripStatus::Cancelled);
    assert!(h.store.engaged_drivers().unwrap().is_empty());
}

#[test]
fn bid_decisions_reach_both_parties() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);

    let reply = h.send(&rider, json!({"type": "bid-rejected", "data": {"req_id": req_id}}));
    assert_eq!(error_code(reply), "VALIDATION_ERROR");

    assert!(
        h.send(
            &rider,
            json!({"type": "bid-rejected", "data": {"req_id": req_id, "driver_id": driver_id, "message": "too high"}}),
        )
        .is_none()
    );
    assert_eq!(rider.next()["type"], "bid-rejected");
    let to_driver = driver.next();
    assert_eq!(to_driver["data"]["message"], "too high");
    assert_eq!(to_driver["data"]["from_role"], "rider");
}

#[test]
fn bid_decision_from_driver_without_response_is_forbidden() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (bidder_id, mut bidder) = h.driver(1);
    let (_, mut outsider) = h.driver(2);
    let req_id = h.open_request(&mut rider, &mut [&mut bidder, &mut outsider]);
    assert!(h.bid(&bidder, req_id, 600.0).is_none());
    let _ = rider.next_of("bid-from-driver");

    let reply = h.send(
        &outsider,
        json!({"type": "bid-accepted", "data": {"req_id": req_id, "message": "on my way"}}),
    );
    assert_eq!(error_code(reply), "FORBIDDEN");
    rider.assert_silent();

    assert!(
        h.send(&bidder, json!({"type": "bid-accepted", "data": {"req_id": req_id}}))
            .is_none()
    );
    let relayed = rider.next();
    assert_eq!(relayed["type"], "bid-accepted");
    assert_eq!(relayed["data"]["driver_id"], bidder_id.get());
}

#[test]
fn driver_location_reaches_riders_only() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(7);
    let (_, mut other_driver) = h.driver(8);

    assert!(
        h.send(
            &driver,
            json!({"type": "driver-location", "data": {"latitude": 23.81, "longitude": 90.42}}),
        )
        .is_none()
    );
    let update = rider.next();
    assert_eq!(update["type"], "driver-location");
    assert_eq!(update["data"]["driver_id"], driver_id.get());
    other_driver.assert_silent();
    driver.assert_silent();

    let nearby = h.router.nearby_drivers(23.81, 90.42, Some(1.0)).unwrap();
    assert_eq!(nearby.len(), 1);
    assert!(nearby[0].nearby.distance_km.abs() < 1e-9);
    assert_eq!(nearby[0].name.as_deref(), Some("Driver 7"));
    assert!(h.store.driver_location(driver_id).unwrap().is_some());
}

#[test]
fn repeated_location_update_keeps_single_record() {
    let h = harness();
    let (_, driver) = h.driver(7);
    for lat in [23.81, 23.82] {
        let reply = h
            .send(
                &driver,
                json!({"type": "add-location", "data": {"latitude": lat, "longitude": 90.42}}),
            )
            .unwrap();
        assert_eq!(reply["type"], "location_updated");
    }
    let active = h.locations.query_active();
    assert_eq!(active.len(), 1);
    assert!((active[0].latitude - 23.82).abs() < f64::EPSILON);
}

#[test]
fn update_location_refreshes_rider_snapshot() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (_, driver) = h.driver(7);
    let reply = h
        .send(
            &driver,
            json!({"type": "update-location", "data": {"lat": 23.81, "lon": 90.42}}),
        )
        .unwrap();
    assert_eq!(reply["type"], "location_updated");
    let _ = rider.next_of("driver-location");
    let snapshot = rider.next_of("nearby-drivers");
    assert_eq!(snapshot["data"]["count"], 1);
}

#[test]
fn invalid_coordinates_are_rejected() {
    let h = harness();
    let (_, driver) = h.driver(7);
    let reply = h.send(
        &driver,
        json!({"type": "driver-location", "data": {"latitude": 123.0, "longitude": 90.42}}),
    );
    assert_eq!(error_code(reply), "VALIDATION_ERROR");
    assert!(h.locations.is_empty());
}

#[test]
fn engaged_driver_is_excluded_from_nearby() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(7);
    let _ = h.send(
        &driver,
        json!({"type": "driver-location", "data": {"latitude": 23.81, "longitude": 90.42}}),
    );
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());
    assert_eq!(h.router.nearby_drivers(23.81, 90.42, None).unwrap().len(), 1);

    let _ = h.send(
        &rider,
        json!({"type": "rider-accepted-bid", "data": {"req_id": req_id, "driver_id": driver_id}}),
    );
    assert!(h.router.nearby_drivers(23.81, 90.42, None).unwrap().is_empty());
}

#[test]
fn rider_cancellation_tells_drivers_and_rejects_bids() {
    let h = harness();
    let (_, mut rider) = h.rider(1);
    let (driver_id, mut driver) = h.driver(1);
    let req_id = h.open_request(&mut rider, &mut [&mut driver]);
    assert!(h.bid(&driver, req_id, 600.0).is_none());

    let cancelled = h.router.cancel_trip_request(&rider.caller, req_id).unwrap();
    assert_eq!(cancelled.request.status, TripRequestStatus::Cancelled);
    assert_eq!(cancelled.rejected_drivers, vec![driver_id]);
    assert_eq!(driver.next()["type"], "trip-request-cancelled");
    assert_eq!(driver.next()["type"], "bid-rejected");

    let reply = h.bid(&driver, req_id, 650.0);
    assert_eq!(error_code(reply), "CONFLICT");
}

#[test]
fn new_client_and_broadcast() {
    let h = harness();
    let (rider_id, rider) = h.rider(1);
    let mut anon = h.connect(None);

    let registered = h.send(&rider, json!({"type": "new-client"})).unwrap();
    assert_eq!(registered["type"], "client_registered");
    assert_eq!(registered["data"]["user_id"], rider_id.get());
    assert_eq!(registered["data"]["user_role"], "rider");

    assert!(
        h.send(&rider, json!({"type": "broadcast", "data": {"message": {"text": "hello"}}}))
            .is_none()
    );
    let msg = anon.next();
    assert_eq!(msg["type"], "broadcast_message");
    assert_eq!(msg["data"]["message"]["text"], "hello");
    assert_eq!(msg["data"]["from_role"], "rider");
}

#[test]
fn welcome_sends_snapshot_to_riders_only() {
    let h = harness();
    let (_, rider) = h.rider(1);
    let (_, driver) = h.driver(1);
    let greeting = h.router.welcome(&rider.caller);
    assert_eq!(greeting.len(), 2);
    assert_eq!(greeting[0].event_type, "connection_established");
    assert_eq!(greeting[1].event_type, "nearby-drivers");
    assert_eq!(h.router.welcome(&driver.caller).len(), 1);
}

#[test]
fn driver_location_lookup_falls_back_to_store() {
    let h = harness();
    let (driver_id, driver) = h.driver(7);
    let _ = h.send(
        &driver,
        json!({"type": "driver-location", "data": {"latitude": 23.81, "longitude": 90.42}}),
    );
    assert_eq!(h.router.locate_driver(driver_id).unwrap().source, "live");
    let _ = h.locations.remove(driver_id);
    assert_eq!(h.router.locate_driver(driver_id).unwrap().source, "stored");
    assert!(h.router.locate_driver(DriverId::new(99)).is_err());
}

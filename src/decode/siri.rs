//! SIRI-like vehicle-monitoring JSON decoder (Turku layout).
//!
//! The payload is a snapshot of monitored vehicles keyed by an arbitrary
//! id, each carrying the journey's aimed origin departure plus expected
//! times for the next stop and any onward calls. Vehicles never carry a
//! GTFS trip id, and the line reference is a published line name rather
//! than a route id; the engine maps the reference and resolves a trip
//! from route, direction and the origin departure instant.

use anyhow::{Context, Result, ensure};
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{
    NormalizedFeed, StopTimeEventUpdate, TimedEvent, TripDescriptor, TripUpdateEntity, VehicleInfo,
};

#[derive(Debug, Deserialize)]
struct SiriData {
    status: String,
    servertime: Option<i64>,
    result: Option<ServiceDelivery>,
}

#[derive(Debug, Deserialize)]
struct ServiceDelivery {
    #[serde(default)]
    vehicles: BTreeMap<String, MonitoredVehicle>,
}

#[derive(Debug, Deserialize)]
struct MonitoredVehicle {
    #[serde(default)]
    monitored: bool,
    recordedattime: Option<i64>,
    lineref: Option<String>,
    directionref: Option<String>,
    originaimeddeparturetime: Option<i64>,
    vehicleref: Option<String>,
    next_stoppointref: Option<String>,
    next_expectedarrivaltime: Option<i64>,
    next_expecteddeparturetime: Option<i64>,
    #[serde(default)]
    onwardcalls: Option<Vec<VehicleJourneyCall>>,
}

#[derive(Debug, Deserialize)]
struct VehicleJourneyCall {
    stoppointref: Option<String>,
    visitnumber: Option<u32>,
    expectedarrivaltime: Option<i64>,
    expecteddeparturetime: Option<i64>,
}

/// Decodes a Turku-style SIRI JSON snapshot.
///
/// # Errors
///
/// Returns an error on malformed JSON or a non-`OK` status field; either
/// aborts the whole cycle.
pub fn decode(bytes: &[u8], tz: Tz) -> Result<NormalizedFeed> {
    let data: SiriData = serde_json::from_slice(bytes).context("not valid SIRI JSON")?;
    ensure!(data.status == "OK", "invalid SIRI status: {}", data.status);

    let mut normalized = NormalizedFeed {
        timestamp: data.servertime,
        // The format has no incrementality header; rows age out through
        // the retention sweep rather than being replaced outright.
        full_dataset: false,
        ..Default::default()
    };

    let Some(result) = data.result else {
        return Ok(normalized);
    };

    for vehicle in result.vehicles.into_values() {
        // Zero doubles as the missing-value sentinel here too.
        let Some(origin_departure) = vehicle.originaimeddeparturetime.filter(|t| *t > 0) else {
            continue;
        };
        if !vehicle.monitored {
            continue;
        }

        let Some(start) = DateTime::from_timestamp(origin_departure, 0) else {
            continue;
        };
        let start = start.with_timezone(&tz);

        // Turku uses the opposite direction logic from GTFS: their 2 is
        // GTFS 0 and their 1 is GTFS 1.
        let direction_id = vehicle
            .directionref
            .as_deref()
            .and_then(|d| d.parse::<i16>().ok())
            .map(|d| if d == 2 { 0 } else { 1 });

        let mut events = Vec::new();
        if let Some(stop_id) = vehicle.next_stoppointref {
            events.push(StopTimeEventUpdate {
                stop_sequence: None,
                stop_id: Some(stop_id),
                arrival: epoch_event(vehicle.next_expectedarrivaltime),
                departure: epoch_event(vehicle.next_expecteddeparturetime),
                schedule_relationship: None,
            });
        }
        for call in vehicle.onwardcalls.unwrap_or_default() {
            events.push(StopTimeEventUpdate {
                stop_sequence: call.visitnumber,
                stop_id: call.stoppointref,
                arrival: epoch_event(call.expectedarrivaltime),
                departure: epoch_event(call.expecteddeparturetime),
                schedule_relationship: None,
            });
        }

        normalized.trip_updates.push(TripUpdateEntity {
            trip: TripDescriptor {
                trip_id: None,
                route_id: vehicle.lineref,
                direction_id,
                start_time: Some(start.format("%H:%M:%S").to_string()),
                start_date: Some(start.format("%Y%m%d").to_string()),
                schedule_relationship: None,
            },
            vehicle: vehicle.vehicleref.map(|id| VehicleInfo {
                id: Some(id),
                ..Default::default()
            }),
            stop_time_events: events,
            timestamp: vehicle.recordedattime,
        });
    }

    Ok(normalized)
}

/// The feed writes `0` where it has no estimate.
fn epoch_event(time: Option<i64>) -> Option<TimedEvent> {
    let time = time.filter(|t| *t > 0)?;
    Some(TimedEvent {
        delay: None,
        time: Some(time),
        uncertainty: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TZ: Tz = chrono_tz::Europe::Helsinki;

    fn payload(status: &str, vehicles: &str) -> Vec<u8> {
        format!(
            r#"{{"sys":"siri","status":"{status}","servertime":1700000000,
                "result":{{"responsetimestamp":1700000000,"vehicles":{{{vehicles}}}}}}}"#
        )
        .into_bytes()
    }

    #[test]
    fn test_bad_status_aborts() {
        let err = decode(&payload("ERROR", ""), TZ).unwrap_err();
        assert!(err.to_string().contains("invalid SIRI status"));
    }

    #[test]
    fn test_snapshot_is_treated_as_incremental() {
        let feed = decode(&payload("OK", ""), TZ).unwrap();
        assert!(!feed.full_dataset);
    }

    #[test]
    fn test_unmonitored_vehicle_skipped() {
        let vehicles = r#""v1":{"monitored":false,"originaimeddeparturetime":1700000000}"#;
        let feed = decode(&payload("OK", vehicles), TZ).unwrap();
        assert!(feed.trip_updates.is_empty());
    }

    #[test]
    fn test_zero_origin_departure_skipped() {
        let vehicles = r#""v1":{"monitored":true,"originaimeddeparturetime":0}"#;
        let feed = decode(&payload("OK", vehicles), TZ).unwrap();
        assert!(feed.trip_updates.is_empty());
    }

    #[test]
    fn test_monitored_vehicle_decodes() {
        // 2023-11-14 22:13:20 UTC = 2023-11-15 00:13:20 in Helsinki
        let vehicles = r#""v1":{
            "monitored":true,
            "recordedattime":1700000500,
            "lineref":"55",
            "directionref":"2",
            "originaimeddeparturetime":1700000000,
            "vehicleref":"bus-7",
            "next_stoppointref":"S10",
            "next_expectedarrivaltime":1700000600,
            "next_expecteddeparturetime":0,
            "onwardcalls":[
                {"stoppointref":"S11","visitnumber":5,
                 "expectedarrivaltime":1700000700,"expecteddeparturetime":1700000760}
            ]
        }"#;
        let feed = decode(&payload("OK", vehicles), TZ).unwrap();

        assert_eq!(feed.timestamp, Some(1_700_000_000));
        assert!(!feed.full_dataset);
        assert_eq!(feed.trip_updates.len(), 1);

        let tu = &feed.trip_updates[0];
        assert_eq!(tu.trip.trip_id, None);
        assert_eq!(tu.trip.route_id.as_deref(), Some("55"));
        assert_eq!(tu.trip.direction_id, Some(0)); // inverted from SIRI 2
        assert_eq!(tu.trip.start_date.as_deref(), Some("20231115"));
        assert_eq!(tu.trip.start_time.as_deref(), Some("00:13:20"));
        assert_eq!(tu.timestamp, Some(1_700_000_500));
        assert_eq!(tu.vehicle.as_ref().unwrap().id.as_deref(), Some("bus-7"));

        assert_eq!(tu.stop_time_events.len(), 2);
        let next = &tu.stop_time_events[0];
        assert_eq!(next.stop_id.as_deref(), Some("S10"));
        assert_eq!(next.arrival.unwrap().time, Some(1_700_000_600));
        assert!(next.departure.is_none()); // zero means no estimate
        let call = &tu.stop_time_events[1];
        assert_eq!(call.stop_sequence, Some(5));
        assert_eq!(call.departure.unwrap().time, Some(1_700_000_760));
    }
}

//! Journeys-API service-delivery JSON decoder (Tampere layout).
//!
//! Each body element is one monitored vehicle journey. The journey
//! pattern ref doubles as the GTFS route id, the origin aimed departure
//! is a bare `HHMM` on the date frame, and stop point refs are URLs whose
//! last path segment is the stop id.

use anyhow::{Context, Result, ensure};
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Deserialize;

use super::{
    NormalizedFeed, StopTimeEventUpdate, TimedEvent, TripDescriptor, TripUpdateEntity, VehicleInfo,
};

#[derive(Debug, Deserialize)]
struct JourneysData {
    status: String,
    #[serde(default)]
    body: Vec<ServiceDelivery>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceDelivery {
    recorded_at_time: Option<String>,
    monitored_vehicle_journey: MonitoredVehicleJourney,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitoredVehicleJourney {
    direction_ref: Option<String>,
    framed_vehicle_journey_ref: Option<FramedVehicleJourneyRef>,
    vehicle_ref: Option<String>,
    journey_pattern_ref: Option<String>,
    origin_aimed_departure_time: Option<String>,
    #[serde(default)]
    onward_calls: Option<Vec<OnwardCall>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FramedVehicleJourneyRef {
    date_frame_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnwardCall {
    expected_arrival_time: Option<String>,
    expected_departure_time: Option<String>,
    stop_point_ref: Option<String>,
    order: Option<String>,
}

/// Decodes a Tampere journeys-API JSON snapshot.
///
/// # Errors
///
/// Returns an error on malformed JSON or a non-`success` status field.
pub fn decode(bytes: &[u8], _tz: Tz) -> Result<NormalizedFeed> {
    let data: JourneysData = serde_json::from_slice(bytes).context("not valid journeys JSON")?;
    ensure!(
        data.status == "success",
        "invalid journeys status: {}",
        data.status
    );

    let mut normalized = NormalizedFeed {
        timestamp: None,
        // No incrementality header in this format either; retention
        // handles stale rows.
        full_dataset: false,
        ..Default::default()
    };

    for delivery in data.body {
        let journey = delivery.monitored_vehicle_journey;

        // Journeys without onward calls carry no usable estimates.
        let Some(calls) = journey.onward_calls else {
            continue;
        };

        let start_date = journey
            .framed_vehicle_journey_ref
            .as_ref()
            .and_then(|f| f.date_frame_ref.as_deref())
            .map(|d| d.replace('-', ""));
        let start_time = journey
            .origin_aimed_departure_time
            .as_deref()
            .and_then(hhmm_to_wall_clock);

        let direction_id = journey
            .direction_ref
            .as_deref()
            .and_then(|d| d.parse::<i16>().ok())
            .or(Some(0));

        let events = calls
            .into_iter()
            .map(|call| StopTimeEventUpdate {
                stop_sequence: call.order.as_deref().and_then(|o| o.parse().ok()),
                stop_id: call.stop_point_ref.as_deref().map(stop_id_from_url),
                arrival: iso_event(call.expected_arrival_time.as_deref()),
                departure: iso_event(call.expected_departure_time.as_deref()),
                schedule_relationship: None,
            })
            .collect();

        normalized.trip_updates.push(TripUpdateEntity {
            trip: TripDescriptor {
                trip_id: None,
                route_id: journey.journey_pattern_ref,
                direction_id,
                start_time,
                start_date,
                schedule_relationship: None,
            },
            vehicle: journey.vehicle_ref.map(|id| VehicleInfo {
                id: Some(id),
                ..Default::default()
            }),
            stop_time_events: events,
            timestamp: delivery
                .recorded_at_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.timestamp()),
        });
    }

    Ok(normalized)
}

/// `"0815"` -> `"08:15:00"`.
fn hhmm_to_wall_clock(hhmm: &str) -> Option<String> {
    if hhmm.len() != 4 || !hhmm.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}:{}:00", &hhmm[..2], &hhmm[2..]))
}

/// Stop point refs look like `https://.../stop-points/3615`; the stop id
/// is the last path segment.
fn stop_id_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

fn iso_event(time: Option<&str>) -> Option<TimedEvent> {
    let parsed = DateTime::parse_from_rfc3339(time?).ok()?;
    Some(TimedEvent {
        delay: None,
        time: Some(parsed.timestamp()),
        uncertainty: None,
    })
}

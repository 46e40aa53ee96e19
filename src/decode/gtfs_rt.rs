//! GTFS-Realtime protobuf decoder.

use anyhow::{Context, Result, ensure};
use prost::Message;

use crate::gtfs_rt::{FeedMessage, feed_header};

use super::{
    AlertEntity, InformedEntity, NormalizedFeed, StopTimeEventUpdate, TimedEvent, Translation,
    TripDescriptor, TripUpdateEntity, VehicleInfo,
};

/// Decodes a binary GTFS-RT `FeedMessage` into the normalized shape.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a
/// `FeedMessage`, or if the decoded feed carries no entities at all. An
/// entity-free feed means the source is broken rather than quiet, so the
/// whole cycle is aborted.
pub fn decode(bytes: &[u8]) -> Result<NormalizedFeed> {
    let feed = FeedMessage::decode(bytes).context("not a valid GTFS-RT FeedMessage")?;
    ensure!(!feed.entity.is_empty(), "feed contains no entities");

    let full_dataset = feed.header.incrementality() == feed_header::Incrementality::FullDataset;

    let mut normalized = NormalizedFeed {
        timestamp: feed.header.timestamp.map(|t| t as i64),
        full_dataset,
        ..Default::default()
    };

    for entity in feed.entity {
        if let Some(trip_update) = entity.trip_update {
            normalized.trip_updates.push(TripUpdateEntity {
                trip: TripDescriptor {
                    trip_id: trip_update.trip.trip_id.clone(),
                    route_id: trip_update.trip.route_id.clone(),
                    direction_id: trip_update.trip.direction_id.map(|d| d as i16),
                    start_time: trip_update.trip.start_time.clone(),
                    start_date: trip_update.trip.start_date.clone(),
                    schedule_relationship: trip_update.trip.schedule_relationship,
                },
                vehicle: trip_update.vehicle.map(|v| VehicleInfo {
                    id: v.id,
                    label: v.label,
                    license_plate: v.license_plate,
                }),
                stop_time_events: trip_update
                    .stop_time_update
                    .into_iter()
                    .map(|stu| StopTimeEventUpdate {
                        stop_sequence: stu.stop_sequence,
                        stop_id: stu.stop_id.clone(),
                        arrival: stu.arrival.map(convert_event),
                        departure: stu.departure.map(convert_event),
                        schedule_relationship: stu.schedule_relationship,
                    })
                    .collect(),
                timestamp: trip_update.timestamp.map(|t| t as i64),
            });
        } else if let Some(alert) = entity.alert {
            let first_period = alert.active_period.first();
            normalized.alerts.push(AlertEntity {
                id: entity.id,
                active_start: first_period.and_then(|p| p.start).map(|t| t as i64),
                active_end: first_period.and_then(|p| p.end).map(|t| t as i64),
                cause: alert.cause,
                effect: alert.effect,
                informed_entities: alert
                    .informed_entity
                    .iter()
                    .map(|selector| InformedEntity {
                        agency_id: selector.agency_id.clone(),
                        route_id: selector.route_id.clone(),
                        route_type: selector.route_type,
                        stop_id: selector.stop_id.clone(),
                        trip_id: selector.trip.as_ref().and_then(|t| t.trip_id.clone()),
                    })
                    .collect(),
                header_texts: convert_translations(&alert.header_text),
                description_texts: convert_translations(&alert.description_text),
                url_texts: convert_translations(&alert.url),
            });
        }
    }

    Ok(normalized)
}

fn convert_event(event: crate::gtfs_rt::trip_update::StopTimeEvent) -> TimedEvent {
    TimedEvent {
        delay: event.delay.map(|d| d as i64),
        time: event.time,
        uncertainty: event.uncertainty,
    }
}

fn convert_translations(text: &Option<crate::gtfs_rt::TranslatedString>) -> Vec<Translation> {
    text.as_ref()
        .map(|ts| {
            ts.translation
                .iter()
                .map(|t| Translation {
                    text: t.text.clone(),
                    language: t.language.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{
        Alert, EntitySelector, FeedEntity, FeedHeader, TimeRange, TranslatedString, TripUpdate,
        translated_string,
        trip_update::{StopTimeEvent, StopTimeUpdate},
    };

    fn header(timestamp: u64) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: None,
            timestamp: Some(timestamp),
            feed_version: None,
        }
    }

    fn empty_entity(id: &str) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            is_deleted: None,
            trip_update: None,
            alert: None,
        }
    }

    #[test]
    fn test_invalid_bytes_fail() {
        assert!(decode(&[0xFF, 0xFE, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_feed_without_entities_fails() {
        let feed = FeedMessage {
            header: header(1_700_000_000),
            entity: vec![],
        };
        assert!(decode(&feed.encode_to_vec()).is_err());
    }

    #[test]
    fn test_trip_update_decodes() {
        let mut entity = empty_entity("e1");
        entity.trip_update = Some(TripUpdate {
            trip: crate::gtfs_rt::TripDescriptor {
                trip_id: Some("T1".to_string()),
                route_id: Some("R1".to_string()),
                direction_id: Some(1),
                start_time: Some("08:30:00".to_string()),
                start_date: Some("20260829".to_string()),
                schedule_relationship: Some(0),
            },
            vehicle: None,
            stop_time_update: vec![StopTimeUpdate {
                stop_sequence: Some(2),
                stop_id: Some("S2".to_string()),
                arrival: Some(StopTimeEvent {
                    delay: Some(30),
                    time: None,
                    uncertainty: Some(5),
                }),
                departure: None,
                schedule_relationship: None,
            }],
            timestamp: Some(1_700_000_100),
            delay: None,
        });

        let feed = FeedMessage {
            header: header(1_700_000_000),
            entity: vec![entity],
        };
        let normalized = decode(&feed.encode_to_vec()).unwrap();

        assert_eq!(normalized.timestamp, Some(1_700_000_000));
        assert!(normalized.full_dataset); // proto2 default incrementality
        assert_eq!(normalized.trip_updates.len(), 1);
        assert!(normalized.alerts.is_empty());

        let tu = &normalized.trip_updates[0];
        assert_eq!(tu.trip.trip_id.as_deref(), Some("T1"));
        assert_eq!(tu.trip.direction_id, Some(1));
        assert_eq!(tu.timestamp, Some(1_700_000_100));
        assert_eq!(tu.stop_time_events.len(), 1);
        let arrival = tu.stop_time_events[0].arrival.unwrap();
        assert_eq!(arrival.delay, Some(30));
        assert_eq!(arrival.uncertainty, Some(5));
    }

    #[test]
    fn test_alert_decodes() {
        let mut entity = empty_entity("a1");
        entity.alert = Some(Alert {
            active_period: vec![TimeRange {
                start: Some(1_700_000_000),
                end: Some(1_700_003_600),
            }],
            informed_entity: vec![EntitySelector {
                agency_id: None,
                route_id: Some("R1".to_string()),
                route_type: Some(3),
                trip: None,
                stop_id: None,
            }],
            cause: Some(9),
            effect: Some(4),
            url: None,
            header_text: Some(TranslatedString {
                translation: vec![translated_string::Translation {
                    text: "Poikkeus".to_string(),
                    language: Some("fi".to_string()),
                }],
            }),
            description_text: Some(TranslatedString {
                translation: vec![translated_string::Translation {
                    text: "Reitti muuttuu".to_string(),
                    language: Some("fi".to_string()),
                }],
            }),
        });

        let feed = FeedMessage {
            header: header(1_700_000_000),
            entity: vec![entity],
        };
        let normalized = decode(&feed.encode_to_vec()).unwrap();

        assert_eq!(normalized.alerts.len(), 1);
        let alert = &normalized.alerts[0];
        assert_eq!(alert.id, "a1");
        assert_eq!(alert.active_start, Some(1_700_000_000));
        assert_eq!(alert.active_end, Some(1_700_003_600));
        assert_eq!(alert.cause, Some(9));
        assert_eq!(alert.effect, Some(4));
        assert_eq!(alert.informed_entities.len(), 1);
        assert_eq!(alert.header_texts[0].text, "Poikkeus");
        assert_eq!(alert.description_texts[0].language.as_deref(), Some("fi"));
    }
}

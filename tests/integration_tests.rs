use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use prost::Message;
use transit_rt_ingest::decode::DecoderKind;
use transit_rt_ingest::engine::{TripUpdateReconciler, reconcile_alerts};
use transit_rt_ingest::gtfs_rt::{
    Alert, EntitySelector, FeedEntity, FeedHeader, FeedMessage, TimeRange, TranslatedString,
    TripUpdate, translated_string,
    trip_update::{StopTimeEvent, StopTimeUpdate},
};
use transit_rt_ingest::timetable::{StopTime, TimetableIndex, Trip, TripStop, minute_of};

/// Static timetable for one trip, T1 on route R1 over stops S1..S3.
struct OneTripTimetable;

#[async_trait]
impl TimetableIndex for OneTripTimetable {
    async fn active_service_ids(&self, _region: &str, _date: NaiveDate) -> Result<Vec<String>> {
        Ok(vec!["svc-1".to_string()])
    }

    async fn trip_id_for(
        &self,
        region: &str,
        route_id: &str,
        origin_departure: &str,
        direction_id: i16,
        _active_services: &[String],
    ) -> Result<Option<String>> {
        let stops = self.stop_times_for_trip(region, "T1").await?;
        let matches = route_id == "R1"
            && direction_id == 0
            && minute_of(&stops[0].departure_time).as_deref() == Some(origin_departure);
        Ok(matches.then(|| "T1".to_string()))
    }

    async fn trip_by_id(&self, _region: &str, trip_id: &str) -> Result<Option<Trip>> {
        Ok((trip_id == "T1").then(|| Trip {
            trip_id: "T1".to_string(),
            route_id: "R1".to_string(),
            direction_id: 0,
        }))
    }

    async fn route_id_for_ref(&self, _region: &str, route_ref: &str) -> Result<Option<String>> {
        Ok((route_ref == "55").then(|| "R1".to_string()))
    }

    async fn stop_times_for_trip(&self, _region: &str, trip_id: &str) -> Result<Vec<StopTime>> {
        if trip_id != "T1" {
            return Ok(Vec::new());
        }
        Ok(["08:00:00", "08:05:00", "08:10:00"]
            .iter()
            .enumerate()
            .map(|(i, time)| StopTime {
                stop_id: format!("S{}", i + 1),
                stop_sequence: i as i32 + 1,
                arrival_time: time.to_string(),
                departure_time: time.to_string(),
            })
            .collect())
    }

    async fn stops_for_trip(&self, region: &str, trip_id: &str) -> Result<Vec<TripStop>> {
        Ok(self
            .stop_times_for_trip(region, trip_id)
            .await?
            .into_iter()
            .map(|st| TripStop {
                stop_id: st.stop_id,
                stop_sequence: st.stop_sequence,
            })
            .collect())
    }
}

fn feed_message(entities: Vec<FeedEntity>) -> FeedMessage {
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: Some(0),
            timestamp: Some(1_700_028_000),
            feed_version: None,
        },
        entity: entities,
    }
}

#[tokio::test]
async fn test_trip_update_pipeline() {
    let feed = feed_message(vec![FeedEntity {
        id: "e1".to_string(),
        is_deleted: None,
        trip_update: Some(TripUpdate {
            trip: transit_rt_ingest::gtfs_rt::TripDescriptor {
                trip_id: Some("T1".to_string()),
                route_id: Some("R1".to_string()),
                direction_id: Some(0),
                start_time: Some("08:00:00".to_string()),
                start_date: Some("20231115".to_string()),
                schedule_relationship: Some(0),
            },
            vehicle: None,
            stop_time_update: vec![StopTimeUpdate {
                stop_sequence: None,
                stop_id: Some("S2".to_string()),
                arrival: Some(StopTimeEvent {
                    delay: Some(45),
                    time: None,
                    uncertainty: None,
                }),
                departure: None,
                schedule_relationship: None,
            }],
            timestamp: Some(1_700_028_300),
            delay: None,
        }),
        alert: None,
    }]);

    let normalized = DecoderKind::GtfsRt
        .decode(&feed.encode_to_vec(), chrono_tz::Europe::Helsinki)
        .expect("Failed to decode feed");
    assert!(normalized.full_dataset);

    let timetable = OneTripTimetable;
    let mut reconciler =
        TripUpdateReconciler::new("testville", chrono_tz::Europe::Helsinki, &timetable);
    let batch = reconciler
        .reconcile(&normalized)
        .await
        .expect("Failed to reconcile feed");

    assert!(batch.full_dataset);
    assert_eq!(batch.trip_updates.len(), 1);
    assert_eq!(batch.trip_updates[0].id, "T1-20231115-08:00:00");
    assert_eq!(batch.stop_time_updates.len(), 3);
    // The single observed delay reaches every stop of the trip.
    assert!(
        batch
            .stop_time_updates
            .iter()
            .all(|row| row.arrival_delay == Some(45))
    );
}

#[tokio::test]
async fn test_alert_pipeline() {
    let translated = |text: &str| {
        Some(TranslatedString {
            translation: vec![translated_string::Translation {
                text: text.to_string(),
                language: Some("fi".to_string()),
            }],
        })
    };
    let feed = feed_message(vec![FeedEntity {
        id: "a1".to_string(),
        is_deleted: None,
        trip_update: None,
        alert: Some(Alert {
            active_period: vec![TimeRange {
                start: Some(1_700_028_000),
                end: None,
            }],
            informed_entity: vec![EntitySelector {
                agency_id: None,
                route_id: Some("R1".to_string()),
                route_type: None,
                trip: None,
                stop_id: None,
            }],
            cause: Some(9),
            effect: Some(4),
            url: None,
            header_text: translated("Poikkeus"),
            description_text: translated("Linjalla R1 kiertotie"),
        }),
    }]);

    let normalized = DecoderKind::GtfsRt
        .decode(&feed.encode_to_vec(), chrono_tz::Europe::Helsinki)
        .expect("Failed to decode feed");
    let batch = reconcile_alerts("testville", &normalized);

    assert_eq!(batch.alerts.len(), 1);
    assert_eq!(batch.alerts[0].cause, "MAINTENANCE");
    assert_eq!(batch.alerts[0].effect, "DETOUR");
    assert_eq!(batch.informed_entities.len(), 1);
    assert_eq!(batch.informed_entities[0].route_id.as_deref(), Some("R1"));
    assert_eq!(batch.header_texts.len(), 1);
    assert_eq!(batch.description_texts.len(), 1);
    assert_eq!(batch.skipped, 0);
}

#[tokio::test]
async fn test_unknown_trip_is_counted_not_fatal() {
    let entity = |trip_id: &str| FeedEntity {
        id: format!("e-{trip_id}"),
        is_deleted: None,
        trip_update: Some(TripUpdate {
            trip: transit_rt_ingest::gtfs_rt::TripDescriptor {
                trip_id: Some(trip_id.to_string()),
                route_id: None,
                direction_id: None,
                start_time: Some("08:00:00".to_string()),
                start_date: Some("20231115".to_string()),
                schedule_relationship: None,
            },
            vehicle: None,
            stop_time_update: vec![],
            timestamp: None,
            delay: None,
        }),
        alert: None,
    };
    let feed = feed_message(vec![entity("T1"), entity("T-ghost")]);

    let normalized = DecoderKind::GtfsRt
        .decode(&feed.encode_to_vec(), chrono_tz::Europe::Helsinki)
        .expect("Failed to decode feed");

    let timetable = OneTripTimetable;
    let mut reconciler =
        TripUpdateReconciler::new("testville", chrono_tz::Europe::Helsinki, &timetable);
    let batch = reconciler
        .reconcile(&normalized)
        .await
        .expect("Failed to reconcile feed");

    assert_eq!(batch.trip_updates.len(), 1);
    assert_eq!(batch.skipped, 1);
}

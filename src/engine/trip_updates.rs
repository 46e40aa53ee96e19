//! Trip-update reconciliation.
//!
//! Each feed entity is matched against the static timetable: the trip
//! identity is resolved (or the entity dropped), missing descriptor
//! fields are backfilled from the schedule, and one stop-time row is
//! built for every scheduled stop with the observed delay propagated
//! across stops that have no realtime data of their own.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info};

use crate::decode::{NormalizedFeed, StopTimeEventUpdate, TripDescriptor, TripUpdateEntity};
use crate::model::{ScheduleRelationship, StopScheduleRelationship};
use crate::store::{StopTimeUpdateRow, TripUpdateBatch, TripUpdateRow};
use crate::timetable::{StopTime, TimetableIndex, minute_of};

/// Reconciles one feed cycle for one region.
///
/// The active-services memo lives here and nowhere else; a fresh
/// reconciler is built per cycle, so cached service days can never leak
/// across cycles or sources.
pub struct TripUpdateReconciler<'a> {
    region: &'a str,
    tz: Tz,
    timetable: &'a dyn TimetableIndex,
    /// Descriptor route fields are line names, not route ids, and must
    /// be translated before resolution.
    map_route_refs: bool,
    /// start date (`YYYYMMDD`) -> active service ids, memoized because
    /// most entities in a cycle share a service day.
    active_services: HashMap<String, Vec<String>>,
    /// route reference -> mapped route id, memoized per cycle.
    route_refs: HashMap<String, Option<String>>,
    today: NaiveDate,
}

impl<'a> TripUpdateReconciler<'a> {
    pub fn new(region: &'a str, tz: Tz, timetable: &'a dyn TimetableIndex) -> Self {
        let today = Utc::now().with_timezone(&tz).date_naive();
        Self {
            region,
            tz,
            timetable,
            map_route_refs: false,
            active_services: HashMap::new(),
            route_refs: HashMap::new(),
            today,
        }
    }

    /// Overrides the date used as the missing-start-date fallback.
    /// Deterministic reprocessing and tests need this; live polling does
    /// not.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Translates descriptor route fields through the timetable's
    /// route-reference lookup before trip resolution. Sources whose
    /// feeds publish line names instead of GTFS route ids need this;
    /// entities with an unmappable reference are skipped.
    pub fn with_route_ref_mapping(mut self) -> Self {
        self.map_route_refs = true;
        self
    }

    /// Converts a decoded feed into one batch of trip-update and
    /// stop-time rows. Entities that cannot be matched to the static
    /// timetable are counted as skipped, never as errors.
    pub async fn reconcile(&mut self, feed: &NormalizedFeed) -> Result<TripUpdateBatch> {
        let mut batch = TripUpdateBatch {
            full_dataset: feed.full_dataset,
            ..Default::default()
        };

        for entity in &feed.trip_updates {
            match self.reconcile_entity(entity, feed.timestamp).await? {
                Some((trip_update, stop_rows)) => {
                    // Re-observation of the same trip within one feed
                    // overwrites the earlier rows.
                    if let Some(pos) = batch
                        .trip_updates
                        .iter()
                        .position(|t| t.id == trip_update.id)
                    {
                        batch.trip_updates.remove(pos);
                        batch
                            .stop_time_updates
                            .retain(|s| s.trip_update_id != trip_update.id);
                    }
                    batch.trip_updates.push(trip_update);
                    batch.stop_time_updates.extend(stop_rows);
                }
                None => batch.skipped += 1,
            }
        }

        self.active_services.clear();
        self.route_refs.clear();
        Ok(batch)
    }

    async fn reconcile_entity(
        &mut self,
        entity: &TripUpdateEntity,
        feed_timestamp: Option<i64>,
    ) -> Result<Option<(TripUpdateRow, Vec<StopTimeUpdateRow>)>> {
        let recorded_epoch = entity
            .timestamp
            .or(feed_timestamp)
            .unwrap_or_else(|| Utc::now().timestamp());

        let route_id_hint = match (&entity.trip.route_id, self.map_route_refs) {
            (Some(route_ref), true) => {
                let Some(mapped) = self.mapped_route_id(route_ref).await? else {
                    info!(
                        region = self.region,
                        route_ref = %route_ref,
                        "No route id for route reference, skipping"
                    );
                    return Ok(None);
                };
                Some(mapped)
            }
            (route_id, _) => route_id.clone(),
        };

        let supplied_trip_id = entity.trip.trip_id.is_some();
        let trip_id = match &entity.trip.trip_id {
            Some(id) => Some(id.clone()),
            None => {
                self.resolve_trip_id(&entity.trip, route_id_hint.as_deref())
                    .await?
            }
        };
        let Some(trip_id) = trip_id else {
            info!(
                region = self.region,
                route_id = route_id_hint.as_deref(),
                "No trip id and failed to resolve one from the timetable, skipping"
            );
            return Ok(None);
        };

        let stop_times = self.timetable.stop_times_for_trip(self.region, &trip_id).await?;
        if stop_times.is_empty() {
            // Realtime data for a trip the static timetable does not
            // know; stale entity.
            info!(
                region = self.region,
                trip_id, "No static stop times for trip, skipping"
            );
            return Ok(None);
        }

        let start_date = match &entity.trip.start_date {
            Some(date) => date.clone(),
            // Known-imprecise fallback: trips running past midnight get
            // the wrong service date after midnight.
            None => self.today.format("%Y%m%d").to_string(),
        };
        let start_time = match &entity.trip.start_time {
            Some(time) => time.clone(),
            None => stop_times[0].departure_time.clone(),
        };

        let (route_id, direction_id) =
            match (route_id_hint, entity.trip.direction_id) {
                (Some(route_id), Some(direction_id)) => (route_id, direction_id),
                _ => {
                    let Some(trip) = self.timetable.trip_by_id(self.region, &trip_id).await? else {
                        info!(
                            region = self.region,
                            trip_id, "No static trip record, skipping"
                        );
                        return Ok(None);
                    };
                    (trip.route_id, trip.direction_id)
                }
            };

        let schedule_relationship =
            ScheduleRelationship::from_code(entity.trip.schedule_relationship);

        let trip_update_id = format!("{trip_id}-{start_date}-{start_time}");

        // Sources that resolve their trip here number calls by visit
        // order, not by the static stop sequence; translate through the
        // trip's stop list so sequence matching lines up.
        let events = if supplied_trip_id {
            entity.stop_time_events.clone()
        } else {
            self.visit_order_to_stop_sequence(&trip_id, &entity.stop_time_events)
                .await?
        };

        // Per-stop rows exist only for trips running their schedule.
        let stop_rows = if schedule_relationship == ScheduleRelationship::Scheduled {
            self.build_stop_rows(&trip_update_id, &stop_times, &events)
        } else {
            Vec::new()
        };

        let trip_update = TripUpdateRow {
            id: trip_update_id,
            trip_id,
            route_id,
            direction_id,
            trip_start_time: start_time,
            trip_start_date: start_date,
            schedule_relationship: schedule_relationship.as_str().to_string(),
            vehicle_id: entity.vehicle.as_ref().and_then(|v| v.id.clone()),
            vehicle_label: entity.vehicle.as_ref().and_then(|v| v.label.clone()),
            vehicle_license_plate: entity
                .vehicle
                .as_ref()
                .and_then(|v| v.license_plate.clone()),
            recorded: self.local_datetime(recorded_epoch),
        };

        Ok(Some((trip_update, stop_rows)))
    }

    /// Walks the static stop sequence in order, matching realtime events
    /// by stop id first and stop sequence second, carrying the running
    /// delay across stops without observations and backfilling leading
    /// stops with the first observed delay.
    fn build_stop_rows(
        &self,
        trip_update_id: &str,
        stop_times: &[StopTime],
        events: &[StopTimeEventUpdate],
    ) -> Vec<StopTimeUpdateRow> {
        let mut rows: Vec<StopTimeUpdateRow> = Vec::with_capacity(stop_times.len());
        let mut delay: Option<i64> = None;
        let mut first_delay: Option<i64> = None;

        for stop_time in stop_times {
            let mut row = StopTimeUpdateRow {
                trip_update_id: trip_update_id.to_string(),
                stop_id: stop_time.stop_id.clone(),
                stop_sequence: stop_time.stop_sequence,
                schedule_relationship: StopScheduleRelationship::Scheduled.as_str().to_string(),
                ..Default::default()
            };

            let Some(event) = find_event(events, stop_time) else {
                // Nothing observed for this stop, carry the running
                // delay forward.
                row.arrival_delay = delay;
                row.departure_delay = delay;
                rows.push(row);
                continue;
            };

            let relationship = StopScheduleRelationship::from_code(event.schedule_relationship);
            row.schedule_relationship = relationship.as_str().to_string();
            if relationship.is_dataless() {
                // NO_DATA / SKIPPED stops get a row but no timing; the
                // running delay passes over them untouched.
                rows.push(row);
                continue;
            }

            let arrival = event.arrival.filter(|e| e.has_data());
            let departure = event.departure.filter(|e| e.has_data());

            if arrival.is_none() && departure.is_none() {
                if event.arrival.is_some() || event.departure.is_some() {
                    // Events present but carrying neither a time nor a
                    // delay are unusable; drop the stop, keep the trip.
                    error!(
                        region = self.region,
                        trip_update_id,
                        stop_id = %stop_time.stop_id,
                        "Stop time event has neither time nor delay, skipping stop"
                    );
                    continue;
                }
                row.arrival_delay = delay;
                row.departure_delay = delay;
                rows.push(row);
                continue;
            }

            // Feeds are inconsistent about which side they populate;
            // reuse the present one for both.
            let arrival = arrival.or(departure);
            let departure = departure.or(arrival);

            if let Some(arrival) = arrival {
                row.arrival_uncertainty = arrival.uncertainty;
                if let Some(observed) = arrival.delay {
                    delay = Some(observed);
                    first_delay = first_delay.or(Some(observed));
                    match arrival.time {
                        Some(time) => row.arrival_time = Some(time),
                        None => row.arrival_delay = Some(observed),
                    }
                } else if let Some(time) = arrival.time {
                    row.arrival_time = Some(time);
                    if let Some(computed) = self.delay_from_time(time, &stop_time.arrival_time) {
                        delay = Some(computed);
                        first_delay = first_delay.or(Some(computed));
                    }
                }
            }

            if let Some(departure) = departure {
                row.departure_uncertainty = departure.uncertainty;
                if let Some(observed) = departure.delay {
                    delay = Some(observed);
                    first_delay = first_delay.or(Some(observed));
                    match departure.time {
                        Some(time) => row.departure_time = Some(time),
                        None => row.departure_delay = Some(observed),
                    }
                } else if let Some(time) = departure.time {
                    row.departure_time = Some(time);
                    if let Some(computed) = self.delay_from_time(time, &stop_time.departure_time) {
                        delay = Some(computed);
                        first_delay = first_delay.or(Some(computed));
                    }
                }
            }

            rows.push(row);
        }

        // Backward propagation: leading stops the vehicle passed before
        // the first observation inherit the first observed delay.
        if let Some(first_delay) = first_delay {
            for row in rows.iter_mut() {
                if row.has_timing() {
                    break;
                }
                if row.schedule_relationship == StopScheduleRelationship::Scheduled.as_str() {
                    row.arrival_delay = Some(first_delay);
                    row.departure_delay = Some(first_delay);
                }
            }
        }

        rows
    }

    /// Resolves a trip id from route, direction and origin departure via
    /// the timetable, memoizing active services per service day.
    async fn resolve_trip_id(
        &mut self,
        trip: &TripDescriptor,
        route_id: Option<&str>,
    ) -> Result<Option<String>> {
        let (Some(route_id), Some(direction_id), Some(start_date), Some(start_time)) = (
            route_id,
            trip.direction_id,
            trip.start_date.as_deref(),
            trip.start_time.as_deref(),
        ) else {
            return Ok(None);
        };

        let Ok(date) = NaiveDate::parse_from_str(start_date, "%Y%m%d") else {
            return Ok(None);
        };
        let Some(origin_minute) = minute_of(start_time) else {
            return Ok(None);
        };

        if !self.active_services.contains_key(start_date) {
            let services = self.timetable.active_service_ids(self.region, date).await?;
            self.active_services
                .insert(start_date.to_string(), services);
        }
        let services = &self.active_services[start_date];
        if services.is_empty() {
            return Ok(None);
        }

        self.timetable
            .trip_id_for(self.region, route_id, &origin_minute, direction_id, services)
            .await
    }

    async fn mapped_route_id(&mut self, route_ref: &str) -> Result<Option<String>> {
        if !self.route_refs.contains_key(route_ref) {
            let mapped = self
                .timetable
                .route_id_for_ref(self.region, route_ref)
                .await?;
            self.route_refs.insert(route_ref.to_string(), mapped);
        }
        Ok(self.route_refs[route_ref].clone())
    }

    /// Rewrites event stop sequences from visit order (1-based position
    /// along the trip) to the static stop sequence, which may be sparse.
    /// Events keep their stop ids; a visit number past the end of the
    /// trip loses its sequence.
    async fn visit_order_to_stop_sequence(
        &self,
        trip_id: &str,
        events: &[StopTimeEventUpdate],
    ) -> Result<Vec<StopTimeEventUpdate>> {
        if events.iter().all(|e| e.stop_sequence.is_none()) {
            return Ok(events.to_vec());
        }
        let mut stops = self.timetable.stops_for_trip(self.region, trip_id).await?;
        stops.sort_by_key(|s| s.stop_sequence);

        Ok(events
            .iter()
            .cloned()
            .map(|mut event| {
                event.stop_sequence = event
                    .stop_sequence
                    .filter(|n| *n > 0)
                    .and_then(|n| stops.get(n as usize - 1))
                    .map(|stop| stop.stop_sequence as u32);
                event
            })
            .collect())
    }

    /// Delay in seconds between an observed instant and the scheduled
    /// `HH:MM:SS`, evaluated on the observation's region-local date.
    /// Hours past 23 denote times after midnight on the previous service
    /// day.
    fn delay_from_time(&self, event_epoch: i64, scheduled: &str) -> Option<i64> {
        let event = DateTime::from_timestamp(event_epoch, 0)?
            .with_timezone(&self.tz)
            .naive_local();

        let mut parts = scheduled.split(':');
        let hours: i64 = parts.next()?.trim().parse().ok()?;
        let minutes: i64 = parts.next()?.trim().parse().ok()?;
        let seconds: i64 = parts.next().unwrap_or("0").trim().parse().ok()?;

        let scheduled_at = event.date().and_hms_opt(0, 0, 0)?
            + Duration::seconds(hours * 3600 + minutes * 60 + seconds);
        Some((event - scheduled_at).num_seconds())
    }

    fn local_datetime(&self, epoch: i64) -> NaiveDateTime {
        DateTime::from_timestamp(epoch, 0)
            .map(|t| t.with_timezone(&self.tz).naive_local())
            .unwrap_or_else(|| Utc::now().with_timezone(&self.tz).naive_local())
    }
}

/// Matches a static stop against the realtime events: stop id takes
/// precedence, stop sequence is the fallback. Empty ids and zero
/// sequences never match; some sources emit them as placeholders.
fn find_event<'e>(
    events: &'e [StopTimeEventUpdate],
    stop_time: &StopTime,
) -> Option<&'e StopTimeEventUpdate> {
    events
        .iter()
        .find(|e| {
            e.stop_id
                .as_deref()
                .is_some_and(|id| !id.is_empty() && id == stop_time.stop_id)
        })
        .or_else(|| {
            events.iter().find(|e| {
                e.stop_sequence
                    .is_some_and(|seq| seq != 0 && seq as i32 == stop_time.stop_sequence)
            })
        })
}

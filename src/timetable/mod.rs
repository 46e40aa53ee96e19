//! Read-only access to the static GTFS timetable.
//!
//! The schedule tables (`{region}_trips`, `{region}_stop_times`,
//! `{region}_calendar`, `{region}_calendar_dates`) are loaded and owned
//! by a separate import pipeline; this module only queries them. Every
//! lookup treats absence as a normal outcome: a trip the static data does
//! not know is a skip decision for the caller, never an error.

pub mod sql;

pub use sql::SqlTimetable;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// One static trip record.
#[derive(Debug, Clone)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    pub direction_id: i16,
}

/// One scheduled stop visit. Times are GTFS wall-clock `HH:MM:SS`
/// strings; hours may exceed 23 for trips running past midnight.
#[derive(Debug, Clone)]
pub struct StopTime {
    pub stop_id: String,
    pub stop_sequence: i32,
    pub arrival_time: String,
    pub departure_time: String,
}

#[derive(Debug, Clone)]
pub struct TripStop {
    pub stop_id: String,
    pub stop_sequence: i32,
}

#[async_trait]
pub trait TimetableIndex: Send + Sync {
    /// Service ids active on `date`: calendar rows whose window covers
    /// the date's weekday, minus "removed" calendar-date exceptions for
    /// that exact date, plus "added" ones.
    async fn active_service_ids(&self, region: &str, date: NaiveDate) -> Result<Vec<String>>;

    /// Finds the trip on `route_id`/`direction_id` whose origin stop
    /// departs at `origin_departure` (`HH:MM`, minute granularity since
    /// upstream feeds often omit seconds), restricted to
    /// `active_services`. Ties are broken by ascending stop sequence.
    async fn trip_id_for(
        &self,
        region: &str,
        route_id: &str,
        origin_departure: &str,
        direction_id: i16,
        active_services: &[String],
    ) -> Result<Option<String>>;

    async fn trip_by_id(&self, region: &str, trip_id: &str) -> Result<Option<Trip>>;

    /// GTFS route id for a source route reference (the published line
    /// name), or `None` when the reference is unknown.
    async fn route_id_for_ref(&self, region: &str, route_ref: &str) -> Result<Option<String>>;

    /// Scheduled stop visits for a trip, ordered by stop sequence.
    async fn stop_times_for_trip(&self, region: &str, trip_id: &str) -> Result<Vec<StopTime>>;

    /// All stops a trip visits, in no particular order.
    async fn stops_for_trip(&self, region: &str, trip_id: &str) -> Result<Vec<TripStop>>;
}

/// Truncates a wall-clock time to minute granularity: `"8:30:15"` and
/// `"08:30"` both normalize to `"08:30"`. Returns `None` for strings
/// that are not wall-clock times.
pub fn minute_of(time: &str) -> Option<String> {
    let mut parts = time.split(':');
    let hours: u32 = parts.next()?.trim().parse().ok()?;
    let minutes: u32 = parts.next()?.trim().parse().ok()?;
    if minutes > 59 {
        return None;
    }
    Some(format!("{hours:02}:{minutes:02}"))
}

//! sqlx-backed [`TimetableIndex`] over the per-region schedule tables.
//!
//! Table names are region-prefixed and interpolated into the SQL; region
//! keys come from our own configuration, never from feed data. All
//! feed-derived values are bound parameters.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use sqlx::{PgPool, Row};

use super::{StopTime, TimetableIndex, Trip, TripStop};

#[derive(Clone)]
pub struct SqlTimetable {
    pool: PgPool,
}

impl SqlTimetable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn weekday_column(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[async_trait]
impl TimetableIndex for SqlTimetable {
    async fn active_service_ids(&self, region: &str, date: NaiveDate) -> Result<Vec<String>> {
        let weekday = weekday_column(date.weekday());
        let calendar_rows = sqlx::query(&format!(
            "SELECT service_id FROM {region}_calendar \
             WHERE {weekday} = 1 AND start_date <= $1 AND end_date >= $1"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        let mut services: Vec<String> = calendar_rows
            .iter()
            .map(|row| row.get("service_id"))
            .collect();

        // Exact-date exceptions: type 1 adds a service, type 2 removes it.
        let exception_rows = sqlx::query(&format!(
            "SELECT service_id, exception_type FROM {region}_calendar_dates WHERE date = $1"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        for row in exception_rows {
            let service_id: String = row.get("service_id");
            let exception_type: i32 = row.get("exception_type");
            match exception_type {
                1 => {
                    if !services.contains(&service_id) {
                        services.push(service_id);
                    }
                }
                2 => services.retain(|s| s != &service_id),
                _ => {}
            }
        }

        Ok(services)
    }

    async fn trip_id_for(
        &self,
        region: &str,
        route_id: &str,
        origin_departure: &str,
        direction_id: i16,
        active_services: &[String],
    ) -> Result<Option<String>> {
        // Minute-granularity match against the HH:MM:SS departure string;
        // ascending stop_sequence makes the origin stop win ties.
        let row = sqlx::query(&format!(
            "SELECT t.trip_id FROM {region}_trips t \
             JOIN {region}_stop_times st ON st.trip_id = t.trip_id \
             WHERE t.route_id = $1 AND t.direction_id = $2 \
               AND t.service_id = ANY($3) \
               AND left(st.departure_time, 5) = $4 \
             ORDER BY st.stop_sequence ASC \
             LIMIT 1"
        ))
        .bind(route_id)
        .bind(direction_id)
        .bind(active_services)
        .bind(origin_departure)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("trip_id")))
    }

    async fn trip_by_id(&self, region: &str, trip_id: &str) -> Result<Option<Trip>> {
        let row = sqlx::query(&format!(
            "SELECT trip_id, route_id, direction_id FROM {region}_trips WHERE trip_id = $1"
        ))
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Trip {
            trip_id: r.get("trip_id"),
            route_id: r.get("route_id"),
            direction_id: r.get("direction_id"),
        }))
    }

    async fn route_id_for_ref(&self, region: &str, route_ref: &str) -> Result<Option<String>> {
        let row = sqlx::query(&format!(
            "SELECT route_id FROM {region}_routes WHERE route_short_name = $1 LIMIT 1"
        ))
        .bind(route_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("route_id")))
    }

    async fn stop_times_for_trip(&self, region: &str, trip_id: &str) -> Result<Vec<StopTime>> {
        let rows = sqlx::query(&format!(
            "SELECT stop_id, stop_sequence, arrival_time, departure_time \
             FROM {region}_stop_times WHERE trip_id = $1 \
             ORDER BY stop_sequence ASC"
        ))
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StopTime {
                stop_id: r.get("stop_id"),
                stop_sequence: r.get("stop_sequence"),
                arrival_time: r.get("arrival_time"),
                departure_time: r.get("departure_time"),
            })
            .collect())
    }

    async fn stops_for_trip(&self, region: &str, trip_id: &str) -> Result<Vec<TripStop>> {
        let rows = sqlx::query(&format!(
            "SELECT stop_id, stop_sequence FROM {region}_stop_times WHERE trip_id = $1"
        ))
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TripStop {
                stop_id: r.get("stop_id"),
                stop_sequence: r.get("stop_sequence"),
            })
            .collect())
    }
}

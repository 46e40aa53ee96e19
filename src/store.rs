//! Persistence for reconciled row sets.
//!
//! The write contract is small: batched insert-with-update-on-conflict,
//! wholesale replace for alert snapshots, and an age-based sweep of trip
//! updates. Every reconciliation pass commits in a single transaction so
//! a failed cycle leaves the tables untouched.

use anyhow::Result;
use chrono::NaiveDateTime;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

/// Rows per INSERT statement, comfortably under the Postgres bind limit.
const INSERT_CHUNK: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct TripUpdateRow {
    pub id: String,
    pub trip_id: String,
    pub route_id: String,
    pub direction_id: i16,
    pub trip_start_time: String,
    pub trip_start_date: String,
    pub schedule_relationship: String,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub vehicle_license_plate: Option<String>,
    pub recorded: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopTimeUpdateRow {
    pub trip_update_id: String,
    pub stop_id: String,
    pub stop_sequence: i32,
    pub arrival_delay: Option<i64>,
    pub arrival_time: Option<i64>,
    pub arrival_uncertainty: Option<i32>,
    pub departure_delay: Option<i64>,
    pub departure_time: Option<i64>,
    pub departure_uncertainty: Option<i32>,
    pub schedule_relationship: String,
}

impl StopTimeUpdateRow {
    /// True when the row carries any realtime timing at all.
    pub fn has_timing(&self) -> bool {
        self.arrival_delay.is_some()
            || self.arrival_time.is_some()
            || self.departure_delay.is_some()
            || self.departure_time.is_some()
    }
}

/// Output of one trip-update reconciliation pass.
#[derive(Debug, Default)]
pub struct TripUpdateBatch {
    /// The feed header declared a complete snapshot; existing rows for
    /// the region are replaced rather than merged.
    pub full_dataset: bool,
    pub trip_updates: Vec<TripUpdateRow>,
    pub stop_time_updates: Vec<StopTimeUpdateRow>,
    /// Entities dropped because they could not be matched to the static
    /// timetable.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct AlertRow {
    pub id: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub cause: String,
    pub effect: String,
}

#[derive(Debug, Clone)]
pub struct InformedEntityRow {
    pub alert_id: String,
    pub agency_id: Option<String>,
    pub route_id: Option<String>,
    pub route_type: Option<i32>,
    pub stop_id: Option<String>,
    pub trip_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TranslatedTextRow {
    pub alert_id: String,
    pub translated_text: String,
    pub language_code: Option<String>,
}

/// Output of one alert reconciliation pass. Always applied as a
/// wholesale replacement; the upstream feed is a full snapshot.
#[derive(Debug, Default)]
pub struct AlertBatch {
    pub alerts: Vec<AlertRow>,
    pub informed_entities: Vec<InformedEntityRow>,
    pub header_texts: Vec<TranslatedTextRow>,
    pub description_texts: Vec<TranslatedTextRow>,
    pub urls: Vec<TranslatedTextRow>,
    pub skipped: usize,
}

/// Applies one trip-update batch: optional full-dataset replace, both
/// upserts, and the retention sweep, all in one transaction.
pub async fn apply_trip_updates(
    pool: &PgPool,
    region: &str,
    batch: &TripUpdateBatch,
    retention_cutoff: NaiveDateTime,
) -> Result<()> {
    let trip_updates_table = format!("{region}_trip_updates");
    let stop_time_updates_table = format!("{region}_stop_time_updates");

    let mut tx = pool.begin().await?;

    if batch.full_dataset {
        sqlx::query(&format!("DELETE FROM {stop_time_updates_table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM {trip_updates_table}"))
            .execute(&mut *tx)
            .await?;
    }

    upsert_trip_updates(&mut tx, &trip_updates_table, &batch.trip_updates).await?;
    upsert_stop_time_updates(
        &mut tx,
        &stop_time_updates_table,
        &batch.stop_time_updates,
    )
    .await?;
    sweep_old_trip_updates(
        &mut tx,
        &trip_updates_table,
        &stop_time_updates_table,
        retention_cutoff,
    )
    .await?;

    tx.commit().await?;

    debug!(
        region,
        trip_updates = batch.trip_updates.len(),
        stop_time_updates = batch.stop_time_updates.len(),
        full_dataset = batch.full_dataset,
        "Trip update batch committed"
    );
    Ok(())
}

/// Applies one alert batch: empties every alert table for the region,
/// then inserts the new snapshot, in one transaction.
pub async fn apply_alerts(pool: &PgPool, region: &str, batch: &AlertBatch) -> Result<()> {
    let alerts_table = format!("{region}_alerts");
    let informed_table = format!("{region}_alert_informed_entities");
    let header_table = format!("{region}_alert_header_texts");
    let description_table = format!("{region}_alert_description_texts");
    let urls_table = format!("{region}_alert_urls");

    let mut tx = pool.begin().await?;

    for table in [
        &urls_table,
        &description_table,
        &header_table,
        &informed_table,
        &alerts_table,
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await?;
    }

    upsert_alerts(&mut tx, &alerts_table, &batch.alerts).await?;
    insert_informed_entities(&mut tx, &informed_table, &batch.informed_entities).await?;
    insert_translated_texts(&mut tx, &header_table, &batch.header_texts).await?;
    insert_translated_texts(&mut tx, &description_table, &batch.description_texts).await?;
    insert_translated_texts(&mut tx, &urls_table, &batch.urls).await?;

    tx.commit().await?;

    debug!(
        region,
        alerts = batch.alerts.len(),
        "Alert snapshot replaced"
    );
    Ok(())
}

async fn upsert_trip_updates(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    rows: &[TripUpdateRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} (id, trip_id, route_id, direction_id, trip_start_time, \
             trip_start_date, schedule_relationship, vehicle_id, vehicle_label, \
             vehicle_license_plate, recorded) "
        ));
        query.push_values(chunk, |mut b, row| {
            b.push_bind(&row.id)
                .push_bind(&row.trip_id)
                .push_bind(&row.route_id)
                .push_bind(row.direction_id)
                .push_bind(&row.trip_start_time)
                .push_bind(&row.trip_start_date)
                .push_bind(&row.schedule_relationship)
                .push_bind(&row.vehicle_id)
                .push_bind(&row.vehicle_label)
                .push_bind(&row.vehicle_license_plate)
                .push_bind(row.recorded);
        });
        query.push(
            " ON CONFLICT (id) DO UPDATE SET \
             trip_id = EXCLUDED.trip_id, route_id = EXCLUDED.route_id, \
             direction_id = EXCLUDED.direction_id, trip_start_time = EXCLUDED.trip_start_time, \
             trip_start_date = EXCLUDED.trip_start_date, \
             schedule_relationship = EXCLUDED.schedule_relationship, \
             vehicle_id = EXCLUDED.vehicle_id, vehicle_label = EXCLUDED.vehicle_label, \
             vehicle_license_plate = EXCLUDED.vehicle_license_plate, recorded = EXCLUDED.recorded",
        );
        query.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn upsert_stop_time_updates(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    rows: &[StopTimeUpdateRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} (trip_update_id, stop_id, stop_sequence, arrival_delay, \
             arrival_time, arrival_uncertainty, departure_delay, departure_time, \
             departure_uncertainty, schedule_relationship) "
        ));
        query.push_values(chunk, |mut b, row| {
            b.push_bind(&row.trip_update_id)
                .push_bind(&row.stop_id)
                .push_bind(row.stop_sequence)
                .push_bind(row.arrival_delay)
                .push_bind(row.arrival_time)
                .push_bind(row.arrival_uncertainty)
                .push_bind(row.departure_delay)
                .push_bind(row.departure_time)
                .push_bind(row.departure_uncertainty)
                .push_bind(&row.schedule_relationship);
        });
        query.push(
            " ON CONFLICT (trip_update_id, stop_sequence) DO UPDATE SET \
             stop_id = EXCLUDED.stop_id, arrival_delay = EXCLUDED.arrival_delay, \
             arrival_time = EXCLUDED.arrival_time, \
             arrival_uncertainty = EXCLUDED.arrival_uncertainty, \
             departure_delay = EXCLUDED.departure_delay, \
             departure_time = EXCLUDED.departure_time, \
             departure_uncertainty = EXCLUDED.departure_uncertainty, \
             schedule_relationship = EXCLUDED.schedule_relationship",
        );
        query.build().execute(&mut **tx).await?;
    }
    Ok(())
}

/// Deletes trip updates recorded before `cutoff`, child stop rows first.
async fn sweep_old_trip_updates(
    tx: &mut Transaction<'_, Postgres>,
    trip_updates_table: &str,
    stop_time_updates_table: &str,
    cutoff: NaiveDateTime,
) -> Result<()> {
    sqlx::query(&format!(
        "DELETE FROM {stop_time_updates_table} WHERE trip_update_id IN \
         (SELECT id FROM {trip_updates_table} WHERE recorded < $1)"
    ))
    .bind(cutoff)
    .execute(&mut **tx)
    .await?;

    sqlx::query(&format!(
        "DELETE FROM {trip_updates_table} WHERE recorded < $1"
    ))
    .bind(cutoff)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn upsert_alerts(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    rows: &[AlertRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} (id, start_time, end_time, cause, effect) "
        ));
        query.push_values(chunk, |mut b, row| {
            b.push_bind(&row.id)
                .push_bind(row.start_time)
                .push_bind(row.end_time)
                .push_bind(&row.cause)
                .push_bind(&row.effect);
        });
        query.push(
            " ON CONFLICT (id) DO UPDATE SET start_time = EXCLUDED.start_time, \
             end_time = EXCLUDED.end_time, cause = EXCLUDED.cause, effect = EXCLUDED.effect",
        );
        query.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_informed_entities(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    rows: &[InformedEntityRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} (alert_id, agency_id, route_id, route_type, stop_id, trip_id) "
        ));
        query.push_values(chunk, |mut b, row| {
            b.push_bind(&row.alert_id)
                .push_bind(&row.agency_id)
                .push_bind(&row.route_id)
                .push_bind(row.route_type)
                .push_bind(&row.stop_id)
                .push_bind(&row.trip_id);
        });
        query.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_translated_texts(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    rows: &[TranslatedTextRow],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} (alert_id, translated_text, language_code) "
        ));
        query.push_values(chunk, |mut b, row| {
            b.push_bind(&row.alert_id)
                .push_bind(&row.translated_text)
                .push_bind(&row.language_code);
        });
        query.build().execute(&mut **tx).await?;
    }
    Ok(())
}

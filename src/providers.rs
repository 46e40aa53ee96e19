//! Per-source polling loops.
//!
//! Every configured region gets one task per payload kind (trip updates,
//! and alerts when the region publishes them). A task fetches, decodes,
//! reconciles and stores in a cycle, sleeps the configured interval, and
//! repeats. A failed cycle is logged and retried on the next interval;
//! nothing is written for it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::SourceConfig;
use crate::decode::DecoderKind;
use crate::engine::{TripUpdateReconciler, reconcile_alerts};
use crate::fetch::{AuthHeader, BasicClient, HttpClient, fetch_bytes};
use crate::store;
use crate::timetable::sql::SqlTimetable;

/// Which table family a polling task feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    TripUpdates,
    Alerts,
}

/// Last-cycle outcome for one region, as exposed by the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub updated: DateTime<Utc>,
    pub new_item_count: usize,
}

/// Shared region -> status maps, one per payload kind.
#[derive(Debug, Default, Clone)]
pub struct StatusMaps {
    pub trip_updates: Arc<RwLock<HashMap<String, ProviderStatus>>>,
    pub alerts: Arc<RwLock<HashMap<String, ProviderStatus>>>,
}

/// Runs one source's polling loop forever. `payload` picks the URL and
/// the reconciliation path; alert feeds are always GTFS-Realtime.
pub async fn run_source(
    source: SourceConfig,
    payload: Payload,
    pool: PgPool,
    status: StatusMaps,
    user_agent: String,
) {
    let client: Box<dyn HttpClient> = match &source.auth_header {
        Some(spec) => match AuthHeader::from_spec(BasicClient::new(), spec) {
            Ok(auth) => Box::new(auth),
            Err(err) => {
                error!(region = %source.region, "Invalid auth header, source not started: {err:#}");
                return;
            }
        },
        None => Box::new(BasicClient::new()),
    };

    let url = match payload {
        Payload::TripUpdates => source.feed_url.clone(),
        Payload::Alerts => match &source.alerts_url {
            Some(url) => url.clone(),
            None => return,
        },
    };

    info!(
        region = %source.region,
        url,
        interval_ms = source.update_interval.as_millis() as u64,
        "Polling started"
    );

    loop {
        match run_cycle(&source, payload, &url, client.as_ref(), &pool, &user_agent).await {
            Ok(new_item_count) => {
                let entry = ProviderStatus {
                    updated: Utc::now(),
                    new_item_count,
                };
                let map = match payload {
                    Payload::TripUpdates => &status.trip_updates,
                    Payload::Alerts => &status.alerts,
                };
                map.write().await.insert(source.region.clone(), entry);
            }
            Err(err) => {
                error!(region = %source.region, url, "Cycle failed: {err:#}");
            }
        }
        tokio::time::sleep(source.update_interval).await;
    }
}

/// One fetch-decode-reconcile-store pass. Returns the number of items
/// written.
async fn run_cycle(
    source: &SourceConfig,
    payload: Payload,
    url: &str,
    client: &dyn HttpClient,
    pool: &PgPool,
    user_agent: &str,
) -> Result<usize> {
    let bytes = fetch_bytes(client, url, user_agent).await?;

    match payload {
        Payload::TripUpdates => {
            let feed = source.feed_type.decode(&bytes, source.timezone)?;

            let timetable = SqlTimetable::new(pool.clone());
            // A fresh reconciler per cycle; its service-day memo must not
            // survive into the next one.
            let mut reconciler =
                TripUpdateReconciler::new(&source.region, source.timezone, &timetable);
            if source.feed_type == DecoderKind::Siri {
                // Turku publishes line names rather than GTFS route ids.
                reconciler = reconciler.with_route_ref_mapping();
            }
            let batch = reconciler.reconcile(&feed).await?;

            let cutoff = Utc::now().with_timezone(&source.timezone).naive_local()
                - ChronoDuration::seconds(source.keep_old_seconds);
            store::apply_trip_updates(pool, &source.region, &batch, cutoff).await?;

            info!(
                region = %source.region,
                trip_updates = batch.trip_updates.len(),
                stop_time_updates = batch.stop_time_updates.len(),
                skipped = batch.skipped,
                "Trip updates stored"
            );
            Ok(batch.trip_updates.len())
        }
        Payload::Alerts => {
            let feed = DecoderKind::GtfsRt.decode(&bytes, source.timezone)?;
            let batch = reconcile_alerts(&source.region, &feed);
            store::apply_alerts(pool, &source.region, &batch).await?;

            info!(
                region = %source.region,
                alerts = batch.alerts.len(),
                skipped = batch.skipped,
                "Alerts stored"
            );
            Ok(batch.alerts.len())
        }
    }
}

//! Status HTTP endpoint.
//!
//! One route, `GET /v1/status`, reporting the last successful cycle per
//! region for both payload kinds. A region that has not completed a
//! cycle yet is simply absent.

use std::collections::HashMap;

use anyhow::Result;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tracing::info;

use crate::providers::{ProviderStatus, StatusMaps};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    trip_updates: Vec<HashMap<String, ProviderStatus>>,
    alerts: Vec<HashMap<String, ProviderStatus>>,
}

pub fn router(status: StatusMaps) -> Router {
    Router::new()
        .route("/v1/status", get(get_status))
        .with_state(status)
}

pub async fn serve(port: u16, status: StatusMaps) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Status server listening");
    axum::serve(listener, router(status)).await?;
    Ok(())
}

async fn get_status(State(status): State<StatusMaps>) -> Json<StatusResponse> {
    Json(StatusResponse {
        trip_updates: entries(&status.trip_updates).await,
        alerts: entries(&status.alerts).await,
    })
}

async fn entries(
    map: &tokio::sync::RwLock<HashMap<String, ProviderStatus>>,
) -> Vec<HashMap<String, ProviderStatus>> {
    let mut regions: Vec<(String, ProviderStatus)> = map
        .read()
        .await
        .iter()
        .map(|(region, entry)| (region.clone(), entry.clone()))
        .collect();
    regions.sort_by(|a, b| a.0.cmp(&b.0));
    regions
        .into_iter()
        .map(|(region, entry)| HashMap::from([(region, entry)]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_status_lists_regions_sorted() {
        let status = StatusMaps::default();
        for region in ["turku", "tampere"] {
            status.trip_updates.write().await.insert(
                region.to_string(),
                ProviderStatus {
                    updated: Utc::now(),
                    new_item_count: 7,
                },
            );
        }

        let Json(response) = get_status(State(status)).await;
        assert_eq!(response.trip_updates.len(), 2);
        assert!(response.trip_updates[0].contains_key("tampere"));
        assert!(response.trip_updates[1].contains_key("turku"));
        assert!(response.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_status_serializes_camel_case() {
        let status = StatusMaps::default();
        status.alerts.write().await.insert(
            "turku".to_string(),
            ProviderStatus {
                updated: Utc::now(),
                new_item_count: 3,
            },
        );

        let Json(response) = get_status(State(status)).await;
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["alerts"][0]["turku"]["newItemCount"], 3);
        assert!(body["tripUpdates"].as_array().unwrap().is_empty());
    }
}

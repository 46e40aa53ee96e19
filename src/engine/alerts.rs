//! Alert reconciliation.
//!
//! Alert feeds are always full snapshots, so this stage is a pure
//! filter-and-flatten: alerts without usable text are dropped, the rest
//! fan out into the five row sets the store replaces wholesale.

use tracing::info;

use crate::decode::{AlertEntity, NormalizedFeed, Translation};
use crate::model::{Cause, Effect};
use crate::store::{AlertBatch, AlertRow, InformedEntityRow, TranslatedTextRow};

/// Flattens one decoded alert feed into a replacement snapshot.
pub fn reconcile_alerts(region: &str, feed: &NormalizedFeed) -> AlertBatch {
    let mut batch = AlertBatch::default();

    for alert in &feed.alerts {
        if !usable(alert) {
            info!(
                region,
                alert_id = %alert.id,
                "Alert has no header or description text, skipping"
            );
            batch.skipped += 1;
            continue;
        }

        // Entries naming only a trip are too granular to act on; the
        // alert itself still goes in.
        let informed: Vec<InformedEntityRow> = alert
            .informed_entities
            .iter()
            .filter(|e| e.agency_id.is_some() || e.route_id.is_some() || e.stop_id.is_some())
            .map(|e| InformedEntityRow {
                alert_id: alert.id.clone(),
                agency_id: e.agency_id.clone(),
                route_id: e.route_id.clone(),
                route_type: e.route_type,
                stop_id: e.stop_id.clone(),
                trip_id: e.trip_id.clone(),
            })
            .collect();

        // A feed may repeat an entity id; the later occurrence wins.
        if let Some(pos) = batch.alerts.iter().position(|a| a.id == alert.id) {
            batch.alerts.remove(pos);
            batch.informed_entities.retain(|r| r.alert_id != alert.id);
            batch.header_texts.retain(|r| r.alert_id != alert.id);
            batch.description_texts.retain(|r| r.alert_id != alert.id);
            batch.urls.retain(|r| r.alert_id != alert.id);
        }

        batch.alerts.push(AlertRow {
            id: alert.id.clone(),
            start_time: alert.active_start,
            end_time: alert.active_end,
            cause: Cause::from_code(alert.cause).as_str().to_string(),
            effect: Effect::from_code(alert.effect).as_str().to_string(),
        });
        batch.informed_entities.extend(informed);
        batch
            .header_texts
            .extend(text_rows(&alert.id, &alert.header_texts));
        batch
            .description_texts
            .extend(text_rows(&alert.id, &alert.description_texts));
        batch.urls.extend(text_rows(&alert.id, &alert.url_texts));
    }

    batch
}

fn usable(alert: &AlertEntity) -> bool {
    let has_text = |texts: &[Translation]| texts.iter().any(|t| !t.text.trim().is_empty());
    has_text(&alert.header_texts) && has_text(&alert.description_texts)
}

fn text_rows(alert_id: &str, texts: &[Translation]) -> Vec<TranslatedTextRow> {
    texts
        .iter()
        .filter(|t| !t.text.trim().is_empty())
        .map(|t| TranslatedTextRow {
            alert_id: alert_id.to_string(),
            translated_text: t.text.clone(),
            language_code: t.language.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::InformedEntity;

    fn translation(text: &str, language: &str) -> Translation {
        Translation {
            text: text.to_string(),
            language: Some(language.to_string()),
        }
    }

    fn alert(id: &str) -> AlertEntity {
        AlertEntity {
            id: id.to_string(),
            active_start: Some(1_700_000_000),
            active_end: Some(1_700_003_600),
            cause: Some(8),
            effect: Some(4),
            informed_entities: vec![InformedEntity {
                route_id: Some("R1".to_string()),
                ..Default::default()
            }],
            header_texts: vec![translation("Poikkeus", "fi"), translation("Disruption", "en")],
            description_texts: vec![translation("Linja 1 myöhässä", "fi")],
            url_texts: Vec::new(),
        }
    }

    fn feed(alerts: Vec<AlertEntity>) -> NormalizedFeed {
        NormalizedFeed {
            alerts,
            ..Default::default()
        }
    }

    #[test]
    fn test_alert_flattens_into_row_sets() {
        let batch = reconcile_alerts("testville", &feed(vec![alert("a1")]));

        assert_eq!(batch.alerts.len(), 1);
        assert_eq!(batch.alerts[0].cause, "WEATHER");
        assert_eq!(batch.alerts[0].effect, "DETOUR");
        assert_eq!(batch.informed_entities.len(), 1);
        assert_eq!(batch.header_texts.len(), 2);
        assert_eq!(batch.description_texts.len(), 1);
        assert!(batch.urls.is_empty());
        assert_eq!(batch.skipped, 0);
    }

    #[test]
    fn test_alert_without_text_is_skipped() {
        let mut blank = alert("a1");
        blank.description_texts = vec![translation("   ", "fi")];

        let batch = reconcile_alerts("testville", &feed(vec![blank]));
        assert!(batch.alerts.is_empty());
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_trip_only_informed_entity_is_dropped() {
        let mut trip_only = alert("a1");
        trip_only.informed_entities = vec![InformedEntity {
            trip_id: Some("T1".to_string()),
            ..Default::default()
        }];

        let batch = reconcile_alerts("testville", &feed(vec![trip_only]));
        // The entity row vanishes but the alert and its texts remain.
        assert!(batch.informed_entities.is_empty());
        assert_eq!(batch.alerts.len(), 1);
        assert_eq!(batch.header_texts.len(), 2);
        assert_eq!(batch.skipped, 0);
    }

    #[test]
    fn test_unknown_codes_fall_back_to_unknown() {
        let mut vague = alert("a1");
        vague.cause = None;
        vague.effect = Some(99);

        let batch = reconcile_alerts("testville", &feed(vec![vague]));
        assert_eq!(batch.alerts[0].cause, "UNKNOWN_CAUSE");
        assert_eq!(batch.alerts[0].effect, "UNKNOWN_EFFECT");
    }

    #[test]
    fn test_duplicate_alert_id_keeps_later_occurrence() {
        let first = alert("a1");
        let mut second = alert("a1");
        second.effect = Some(1); // NO_SERVICE

        let batch = reconcile_alerts("testville", &feed(vec![first, second]));
        assert_eq!(batch.alerts.len(), 1);
        assert_eq!(batch.alerts[0].effect, "NO_SERVICE");
        assert_eq!(batch.informed_entities.len(), 1);
        assert_eq!(batch.header_texts.len(), 2);
    }
}

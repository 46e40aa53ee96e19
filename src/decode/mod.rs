//! Per-source feed decoders.
//!
//! Every region publishes realtime data in its own format: standard
//! GTFS-Realtime protobuf, or one of two proprietary SIRI-flavoured JSON
//! layouts. A decoder turns the raw payload into the one normalized shape
//! the reconciliation engine understands; which decoder runs is fixed per
//! source at configuration time.

pub mod gtfs_rt;
pub mod journeys;
pub mod siri;

use anyhow::{Result, bail};
use chrono_tz::Tz;

/// Decoder strategy, selected per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    /// GTFS-Realtime protobuf `FeedMessage`.
    GtfsRt,
    /// SIRI-like vehicle-monitoring JSON (Turku layout).
    Siri,
    /// Journeys-API service-delivery JSON (Tampere layout).
    Journeys,
}

impl DecoderKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "gtfsrt" => Ok(Self::GtfsRt),
            "siri" => Ok(Self::Siri),
            "journeys" => Ok(Self::Journeys),
            other => bail!("unknown feed type: {other}"),
        }
    }

    /// Decodes one raw payload. `tz` is the region's timezone, used by
    /// the JSON decoders to turn epoch departure instants into the
    /// wall-clock date and time strings the normalized shape carries.
    pub fn decode(&self, bytes: &[u8], tz: Tz) -> Result<NormalizedFeed> {
        match self {
            Self::GtfsRt => gtfs_rt::decode(bytes),
            Self::Siri => siri::decode(bytes, tz),
            Self::Journeys => journeys::decode(bytes, tz),
        }
    }
}

/// One decoded feed cycle, independent of the source format.
#[derive(Debug, Default)]
pub struct NormalizedFeed {
    /// Feed header timestamp, epoch seconds.
    pub timestamp: Option<i64>,
    /// True when the payload is a complete snapshot rather than a delta.
    pub full_dataset: bool,
    pub trip_updates: Vec<TripUpdateEntity>,
    pub alerts: Vec<AlertEntity>,
}

#[derive(Debug, Default)]
pub struct TripUpdateEntity {
    pub trip: TripDescriptor,
    pub vehicle: Option<VehicleInfo>,
    pub stop_time_events: Vec<StopTimeEventUpdate>,
    /// Observation timestamp for this entity, epoch seconds.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Default)]
pub struct TripDescriptor {
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<i16>,
    /// Wall-clock `HH:MM:SS` (or `HH:MM`; some sources omit seconds).
    pub start_time: Option<String>,
    /// `YYYYMMDD`.
    pub start_date: Option<String>,
    pub schedule_relationship: Option<i32>,
}

#[derive(Debug, Default, Clone)]
pub struct VehicleInfo {
    pub id: Option<String>,
    pub label: Option<String>,
    pub license_plate: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct StopTimeEventUpdate {
    pub stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub arrival: Option<TimedEvent>,
    pub departure: Option<TimedEvent>,
    pub schedule_relationship: Option<i32>,
}

/// A realtime observation for one side (arrival or departure) of a stop
/// visit. At least one of `delay` and `time` must be set for the event to
/// be usable.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimedEvent {
    /// Seconds late (positive) or early (negative).
    pub delay: Option<i64>,
    /// Absolute epoch seconds.
    pub time: Option<i64>,
    pub uncertainty: Option<i32>,
}

impl TimedEvent {
    pub fn has_data(&self) -> bool {
        self.delay.is_some() || self.time.is_some()
    }
}

#[derive(Debug, Default)]
pub struct AlertEntity {
    pub id: String,
    pub active_start: Option<i64>,
    pub active_end: Option<i64>,
    pub cause: Option<i32>,
    pub effect: Option<i32>,
    pub informed_entities: Vec<InformedEntity>,
    pub header_texts: Vec<Translation>,
    pub description_texts: Vec<Translation>,
    pub url_texts: Vec<Translation>,
}

#[derive(Debug, Default, Clone)]
pub struct InformedEntity {
    pub agency_id: Option<String>,
    pub route_id: Option<String>,
    pub route_type: Option<i32>,
    pub stop_id: Option<String>,
    pub trip_id: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct Translation {
    pub text: String,
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_kind_parses() {
        assert_eq!(DecoderKind::parse("gtfsrt").unwrap(), DecoderKind::GtfsRt);
        assert_eq!(DecoderKind::parse("siri").unwrap(), DecoderKind::Siri);
        assert_eq!(
            DecoderKind::parse("journeys").unwrap(),
            DecoderKind::Journeys
        );
        assert!(DecoderKind::parse("csv").is_err());
    }

    #[test]
    fn test_timed_event_has_data() {
        assert!(!TimedEvent::default().has_data());
        assert!(
            TimedEvent {
                delay: Some(30),
                ..Default::default()
            }
            .has_data()
        );
        assert!(
            TimedEvent {
                time: Some(1_700_000_000),
                ..Default::default()
            }
            .has_data()
        );
    }
}

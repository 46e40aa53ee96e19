//! Environment-driven configuration.
//!
//! One `SOURCES` list names the regions; everything else is a
//! `{REGION}_*` variable with a default. Values are read once at startup
//! and a bad value fails the process immediately.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use chrono_tz::Tz;

use crate::decode::DecoderKind;

const DEFAULT_UPDATE_INTERVAL_MS: u64 = 15_000;
const DEFAULT_KEEP_OLD_SECONDS: i64 = 1_800;
const DEFAULT_TIMEZONE: &str = "Europe/Helsinki";
const DEFAULT_SERVER_PORT: u16 = 8080;

/// Configuration for one polled feed.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Region name, also the table prefix in the database.
    pub region: String,
    pub feed_url: String,
    pub feed_type: DecoderKind,
    /// Separate alert feed, always GTFS-Realtime. Optional; most regions
    /// do not publish one.
    pub alerts_url: Option<String>,
    pub update_interval: Duration,
    /// `"Header-Name: value"` to attach to every request.
    pub auth_header: Option<String>,
    /// Trip updates older than this are swept each cycle.
    pub keep_old_seconds: i64,
    pub timezone: Tz,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    pub database_url: String,
    pub server_port: u16,
    pub user_agent: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let sources_list =
            env::var("SOURCES").context("SOURCES must list at least one region")?;
        let mut sources = Vec::new();
        for region in sources_list.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            sources.push(source_from_env(region)?);
        }
        ensure!(!sources.is_empty(), "SOURCES must list at least one region");

        Ok(Self {
            sources,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            server_port: match env::var("SERVER_PORT") {
                Ok(port) => port.parse().context("SERVER_PORT must be a port number")?,
                Err(_) => DEFAULT_SERVER_PORT,
            },
            user_agent: env::var("SERVER_USER_AGENT").unwrap_or_default(),
        })
    }
}

fn source_from_env(region: &str) -> Result<SourceConfig> {
    let var = |suffix: &str| env::var(format!("{}_{suffix}", region.to_uppercase()));

    let feed_url = var("FEED_URL")
        .with_context(|| format!("{}_FEED_URL is required", region.to_uppercase()))?;
    let feed_type = match var("FEED_TYPE") {
        Ok(value) => DecoderKind::parse(&value)
            .with_context(|| format!("{}_FEED_TYPE", region.to_uppercase()))?,
        Err(_) => DecoderKind::GtfsRt,
    };
    let update_interval = match var("UPDATE_INTERVAL") {
        Ok(ms) => Duration::from_millis(
            ms.parse()
                .with_context(|| format!("{}_UPDATE_INTERVAL must be milliseconds", region.to_uppercase()))?,
        ),
        Err(_) => Duration::from_millis(DEFAULT_UPDATE_INTERVAL_MS),
    };
    let keep_old_seconds = match var("KEEP_OLD_SECONDS") {
        Ok(secs) => secs
            .parse()
            .with_context(|| format!("{}_KEEP_OLD_SECONDS must be seconds", region.to_uppercase()))?,
        Err(_) => DEFAULT_KEEP_OLD_SECONDS,
    };
    let timezone: Tz = var("TIMEZONE")
        .unwrap_or_else(|_| DEFAULT_TIMEZONE.to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("{}_TIMEZONE: {e}", region.to_uppercase()))?;

    Ok(SourceConfig {
        region: region.to_string(),
        feed_url,
        feed_type,
        alerts_url: var("ALERTS_URL").ok(),
        update_interval,
        auth_header: var("AUTH_HEADER").ok(),
        keep_old_seconds,
        timezone,
    })
}

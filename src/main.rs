//! CLI entry point for the realtime transit ingest service.
//!
//! Provides subcommands for running the polling service and for decoding
//! a single feed payload without touching the database.

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::ffi::OsStr;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_rt_ingest::config::Config;
use transit_rt_ingest::decode::DecoderKind;
use transit_rt_ingest::fetch::{BasicClient, fetch_bytes};
use transit_rt_ingest::providers::{Payload, StatusMaps, run_source};
use transit_rt_ingest::server;

#[derive(Parser)]
#[command(name = "transit_rt_ingest")]
#[command(about = "Realtime transit feed ingest service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll all configured sources and serve the status endpoint
    Serve,
    /// Decode one feed payload from a file or URL and log a summary
    Analyze {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Feed format: gtfsrt, siri or journeys
        #[arg(short, long, default_value = "gtfsrt")]
        feed_type: String,

        /// Timezone for wall-clock conversion in the JSON decoders
        #[arg(short, long, default_value = "Europe/Helsinki")]
        timezone: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_rt_ingest.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_rt_ingest.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => serve().await?,
        Commands::Analyze {
            source,
            feed_type,
            timezone,
        } => {
            let bytes = fetcher(&source).await?;
            let decoder = DecoderKind::parse(&feed_type)?;
            let tz: chrono_tz::Tz = timezone
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid timezone: {e}"))?;
            let feed = decoder.decode(&bytes, tz)?;

            info!(
                timestamp = feed.timestamp,
                full_dataset = feed.full_dataset,
                trip_updates = feed.trip_updates.len(),
                alerts = feed.alerts.len(),
                "Feed decoded"
            );
        }
    }

    Ok(())
}

async fn serve() -> Result<()> {
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.sources.len() as u32 * 2)
        .connect(&config.database_url)
        .await?;
    info!("Database pool ready");

    let status = StatusMaps::default();

    for source in &config.sources {
        tokio::spawn(run_source(
            source.clone(),
            Payload::TripUpdates,
            pool.clone(),
            status.clone(),
            config.user_agent.clone(),
        ));
        if source.alerts_url.is_some() {
            tokio::spawn(run_source(
                source.clone(),
                Payload::Alerts,
                pool.clone(),
                status.clone(),
                config.user_agent.clone(),
            ));
        }
    }

    server::serve(config.server_port, status).await
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(fields(source = %url))]
async fn fetcher(url: &String) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::new();
        fetch_bytes(&client, url, "").await?
    } else {
        std::fs::read(url)?
    };
    Ok(bytes)
}

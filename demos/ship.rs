// Ship this process's own metrics to Elasticsearch with bulk-reporter

use anyhow::Result;
use bulk_reporter::client::ElasticsearchClient;
use bulk_reporter::collection::MemoryCollection;
use bulk_reporter::config::{ConfigBuilder, ShipperConfig};
use bulk_reporter::reporter::{Reporter, log_events};
use bulk_reporter::util::logging;
use clap::Parser;
use log::info;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Command line arguments for the ship example
#[derive(Parser, Debug)]
#[command(name = "ship", about = "Periodically ship process metrics to Elasticsearch")]
struct Args {
    /// Path to the configuration file (required)
    #[arg(short, long)]
    config: PathBuf,

    /// Interval between exports in seconds, overrides the configured one
    #[arg(short, long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigBuilder::<ShipperConfig>::new()
        .add_file(&args.config)
        .add_env("SHIPPER")
        .build()?;

    logging::init(&config.log_level)?;
    info!("Shipping to {}", config.elasticsearch.url);

    let client = Arc::new(ElasticsearchClient::new(config.elasticsearch.clone())?);
    let reporter = Reporter::builder(client)
        .config(config.reporter.clone())
        .build()?;

    let process = Arc::new(MemoryCollection::named("process"));
    reporter.add_collection(process.clone())?;

    tokio::spawn(log_events(reporter.subscribe()));

    reporter.start(args.interval.map(Duration::from_secs))?;

    let started = Instant::now();
    let mut ticks: u64 = 0;
    let mut sampler = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sampler.tick() => {
                ticks += 1;
                process.set("uptime", json!({ "seconds": started.elapsed().as_secs() }))?;
                process.set("samples", ticks)?;
            }
        }
    }

    info!("Shutting down");
    reporter.stop().await?;
    Ok(())
}

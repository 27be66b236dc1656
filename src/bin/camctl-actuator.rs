//! Reads per-frame detection records on stdin and drives the actuator
//!
//! Pipe the worker's JSON detection output into this process.

use camctl::actuator::{self, CommandActuator};
use camctl::config::Config;
use camctl::debounce::Debouncer;

use anyhow::Result;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    config.validate()?;

    tracing::info!(
        "Watching for {:?} (confidence > {}, on after {} frames, off after {})",
        config.debounce.watched_label,
        config.debounce.confidence_threshold,
        config.debounce.activation_threshold,
        config.debounce.deactivation_threshold
    );

    let mut debouncer = Debouncer::new(&config.debounce);
    let mut actuator = CommandActuator::new(&config.actuator);

    let frames = actuator::drive(
        BufReader::new(tokio::io::stdin()),
        &mut debouncer,
        &mut actuator,
    )
    .await?;

    tracing::info!("Input closed after {} frames", frames);
    Ok(())
}

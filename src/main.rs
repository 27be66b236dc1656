use camctl::app::App;
use camctl::camera;
use camctl::config::Config;
use camctl::controls;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting camctl");

    let config = Config::load()?;
    config.validate()?;

    let backend = camera::backend_from_config(&config.camera)?;
    tracing::info!("Camera backend: {}", backend.describe());

    let (command_tx, command_rx) = mpsc::channel(10);
    tokio::spawn(async move {
        if let Err(e) = controls::monitor_stdin(command_tx).await {
            tracing::error!("Console input failed: {:#}", e);
        }
    });

    tracing::info!("Ready! {}", controls::HELP);

    App::new(config, backend).run(command_rx).await
}

//! hass-eink server.
//!
//! Configured through environment variables, see [`hass_eink::config`].

use std::sync::Arc;

use hass_eink::chrome::{ChromeBrowser, LaunchSettings};
use hass_eink::convert::Magick;
use hass_eink::schedule::{self, Mode};
use hass_eink::session::{self, Credentials};
use hass_eink::{server, Config, Service};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Configuration problems abort before a browser or socket is opened
    let config = Config::from_env()?;
    config.validate()?;
    let mode = Mode::from_config(&config)?;

    tracing::info!("Starting browser...");
    let browser = ChromeBrowser::launch(LaunchSettings::from_config(&config)).await?;

    let credentials = Credentials {
        access_token: config.access_token.clone(),
        language: config.language.clone(),
    };
    session::authenticate(
        &browser,
        &config.base_url,
        &credentials,
        config.rendering_timeout,
    )
    .await?;

    let service = Arc::new(Service::new(
        &config,
        Arc::new(browser),
        Arc::new(Magick::new(config.convert_backend)),
    ));

    let _ticker = schedule::start(service.clone(), mode).await;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("Server is running at {}", config.port);
    axum::serve(listener, server::router(service)).await?;

    Ok(())
}

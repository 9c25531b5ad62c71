//! # hass-eink
//!
//! Render Home Assistant dashboards to images for e-ink displays (Kindle,
//! Kobo, ...) and serve the latest image of each page over HTTP.
//!
//! One headless browser session is launched and logged in at startup. Pages
//! are rendered through that session, converted to the device's color
//! profile (gamma, dithering, rotation, levels, bit depth) and either stored
//! on disk or returned directly, depending on the mode:
//!
//! - **Scheduled** (default): every page is rendered at startup and on a cron
//!   schedule; requests are answered from disk.
//! - **Eager**: every request renders its page on the spot.
//!
//! ## HTTP Surface
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/`, `/<N>` | GET | Latest image of page 1 / page N |
//! | `/RELOAD` | POST | Render every page now |
//!
//! Devices can report battery state with `?batteryLevel=<0-100>&isCharging=<Yes|No>`.
//! When a page has a battery webhook configured, the state is posted to
//! `<HA_BASE_URL>/api/webhook/<id>` after each render of that page.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hass_eink::{chrome, convert::Magick, schedule, server, session, Config, Service};
//!
//! let config = Config::from_env()?;
//! config.validate()?;
//!
//! let browser = chrome::ChromeBrowser::launch(chrome::LaunchSettings::from_config(&config)).await?;
//! session::authenticate(&browser, &config.base_url, &credentials, config.rendering_timeout).await?;
//!
//! let service = Arc::new(Service::new(&config, Arc::new(browser), Arc::new(Magick::new(config.convert_backend))));
//! schedule::start(service.clone(), schedule::Mode::from_config(&config)?).await;
//! axum::serve(listener, server::router(service)).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `chrome` (default) - Chrome/Chromium backend via `headless_chrome`

pub mod battery;
pub mod browser;
pub mod config;
pub mod convert;
mod error;
pub mod render;
pub mod schedule;
pub mod server;
pub mod service;
pub mod session;
pub mod store;
pub mod webhook;

#[cfg(feature = "chrome")]
pub mod chrome;

#[cfg(test)]
mod testutil;

pub use battery::{BatteryReport, BatteryState, BatteryTracker};
pub use config::{Config, ImageFormat, PageConfig, PostProcessProfile};
pub use error::Error;
pub use service::{BatchReport, Service};

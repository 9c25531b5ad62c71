//! Dashboard page to screenshot rendering.
//!
//! One render opens a fresh tab on the shared browser session, prepares it for
//! the page (color scheme, viewport, zoom) and captures the viewport.
//!
//! # Example
//!
//! ```rust,ignore
//! use hass_eink::render::{render_page, RenderSettings};
//!
//! let settings = RenderSettings::from_config(&config);
//! if let Some(png) = render_page(&browser, &settings, &config.pages[0]).await {
//!     // raw screenshot, not yet converted for the device
//! }
//! ```

use std::future::Future;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::browser::{Browser, BrowserContext};
use crate::config::{Config, PageConfig};
use crate::error::Error;

/// Floor for the readiness wait, however long navigation took.
pub const MIN_READY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Settings shared by every page render.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Dashboard server, e.g. `http://hass.local:8123`
    pub base_url: String,
    /// Budget for navigation plus readiness
    pub rendering_timeout: Duration,
    /// Element whose presence marks the page as ready
    pub ready_selector: String,
    /// Leave tabs open after rendering (debug mode)
    pub keep_open: bool,
}

impl RenderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            rendering_timeout: config.rendering_timeout,
            ready_selector: config.ready_selector.clone(),
            keep_open: config.debug,
        }
    }
}

/// URL a page is rendered from.
///
/// With `include_cache_break_query` the current time in milliseconds is
/// appended as a query string.
pub fn page_url(base_url: &str, page: &PageConfig, now: SystemTime) -> String {
    let mut url = format!("{}{}", base_url, page.screenshot_url);
    if page.include_cache_break_query {
        let millis = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        url.push_str(&format!("?{}", millis));
    }
    url
}

/// Time left for the readiness wait after navigation used `elapsed`.
pub fn ready_timeout(rendering_timeout: Duration, elapsed: Duration) -> Duration {
    rendering_timeout
        .saturating_sub(elapsed)
        .max(MIN_READY_TIMEOUT)
}

/// Stylesheet applying the page's zoom.
fn zoom_css(scaling: f64) -> String {
    format!(
        "body {{ zoom: {}%; overflow: hidden; }}",
        scaling * 100.0
    )
}

/// Render a page to a raw screenshot.
///
/// Failures are logged and reported as `None`; a page that cannot be rendered
/// is an expected outcome, not an error.
pub async fn render_page(
    browser: &dyn Browser,
    settings: &RenderSettings,
    page: &PageConfig,
) -> Option<Vec<u8>> {
    let url = page_url(&settings.base_url, page, SystemTime::now());
    tracing::info!("Rendering {} to image...", url);

    let context = match browser.new_context().await {
        Ok(context) => context,
        Err(e) => {
            tracing::error!("Failed to render {}: {}", url, e);
            return None;
        }
    };

    let result = capture(context.as_ref(), settings, page, &url).await;

    if !settings.keep_open {
        if let Err(e) = context.close().await {
            tracing::warn!("Failed to close tab for {}: {}", url, e);
        }
    }

    match result {
        Ok(image) => {
            tracing::debug!("Captured {}: {} bytes", url, image.len());
            Some(image)
        }
        Err(e) => {
            tracing::error!("Failed to render {}: {}", url, e);
            None
        }
    }
}

async fn capture(
    context: &dyn BrowserContext,
    settings: &RenderSettings,
    page: &PageConfig,
    url: &str,
) -> Result<Vec<u8>, Error> {
    context
        .emulate_color_scheme(page.prefers_color_scheme)
        .await?;

    let viewport = page.viewport();
    context.set_viewport(viewport).await?;

    let started = Instant::now();
    with_timeout(
        settings.rendering_timeout,
        "navigating",
        context.navigate(url, settings.rendering_timeout),
    )
    .await?;

    let ready_budget = ready_timeout(settings.rendering_timeout, started.elapsed());
    with_timeout(
        ready_budget,
        "waiting for page readiness",
        context.wait_for_ready_signal(&settings.ready_selector, ready_budget),
    )
    .await?;

    context.inject_style(&zoom_css(page.scaling)).await?;

    if !page.rendering_delay.is_zero() {
        tokio::time::sleep(page.rendering_delay).await;
    }

    context.screenshot(page.image_format, viewport).await
}

/// Bound a browser call by `timeout`, whether or not the backend honors it.
async fn with_timeout<T>(
    timeout: Duration,
    what: &'static str,
    future: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    // Backends enforce the timeout themselves; allow them a little slack
    let deadline = timeout + Duration::from_millis(500);
    tokio::time::timeout(deadline, future)
        .await
        .map_err(|_| Error::Timeout(timeout.as_millis(), what))?
}

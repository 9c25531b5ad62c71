//! Process-scoped service state.
//!
//! [`Service`] owns everything the scheduler and the HTTP server share: the
//! page registry, the browser session, the converter, the output store and
//! the battery state. It is created once at startup and passed around as
//! `Arc<Service>`.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::battery::BatteryTracker;
use crate::browser::Browser;
use crate::config::{Config, PageConfig};
use crate::convert::{self, PixelTransform};
use crate::render::{render_page, RenderSettings};
use crate::store::OutputStore;
use crate::webhook::WebhookNotifier;

/// Outcome of one batch render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Indices of pages rendered (and stored, outside eager mode)
    pub rendered: Vec<usize>,
    /// Indices of pages that kept their previous image
    pub failed: Vec<usize>,
}

/// Shared render/serve state.
pub struct Service {
    pages: Vec<PageConfig>,
    eager: bool,
    settings: RenderSettings,
    browser: Arc<dyn Browser>,
    transform: Arc<dyn PixelTransform>,
    store: OutputStore,
    battery: BatteryTracker,
    webhook: WebhookNotifier,
    /// Serializes batch renders; a second reload waits for the running one
    batch: Mutex<()>,
}

impl Service {
    /// Build the service from a validated configuration.
    pub fn new(
        config: &Config,
        browser: Arc<dyn Browser>,
        transform: Arc<dyn PixelTransform>,
    ) -> Self {
        Self {
            pages: config.pages.clone(),
            eager: config.eager_render,
            settings: RenderSettings::from_config(config),
            browser,
            transform,
            store: OutputStore,
            battery: BatteryTracker::new(),
            webhook: WebhookNotifier::new(&config.base_url, config.ignore_certificate_errors),
            batch: Mutex::new(()),
        }
    }

    pub fn pages(&self) -> &[PageConfig] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&PageConfig> {
        self.pages.get(index)
    }

    /// Render on request instead of serving stored images.
    pub fn is_eager(&self) -> bool {
        self.eager
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    pub fn battery(&self) -> &BatteryTracker {
        &self.battery
    }

    /// Render and convert one page.
    ///
    /// On success the page's battery state is reported to its webhook, if
    /// one is configured and a level is known.
    pub async fn render_and_convert(&self, index: usize) -> Option<Vec<u8>> {
        let page = self.pages.get(index)?;
        let raw = render_page(self.browser.as_ref(), &self.settings, page).await?;

        tracing::info!("Converting rendered screenshot of page {}...", index + 1);
        let image = match convert::process(self.transform.as_ref(), raw, page).await {
            Ok(image) => image,
            Err(e) => {
                tracing::error!("Failed to convert page {}: {}", index + 1, e);
                return None;
            }
        };
        tracing::info!("Finished page {}", index + 1);

        if let Some(state) = self.battery.get(index) {
            self.webhook
                .notify(index, state, page.battery_webhook.as_deref());
        }

        Some(image)
    }

    /// Render every page in order.
    ///
    /// Outside eager mode each successful image replaces the stored one; a
    /// failed page keeps whatever was stored before. One page failing never
    /// stops the batch.
    pub async fn render_batch(&self) -> BatchReport {
        let _running = self.batch.lock().await;
        let mut report = BatchReport::default();

        for (index, page) in self.pages.iter().enumerate() {
            let Some(image) = self.render_and_convert(index).await else {
                tracing::warn!(
                    "Failed to render page {}. Falling back to existing image, if one exists.",
                    index + 1
                );
                report.failed.push(index);
                continue;
            };

            if !self.eager {
                if let Err(e) = self.store.write(page, &image).await {
                    tracing::error!("Failed to store page {}: {}", index + 1, e);
                    report.failed.push(index);
                    continue;
                }
            }
            report.rendered.push(index);
        }

        tracing::info!(
            "Batch render finished: {} rendered, {} failed",
            report.rendered.len(),
            report.failed.len()
        );
        report
    }

    /// Remove every page's stored output (eager mode startup).
    pub async fn clear_outputs(&self) {
        for page in &self.pages {
            if let Err(e) = self.store.clear(page).await {
                tracing::error!("{}", e);
            }
        }
    }
}

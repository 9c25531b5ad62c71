//! Battery reporting to Home Assistant webhooks.
//!
//! Notifications are fire-and-forget: the POST runs on its own task and any
//! failure is only logged.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::battery::BatteryState;
use crate::error::Error;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Posts battery state to `<base_url>/api/webhook/<id>`.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    base_url: String,
}

impl WebhookNotifier {
    /// Create a notifier for the given dashboard base URL.
    ///
    /// `accept_invalid_certs` disables TLS certificate verification for
    /// dashboards served with self-signed certificates.
    pub fn new(base_url: impl Into<String>, accept_invalid_certs: bool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Set a custom HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Endpoint for a webhook id.
    pub fn url(&self, webhook_id: &str) -> String {
        format!(
            "{}/api/webhook/{}",
            self.base_url.trim_end_matches('/'),
            webhook_id
        )
    }

    /// Send the page's battery state in the background.
    ///
    /// Does nothing and returns `None` unless a webhook id is configured and
    /// the battery level is known. The returned handle never needs awaiting.
    pub fn notify(
        &self,
        page_index: usize,
        state: BatteryState,
        webhook_id: Option<&str>,
    ) -> Option<JoinHandle<()>> {
        let webhook_id = webhook_id?;
        state.battery_level?;

        let notifier = self.clone();
        let url = self.url(webhook_id);

        Some(tokio::spawn(async move {
            if let Err(e) = notifier.send(&url, &state).await {
                tracing::error!("Update device {} at {} failed: {}", page_index, url, e);
            }
        }))
    }

    async fn send(&self, url: &str, state: &BatteryState) -> Result<(), Error> {
        let response = self.http.post(url).json(state).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, body });
        }

        tracing::debug!("Reported battery state to {}", url);
        Ok(())
    }
}

//! Rendering capability.
//!
//! The render pipeline only needs a handful of browser operations. They are
//! expressed as two traits so the pipeline can run against a real browser
//! (see the `chrome` module) or a scripted one in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ColorScheme, ImageFormat, ScreenSize};
use crate::error::Error;

/// A long-lived browser session shared by every render.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a short-lived context (a tab) for one navigation/capture.
    ///
    /// Contexts share the session's persistent client-side storage.
    async fn new_context(&self) -> Result<Box<dyn BrowserContext>, Error>;
}

/// One ephemeral rendering context.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Navigate and wait for the load to settle.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), Error>;

    /// Emulate the `prefers-color-scheme` media feature.
    async fn emulate_color_scheme(&self, scheme: ColorScheme) -> Result<(), Error>;

    async fn set_viewport(&self, size: ScreenSize) -> Result<(), Error>;

    /// Wait until an element matching `selector` exists.
    async fn wait_for_ready_signal(&self, selector: &str, timeout: Duration)
        -> Result<(), Error>;

    /// Add a `<style>` element with the given CSS to the document.
    async fn inject_style(&self, css: &str) -> Result<(), Error>;

    /// Write entries into the origin's `localStorage`.
    async fn set_local_storage(&self, entries: &[(&str, String)]) -> Result<(), Error>;

    /// Capture the top-left `clip` area of the viewport.
    async fn screenshot(&self, format: ImageFormat, clip: ScreenSize) -> Result<Vec<u8>, Error>;

    async fn close(&self) -> Result<(), Error>;
}

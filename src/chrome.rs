//! Chrome/Chromium backend for the rendering capability.
//!
//! Uses the `headless_chrome` crate to drive the browser over the DevTools
//! protocol. The crate's API is blocking, so every call runs on tokio's
//! blocking pool.
//!
//! # Requirements
//!
//! - Google Chrome or Chromium must be installed (or set `CHROME_PATH`)

use std::ffi::OsStr;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::LaunchOptions;

use crate::browser::{Browser, BrowserContext};
use crate::config::{ColorScheme, Config, ImageFormat, ScreenSize};
use crate::error::Error;

/// The browser is kept alive for the lifetime of the process; idle periods
/// between scheduled renders must not shut it down.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// How the browser process is started.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Browser UI language (`--lang`)
    pub language: String,
    /// Accept self-signed or otherwise invalid certificates
    pub ignore_certificate_errors: bool,
    /// Run without a window (disabled in debug mode)
    pub headless: bool,
    /// Give up if the browser has not started within this time
    pub launch_timeout: Duration,
    /// Browser executable, auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
}

impl LaunchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            language: config.language.clone(),
            ignore_certificate_errors: config.ignore_certificate_errors,
            headless: !config.debug,
            launch_timeout: config.browser_launch_timeout,
            chrome_path: config.chrome_path.clone(),
        }
    }

    /// Extra command line switches.
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-dev-shm-usage".to_string(),
            format!("--lang={}", self.language),
        ];
        if self.ignore_certificate_errors {
            args.push("--ignore-certificate-errors".to_string());
        }
        args
    }
}

/// A running Chrome instance.
#[derive(Clone)]
pub struct ChromeBrowser {
    browser: headless_chrome::Browser,
}

impl ChromeBrowser {
    /// Launch the browser.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionLaunch`] if Chrome is not found, exits, or does
    /// not come up within `settings.launch_timeout`.
    pub async fn launch(settings: LaunchSettings) -> Result<Self, Error> {
        let timeout = settings.launch_timeout;

        let launch = tokio::task::spawn_blocking(move || {
            let args = settings.args();
            let options = LaunchOptions::default_builder()
                .headless(settings.headless)
                .sandbox(false)
                .ignore_certificate_errors(settings.ignore_certificate_errors)
                .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
                .path(settings.chrome_path.clone())
                .args(args.iter().map(OsStr::new).collect())
                .build()
                .map_err(|e| {
                    Error::SessionLaunch(format!("Failed to build launch options: {}", e))
                })?;

            headless_chrome::Browser::new(options)
                .map_err(|e| Error::SessionLaunch(e.to_string()))
        });

        match tokio::time::timeout(timeout, launch).await {
            Ok(Ok(result)) => result.map(|browser| Self { browser }),
            Ok(Err(e)) => Err(Error::SessionLaunch(format!("Launch task failed: {}", e))),
            Err(_) => Err(Error::SessionLaunch(format!(
                "Browser did not start within {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn new_context(&self) -> Result<Box<dyn BrowserContext>, Error> {
        let browser = self.browser.clone();
        let tab = tokio::task::spawn_blocking(move || browser.new_tab().map_err(browser_error))
            .await
            .map_err(|e| Error::Browser(format!("Tab task failed: {}", e)))??;

        Ok(Box::new(ChromeContext { tab }))
    }
}

/// A browser tab used for a single render.
struct ChromeContext {
    tab: Arc<Tab>,
}

impl ChromeContext {
    /// Run a blocking tab operation off the async runtime.
    async fn run<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Tab) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| Error::Browser(format!("Tab task failed: {}", e)))?
    }

    async fn evaluate(&self, script: String) -> Result<(), Error> {
        self.run(move |tab| {
            tab.evaluate(&script, false)
                .map(|_| ())
                .map_err(browser_error)
        })
        .await
    }
}

#[async_trait]
impl BrowserContext for ChromeContext {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), Error> {
        let url = url.to_string();
        self.run(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url).map_err(browser_error)?;
            tab.wait_until_navigated().map_err(browser_error)?;
            Ok(())
        })
        .await
    }

    async fn emulate_color_scheme(&self, scheme: ColorScheme) -> Result<(), Error> {
        self.run(move |tab| {
            tab.call_method(Emulation::SetEmulatedMedia {
                media: None,
                features: Some(vec![Emulation::MediaFeature {
                    name: "prefers-color-scheme".to_string(),
                    value: scheme.as_str().to_string(),
                }]),
            })
            .map(|_| ())
            .map_err(browser_error)
        })
        .await
    }

    async fn set_viewport(&self, size: ScreenSize) -> Result<(), Error> {
        self.run(move |tab| {
            tab.call_method(device_metrics(size))
                .map(|_| ())
                .map_err(browser_error)
        })
        .await
    }

    async fn wait_for_ready_signal(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), Error> {
        let selector = selector.to_string();
        self.run(move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map(|_| ())
                .map_err(browser_error)
        })
        .await
    }

    async fn inject_style(&self, css: &str) -> Result<(), Error> {
        self.evaluate(style_script(css)?).await
    }

    async fn set_local_storage(&self, entries: &[(&str, String)]) -> Result<(), Error> {
        self.evaluate(local_storage_script(entries)?).await
    }

    async fn screenshot(&self, format: ImageFormat, clip: ScreenSize) -> Result<Vec<u8>, Error> {
        let format = match format {
            ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
            ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
        };
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: f64::from(clip.width),
            height: f64::from(clip.height),
            scale: 1.0,
        };

        self.run(move |tab| {
            tab.capture_screenshot(format, None, Some(clip), true)
                .map_err(browser_error)
        })
        .await
    }

    async fn close(&self) -> Result<(), Error> {
        self.run(|tab| tab.close(false).map(|_| ()).map_err(browser_error))
            .await
    }
}

fn browser_error(err: impl Display) -> Error {
    Error::Browser(err.to_string())
}

/// Device metrics for a desktop viewport of exactly `size` CSS pixels.
fn device_metrics(size: ScreenSize) -> Emulation::SetDeviceMetricsOverride {
    Emulation::SetDeviceMetricsOverride {
        width: size.width,
        height: size.height,
        device_scale_factor: 1.0,
        mobile: false,
        scale: None,
        screen_width: None,
        screen_height: None,
        position_x: None,
        position_y: None,
        dont_set_visible_size: None,
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    }
}

/// Script appending a `<style>` element with `css`.
fn style_script(css: &str) -> Result<String, Error> {
    Ok(format!(
        "(() => {{ const style = document.createElement('style'); \
         style.textContent = {}; \
         document.head.appendChild(style); }})()",
        serde_json::to_string(css)?
    ))
}

/// Script storing each entry with `localStorage.setItem`.
fn local_storage_script(entries: &[(&str, String)]) -> Result<String, Error> {
    let mut script = String::new();
    for (key, value) in entries {
        script.push_str(&format!(
            "localStorage.setItem({}, {});",
            serde_json::to_string(key)?,
            serde_json::to_string(value)?
        ));
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LaunchSettings {
        LaunchSettings {
            language: "de".to_string(),
            ignore_certificate_errors: false,
            headless: true,
            launch_timeout: Duration::from_secs(30),
            chrome_path: None,
        }
    }

    #[test]
    fn test_launch_args() {
        let args = settings().args();
        assert!(args.contains(&"--lang=de".to_string()));
        assert!(args.contains(&"--disable-dev-shm-usage".to_string()));
        assert!(!args.iter().any(|a| a == "--ignore-certificate-errors"));

        let insecure = LaunchSettings {
            ignore_certificate_errors: true,
            ..settings()
        };
        assert!(insecure
            .args()
            .contains(&"--ignore-certificate-errors".to_string()));
    }

    #[test]
    fn test_local_storage_script_escapes() {
        let script = local_storage_script(&[
            ("hassTokens", r#"{"access_token":"abc"}"#.to_string()),
            ("selectedLanguage", "\"en\"".to_string()),
        ])
        .unwrap();

        assert_eq!(
            script,
            r#"localStorage.setItem("hassTokens", "{\"access_token\":\"abc\"}");localStorage.setItem("selectedLanguage", "\"en\"");"#
        );
    }

    #[test]
    fn test_device_metrics() {
        let metrics = device_metrics(ScreenSize {
            width: 600,
            height: 800,
        });
        assert_eq!(metrics.width, 600);
        assert_eq!(metrics.height, 800);
        assert_eq!(metrics.device_scale_factor, 1.0);
        assert!(!metrics.mobile);
        assert_eq!(metrics.scale, None);
    }

    #[test]
    fn test_style_script() {
        let script = style_script("body { zoom: 150%; }").unwrap();
        assert!(script.contains(r#"style.textContent = "body { zoom: 150%; }";"#));
    }
}

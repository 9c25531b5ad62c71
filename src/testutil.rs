//! Test doubles for the browser and the pixel transform.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::post;
use axum::Router;

use crate::browser::{Browser, BrowserContext};
use crate::config::{ColorScheme, ImageFormat, PostProcessProfile, ScreenSize};
use crate::convert::PixelTransform;
use crate::error::Error;

/// A recorded browser call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    NewContext,
    Navigate(String),
    ColorScheme(ColorScheme),
    Viewport(ScreenSize),
    WaitForReady(String, Duration),
    InjectStyle(String),
    SetLocalStorage(Vec<String>),
    Screenshot(ImageFormat, ScreenSize),
    Close,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<Call>>,
    fail_on: Mutex<Vec<String>>,
    renders: AtomicUsize,
    navigation_delay: Mutex<Duration>,
}

/// Scripted browser. Screenshots contain the navigated URL, navigations to
/// URLs containing a `failing_on` pattern fail.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    shared: Arc<Shared>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(self, pattern: &str) -> Self {
        self.fail(pattern);
        self
    }

    pub fn fail(&self, pattern: &str) {
        lock(&self.shared.fail_on).push(pattern.to_string());
    }

    pub fn with_navigation_delay(self, delay: Duration) -> Self {
        *lock(&self.shared.navigation_delay) = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.shared.calls).clone()
    }

    /// Number of screenshots taken.
    pub fn renders(&self) -> usize {
        self.shared.renders.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        lock(&self.shared.calls).push(call);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_context(&self) -> Result<Box<dyn BrowserContext>, Error> {
        self.record(Call::NewContext);
        Ok(Box::new(FakeContext {
            browser: self.clone(),
            url: Mutex::new(String::new()),
        }))
    }
}

struct FakeContext {
    browser: FakeBrowser,
    url: Mutex<String>,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), Error> {
        self.browser.record(Call::Navigate(url.to_string()));

        let delay = *lock(&self.browser.shared.navigation_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = lock(&self.browser.shared.fail_on)
            .iter()
            .any(|pattern| url.contains(pattern.as_str()));
        if failing {
            return Err(Error::Browser(format!("net::ERR_CONNECTION_REFUSED at {}", url)));
        }

        *lock(&self.url) = url.to_string();
        Ok(())
    }

    async fn emulate_color_scheme(&self, scheme: ColorScheme) -> Result<(), Error> {
        self.browser.record(Call::ColorScheme(scheme));
        Ok(())
    }

    async fn set_viewport(&self, size: ScreenSize) -> Result<(), Error> {
        self.browser.record(Call::Viewport(size));
        Ok(())
    }

    async fn wait_for_ready_signal(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.browser
            .record(Call::WaitForReady(selector.to_string(), timeout));
        Ok(())
    }

    async fn inject_style(&self, css: &str) -> Result<(), Error> {
        self.browser.record(Call::InjectStyle(css.to_string()));
        Ok(())
    }

    async fn set_local_storage(&self, entries: &[(&str, String)]) -> Result<(), Error> {
        self.browser.record(Call::SetLocalStorage(
            entries.iter().map(|(k, _)| k.to_string()).collect(),
        ));
        Ok(())
    }

    async fn screenshot(&self, format: ImageFormat, clip: ScreenSize) -> Result<Vec<u8>, Error> {
        self.browser.record(Call::Screenshot(format, clip));
        self.browser.shared.renders.fetch_add(1, Ordering::SeqCst);
        Ok(format!("shot:{}", lock(&self.url)).into_bytes())
    }

    async fn close(&self) -> Result<(), Error> {
        self.browser.record(Call::Close);
        Ok(())
    }
}

/// Transform that tags the input instead of converting it.
pub struct TaggingTransform;

#[async_trait]
impl PixelTransform for TaggingTransform {
    async fn transform(
        &self,
        image: Vec<u8>,
        _profile: &PostProcessProfile,
        _rotation: i32,
        _format: ImageFormat,
    ) -> Result<Vec<u8>, Error> {
        let mut out = b"converted:".to_vec();
        out.extend(image);
        Ok(out)
    }
}

type Hits = Arc<Mutex<Vec<(String, String)>>>;

/// Local HTTP server recording webhook POSTs as `(path, body)`.
pub struct WebhookSink {
    pub base_url: String,
    hits: Hits,
}

impl WebhookSink {
    pub async fn start() -> Self {
        let hits = Hits::default();
        let app = Router::new()
            .route("/api/webhook/{id}", post(record_hit))
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            base_url: format!("http://{}", addr),
            hits,
        }
    }

    pub fn hits(&self) -> Vec<(String, String)> {
        lock(&self.hits).clone()
    }

    /// Wait until `count` requests arrived, then a little longer so stray
    /// requests show up too.
    pub async fn settle(&self, count: usize) -> Vec<(String, String)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.hits().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.hits()
    }
}

async fn record_hit(State(hits): State<Hits>, uri: Uri, body: String) -> StatusCode {
    lock(&hits).push((uri.path().to_string(), body));
    StatusCode::OK
}

/// Fresh, empty directory under the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "hass-eink-{}-{}-{}",
        name,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Configuration for tests: the given pages, a local base URL, scheduled mode.
pub fn test_config(pages: Vec<crate::config::PageConfig>) -> crate::config::Config {
    use crate::config::{Config, ConvertBackend, DEFAULT_READY_SELECTOR};

    Config {
        base_url: "http://hass.local:8123".to_string(),
        access_token: "token".to_string(),
        cron_job: "* * * * *".to_string(),
        cron_timezone: "UTC".to_string(),
        eager_render: false,
        convert_backend: ConvertBackend::GraphicsMagick,
        pages,
        port: 5000,
        rendering_timeout: Duration::from_secs(10),
        browser_launch_timeout: Duration::from_secs(30),
        language: "en".to_string(),
        debug: false,
        ignore_certificate_errors: false,
        ready_selector: DEFAULT_READY_SELECTOR.to_string(),
        chrome_path: None,
    }
}

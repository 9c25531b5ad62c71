//! Process and page configuration.
//!
//! Everything is read from environment variables once at startup. Pages are
//! numbered by suffix: page 1 uses the bare key (`HA_SCREENSHOT_URL`), page N
//! uses `_N` (`HA_SCREENSHOT_URL_2`). Reading stops at the first page without a
//! screenshot URL. Per-page keys fall back to the bare key, so a setting shared
//! by all pages only has to be given once.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use hass_eink::Config;
//!
//! let env: HashMap<&str, &str> = HashMap::from([
//!     ("HA_BASE_URL", "http://hass.local:8123"),
//!     ("HA_ACCESS_TOKEN", "secret"),
//!     ("HA_SCREENSHOT_URL", "/lovelace/0"),
//!     ("HA_SCREENSHOT_URL_2", "/lovelace/1"),
//!     ("ROTATION_2", "90"),
//! ]);
//!
//! let config = Config::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
//! config.validate().unwrap();
//!
//! assert_eq!(config.pages.len(), 2);
//! assert_eq!(config.pages[1].rotation, 90);
//! assert_eq!(config.pages[1].output_path.to_str(), Some("output/cover_2"));
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Default readiness selector: the root element of the Home Assistant frontend.
pub const DEFAULT_READY_SELECTOR: &str = "home-assistant";

/// Encoded image format of a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Lossless PNG
    Png,
    /// Lossy JPEG
    Jpeg,
}

impl ImageFormat {
    /// File extension and MIME subtype (`png` / `jpeg`).
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }

    /// Value for the `Content-Type` header.
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            _ => Err(Error::Config(format!("Unsupported image format '{}'", s))),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value emulated for the `prefers-color-scheme` media feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorScheme {
    #[default]
    Light,
    Dark,
}

impl ColorScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorScheme::Light => "light",
            ColorScheme::Dark => "dark",
        }
    }
}

impl FromStr for ColorScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(ColorScheme::Light),
            "dark" => Ok(ColorScheme::Dark),
            _ => Err(Error::Config(format!("Unsupported color scheme '{}'", s))),
        }
    }
}

/// Output color mode of the post-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    #[default]
    GrayScale,
    TrueColor,
}

impl ColorMode {
    /// Name understood by the magick `-type` option.
    pub fn as_str(self) -> &'static str {
        match self {
            ColorMode::GrayScale => "GrayScale",
            ColorMode::TrueColor => "TrueColor",
        }
    }
}

impl FromStr for ColorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grayscale" => Ok(ColorMode::GrayScale),
            "truecolor" => Ok(ColorMode::TrueColor),
            _ => Err(Error::Config(format!("Unsupported color mode '{}'", s))),
        }
    }
}

/// Width and height in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Color profile applied to a raw screenshot to make it device compatible.
#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessProfile {
    /// Bit depth of the output (default: 8)
    pub grayscale_depth: u32,
    /// Apply a 1/2.2 de-gamma curve
    pub remove_gamma: bool,
    /// Black point, percentage (`"5%"`) or absolute value
    pub black_level: String,
    /// White point, percentage (`"90%"`) or absolute value
    pub white_level: String,
    /// Enable dithering
    pub dither: bool,
    /// Output color mode
    pub color_mode: ColorMode,
}

impl Default for PostProcessProfile {
    fn default() -> Self {
        Self {
            grayscale_depth: 8,
            remove_gamma: false,
            black_level: "0%".to_string(),
            white_level: "100%".to_string(),
            dither: false,
            color_mode: ColorMode::GrayScale,
        }
    }
}

/// One dashboard page to render. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct PageConfig {
    /// Path appended to the base URL, e.g. `/lovelace/0`
    pub screenshot_url: String,
    /// Append a timestamp query to defeat caching
    pub include_cache_break_query: bool,
    pub image_format: ImageFormat,
    /// Output path without extension, e.g. `output/cover`
    pub output_path: PathBuf,
    /// Settle delay between styling and screenshot
    pub rendering_delay: Duration,
    pub rendering_screen_size: ScreenSize,
    /// Degrees, multiple of 90
    pub rotation: i32,
    /// `None` leaves the screenshot unmodified
    pub post_process: Option<PostProcessProfile>,
    pub prefers_color_scheme: ColorScheme,
    /// CSS zoom factor (1.0 = 100%)
    pub scaling: f64,
    /// Webhook id for battery reporting
    pub battery_webhook: Option<String>,
}

impl PageConfig {
    /// Create a page with default settings for the given screenshot path.
    pub fn new(screenshot_url: impl Into<String>) -> Self {
        Self {
            screenshot_url: screenshot_url.into(),
            include_cache_break_query: false,
            image_format: ImageFormat::Png,
            output_path: PathBuf::from("output/cover"),
            rendering_delay: Duration::ZERO,
            rendering_screen_size: ScreenSize {
                width: 600,
                height: 800,
            },
            rotation: 0,
            post_process: Some(PostProcessProfile::default()),
            prefers_color_scheme: ColorScheme::Light,
            scaling: 1.0,
            battery_webhook: None,
        }
    }

    /// Set output path stem.
    #[must_use]
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    /// Set rotation in degrees.
    #[must_use]
    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    /// Set image format.
    #[must_use]
    pub fn with_image_format(mut self, format: ImageFormat) -> Self {
        self.image_format = format;
        self
    }

    /// Set battery webhook id.
    #[must_use]
    pub fn with_battery_webhook(mut self, webhook_id: impl Into<String>) -> Self {
        self.battery_webhook = Some(webhook_id.into());
        self
    }

    /// Full output file path: `<output_path>.<format>`.
    pub fn output_file(&self) -> PathBuf {
        let mut name = self.output_path.clone().into_os_string();
        name.push(".");
        name.push(self.image_format.as_str());
        PathBuf::from(name)
    }

    /// Viewport the page is rendered at.
    ///
    /// Width and height are swapped for 90/270 degree rotations: content is
    /// rendered upright and turned by the post-processor.
    pub fn viewport(&self) -> ScreenSize {
        let size = self.rendering_screen_size;
        if self.rotation.rem_euclid(180) != 0 {
            ScreenSize {
                width: size.height,
                height: size.width,
            }
        } else {
            size
        }
    }
}

/// Magick implementation used by the post-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvertBackend {
    /// `gm convert`
    #[default]
    GraphicsMagick,
    /// `convert`
    ImageMagick,
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Dashboard server, e.g. `http://hass.local:8123`
    pub base_url: String,
    /// Long-lived access token injected into the browser
    pub access_token: String,
    /// Cron expression for scheduled renders
    pub cron_job: String,
    /// IANA timezone the cron expression is evaluated in
    pub cron_timezone: String,
    /// Render on every request instead of serving cached files
    pub eager_render: bool,
    pub convert_backend: ConvertBackend,
    pub pages: Vec<PageConfig>,
    pub port: u16,
    pub rendering_timeout: Duration,
    pub browser_launch_timeout: Duration,
    pub language: String,
    /// Headful browser, single render, contexts kept open
    pub debug: bool,
    pub ignore_certificate_errors: bool,
    /// CSS selector that signals the page finished loading
    pub ready_selector: String,
    /// Browser executable, auto-detected when unset
    pub chrome_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let convert_backend = if env.flag("USE_IMAGE_MAGICK") {
            ConvertBackend::ImageMagick
        } else {
            ConvertBackend::GraphicsMagick
        };

        Ok(Self {
            base_url: env.required("HA_BASE_URL")?,
            access_token: env.required("HA_ACCESS_TOKEN")?,
            cron_job: env.get("CRON_JOB").unwrap_or_else(|| "* * * * *".to_string()),
            cron_timezone: env.get("CRON_TIMEZONE").unwrap_or_else(|| "UTC".to_string()),
            eager_render: env.flag("EAGER_RERENDER"),
            convert_backend,
            pages: env.pages()?,
            port: env.number("PORT")?.unwrap_or(5000),
            rendering_timeout: Duration::from_millis(
                env.number("RENDERING_TIMEOUT")?.unwrap_or(10_000),
            ),
            browser_launch_timeout: Duration::from_millis(
                env.number("BROWSER_LAUNCH_TIMEOUT")?.unwrap_or(30_000),
            ),
            language: env.get("LANGUAGE").unwrap_or_else(|| "en".to_string()),
            debug: env.flag("DEBUG"),
            ignore_certificate_errors: env.flag("UNSAFE_IGNORE_CERTIFICATE_ERRORS"),
            ready_selector: env
                .get("READY_SELECTOR")
                .unwrap_or_else(|| DEFAULT_READY_SELECTOR.to_string()),
            chrome_path: env.get("CHROME_PATH").map(PathBuf::from),
        })
    }

    /// Check the invariants every page must satisfy.
    ///
    /// Must be called before any browser or socket is opened.
    pub fn validate(&self) -> Result<(), Error> {
        if self.pages.is_empty() {
            return Err(Error::Config(
                "No pages configured (set HA_SCREENSHOT_URL)".to_string(),
            ));
        }

        for (i, page) in self.pages.iter().enumerate() {
            if page.rotation % 90 != 0 {
                return Err(Error::Config(format!(
                    "Invalid rotation value for entry {}: {}",
                    i + 1,
                    page.rotation
                )));
            }
        }

        Ok(())
    }
}

/// Environment accessor with per-page suffix fallback.
struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn required(&self, key: &str) -> Result<String, Error> {
        self.get(key).ok_or_else(|| {
            Error::Config(format!("Missing required environment variable: {}", key))
        })
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).as_deref() == Some("true")
    }

    fn number<T: FromStr>(&self, key: &str) -> Result<Option<T>, Error> {
        self.get(key).map(|v| parse_value(key, &v)).transpose()
    }

    /// Suffixed key first, then the bare key.
    fn page_get(&self, key: &str, suffix: &str) -> Option<String> {
        self.get(&format!("{}{}", key, suffix))
            .or_else(|| self.get(key))
    }

    fn page_flag(&self, key: &str, suffix: &str) -> bool {
        self.page_get(key, suffix).as_deref() == Some("true")
    }

    fn page_parse<T: FromStr>(&self, key: &str, suffix: &str) -> Result<Option<T>, Error> {
        self.page_get(key, suffix)
            .map(|v| parse_value(&format!("{}{}", key, suffix), &v))
            .transpose()
    }

    fn page_enum<T: FromStr<Err = Error>>(
        &self,
        key: &str,
        suffix: &str,
    ) -> Result<Option<T>, Error> {
        self.page_get(key, suffix).map(|v| v.parse()).transpose()
    }

    fn pages(&self) -> Result<Vec<PageConfig>, Error> {
        let mut pages = Vec::new();

        for number in 1.. {
            let suffix = if number == 1 {
                String::new()
            } else {
                format!("_{}", number)
            };

            let Some(screenshot_url) = self
                .get(&format!("HA_SCREENSHOT_URL{}", suffix))
                .filter(|url| !url.is_empty())
            else {
                break;
            };

            pages.push(self.page(screenshot_url, &suffix)?);
        }

        Ok(pages)
    }

    fn page(&self, screenshot_url: String, suffix: &str) -> Result<PageConfig, Error> {
        let post_process = if self.page_flag("LEAVE_IMAGE_UNMODIFIED", suffix) {
            None
        } else {
            let defaults = PostProcessProfile::default();
            Some(PostProcessProfile {
                grayscale_depth: self
                    .page_parse("GRAYSCALE_DEPTH", suffix)?
                    .unwrap_or(defaults.grayscale_depth),
                remove_gamma: self.page_flag("REMOVE_GAMMA", suffix),
                black_level: self
                    .page_get("BLACK_LEVEL", suffix)
                    .unwrap_or(defaults.black_level),
                white_level: self
                    .page_get("WHITE_LEVEL", suffix)
                    .unwrap_or(defaults.white_level),
                dither: self.page_flag("DITHER", suffix),
                color_mode: self
                    .page_enum("COLOR_MODE", suffix)?
                    .unwrap_or(defaults.color_mode),
            })
        };

        // OUTPUT_PATH does not fall back to the bare key: pages would overwrite each other
        let output_path = self
            .get(&format!("OUTPUT_PATH{}", suffix))
            .unwrap_or_else(|| format!("output/cover{}", suffix));

        Ok(PageConfig {
            screenshot_url,
            include_cache_break_query: self.page_flag("INCLUDE_CACHE_BREAK_QUERY", suffix),
            image_format: self
                .page_enum("IMAGE_FORMAT", suffix)?
                .unwrap_or(ImageFormat::Png),
            output_path: PathBuf::from(output_path),
            rendering_delay: Duration::from_millis(
                self.page_parse("RENDERING_DELAY", suffix)?.unwrap_or(0),
            ),
            rendering_screen_size: ScreenSize {
                height: self
                    .page_parse("RENDERING_SCREEN_HEIGHT", suffix)?
                    .unwrap_or(800),
                width: self
                    .page_parse("RENDERING_SCREEN_WIDTH", suffix)?
                    .unwrap_or(600),
            },
            rotation: self.page_parse("ROTATION", suffix)?.unwrap_or(0),
            post_process,
            prefers_color_scheme: self
                .page_enum("PREFERS_COLOR_SCHEME", suffix)?
                .unwrap_or_default(),
            scaling: self.page_parse("SCALING", suffix)?.unwrap_or(1.0),
            battery_webhook: self
                .page_get("HA_BATTERY_WEBHOOK", suffix)
                .filter(|id| !id.is_empty()),
        })
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    const BASE: [(&str, &str); 3] = [
        ("HA_BASE_URL", "http://hass.local:8123"),
        ("HA_ACCESS_TOKEN", "token"),
        ("HA_SCREENSHOT_URL", "/lovelace/0"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&BASE).unwrap();

        assert_eq!(config.cron_job, "* * * * *");
        assert_eq!(config.port, 5000);
        assert_eq!(config.rendering_timeout, Duration::from_secs(10));
        assert_eq!(config.browser_launch_timeout, Duration::from_secs(30));
        assert_eq!(config.language, "en");
        assert_eq!(config.ready_selector, "home-assistant");
        assert_eq!(config.convert_backend, ConvertBackend::GraphicsMagick);
        assert!(!config.eager_render);
        assert!(!config.debug);

        let page = &config.pages[0];
        assert_eq!(page.image_format, ImageFormat::Png);
        assert_eq!(page.output_file(), PathBuf::from("output/cover.png"));
        assert_eq!(
            page.rendering_screen_size,
            ScreenSize {
                width: 600,
                height: 800
            }
        );
        assert_eq!(page.post_process, Some(PostProcessProfile::default()));
        assert_eq!(page.battery_webhook, None);
    }

    #[test]
    fn test_missing_required() {
        let err = load(&[("HA_BASE_URL", "http://x")]).unwrap_err();
        assert!(err.to_string().contains("HA_ACCESS_TOKEN"));
    }

    #[test]
    fn test_page_suffix_fallback() {
        let mut vars = BASE.to_vec();
        vars.extend([
            ("HA_SCREENSHOT_URL_2", "/lovelace/1"),
            ("HA_SCREENSHOT_URL_4", "/lovelace/3"), // unreachable: page 3 missing
            ("ROTATION", "180"),
            ("ROTATION_2", "270"),
            ("IMAGE_FORMAT", "jpeg"),
            ("OUTPUT_PATH", "/data/main"),
            ("HA_BATTERY_WEBHOOK_2", "kindle_battery"),
        ]);
        let config = load(&vars).unwrap();

        assert_eq!(config.pages.len(), 2);
        assert_eq!(config.pages[0].rotation, 180);
        assert_eq!(config.pages[1].rotation, 270);
        assert_eq!(config.pages[1].image_format, ImageFormat::Jpeg);
        assert_eq!(config.pages[0].output_file(), PathBuf::from("/data/main.jpeg"));
        assert_eq!(
            config.pages[1].output_file(),
            PathBuf::from("output/cover_2.jpeg")
        );
        assert_eq!(config.pages[0].battery_webhook, None);
        assert_eq!(
            config.pages[1].battery_webhook.as_deref(),
            Some("kindle_battery")
        );
    }

    #[test]
    fn test_post_process_profile() {
        let mut vars = BASE.to_vec();
        vars.extend([
            ("HA_SCREENSHOT_URL_2", "/lovelace/1"),
            ("LEAVE_IMAGE_UNMODIFIED_2", "true"),
            ("GRAYSCALE_DEPTH", "4"),
            ("REMOVE_GAMMA", "true"),
            ("BLACK_LEVEL", "10%"),
            ("DITHER", "true"),
            ("COLOR_MODE", "TrueColor"),
        ]);
        let config = load(&vars).unwrap();

        let profile = config.pages[0].post_process.as_ref().unwrap();
        assert_eq!(profile.grayscale_depth, 4);
        assert!(profile.remove_gamma);
        assert_eq!(profile.black_level, "10%");
        assert_eq!(profile.white_level, "100%");
        assert!(profile.dither);
        assert_eq!(profile.color_mode, ColorMode::TrueColor);

        assert_eq!(config.pages[1].post_process, None);
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = BASE.to_vec();
        vars.push(("ROTATION", "ninety"));
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("ROTATION"));

        let mut vars = BASE.to_vec();
        vars.push(("IMAGE_FORMAT", "gif"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_validate_rotation() {
        let mut vars = BASE.to_vec();
        vars.push(("ROTATION", "45"));
        let config = load(&vars).unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("entry 1: 45"));
    }

    #[test]
    fn test_validate_empty() {
        let config = load(&BASE[..2]).unwrap();
        assert!(config.pages.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_viewport_swap() {
        let page = PageConfig::new("/");
        assert_eq!(page.viewport().width, 600);

        let rotated = page.clone().with_rotation(90);
        assert_eq!(
            rotated.viewport(),
            ScreenSize {
                width: 800,
                height: 600
            }
        );
        assert_eq!(page.clone().with_rotation(180).viewport().width, 600);
        assert_eq!(page.with_rotation(-90).viewport().width, 800);
    }
}

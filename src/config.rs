//! Configuration management and request value types
//!
//! All configuration is sourced from the environment with sensible defaults;
//! only the bearer token is mandatory. A missing required value fails process
//! startup, never an individual request.

use crate::{BorderStyle, RenderError, SelectionArea, SelectionStyle};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration for the screenshot service.
///
/// # Examples
///
/// ```rust
/// use screenshot_server::Config;
///
/// let config = Config {
///     max_workers: 4,
///     ..Default::default()
/// };
/// assert_eq!(config.port, 8033);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the HTTP server listens on (default: 8033)
    pub port: u16,

    /// Bearer token required on `/api` routes. Startup fails when unset.
    pub access_token: String,

    /// Log verbosity, as a tracing env-filter directive (default: "info")
    pub log_level: String,

    /// Log output format (default: JSON)
    pub log_format: LogFormat,

    /// Maximum number of renders in flight at once (default: CPU count)
    ///
    /// Requests beyond this limit are rejected immediately with 429; there
    /// is no queue.
    pub max_workers: usize,

    /// Image format used when a request does not name one (default: PNG)
    pub default_format: OutputFormat,

    /// Wall-clock deadline for a whole render (default: 20 seconds)
    ///
    /// Distinct from, and larger than, the per-navigation timeout below.
    pub capture_deadline: Duration,

    /// Navigation timeout inside the browser (default: 5 seconds)
    pub navigation_timeout: Duration,

    /// Viewport used when a request does not specify one
    pub viewport: Viewport,

    /// Default border color for selection rectangles (default: "#FF0000")
    pub selection_color: String,

    /// Default border width in pixels (default: 2)
    pub selection_width: u32,

    /// Default border style (default: dashed)
    pub selection_style: BorderStyle,

    /// Default overlay opacity in [0, 1] (default: 1.0)
    pub selection_opacity: f64,

    /// Path to a Chromium executable (default: auto-detect)
    pub chromium_path: Option<String>,

    /// Path to a Firefox executable; required to serve `browser=firefox`
    pub firefox_path: Option<String>,

    /// Path to a WebKit executable; required to serve `browser=webkit`
    pub webkit_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8033,
            access_token: String::new(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            max_workers: num_cpus::get(),
            default_format: OutputFormat::Png,
            capture_deadline: Duration::from_secs(20),
            navigation_timeout: Duration::from_secs(5),
            viewport: Viewport::default(),
            selection_color: "#FF0000".to_string(),
            selection_width: 2,
            selection_style: BorderStyle::Dashed,
            selection_opacity: 1.0,
            chromium_path: None,
            firefox_path: None,
            webkit_path: None,
        }
    }
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, RenderError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    ///
    /// Factored out of [`Config::from_env`] so tests can exercise parsing
    /// without mutating process-global state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RenderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let access_token = lookup("SCREENSHOT_ACCESS_TOKEN")
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                RenderError::Configuration(
                    "SCREENSHOT_ACCESS_TOKEN must be set to a non-empty bearer token".to_string(),
                )
            })?;

        let config = Self {
            port: parse_or(&lookup, "SCREENSHOT_PORT", defaults.port)?,
            access_token,
            log_level: lookup("SCREENSHOT_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: match lookup("SCREENSHOT_LOG_FORMAT").as_deref() {
                Some("text") => LogFormat::Text,
                Some("json") | None => LogFormat::Json,
                Some(other) => {
                    return Err(RenderError::Configuration(format!(
                        "unknown log format: {other}"
                    )))
                }
            },
            max_workers: parse_or(&lookup, "SCREENSHOT_MAX_WORKERS", defaults.max_workers)?,
            default_format: lookup("SCREENSHOT_DEFAULT_TYPE")
                .map(|value| OutputFormat::parse(&value))
                .unwrap_or(defaults.default_format),
            capture_deadline: Duration::from_secs(parse_or(
                &lookup,
                "SCREENSHOT_CAPTURE_DEADLINE_SECS",
                defaults.capture_deadline.as_secs(),
            )?),
            navigation_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SCREENSHOT_NAVIGATION_TIMEOUT_MS",
                defaults.navigation_timeout.as_millis() as u64,
            )?),
            viewport: Viewport {
                width: parse_or(&lookup, "SCREENSHOT_VIEWPORT_WIDTH", defaults.viewport.width)?,
                height: parse_or(
                    &lookup,
                    "SCREENSHOT_VIEWPORT_HEIGHT",
                    defaults.viewport.height,
                )?,
            },
            selection_color: lookup("SCREENSHOT_SELECTION_COLOR").unwrap_or(defaults.selection_color),
            selection_width: parse_or(
                &lookup,
                "SCREENSHOT_SELECTION_WIDTH",
                defaults.selection_width,
            )?,
            selection_style: match lookup("SCREENSHOT_SELECTION_STYLE") {
                Some(value) => value.parse()?,
                None => defaults.selection_style,
            },
            selection_opacity: parse_or(
                &lookup,
                "SCREENSHOT_SELECTION_OPACITY",
                defaults.selection_opacity,
            )?,
            chromium_path: lookup("SCREENSHOT_CHROMIUM_PATH"),
            firefox_path: lookup("SCREENSHOT_FIREFOX_PATH"),
            webkit_path: lookup("SCREENSHOT_WEBKIT_PATH"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), RenderError> {
        if self.max_workers == 0 {
            return Err(RenderError::Configuration(
                "max workers must be greater than 0".to_string(),
            ));
        }
        if self.capture_deadline <= self.navigation_timeout {
            return Err(RenderError::Configuration(
                "capture deadline must exceed the navigation timeout".to_string(),
            ));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(RenderError::Configuration(
                "viewport dimensions must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.selection_opacity) {
            return Err(RenderError::Configuration(
                "selection opacity must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, RenderError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| RenderError::Configuration(format!("invalid {key}: {e}"))),
        None => Ok(default),
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Browser engine used to render a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserVariant {
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserVariant {
    /// Parse a caller-supplied name; anything unrecognized renders with
    /// Chromium, mirroring the default branch of the engine switch.
    pub fn parse(value: &str) -> Self {
        match value {
            "firefox" => BrowserVariant::Firefox,
            "webkit" => BrowserVariant::Webkit,
            _ => BrowserVariant::Chromium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserVariant::Chromium => "chromium",
            BrowserVariant::Firefox => "firefox",
            BrowserVariant::Webkit => "webkit",
        }
    }
}

impl Default for BrowserVariant {
    fn default() -> Self {
        BrowserVariant::Chromium
    }
}

/// Output image formats.
///
/// JPEG accepts an optional quality; PNG is lossless and ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    /// Parse a caller-supplied type name. Unrecognized values fall back to
    /// PNG rather than failing the request.
    pub fn parse(value: &str) -> Self {
        match value {
            "jpeg" | "jpg" => OutputFormat::Jpeg,
            _ => OutputFormat::Png,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Browser viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// A fully parsed render request, validated before admission.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub id: String,
    pub html: String,
    pub browser: BrowserVariant,
    pub format: OutputFormat,
    /// JPEG quality in [0, 100]; meaningful only when `format` is JPEG.
    pub quality: Option<u32>,
    pub full_page: bool,
    pub omit_background: bool,
    pub viewport: Option<Viewport>,
    /// Scroll the page to this offset after load, before capture.
    pub scroll_x: Option<i64>,
    pub scroll_y: Option<i64>,
    pub selections: Vec<SelectionArea>,
    pub style: Option<SelectionStyle>,
    /// Navigation timeout for this request.
    pub timeout: Duration,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            html: String::new(),
            browser: BrowserVariant::default(),
            format: OutputFormat::Png,
            quality: None,
            full_page: false,
            omit_background: false,
            viewport: None,
            scroll_x: None,
            scroll_y: None,
            selections: Vec::new(),
            style: None,
            timeout: Duration::from_secs(5),
        }
    }
}

impl RenderRequest {
    /// Reject malformed requests before any browser resource is allocated.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.html.trim().is_empty() {
            return Err(RenderError::Validation(
                "html content cannot be empty".to_string(),
            ));
        }
        crate::overlay::validate_selections(&self.selections)?;
        if let Some(style) = &self.style {
            style.validate()?;
        }
        if let Some(viewport) = &self.viewport {
            if viewport.width == 0 || viewport.height == 0 {
                return Err(RenderError::Validation(
                    "viewport dimensions must be greater than 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

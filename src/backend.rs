//! Render backend adapter
//!
//! The orchestrator talks to the browser through the [`RenderBackend`] trait
//! so the race-and-cancel logic can be exercised without a real browser. The
//! concrete implementation drives a headless engine over the Chrome DevTools
//! Protocol: it materializes the caller's HTML as a temp file, loads it,
//! injects the overlay rectangles, captures the image, and releases every
//! resource it created on both the success and failure paths.

use crate::{
    overlay, BrowserVariant, Config, OutputFormat, RenderError, RenderRequest, SelectionStyle,
};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// A validated request plus the selection style resolved against defaults.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub request: RenderRequest,
    pub style: SelectionStyle,
}

#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Render the job to image bytes. Implementations must release all
    /// browser resources before returning, whichever way the render ends.
    async fn render(&self, job: RenderJob) -> Result<CapturedImage, RenderError>;
}

/// CDP-driven backend. One browser instance per request, no reuse: every
/// request is fully isolated in its own process, page, and temp document.
pub struct CdpBackend {
    config: Config,
}

impl CdpBackend {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Executable lookup keyed by variant. Chromium auto-detects when no
    /// path is configured; the other engines must be configured explicitly
    /// because there is no detection story for them.
    fn executable_for(&self, variant: BrowserVariant) -> Result<Option<String>, RenderError> {
        match variant {
            BrowserVariant::Chromium => Ok(self.config.chromium_path.clone()),
            BrowserVariant::Firefox => self.config.firefox_path.clone().map(Some).ok_or_else(|| {
                RenderError::BrowserLaunchFailed(
                    "no firefox executable configured; set SCREENSHOT_FIREFOX_PATH".to_string(),
                )
            }),
            BrowserVariant::Webkit => self.config.webkit_path.clone().map(Some).ok_or_else(|| {
                RenderError::BrowserLaunchFailed(
                    "no webkit executable configured; set SCREENSHOT_WEBKIT_PATH".to_string(),
                )
            }),
        }
    }

    fn browser_args(&self, viewport: crate::Viewport) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--no-first-run".to_string(),
            "--disable-extensions".to_string(),
            "--disable-default-apps".to_string(),
            format!("--window-size={},{}", viewport.width, viewport.height),
        ]
    }

    async fn launch(&self, job: &RenderJob) -> Result<BrowserSession, RenderError> {
        let viewport = job.request.viewport.unwrap_or(self.config.viewport);
        let executable = self.executable_for(job.request.browser)?;

        let mut builder = BrowserConfig::builder()
            .window_size(viewport.width, viewport.height)
            .args(self.browser_args(viewport));
        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(RenderError::BrowserLaunchFailed)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| RenderError::BrowserLaunchFailed(e.to_string()))?;

        // The handler drives CDP traffic and must be polled for the lifetime
        // of the browser.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler stopped: {e}");
                    break;
                }
            }
        });

        Ok(BrowserSession {
            browser,
            handler_task,
            page: None,
            temp_html: None,
        })
    }

    async fn load_content(
        &self,
        session: &mut BrowserSession,
        job: &RenderJob,
    ) -> Result<Page, RenderError> {
        let path = std::env::temp_dir().join(format!(
            "screenshot-{}.html",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&path, &job.request.html).await?;
        session.temp_html = Some(path.clone());

        let url = format!("file://{}", path.display());
        let nav_timeout = job.request.timeout;

        let page = timeout(nav_timeout, session.browser.new_page(url.as_str()))
            .await
            .map_err(|_| RenderError::Timeout(nav_timeout))?
            .map_err(|e| RenderError::PageLoadFailed(e.to_string()))?;
        session.page = Some(page.clone());

        if let Some(viewport) = job.request.viewport {
            let params = SetDeviceMetricsOverrideParams::builder()
                .width(viewport.width as i64)
                .height(viewport.height as i64)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(RenderError::PageLoadFailed)?;
            page.execute(params)
                .await
                .map_err(|e| RenderError::PageLoadFailed(e.to_string()))?;
        }

        // Wait until the document and its subresources settled before any
        // scripting or capture runs against the page.
        timeout(nav_timeout, page.wait_for_navigation())
            .await
            .map_err(|_| RenderError::Timeout(nav_timeout))?
            .map_err(|e| RenderError::PageLoadFailed(e.to_string()))?;

        Ok(page)
    }

    async fn apply_scroll(&self, page: &Page, job: &RenderJob) -> Result<(), RenderError> {
        if job.request.scroll_x.is_none() && job.request.scroll_y.is_none() {
            return Ok(());
        }
        let x = job.request.scroll_x.unwrap_or(0);
        let y = job.request.scroll_y.unwrap_or(0);
        page.evaluate(format!("window.scrollTo({x}, {y})"))
            .await
            .map_err(|e| RenderError::PageLoadFailed(format!("failed to scroll page: {e}")))?;
        // Give the engine a beat to commit the scroll before measuring it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    async fn page_scroll_offset(&self, page: &Page) -> Result<(i64, i64), RenderError> {
        #[derive(Deserialize)]
        struct ScrollOffset {
            x: f64,
            y: f64,
        }

        let raw: String = page
            .evaluate("JSON.stringify({x: window.scrollX, y: window.scrollY})")
            .await
            .map_err(|e| RenderError::OverlayFailed(format!("failed to read scroll: {e}")))?
            .into_value()
            .map_err(|e| RenderError::OverlayFailed(format!("bad scroll payload: {e}")))?;
        let offset: ScrollOffset = serde_json::from_str(&raw)?;
        Ok((offset.x as i64, offset.y as i64))
    }

    async fn apply_overlays(&self, page: &Page, job: &RenderJob) -> Result<(), RenderError> {
        if job.request.selections.is_empty() {
            return Ok(());
        }
        let viewport = job.request.viewport.unwrap_or(self.config.viewport);
        let scroll = self.page_scroll_offset(page).await?;
        let plan = overlay::plan_overlays(&job.request.selections, scroll, viewport);
        debug!(
            requested = job.request.selections.len(),
            drawn = plan.len(),
            "applying selection overlays"
        );
        for instruction in &plan {
            page.evaluate(instruction.script(&job.style))
                .await
                .map_err(|e| {
                    RenderError::OverlayFailed(format!(
                        "failed to draw selection rectangle {}: {e}",
                        instruction.index
                    ))
                })?;
        }
        Ok(())
    }

    async fn capture(&self, page: &Page, job: &RenderJob) -> Result<CapturedImage, RenderError> {
        let mut params = ScreenshotParams::builder()
            .format(match job.request.format {
                OutputFormat::Png => CaptureScreenshotFormat::Png,
                OutputFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
            })
            .full_page(job.request.full_page)
            .omit_background(job.request.omit_background);
        if job.request.format == OutputFormat::Jpeg {
            if let Some(quality) = job.request.quality {
                params = params.quality(quality as i64);
            }
        }

        let bytes = page
            .screenshot(params.build())
            .await
            .map_err(|e| RenderError::CaptureFailed(e.to_string()))?;

        Ok(CapturedImage {
            bytes,
            content_type: job.request.format.content_type(),
        })
    }

    async fn drive(
        &self,
        session: &mut BrowserSession,
        job: &RenderJob,
    ) -> Result<CapturedImage, RenderError> {
        let page = self.load_content(session, job).await?;
        self.apply_scroll(&page, job).await?;
        self.apply_overlays(&page, job).await?;
        self.capture(&page, job).await
    }
}

#[async_trait]
impl RenderBackend for CdpBackend {
    async fn render(&self, job: RenderJob) -> Result<CapturedImage, RenderError> {
        if job.request.html.trim().is_empty() {
            return Err(RenderError::Validation(
                "html content cannot be empty".to_string(),
            ));
        }

        let mut session = self.launch(&job).await?;
        let result = self.drive(&mut session, &job).await;
        session.close().await;
        result
    }
}

/// Everything a single render owns: browser process, CDP handler task, page,
/// and the temp document. Torn down in one place so no exit path can skip it.
struct BrowserSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    page: Option<Page>,
    temp_html: Option<PathBuf>,
}

impl BrowserSession {
    /// Release failures are logged, never escalated into the request outcome.
    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("failed to close page: {e}");
            }
        }
        if let Err(e) = self.browser.close().await {
            warn!("failed to close browser: {e}");
        }
        self.handler_task.abort();
        if let Some(path) = self.temp_html.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("failed to remove temp file {}: {e}", path.display());
            }
        }
    }
}

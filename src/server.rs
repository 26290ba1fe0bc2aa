//! HTTP surface
//!
//! axum router exposing the render endpoint behind bearer-token auth, plus
//! the unauthenticated health, metrics, and worker-stats probes. Handlers
//! translate between the wire format and the core types; all policy lives in
//! the render service.

use crate::{
    AdmissionController, BrowserVariant, Config, Metrics, OutputFormat, RejectReason,
    RenderError, RenderOutcome, RenderRequest, RenderService, SelectionArea, SelectionStyle,
    Viewport, WorkerStatsSnapshot,
};
use axum::{
    extract::{Form, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<RenderService>,
    pub admission: Arc<AdmissionController>,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/screen", post(make_screenshot))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/worker-stats", get(worker_stats))
        .with_state(state)
}

/// Form-encoded body of `POST /api/screen`.
///
/// `selections` and `selection_style` are JSON-encoded payloads inside the
/// form, matching the shapes in [`crate::overlay`].
#[derive(Debug, Default, Deserialize)]
pub struct ScreenshotForm {
    pub html: Option<String>,
    pub browser: Option<String>,
    #[serde(rename = "type")]
    pub image_type: Option<String>,
    pub quality: Option<u32>,
    pub full_page: Option<bool>,
    pub omit_background: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub scroll_x: Option<i64>,
    pub scroll_y: Option<i64>,
    pub selections: Option<String>,
    pub selection_style: Option<String>,
}

impl ScreenshotForm {
    pub fn into_request(self, config: &Config) -> Result<RenderRequest, RenderError> {
        let selections = match self.selections.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => serde_json::from_str::<Vec<SelectionArea>>(raw)
                .map_err(|e| RenderError::Validation(format!("invalid selections payload: {e}")))?,
            None => Vec::new(),
        };

        let style = match self
            .selection_style
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            Some(raw) => Some(serde_json::from_str::<SelectionStyle>(raw).map_err(|e| {
                RenderError::Validation(format!("invalid selection style payload: {e}"))
            })?),
            None => None,
        };

        let viewport = match (self.width, self.height) {
            (None, None) => None,
            (width, height) => Some(Viewport {
                width: width.unwrap_or(config.viewport.width),
                height: height.unwrap_or(config.viewport.height),
            }),
        };

        let request = RenderRequest {
            html: self.html.unwrap_or_default(),
            browser: self
                .browser
                .as_deref()
                .map(BrowserVariant::parse)
                .unwrap_or_default(),
            format: self
                .image_type
                .as_deref()
                .map(OutputFormat::parse)
                .unwrap_or(config.default_format),
            quality: self.quality,
            full_page: self.full_page.unwrap_or(false),
            omit_background: self.omit_background.unwrap_or(false),
            viewport,
            scroll_x: self.scroll_x,
            scroll_y: self.scroll_y,
            selections,
            style,
            timeout: config.navigation_timeout,
            ..Default::default()
        };

        request.validate()?;
        Ok(request)
    }
}

async fn make_screenshot(
    State(state): State<AppState>,
    Form(form): Form<ScreenshotForm>,
) -> Response {
    let request = match form.into_request(&state.config) {
        Ok(request) => request,
        Err(e) => {
            let message = match e {
                RenderError::Validation(message) => message,
                other => other.to_string(),
            };
            return error_response(StatusCode::BAD_REQUEST, &message);
        }
    };

    // The orchestration runs on its own task so a client disconnect (which
    // drops this handler future) only fires the cancellation token; the
    // outcome is still resolved and reported, and the slot released.
    let cancel = CancellationToken::new();
    let _disconnect_guard = cancel.clone().drop_guard();
    let service = state.service.clone();
    let task = tokio::spawn(async move { service.render(request, cancel).await });

    match task.await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => {
            error!("render task join failed: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to render screenshot",
            )
        }
    }
}

fn outcome_response(outcome: RenderOutcome) -> Response {
    match outcome {
        RenderOutcome::Success {
            bytes,
            content_type,
        } => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        RenderOutcome::Rejected { reason } => {
            let message = match reason {
                RejectReason::Busy => "server busy, try again later",
                RejectReason::ClientGone => "client cancelled the request",
            };
            error_response(StatusCode::TOO_MANY_REQUESTS, message)
        }
        RenderOutcome::Timeout => error_response(StatusCode::GATEWAY_TIMEOUT, "render timed out"),
        RenderOutcome::Cancelled => error_response(
            // 499: client closed the request before the render finished.
            StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT),
            "client closed request",
        ),
        // The cause was already logged by the reporter; callers only get a
        // generic message.
        RenderOutcome::BackendError { .. } => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to render screenshot",
        ),
    }
}

pub async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(header_value) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return error_response(StatusCode::UNAUTHORIZED, "Authorization header is required");
    };

    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Authorization header format must be Bearer {token}",
        );
    };

    if token != state.config.access_token {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid token");
    }

    next.run(req).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
        .into_response()
}

async fn worker_stats(State(state): State<AppState>) -> Json<WorkerStatsSnapshot> {
    Json(state.admission.stats())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BorderStyle;

    fn config() -> Config {
        Config {
            access_token: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn form_defaults_map_to_request_defaults() {
        let form = ScreenshotForm {
            html: Some("<html><body>Hi</body></html>".to_string()),
            ..Default::default()
        };
        let request = form.into_request(&config()).unwrap();
        assert_eq!(request.browser, BrowserVariant::Chromium);
        assert_eq!(request.format, OutputFormat::Png);
        assert!(!request.full_page);
        assert!(request.viewport.is_none());
        assert!(request.selections.is_empty());
    }

    #[test]
    fn missing_html_is_a_validation_error() {
        let err = ScreenshotForm::default().into_request(&config()).unwrap_err();
        assert!(matches!(err, RenderError::Validation(_)));
    }

    #[test]
    fn jpeg_type_and_quality_are_honored() {
        let form = ScreenshotForm {
            html: Some("<p>x</p>".to_string()),
            image_type: Some("jpeg".to_string()),
            quality: Some(80),
            ..Default::default()
        };
        let request = form.into_request(&config()).unwrap();
        assert_eq!(request.format, OutputFormat::Jpeg);
        assert_eq!(request.quality, Some(80));
    }

    #[test]
    fn unknown_type_falls_back_to_png() {
        let form = ScreenshotForm {
            html: Some("<p>x</p>".to_string()),
            image_type: Some("bmp".to_string()),
            ..Default::default()
        };
        let request = form.into_request(&config()).unwrap();
        assert_eq!(request.format, OutputFormat::Png);
    }

    #[test]
    fn selections_parse_from_embedded_json() {
        let form = ScreenshotForm {
            html: Some("<p>x</p>".to_string()),
            selections: Some(r#"[{"x":1,"y":2,"width":3,"height":4,"scrollX":5}]"#.to_string()),
            selection_style: Some(
                r#"{"borderColor":"#00FF00","borderWidth":1,"borderStyle":"solid","opacity":0.8}"#
                    .to_string(),
            ),
            ..Default::default()
        };
        let request = form.into_request(&config()).unwrap();
        assert_eq!(request.selections.len(), 1);
        assert_eq!(request.selections[0].scroll_x, Some(5));
        assert_eq!(request.selections[0].scroll_y, None);
        let style = request.style.unwrap();
        assert_eq!(style.border_style, BorderStyle::Solid);
    }

    #[test]
    fn malformed_selections_fail_validation() {
        let form = ScreenshotForm {
            html: Some("<p>x</p>".to_string()),
            selections: Some("not json".to_string()),
            ..Default::default()
        };
        assert!(form.into_request(&config()).is_err());
    }

    #[test]
    fn zero_area_selection_fails_before_rendering() {
        let form = ScreenshotForm {
            html: Some("<p>x</p>".to_string()),
            selections: Some(r#"[{"x":0,"y":0,"width":0,"height":10}]"#.to_string()),
            ..Default::default()
        };
        assert!(form.into_request(&config()).is_err());
    }

    #[test]
    fn partial_viewport_is_filled_from_config() {
        let form = ScreenshotForm {
            html: Some("<p>x</p>".to_string()),
            width: Some(640),
            ..Default::default()
        };
        let request = form.into_request(&config()).unwrap();
        let viewport = request.viewport.unwrap();
        assert_eq!(viewport.width, 640);
        assert_eq!(viewport.height, Config::default().viewport.height);
    }
}

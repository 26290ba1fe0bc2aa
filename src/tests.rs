//! Cross-module tests: orchestration races against a mocked backend, burst
//! behavior at the admission gate, and the HTTP surface end to end.

use crate::backend::MockRenderBackend;
use crate::{
    build_router, AdmissionController, AppState, BorderStyle, BrowserVariant, CapturedImage,
    CdpBackend, Config, Metrics, OutcomeReporter, RejectReason, RenderBackend, RenderError,
    RenderJob, RenderOutcome, RenderRequest, RenderService, SelectionStyle,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request as HttpRequest, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn test_style() -> SelectionStyle {
    SelectionStyle {
        border_color: "#FF0000".to_string(),
        border_width: 2,
        border_style: BorderStyle::Dashed,
        opacity: 1.0,
    }
}

fn test_request() -> RenderRequest {
    RenderRequest {
        html: "<html><body>Hi</body></html>".to_string(),
        ..Default::default()
    }
}

fn png_image() -> CapturedImage {
    CapturedImage {
        bytes: vec![0x89, 0x50, 0x4E, 0x47],
        content_type: "image/png",
    }
}

fn service_with(
    backend: Arc<dyn RenderBackend>,
    max_workers: usize,
    deadline: Duration,
) -> (Arc<RenderService>, Arc<AdmissionController>) {
    let metrics = Arc::new(Metrics::unregistered());
    let admission = Arc::new(AdmissionController::new(max_workers, metrics.clone()));
    let reporter = OutcomeReporter::new(metrics);
    let service = Arc::new(RenderService::new(
        backend,
        admission.clone(),
        reporter,
        test_style(),
        deadline,
    ));
    (service, admission)
}

/// Backend that completes only when the test hands out a permit.
struct GatedBackend {
    gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait]
impl RenderBackend for GatedBackend {
    async fn render(&self, _job: RenderJob) -> Result<CapturedImage, RenderError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RenderError::Semaphore(e.to_string()))?;
        Ok(png_image())
    }
}

/// Backend that takes far longer than any test deadline.
struct SlowBackend;

#[async_trait]
impl RenderBackend for SlowBackend {
    async fn render(&self, _job: RenderJob) -> Result<CapturedImage, RenderError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(png_image())
    }
}

async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for: {description}");
}

mod orchestration {
    use super::*;

    #[tokio::test]
    async fn successful_render_resolves_and_releases_slot() {
        let mut mock = MockRenderBackend::new();
        mock.expect_render()
            .times(1)
            .returning(|job| {
                Ok(CapturedImage {
                    bytes: vec![1, 2, 3],
                    content_type: job.request.format.content_type(),
                })
            });
        let (service, admission) =
            service_with(Arc::new(mock), 2, Duration::from_secs(20));

        let outcome = service
            .render(test_request(), CancellationToken::new())
            .await;

        match outcome {
            RenderOutcome::Success {
                bytes,
                content_type,
            } => {
                assert_eq!(bytes, vec![1, 2, 3]);
                assert_eq!(content_type, "image/png");
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(admission.active_workers(), 0);
    }

    #[tokio::test]
    async fn backend_failure_surfaces_as_backend_error() {
        let mut mock = MockRenderBackend::new();
        mock.expect_render()
            .times(1)
            .returning(|_| Err(RenderError::CaptureFailed("boom".to_string())));
        let (service, admission) =
            service_with(Arc::new(mock), 1, Duration::from_secs(20));

        let outcome = service
            .render(test_request(), CancellationToken::new())
            .await;

        assert!(matches!(outcome, RenderOutcome::BackendError { .. }));
        assert_eq!(admission.active_workers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_beats_a_hung_render() {
        let (service, admission) =
            service_with(Arc::new(SlowBackend), 1, Duration::from_secs(20));

        let outcome = service
            .render(test_request(), CancellationToken::new())
            .await;

        assert!(matches!(outcome, RenderOutcome::Timeout));
        assert_eq!(admission.active_workers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_beats_a_hung_render() {
        let (service, admission) =
            service_with(Arc::new(SlowBackend), 1, Duration::from_secs(20));

        let cancel = CancellationToken::new();
        let render_cancel = cancel.clone();
        let service_clone = service.clone();
        let handle =
            tokio::spawn(async move { service_clone.render(test_request(), render_cancel).await });

        // Let the render start, then pull the plug.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let outcome = tokio_test::assert_ok!(handle.await);
        assert!(matches!(outcome, RenderOutcome::Cancelled));
        assert_eq!(admission.active_workers(), 0);
    }

    #[tokio::test]
    async fn burst_over_capacity_rejects_exactly_one() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let backend = Arc::new(GatedBackend { gate: gate.clone() });
        let (service, admission) = service_with(backend, 2, Duration::from_secs(20));

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.render(test_request(), CancellationToken::new()).await })
        };
        {
            let admission = admission.clone();
            wait_until("first render admitted", move || {
                admission.active_workers() == 1
            })
            .await;
        }

        let second = {
            let service = service.clone();
            tokio::spawn(async move { service.render(test_request(), CancellationToken::new()).await })
        };
        {
            let admission = admission.clone();
            wait_until("second render admitted", move || {
                admission.active_workers() == 2
            })
            .await;
        }

        // Pool is full: the third request bounces without blocking.
        let third = service
            .render(test_request(), CancellationToken::new())
            .await;
        assert!(matches!(
            third,
            RenderOutcome::Rejected {
                reason: RejectReason::Busy
            }
        ));

        gate.add_permits(2);
        assert!(matches!(
            first.await.unwrap(),
            RenderOutcome::Success { .. }
        ));
        assert!(matches!(
            second.await.unwrap(),
            RenderOutcome::Success { .. }
        ));
        assert_eq!(admission.active_workers(), 0);
    }

    #[tokio::test]
    async fn saturated_gate_reports_client_gone_for_cancelled_caller() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let backend = Arc::new(GatedBackend { gate: gate.clone() });
        let (service, admission) = service_with(backend, 1, Duration::from_secs(20));

        let held = {
            let service = service.clone();
            tokio::spawn(async move { service.render(test_request(), CancellationToken::new()).await })
        };
        {
            let admission = admission.clone();
            wait_until("render admitted", move || admission.active_workers() == 1).await;
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = service.render(test_request(), cancel).await;
        assert!(matches!(
            outcome,
            RenderOutcome::Rejected {
                reason: RejectReason::ClientGone
            }
        ));

        gate.add_permits(1);
        assert!(matches!(held.await.unwrap(), RenderOutcome::Success { .. }));
    }
}

mod http {
    use super::*;

    const FORM_HTML: &str = "html=%3Chtml%3E%3Cbody%3EHi%3C%2Fbody%3E%3C%2Fhtml%3E";

    fn app(mock: MockRenderBackend, max_workers: usize) -> (Router, Arc<AdmissionController>) {
        let config = Arc::new(Config {
            access_token: "secret".to_string(),
            max_workers,
            ..Default::default()
        });
        let metrics = Arc::new(Metrics::unregistered());
        let admission = Arc::new(AdmissionController::new(max_workers, metrics.clone()));
        let reporter = OutcomeReporter::new(metrics.clone());
        let service = Arc::new(RenderService::from_config(
            Arc::new(mock),
            admission.clone(),
            reporter,
            &config,
        ));
        let state = AppState {
            config,
            service,
            admission: admission.clone(),
            metrics,
        };
        (build_router(state), admission)
    }

    fn echo_format_mock() -> MockRenderBackend {
        let mut mock = MockRenderBackend::new();
        mock.expect_render().returning(|job| {
            Ok(CapturedImage {
                bytes: vec![0x89, 0x50, 0x4E, 0x47],
                content_type: job.request.format.content_type(),
            })
        });
        mock
    }

    fn post_screen(body: &str, auth: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri("/api/screen")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn health_reports_ok_without_auth() {
        let (router, _) = app(MockRenderBackend::new(), 1);
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn missing_auth_header_is_unauthorized() {
        let (router, _) = app(MockRenderBackend::new(), 1);
        let response = router.oneshot(post_screen(FORM_HTML, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "Authorization header is required");
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_unauthorized() {
        let (router, _) = app(MockRenderBackend::new(), 1);
        let response = router
            .oneshot(post_screen(FORM_HTML, Some("Basic secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(
            body["error"],
            "Authorization header format must be Bearer {token}"
        );
    }

    #[tokio::test]
    async fn wrong_token_is_unauthorized() {
        let (router, _) = app(MockRenderBackend::new(), 1);
        let response = router
            .oneshot(post_screen(FORM_HTML, Some("Bearer nope")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "Invalid token");
    }

    #[tokio::test]
    async fn empty_html_is_bad_request_and_never_admitted() {
        let mut mock = MockRenderBackend::new();
        mock.expect_render().times(0);
        let (router, admission) = app(mock, 1);

        let response = router
            .oneshot(post_screen("html=", Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(admission.active_workers(), 0);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "html content cannot be empty");
    }

    #[tokio::test]
    async fn render_returns_image_bytes_with_png_content_type() {
        let (router, admission) = app(echo_format_mock(), 1);
        let response = router
            .oneshot(post_screen(FORM_HTML, Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        let bytes = body_bytes(response).await;
        assert!(!bytes.is_empty());
        assert_eq!(admission.active_workers(), 0);
    }

    #[tokio::test]
    async fn jpeg_request_round_trips_the_content_type() {
        let (router, _) = app(echo_format_mock(), 1);
        let body = format!("{FORM_HTML}&type=jpeg&quality=80");
        let response = router
            .oneshot(post_screen(&body, Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
    }

    #[tokio::test]
    async fn unrecognized_type_falls_back_to_png() {
        let (router, _) = app(echo_format_mock(), 1);
        let body = format!("{FORM_HTML}&type=tiff");
        let response = router
            .oneshot(post_screen(&body, Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
    }

    #[tokio::test]
    async fn backend_failure_maps_to_internal_error_without_details() {
        let mut mock = MockRenderBackend::new();
        mock.expect_render()
            .returning(|_| Err(RenderError::BrowserLaunchFailed("chrome exploded".to_string())));
        let (router, _) = app(mock, 1);

        let response = router
            .oneshot(post_screen(FORM_HTML, Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        // Internal causes stay in the logs.
        assert_eq!(body["error"], "failed to render screenshot");
    }

    #[tokio::test]
    async fn worker_stats_exposes_the_gate_snapshot() {
        let (router, _) = app(MockRenderBackend::new(), 3);
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/worker-stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["active_workers"], 0);
        assert_eq!(body["max_workers"], 3);
        assert_eq!(body["queue_size"], 3);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let (router, _) = app(MockRenderBackend::new(), 1);
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }
}

mod end_to_end {
    use super::*;

    // Needs a local Chromium; warns instead of failing when the browser
    // cannot be launched, so CI without Chrome still passes.
    #[tokio::test]
    async fn chromium_renders_simple_html() {
        let backend = CdpBackend::new(Config::default());
        let job = RenderJob {
            request: test_request(),
            style: test_style(),
        };

        match backend.render(job).await {
            Ok(image) => {
                assert!(!image.bytes.is_empty());
                assert_eq!(image.content_type, "image/png");
            }
            Err(e) => {
                eprintln!("skipping end-to-end render, browser unavailable: {e}");
            }
        }
    }

    #[tokio::test]
    async fn firefox_without_executable_is_a_launch_error() {
        let backend = CdpBackend::new(Config::default());
        let job = RenderJob {
            request: RenderRequest {
                browser: BrowserVariant::Firefox,
                ..test_request()
            },
            style: test_style(),
        };
        assert!(matches!(
            backend.render(job).await,
            Err(RenderError::BrowserLaunchFailed(_))
        ));
    }
}

//! Request orchestration
//!
//! One [`RenderService::render`] call is one request lifecycle: validate,
//! claim an admission slot, start the render on its own task, then race the
//! render against the caller's cancellation and the fixed capture deadline.
//! Whichever fires first decides the single terminal outcome; the admission
//! slot is released at that same point regardless of which branch won.

use crate::{
    overlay, AdmissionController, OutcomeReporter, RejectReason, RenderBackend, RenderError,
    RenderJob, RenderRequest, SelectionStyle,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The single terminal result of one render attempt.
#[derive(Debug)]
pub enum RenderOutcome {
    Success {
        bytes: Vec<u8>,
        content_type: &'static str,
    },
    BackendError {
        cause: RenderError,
    },
    Timeout,
    Cancelled,
    Rejected {
        reason: RejectReason,
    },
}

impl RenderOutcome {
    pub fn status_class(&self) -> crate::StatusClass {
        match self {
            RenderOutcome::Success { .. } => crate::StatusClass::Success,
            RenderOutcome::Rejected { .. } | RenderOutcome::Cancelled => {
                crate::StatusClass::ClientError
            }
            RenderOutcome::BackendError { .. } | RenderOutcome::Timeout => {
                crate::StatusClass::ServerError
            }
        }
    }
}

pub struct RenderService {
    backend: Arc<dyn RenderBackend>,
    admission: Arc<AdmissionController>,
    reporter: OutcomeReporter,
    default_style: SelectionStyle,
    capture_deadline: Duration,
}

impl RenderService {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        admission: Arc<AdmissionController>,
        reporter: OutcomeReporter,
        default_style: SelectionStyle,
        capture_deadline: Duration,
    ) -> Self {
        Self {
            backend,
            admission,
            reporter,
            default_style,
            capture_deadline,
        }
    }

    /// Convenience constructor wiring defaults out of a [`crate::Config`].
    pub fn from_config(
        backend: Arc<dyn RenderBackend>,
        admission: Arc<AdmissionController>,
        reporter: OutcomeReporter,
        config: &crate::Config,
    ) -> Self {
        Self::new(
            backend,
            admission,
            reporter,
            overlay::default_style(config),
            config.capture_deadline,
        )
    }

    /// Run one request to its terminal outcome.
    ///
    /// The request must already have passed [`RenderRequest::validate`];
    /// nothing here allocates a browser before admission succeeds. `cancel`
    /// is the caller's signal: it fires when the HTTP client disconnects.
    pub async fn render(&self, request: RenderRequest, cancel: CancellationToken) -> RenderOutcome {
        let started = Instant::now();
        let request_id = request.id.clone();
        let variant = request.browser;

        let slot = match self.admission.try_acquire(&cancel) {
            Ok(slot) => slot,
            Err(reason) => {
                let outcome = RenderOutcome::Rejected { reason };
                self.reporter
                    .report(&request_id, variant, &outcome, started.elapsed());
                return outcome;
            }
        };

        let job = RenderJob {
            style: request.style.clone().unwrap_or_else(|| self.default_style.clone()),
            request,
        };

        // The render runs on its own task so the race below is never blocked
        // by browser work, and so a lost race leaves the task free to finish
        // its own resource cleanup in the background.
        let backend = self.backend.clone();
        let mut render_task = tokio::spawn(async move { backend.render(job).await });

        let outcome = tokio::select! {
            result = &mut render_task => match result {
                Ok(Ok(image)) => RenderOutcome::Success {
                    bytes: image.bytes,
                    content_type: image.content_type,
                },
                Ok(Err(cause)) => RenderOutcome::BackendError { cause },
                Err(join_error) => RenderOutcome::BackendError {
                    cause: RenderError::CaptureFailed(format!("render task failed: {join_error}")),
                },
            },
            _ = tokio::time::sleep(self.capture_deadline) => {
                debug!(request_id = %request_id, "capture deadline elapsed, detaching render task");
                RenderOutcome::Timeout
            }
            _ = cancel.cancelled() => {
                debug!(request_id = %request_id, "caller went away, detaching render task");
                RenderOutcome::Cancelled
            }
        };

        // Single release point: the slot drops here on every terminal
        // transition, including the detached timeout and cancel branches.
        drop(slot);

        self.reporter
            .report(&request_id, variant, &outcome, started.elapsed());
        outcome
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }
}

use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

/// Why a request was turned away at the admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// All render permits are in use.
    Busy,
    /// The caller disconnected before a permit could be handed out.
    ClientGone,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Busy => write!(f, "server busy"),
            RejectReason::ClientGone => write!(f, "client cancelled"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("admission rejected: {0}")]
    AdmissionRejected(RejectReason),

    #[error("browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("page load failed: {0}")]
    PageLoadFailed(String),

    #[error("overlay injection failed: {0}")]
    OverlayFailed(String),

    #[error("screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("semaphore acquire error: {0}")]
    Semaphore(String),
}

impl RenderError {
    /// True when the caller, not the service, is at fault.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            RenderError::Validation(_) | RenderError::AdmissionRejected(_)
        )
    }
}

impl From<AcquireError> for RenderError {
    fn from(err: AcquireError) -> Self {
        RenderError::Semaphore(err.to_string())
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Serialization(err.to_string())
    }
}

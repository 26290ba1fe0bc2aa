//! # Screenshot Server
//!
//! An HTTP rendering service: POST an HTML document, get back a raster image
//! of the page rendered in a headless browser. Callers can overlay annotated
//! selection rectangles at chosen coordinates before capture.
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/screen` | Render form-encoded `html` to PNG/JPEG (bearer auth) |
//! | GET | `/health` | Liveness probe |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/worker-stats` | Active/max worker snapshot |
//!
//! ## Request handling
//!
//! Every request passes a bounded admission gate (at most
//! `SCREENSHOT_MAX_WORKERS` renders in flight, excess rejected with 429, no
//! queue), then races its render against the caller's disconnect and a fixed
//! capture deadline. Exactly one outcome wins; the permit is released either
//! way, and an abandoned render finishes its own browser cleanup in the
//! background.
//!
//! ## Quick start
//!
//! ```bash
//! SCREENSHOT_ACCESS_TOKEN=secret screenshot-server
//!
//! curl -H 'Authorization: Bearer secret' \
//!      --data-urlencode 'html=<html><body>Hi</body></html>' \
//!      http://localhost:8033/api/screen -o page.png
//! ```

/// Configuration and request value types
pub mod config;

/// Error types shared across the service
pub mod error;

/// Bounded admission gate for concurrent renders
pub mod admission;

/// Selection-overlay geometry and styling
pub mod overlay;

/// Render backend trait and the CDP implementation
pub mod backend;

/// Per-request orchestration: admit, race, resolve
pub mod render_service;

/// Metrics handles and outcome reporting
pub mod metrics;

/// axum router, auth middleware, and handlers
pub mod server;

#[cfg(test)]
mod tests;

pub use admission::*;
pub use backend::*;
pub use config::*;
pub use error::*;
pub use metrics::*;
pub use overlay::*;
pub use render_service::*;
pub use server::*;

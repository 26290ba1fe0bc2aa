//! Bounded admission gate for concurrent renders
//!
//! A fixed pool of permits caps how many renders run at once. Acquisition is
//! strictly accept-or-reject: there is no queue, and a request that finds the
//! pool exhausted is turned away immediately rather than parked.

use crate::{Metrics, RejectReason};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

pub struct AdmissionController {
    permits: Arc<Semaphore>,
    max_workers: usize,
    active: Arc<AtomicUsize>,
    metrics: Arc<Metrics>,
}

impl AdmissionController {
    pub fn new(max_workers: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            active: Arc::new(AtomicUsize::new(0)),
            metrics,
        }
    }

    /// Try to claim a render slot without waiting.
    ///
    /// When the pool is exhausted the reject reason distinguishes a caller
    /// that has already gone away from a genuinely saturated server, so the
    /// two cases can be reported separately.
    pub fn try_acquire(&self, cancel: &CancellationToken) -> Result<AdmissionSlot, RejectReason> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                self.active.fetch_add(1, Ordering::SeqCst);
                self.metrics.worker_started();
                Ok(AdmissionSlot {
                    _permit: permit,
                    active: self.active.clone(),
                    metrics: self.metrics.clone(),
                })
            }
            Err(_) => {
                if cancel.is_cancelled() {
                    Err(RejectReason::ClientGone)
                } else {
                    Err(RejectReason::Busy)
                }
            }
        }
    }

    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Read-only snapshot for the `/worker-stats` endpoint.
    ///
    /// `queue_size` is the number of free slots, not a backlog: requests are
    /// never buffered waiting for capacity.
    pub fn stats(&self) -> WorkerStatsSnapshot {
        let active = self.active_workers();
        WorkerStatsSnapshot {
            active_workers: active,
            max_workers: self.max_workers,
            queue_size: self.max_workers.saturating_sub(active),
        }
    }
}

/// One of N render permits, returned to the pool on drop.
///
/// The orchestrator owns the slot for the request lifetime and releases it
/// exactly once, at its single resolution point, whatever the outcome.
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
    metrics: Arc<Metrics>,
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.metrics.worker_finished();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub active_workers: usize,
    pub max_workers: usize,
    pub queue_size: usize,
}

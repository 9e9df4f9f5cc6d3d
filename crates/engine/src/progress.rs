//! Shared progress snapshot of the current sweep, polled by the HTTP API

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;

use crate::params::CombinationCount;
use crate::ranking::RankedResult;
use crate::runner::{SweepCanceller, SweepEvent, SweepState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Rejected,
    Error,
}

impl From<SweepState> for SweepStatus {
    fn from(state: SweepState) -> Self {
        match state {
            SweepState::Idle => SweepStatus::Idle,
            SweepState::Validating | SweepState::Running => SweepStatus::Running,
            SweepState::Completed => SweepStatus::Completed,
            SweepState::Cancelled => SweepStatus::Cancelled,
            SweepState::Rejected => SweepStatus::Rejected,
        }
    }
}

/// User-facing explanation for an oversized parameter space.
pub fn iteration_limit_message(combinations: CombinationCount, ceiling: u64) -> String {
    format!(
        "The range of parameters for this optimization run requires {} iterations. \
         The maximum number of iterations is {}. Reduce the number of parameters, \
         reduce the range of parameters, or increase the \"Step\".",
        combinations, ceiling
    )
}

pub struct SweepProgress {
    pub status: RwLock<SweepStatus>,
    pub strategy: RwLock<Option<String>>,
    pub total: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub estimated_remaining: RwLock<Option<Duration>>,
    pub results: RwLock<Vec<RankedResult>>,
    pub rejection: RwLock<Option<String>>,
    pub error_message: RwLock<Option<String>>,
    canceller: RwLock<Option<SweepCanceller>>,
}

impl SweepProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(SweepStatus::Idle),
            strategy: RwLock::new(None),
            total: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            estimated_remaining: RwLock::new(None),
            results: RwLock::new(Vec::new()),
            rejection: RwLock::new(None),
            error_message: RwLock::new(None),
            canceller: RwLock::new(None),
        }
    }

    /// Claim the tracker for a new sweep and attach its cancel switch.
    /// Returns false, leaving everything untouched, when a sweep is already
    /// running. The check and the reset happen under one status lock.
    pub fn try_start(&self, strategy: &str, canceller: SweepCanceller) -> bool {
        let mut status = self.status.write().unwrap();
        if *status == SweepStatus::Running {
            return false;
        }
        self.clear(strategy, canceller);
        *status = SweepStatus::Running;
        true
    }

    fn clear(&self, strategy: &str, canceller: SweepCanceller) {
        *self.strategy.write().unwrap() = Some(strategy.to_string());
        self.total.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        *self.estimated_remaining.write().unwrap() = None;
        *self.results.write().unwrap() = Vec::new();
        *self.rejection.write().unwrap() = None;
        *self.error_message.write().unwrap() = None;
        *self.canceller.write().unwrap() = Some(canceller);
    }

    /// Cancel the tracked sweep. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.canceller.read().unwrap().as_ref() {
            Some(canceller) => {
                canceller.cancel();
                true
            }
            None => false,
        }
    }

    /// Record a failure outside the runner (data loading, bad request).
    pub fn fail(&self, message: impl Into<String>) {
        *self.error_message.write().unwrap() = Some(message.into());
        *self.status.write().unwrap() = SweepStatus::Error;
    }

    pub fn apply(&self, event: &SweepEvent) {
        match event {
            SweepEvent::IterationLimitExceeded {
                combinations,
                ceiling,
            } => {
                *self.rejection.write().unwrap() =
                    Some(iteration_limit_message(*combinations, *ceiling));
                *self.status.write().unwrap() = SweepStatus::Rejected;
            }
            SweepEvent::InvocationFailed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            SweepEvent::Progress {
                processed,
                total,
                estimated_remaining,
            } => {
                self.total.store(*total, Ordering::Relaxed);
                self.processed.store(*processed, Ordering::Relaxed);
                *self.estimated_remaining.write().unwrap() = *estimated_remaining;
            }
            SweepEvent::Finished { state, results } => {
                *self.results.write().unwrap() = results.clone();
                *self.estimated_remaining.write().unwrap() = None;
                *self.status.write().unwrap() = SweepStatus::from(*state);
            }
        }
    }

    /// Get progress as percentage
    pub fn progress_pct(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        let done = self.processed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    /// Check if currently running
    pub fn is_running(&self) -> bool {
        matches!(*self.status.read().unwrap(), SweepStatus::Running)
    }

    /// Serializable copy, with at most `top` results.
    pub fn snapshot(&self, top: usize) -> ProgressSnapshot {
        ProgressSnapshot {
            status: *self.status.read().unwrap(),
            strategy: self.strategy.read().unwrap().clone(),
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            progress_pct: self.progress_pct(),
            estimated_remaining_secs: self
                .estimated_remaining
                .read()
                .unwrap()
                .map(|d| d.as_secs()),
            rejection: self.rejection.read().unwrap().clone(),
            error: self.error_message.read().unwrap().clone(),
            results: self.results.read().unwrap().iter().take(top).cloned().collect(),
        }
    }
}

impl Default for SweepProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: SweepStatus,
    pub strategy: Option<String>,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub progress_pct: f32,
    pub estimated_remaining_secs: Option<u64>,
    pub rejection: Option<String>,
    pub error: Option<String>,
    pub results: Vec<RankedResult>,
}

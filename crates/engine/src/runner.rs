//! Sweep runner: drives enumeration → backtest → filter → rank on a worker
//!
//! One runner executes exactly one sweep. `run()` validates the
//! configuration, spawns a blocking worker and hands back a [`SweepHandle`]
//! that carries the event stream and the cancel switch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::enumerator::Assignment;
use crate::error::{ConfigError, SweepError};
use crate::params::{CombinationCount, ParameterSpace};
use crate::ranking::{passes_min_trades, rank_results, RankedResult, SortCriterion, SweepResult};
use crate::types::BacktestMetrics;

/// Lowest accepted minimum-trades threshold
pub const MIN_TRADES_FLOOR: u32 = 2;
pub const DEFAULT_MIN_TRADES: u32 = 50;
pub const DEFAULT_MAX_ITERATIONS: u64 = 50_000;

// ============================================================================
// Collaborator contract
// ============================================================================

/// Runs one backtest for one assignment.
///
/// Invocations happen strictly one after another on the sweep worker, so
/// implementations may keep state between calls.
pub trait BacktestInvoker: Send + 'static {
    fn invoke(&mut self, assignment: &Assignment) -> anyhow::Result<BacktestMetrics>;
}

impl<F> BacktestInvoker for F
where
    F: FnMut(&Assignment) -> anyhow::Result<BacktestMetrics> + Send + 'static,
{
    fn invoke(&mut self, assignment: &Assignment) -> anyhow::Result<BacktestMetrics> {
        self(assignment)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Everything one sweep needs, fixed for the duration of the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub space: ParameterSpace,
    pub min_trades: u32,
    pub sort_by: SortCriterion,
    pub max_iterations: u64,
}

impl SweepConfig {
    pub fn new(space: ParameterSpace) -> Self {
        Self {
            space,
            min_trades: DEFAULT_MIN_TRADES,
            sort_by: SortCriterion::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_min_trades(mut self, min_trades: u32) -> Self {
        self.min_trades = min_trades;
        self
    }

    pub fn with_sort_by(mut self, sort_by: SortCriterion) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Structural checks only; the iteration ceiling is enforced by the runner.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.space.is_empty() {
            return Err(ConfigError::EmptySpace);
        }
        for param in self.space.parameters() {
            param.validate()?;
        }
        if self.min_trades < MIN_TRADES_FLOOR {
            return Err(ConfigError::MinTradesTooLow {
                value: self.min_trades,
                floor: MIN_TRADES_FLOOR,
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterationLimit);
        }
        Ok(())
    }

    /// True when the space is too large to run under `max_iterations`.
    /// Cheap: only multiplies value counts, so callers can check it before
    /// loading any data.
    pub fn exceeds_iteration_limit(&self) -> bool {
        let combinations = self.space.combination_count();
        combinations.to_u64().is_none() || combinations.exceeds(self.max_iterations)
    }
}

// ============================================================================
// State & events
// ============================================================================

/// Lifecycle of a sweep. `Completed`, `Cancelled` and `Rejected` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepState {
    Idle,
    Validating,
    Running,
    Completed,
    Cancelled,
    Rejected,
}

impl SweepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Rejected)
    }
}

/// Notifications from the worker to whoever holds the handle
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SweepEvent {
    /// Sent instead of running anything when the space is too large
    IterationLimitExceeded {
        combinations: CombinationCount,
        ceiling: u64,
    },
    /// One backtest failed; the sweep carries on
    InvocationFailed { index: u64, error: String },
    /// Sent once per enumerated combination, `processed` strictly increasing
    Progress {
        processed: u64,
        total: u64,
        estimated_remaining: Option<Duration>,
    },
    /// Sent exactly once, on `Completed` or `Cancelled`
    Finished {
        state: SweepState,
        results: Vec<RankedResult>,
    },
}

/// Cloneable cancel switch for one sweep
#[derive(Debug, Clone, Default)]
pub struct SweepCanceller {
    flag: Arc<AtomicBool>,
}

impl SweepCanceller {
    /// Request cancellation. Calling it again is a no-op.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("Sweep cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Terminal summary of a sweep, collected by [`SweepHandle::wait`]
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub state: SweepState,
    pub combinations: CombinationCount,
    pub processed: u64,
    pub failed: u64,
    pub results: Vec<RankedResult>,
}

// ============================================================================
// Handle
// ============================================================================

/// Caller's side of a running sweep
pub struct SweepHandle {
    canceller: SweepCanceller,
    events: mpsc::UnboundedReceiver<SweepEvent>,
    worker: JoinHandle<SweepState>,
    combinations: CombinationCount,
}

impl SweepHandle {
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> SweepCanceller {
        self.canceller.clone()
    }

    /// Combination count computed when the sweep started
    pub fn combinations(&self) -> CombinationCount {
        self.combinations
    }

    /// Next event, or `None` once the worker has finished and the stream is drained.
    pub async fn recv(&mut self) -> Option<SweepEvent> {
        self.events.recv().await
    }

    /// Drain every remaining event and wait for the worker.
    pub async fn wait(mut self) -> Result<SweepReport, SweepError> {
        let mut processed = 0;
        let mut failed = 0;
        let mut results = Vec::new();

        while let Some(event) = self.events.recv().await {
            match event {
                SweepEvent::Progress { processed: p, .. } => processed = p,
                SweepEvent::InvocationFailed { .. } => failed += 1,
                SweepEvent::Finished { results: r, .. } => results = r,
                SweepEvent::IterationLimitExceeded { .. } => {}
            }
        }

        let state = self
            .worker
            .await
            .map_err(|e| SweepError::Worker(e.to_string()))?;

        Ok(SweepReport {
            state,
            combinations: self.combinations,
            processed,
            failed,
            results,
        })
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Single-use sweep executor
pub struct SweepRunner<I: BacktestInvoker> {
    config: SweepConfig,
    invoker: I,
    canceller: SweepCanceller,
    state: SweepState,
}

impl<I: BacktestInvoker> SweepRunner<I> {
    pub fn new(config: SweepConfig, invoker: I) -> Self {
        Self {
            config,
            invoker,
            canceller: SweepCanceller::default(),
            state: SweepState::Idle,
        }
    }

    /// Use an existing cancel switch, e.g. one handed out before the
    /// data for this sweep finished loading.
    pub fn with_canceller(mut self, canceller: SweepCanceller) -> Self {
        self.canceller = canceller;
        self
    }

    /// Cancel switch, available before the sweep starts.
    pub fn canceller(&self) -> SweepCanceller {
        self.canceller.clone()
    }

    /// Start the sweep on a blocking worker. Must be called inside a tokio runtime.
    ///
    /// Fails synchronously only for a structurally invalid configuration;
    /// an oversized space is reported through
    /// [`SweepEvent::IterationLimitExceeded`].
    pub fn run(self) -> Result<SweepHandle, SweepError> {
        self.config.validate()?;

        let combinations = self.config.space.combination_count();
        let canceller = self.canceller.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        info!(
            parameters = self.config.space.len(),
            combinations = %combinations,
            min_trades = self.config.min_trades,
            sort_by = %self.config.sort_by,
            max_iterations = self.config.max_iterations,
            "Starting parameter sweep"
        );

        let worker = tokio::task::spawn_blocking(move || self.execute(&tx));

        Ok(SweepHandle {
            canceller,
            events: rx,
            worker,
            combinations,
        })
    }

    fn execute(mut self, tx: &mpsc::UnboundedSender<SweepEvent>) -> SweepState {
        self.state = SweepState::Validating;
        let combinations = self.config.space.combination_count();
        let ceiling = self.config.max_iterations;

        let total = match combinations.to_u64() {
            Some(total) if !self.config.exceeds_iteration_limit() => total,
            _ => {
                warn!(
                    combinations = %combinations,
                    ceiling,
                    "Sweep rejected: iteration limit exceeded"
                );
                self.state = SweepState::Rejected;
                // A dropped receiver just means nobody is listening.
                let _ = tx.send(SweepEvent::IterationLimitExceeded {
                    combinations,
                    ceiling,
                });
                return self.state;
            }
        };

        self.state = SweepState::Running;
        let started = Instant::now();
        let mut accumulated: Vec<SweepResult> = Vec::new();
        let mut processed: u64 = 0;
        let mut failed: u64 = 0;
        let mut discarded: u64 = 0;

        for assignment in self.config.space.enumerate() {
            if self.canceller.is_cancelled() {
                warn!(processed, total, "Sweep cancelled");
                self.state = SweepState::Cancelled;
                break;
            }
            // Nobody holds the handle any more: stop like a cancel.
            if tx.is_closed() {
                warn!(processed, total, "Sweep handle dropped, stopping");
                self.state = SweepState::Cancelled;
                break;
            }

            match self.invoke_guarded(&assignment) {
                Ok(metrics) => {
                    if passes_min_trades(&metrics, self.config.min_trades) {
                        accumulated.push(SweepResult {
                            assignment,
                            metrics,
                        });
                    } else {
                        discarded += 1;
                    }
                }
                Err(error) => {
                    failed += 1;
                    warn!(
                        index = assignment.index,
                        params = %assignment.label(),
                        error = %error,
                        "Backtest failed, skipping combination"
                    );
                    let _ = tx.send(SweepEvent::InvocationFailed {
                        index: assignment.index,
                        error,
                    });
                }
            }

            processed += 1;
            let _ = tx.send(SweepEvent::Progress {
                processed,
                total,
                estimated_remaining: estimate_remaining(started.elapsed(), processed, total),
            });
        }

        if self.state == SweepState::Running {
            self.state = SweepState::Completed;
        }

        let ranked = rank_results(accumulated, self.config.sort_by);

        if let Some(best) = ranked.first() {
            info!(
                params = %best.result.assignment.label(),
                trades = best.result.metrics.total_trades,
                profit_factor = %best.result.metrics.profit_factor,
                net_profit = %best.result.metrics.net_profit,
                "Best configuration found"
            );
        }
        info!(
            state = ?self.state,
            processed,
            total,
            failed,
            discarded,
            qualifying = ranked.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sweep finished"
        );

        let _ = tx.send(SweepEvent::Finished {
            state: self.state,
            results: ranked,
        });
        self.state
    }

    /// Invoke the collaborator, turning both errors and panics into a message.
    fn invoke_guarded(&mut self, assignment: &Assignment) -> Result<BacktestMetrics, String> {
        debug!(index = assignment.index, params = %assignment.label(), "Running backtest");
        let invoker = &mut self.invoker;
        match catch_unwind(AssertUnwindSafe(|| invoker.invoke(assignment))) {
            Ok(Ok(metrics)) => Ok(metrics),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(panic) => Err(panic_message(panic.as_ref())),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("backtest panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("backtest panicked: {}", s)
    } else {
        "backtest panicked".to_string()
    }
}

/// Linear extrapolation of the time left, from the average time per combination.
fn estimate_remaining(elapsed: Duration, processed: u64, total: u64) -> Option<Duration> {
    if processed == 0 {
        return None;
    }
    let left = total.saturating_sub(processed);
    let per_item = elapsed.as_secs_f64() / processed as f64;
    Some(Duration::from_secs_f64(per_item * left as f64))
}

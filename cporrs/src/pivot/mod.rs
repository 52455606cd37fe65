//! The pivot engine: query payloads, aggregators and the planner.

pub mod aggregate;
pub mod planner;
pub mod query;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{PortalError, Result};

pub use aggregate::{Aggregator, AggregatorInfo};
pub use planner::execute;
pub use query::{CalcStage, CalculationSpec, PivotQuery, PivotResult, ValueFormat, MAX_MEASURES};

/// Deadline and cancellation tracking for one pivot execution.
///
/// The planner is a pure in-memory computation that never suspends, so
/// cancellation and deadlines are observed cooperatively: between the filter,
/// grouping and materialization passes, and inside per-row evaluation loops.
pub struct ExecutionBudget {
    started: Instant,
    soft: Duration,
    hard: Duration,
    cancelled: Arc<AtomicBool>,
}

impl ExecutionBudget {
    pub fn new(soft_ms: u64, hard_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            soft: Duration::from_millis(soft_ms),
            hard: Duration::from_millis(hard_ms),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle a request handler can trip when the client goes away.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Fails with `Cancelled` or `Timeout` when the execution should stop.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(PortalError::Cancelled);
        }
        if self.started.elapsed() > self.hard {
            return Err(PortalError::Timeout(self.hard.as_millis() as u64));
        }
        Ok(())
    }

    /// True once the soft deadline has passed; surfaces as a warning.
    pub fn soft_exceeded(&self) -> bool {
        self.started.elapsed() > self.soft
    }
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self::new(30_000, 60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_budget_passes_checkpoint() {
        let budget = ExecutionBudget::default();
        assert!(budget.checkpoint().is_ok());
        assert!(!budget.soft_exceeded());
    }

    #[test]
    fn cancelled_budget_fails() {
        let budget = ExecutionBudget::default();
        budget.cancel_handle().store(true, Ordering::Relaxed);
        assert!(matches!(budget.checkpoint(), Err(PortalError::Cancelled)));
    }

    #[test]
    fn exhausted_budget_times_out() {
        let budget = ExecutionBudget::new(0, 0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(budget.checkpoint(), Err(PortalError::Timeout(_))));
        assert!(budget.soft_exceeded());
    }
}

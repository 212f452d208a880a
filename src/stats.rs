//! Stats Collector
//!
//! Lock-free per-operation counters observed after every dispatched request,
//! plus a drift-free periodic reporter.
//!
//! ## Responsibilities
//! - Count successful/failed attempts per [`Operation`]
//! - Track the number of items currently stored
//! - Log a snapshot every period on a timer that never drifts

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::protocol::{ErrorCode, Operation};

/// Successful / failed attempt counters for one operation
#[derive(Debug, Default)]
struct OperationCounters {
    successful: AtomicU64,
    failed: AtomicU64,
}

/// Shared server statistics
///
/// Every counter sits on its own cache line so workers recording different
/// operations do not contend.
#[derive(Debug)]
pub struct Stats {
    total_items: CachePadded<AtomicU64>,
    operations: [CachePadded<OperationCounters>; Operation::ALL.len()],
}

impl Stats {
    /// Start counting from `initial_items` already stored
    pub fn new(initial_items: u64) -> Self {
        Self {
            total_items: CachePadded::new(AtomicU64::new(initial_items)),
            operations: Default::default(),
        }
    }

    /// Record the outcome of one dispatched request
    pub fn record(&self, operation: Operation, error: ErrorCode) {
        let counters = &self.operations[operation.index()];
        if error.is_ok() {
            counters.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match operation {
            Operation::Insert => {
                self.total_items.fetch_add(1, Ordering::Relaxed);
            }
            Operation::Delete => {
                // Saturate: another process may have inserted what we delete
                let _ = self.total_items.fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |n| Some(n.saturating_sub(1)),
                );
            }
            Operation::Update | Operation::Get => {}
        }
    }

    /// Items currently stored, as seen by this server
    pub fn total_items(&self) -> u64 {
        self.total_items.load(Ordering::Relaxed)
    }

    /// Copy every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut operations = [OperationStats::default(); Operation::ALL.len()];
        for (slot, counters) in operations.iter_mut().zip(self.operations.iter()) {
            slot.successful = counters.successful.load(Ordering::Relaxed);
            slot.failed = counters.failed.load(Ordering::Relaxed);
        }
        StatsSnapshot {
            total_items: self.total_items(),
            operations,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(0)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Counters for one operation at snapshot time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub successful: u64,
    pub failed: u64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_items: u64,
    operations: [OperationStats; Operation::ALL.len()],
}

impl StatsSnapshot {
    pub fn operation(&self, operation: Operation) -> OperationStats {
        self.operations[operation.index()]
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total items currently in Database: {}", self.total_items)?;
        for operation in Operation::ALL {
            let counters = self.operation(operation);
            writeln!(
                f,
                "Total {} attempts since server's start (successful/failed): {}/{}",
                operation, counters.successful, counters.failed
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Reporter
// =============================================================================

/// One periodic report: the tick it was scheduled for and what it saw
#[derive(Debug, Clone)]
pub struct Report {
    pub deadline: Instant,
    pub snapshot: StatsSnapshot,
}

/// Log a snapshot every `period` until `cancel` fires, and hand each one to
/// `sink` if given.
///
/// Ticks are scheduled at `start + n * period`, so slow reports do not push
/// later ones back. A dropped receiver only stops the hand-off.
pub async fn report_periodically(
    stats: Arc<Stats>,
    period: Duration,
    cancel: CancellationToken,
    mut sink: Option<mpsc::Sender<Report>>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        let deadline = tokio::select! {
            _ = cancel.cancelled() => break,
            deadline = ticker.tick() => deadline,
        };
        let snapshot = stats.snapshot();
        tracing::info!(target: "mapkv::stats", "\n{}", snapshot);

        let Some(tx) = sink.as_ref() else { continue };
        let closed = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(Report { deadline, snapshot }) => sent.is_err(),
        };
        if closed {
            sink = None;
        }
    }
    tracing::debug!("Stats reporter stopped");
}

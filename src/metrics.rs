//! Counters collected by each client and summed once the benchmark ends.
//!
//! Every client owns a [`WorkerResult`] and reports it exactly once, when its timer
//! expires. [`Webbench::execute()`](../struct.Webbench.html#method.execute) sums all
//! reported results into the [`AggregateStats`] it returns, and displaying those
//! with [`std::fmt::Display`] produces the benchmark report:
//!
//! ```text
//! succeeded = 5860 pages/min, 108808 bytes/sec.
//! Requests: 2930 successful, 0 failed.
//! ```

use chrono::prelude::*;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::time::Duration;

/// What one client measured during its run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerResult {
    /// Requests that completed, through closing the connection.
    pub succeeded: usize,
    /// Attempts abandoned because a connect, write, read or close failed.
    pub failed: usize,
    /// Bytes sent for `POST` requests, bytes received for every other method.
    pub bytes: u64,
}
impl Add for WorkerResult {
    type Output = WorkerResult;

    fn add(self, other: WorkerResult) -> WorkerResult {
        WorkerResult {
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
            bytes: self.bytes + other.bytes,
        }
    }
}
impl AddAssign for WorkerResult {
    fn add_assign(&mut self, other: WorkerResult) {
        *self = *self + other;
    }
}
impl Sum for WorkerResult {
    fn sum<I: Iterator<Item = WorkerResult>>(iter: I) -> WorkerResult {
        iter.fold(WorkerResult::default(), Add::add)
    }
}

/// The sum of every reported [`WorkerResult`], returned when a benchmark completes.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateStats {
    /// Summed counters of all clients that reported.
    pub totals: WorkerResult,
    /// How long every client ran, rates are computed over this duration.
    pub duration: Duration,
    /// How many clients were launched.
    pub clients: usize,
    /// How many clients reported their results.
    pub reported: usize,
    /// An optional system timestamp indicating when the benchmark started.
    pub started: Option<DateTime<Local>>,
    /// An optional system timestamp indicating when the last client finished.
    pub stopped: Option<DateTime<Local>>,
}
impl AggregateStats {
    pub fn new(duration: Duration, clients: usize) -> AggregateStats {
        AggregateStats {
            totals: WorkerResult::default(),
            duration,
            clients,
            reported: 0,
            started: None,
            stopped: None,
        }
    }

    /// Add the result reported by one client.
    pub fn record(&mut self, result: WorkerResult) {
        self.totals += result;
        self.reported += 1;
    }

    pub fn succeeded(&self) -> usize {
        self.totals.succeeded
    }

    pub fn failed(&self) -> usize {
        self.totals.failed
    }

    pub fn bytes(&self) -> u64 {
        self.totals.bytes
    }

    /// Every attempt, whether it succeeded or failed.
    pub fn requests(&self) -> usize {
        self.totals.succeeded + self.totals.failed
    }

    /// Attempts per minute, both succeeded and failed, rounded down.
    pub fn pages_per_minute(&self) -> u64 {
        let seconds = self.duration.as_secs_f64();
        if seconds == 0.0 {
            return 0;
        }
        (self.requests() as f64 * 60.0 / seconds) as u64
    }

    /// Bytes transferred per second, rounded down.
    pub fn bytes_per_second(&self) -> u64 {
        let seconds = self.duration.as_secs_f64();
        if seconds == 0.0 {
            return 0;
        }
        (self.totals.bytes as f64 / seconds) as u64
    }
}
impl fmt::Display for AggregateStats {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "succeeded = {} pages/min, {} bytes/sec.\nRequests: {} successful, {} failed.",
            self.pages_per_minute(),
            self.bytes_per_second(),
            self.totals.succeeded,
            self.totals.failed
        )
    }
}

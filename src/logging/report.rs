//! Serial versus parallel comparison of a single workload.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::sync::stats::WaitStats;

/// Timing, correctness and contention summary of one comparison run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub elapsed_serial: Duration,
    pub elapsed_parallel: Duration,
    /// `elapsed_serial / elapsed_parallel`, `0.0` if the parallel run took no
    /// measurable time.
    pub speedup: f64,
    /// Whether the parallel result matched the serial one.
    pub correct: bool,
    pub fill_events: u64,
    pub empty_events: u64,
    pub avg_producer_wait: Duration,
    pub avg_consumer_wait: Duration,
}

impl RunReport {
    pub fn new(
        elapsed_serial: Duration,
        elapsed_parallel: Duration,
        correct: bool,
        waits: &WaitStats,
    ) -> Self {
        let parallel = elapsed_parallel.as_secs_f64();
        let speedup = if parallel > 0.0 {
            elapsed_serial.as_secs_f64() / parallel
        } else {
            0.0
        };
        Self {
            elapsed_serial,
            elapsed_parallel,
            speedup,
            correct,
            fill_events: waits.fill_events,
            empty_events: waits.empty_events,
            avg_producer_wait: waits.avg_producer_wait(),
            avg_consumer_wait: waits.avg_consumer_wait(),
        }
    }
}

/// Receiver of finished reports, e.g. a document renderer.
pub trait ReportSink {
    fn publish(&self, report: &RunReport);
}

/// Emits every report as one structured `tracing` event.
#[derive(Debug, Default, Copy, Clone)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn publish(&self, report: &RunReport) {
        info!(
            serial_ms = report.elapsed_serial.as_secs_f64() * 1e3,
            parallel_ms = report.elapsed_parallel.as_secs_f64() * 1e3,
            speedup = report.speedup,
            correct = report.correct,
            fill_events = report.fill_events,
            empty_events = report.empty_events,
            avg_producer_wait_us = report.avg_producer_wait.as_micros() as u64,
            avg_consumer_wait_us = report.avg_consumer_wait.as_micros() as u64,
            "run report"
        );
    }
}

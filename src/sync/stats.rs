//! Contention accounting for a bounded queue.
//!
//! `WaitStats` is written only by the thread that actually waited, while it holds
//! the queue lock, and is read as a snapshot once every loop has joined.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counts and latencies of every blocking event on both sides of a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStats {
    /// Number of `put` calls that found the queue full and had to block.
    pub fill_events: u64,
    /// Number of `get` calls that found the queue empty and had to block.
    pub empty_events: u64,
    /// Blocked time of each full-queue wait, in the order they ended.
    pub producer_wait_durations: Vec<Duration>,
    /// Blocked time of each empty-queue wait, in the order they ended.
    pub consumer_wait_durations: Vec<Duration>,
}

impl WaitStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a producer that blocked on a full queue for `waited`.
    pub fn record_fill(&mut self, waited: Duration) {
        self.fill_events += 1;
        self.producer_wait_durations.push(waited);
    }

    /// Record a consumer that blocked on an empty queue for `waited`.
    pub fn record_empty(&mut self, waited: Duration) {
        self.empty_events += 1;
        self.consumer_wait_durations.push(waited);
    }

    pub fn total_producer_wait(&self) -> Duration {
        self.producer_wait_durations.iter().sum()
    }

    pub fn total_consumer_wait(&self) -> Duration {
        self.consumer_wait_durations.iter().sum()
    }

    /// Mean producer wait, zero when producers never blocked.
    pub fn avg_producer_wait(&self) -> Duration {
        mean(&self.producer_wait_durations)
    }

    /// Mean consumer wait, zero when consumers never blocked.
    pub fn avg_consumer_wait(&self) -> Duration {
        mean(&self.consumer_wait_durations)
    }

    /// Fold another accumulator into this one, keeping each sequence's order.
    pub fn merge(&mut self, other: &WaitStats) {
        self.fill_events += other.fill_events;
        self.empty_events += other.empty_events;
        self.producer_wait_durations
            .extend_from_slice(&other.producer_wait_durations);
        self.consumer_wait_durations
            .extend_from_slice(&other.consumer_wait_durations);
    }
}

fn mean(waits: &[Duration]) -> Duration {
    if waits.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = waits.iter().sum();
    match u32::try_from(waits.len()) {
        Ok(count) => total / count,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / waits.len() as f64),
    }
}

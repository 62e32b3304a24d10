//! Producer side of a pipeline run.
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::AcqRel;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{comms::queue::BoundedQueue, sync::shutdown::ShutdownSignal, PipeError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerState {
    /// Pulling the next item out of the source.
    Generating,
    /// Handing an item to the queue, possibly blocked on backpressure.
    Offering,
    /// Last live producer, broadcasting end of stream.
    SignalingShutdown,
    Terminated,
    /// Stopped early by the abort signal, shutdown left unarmed.
    Aborted,
}

/// What one producer did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerReport {
    pub id: usize,
    /// Items the queue accepted from this producer.
    pub offered: usize,
    /// Whether this producer was the one that armed shutdown.
    pub armed_shutdown: bool,
}

/// Drives one item source into a shared queue.
///
/// The loop always finishes its source unless the abort signal fires; the
/// shutdown signal is only armed by whichever producer completes last.
pub struct ProducerLoop<T> {
    id: usize,
    queue: Arc<BoundedQueue<T>>,
    shutdown: Arc<ShutdownSignal>,
    abort: Arc<ShutdownSignal>,
    live: Arc<AtomicUsize>,
    poll: Duration,
    pace: Option<Duration>,
    state: ProducerState,
}

impl<T> ProducerLoop<T> {
    /// `live` counts producers that have not yet completed; it must start at
    /// the number of producers sharing `queue`.
    pub fn new(
        id: usize,
        queue: Arc<BoundedQueue<T>>,
        abort: Arc<ShutdownSignal>,
        live: Arc<AtomicUsize>,
    ) -> Self {
        let shutdown = Arc::clone(queue.shutdown_signal());
        Self {
            id,
            queue,
            shutdown,
            abort,
            live,
            poll: Duration::from_millis(50),
            pace: None,
            state: ProducerState::Generating,
        }
    }

    /// How often a producer blocked on a full queue re-checks the abort signal.
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Pause for `pace` before offering each item, waking early on abort.
    pub fn with_pace(mut self, pace: Option<Duration>) -> Self {
        self.pace = pace;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Offer every item of `source` to the queue, then arm shutdown if this was
    /// the last live producer.
    pub fn run<I>(&mut self, source: I) -> Result<ProducerReport, PipeError>
    where
        I: IntoIterator<Item = T>,
    {
        debug!(producer = self.id, "producer started");
        let mut offered = 0;
        self.state = ProducerState::Generating;

        for item in source {
            if self.aborted() {
                return self.abort_with(offered);
            }
            self.state = ProducerState::Offering;
            match self.queue.put_cancellable(item, &self.abort, self.poll) {
                Ok(()) => offered += 1,
                Err(PipeError::Aborted) => return self.abort_with(offered),
                Err(err) => {
                    warn!(producer = self.id, offered, error = %err, "producer stopped");
                    self.state = ProducerState::Terminated;
                    return Err(err);
                }
            }
            self.state = ProducerState::Generating;
        }

        debug!(producer = self.id, offered, "producer finished its range");
        let armed_shutdown = if self.live.fetch_sub(1, AcqRel) == 1 {
            self.state = ProducerState::SignalingShutdown;
            info!(producer = self.id, "last producer done, arming shutdown");
            self.shutdown.arm()
        } else {
            false
        };
        self.state = ProducerState::Terminated;
        Ok(ProducerReport {
            id: self.id,
            offered,
            armed_shutdown,
        })
    }

    /// Checked once per item. When pacing, the pause doubles as the abort poll.
    fn aborted(&self) -> bool {
        match self.pace {
            Some(pace) => self.abort.wait_or_timeout(pace),
            None => self.abort.is_set(),
        }
    }

    fn abort_with(&mut self, offered: usize) -> Result<ProducerReport, PipeError> {
        warn!(producer = self.id, offered, "producer aborted");
        self.state = ProducerState::Aborted;
        Err(PipeError::Aborted)
    }
}

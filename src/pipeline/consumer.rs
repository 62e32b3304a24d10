//! Consumer side of a pipeline run.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    comms::queue::{BoundedQueue, Delivery},
    panic_message, PipeError,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerState {
    Idle,
    /// Inside `get`, possibly parked on an empty queue.
    Fetching,
    /// Running the handler, outside the queue lock.
    Processing,
    Terminated,
}

/// What one consumer did before it saw end of stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerReport {
    pub id: usize,
    /// Items the handler accepted.
    pub processed: usize,
    /// Items dropped because they failed to decode.
    pub malformed: usize,
    /// Items dropped because the handler returned an error or panicked.
    pub failed: usize,
}

impl ConsumerReport {
    /// Every item this consumer took off the queue.
    pub fn received(&self) -> usize {
        self.processed + self.malformed + self.failed
    }

    pub fn dropped(&self) -> usize {
        self.malformed + self.failed
    }
}

/// Drains a shared queue through a handler until end of stream.
///
/// A failing item never stops the loop: it is counted and skipped.
pub struct ConsumerLoop<T> {
    id: usize,
    queue: Arc<BoundedQueue<T>>,
    state: ConsumerState,
}

impl<T> ConsumerLoop<T> {
    pub fn new(id: usize, queue: Arc<BoundedQueue<T>>) -> Self {
        Self {
            id,
            queue,
            state: ConsumerState::Idle,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn run<H>(&mut self, handler: &H) -> ConsumerReport
    where
        H: Fn(T) -> Result<(), PipeError> + ?Sized,
    {
        debug!(consumer = self.id, "consumer started");
        let mut report = ConsumerReport {
            id: self.id,
            ..ConsumerReport::default()
        };

        loop {
            self.state = ConsumerState::Fetching;
            let item = match self.queue.get() {
                Delivery::Item(item) => item,
                Delivery::EndOfStream => break,
            };

            self.state = ConsumerState::Processing;
            match catch_unwind(AssertUnwindSafe(|| handler(item))) {
                Ok(Ok(())) => report.processed += 1,
                Ok(Err(err @ PipeError::MalformedFrame { .. })) => {
                    warn!(consumer = self.id, error = %err, "dropping malformed item");
                    report.malformed += 1;
                }
                Ok(Err(err)) => {
                    warn!(consumer = self.id, error = %err, "handler failed, dropping item");
                    report.failed += 1;
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    warn!(consumer = self.id, reason = %reason, "handler panicked, dropping item");
                    report.failed += 1;
                }
            }
            self.state = ConsumerState::Idle;
        }

        self.state = ConsumerState::Terminated;
        debug!(
            consumer = self.id,
            processed = report.processed,
            dropped = report.dropped(),
            "consumer reached end of stream"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn drains_then_terminates_on_end_of_stream() {
        let queue = BoundedQueue::new(4).unwrap();
        for i in 0..4u32 {
            queue.put(i).unwrap();
        }
        queue.shutdown_signal().arm();

        let seen = Mutex::new(Vec::new());
        let mut consumer = ConsumerLoop::new(0, Arc::clone(&queue));
        let report = consumer.run(&|item: u32| {
            seen.lock().push(item);
            Ok(())
        });

        assert_eq!(report.processed, 4);
        assert_eq!(report.dropped(), 0);
        assert_eq!(consumer.state(), ConsumerState::Terminated);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let queue = BoundedQueue::new(8).unwrap();
        for i in 0..6u32 {
            queue.put(i).unwrap();
        }
        queue.close();

        let mut consumer = ConsumerLoop::new(1, Arc::clone(&queue));
        let report = consumer.run(&|item: u32| match item % 3 {
            0 => Ok(()),
            1 => Err(PipeError::MalformedFrame { len: 2 }),
            _ => Err(PipeError::HandlerFailure(format!("item {item}"))),
        });

        assert_eq!(report.processed, 2);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.received(), 6);
    }

    #[test]
    fn handler_panic_is_contained() {
        let queue = BoundedQueue::new(4).unwrap();
        queue.put(0u32).unwrap();
        queue.put(1u32).unwrap();
        queue.close();

        let mut consumer = ConsumerLoop::new(2, Arc::clone(&queue));
        let report = consumer.run(&|item: u32| {
            if item == 0 {
                panic!("boom");
            }
            Ok(())
        });
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed, 1);
    }

    #[test]
    fn idle_consumer_exits_promptly_after_shutdown() {
        let queue = BoundedQueue::<u32>::new(2).unwrap();
        let handle = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || ConsumerLoop::new(0, queue).run(&|_item: u32| Ok(())))
        };

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        queue.shutdown_signal().arm();
        let report = handle.join().unwrap();
        assert_eq!(report.received(), 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

//! Per-run producer/consumer engine.
//!
//! A [`Pipeline`] owns everything one run shares: the bounded queue, the
//! shutdown signal that ends the stream, the abort signal an outside caller may
//! fire, and the count of producers still running. `run` spawns the loops as
//! scoped threads, so handlers and sources may borrow from the caller.
pub mod config;
pub mod consumer;
pub mod producer;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    comms::queue::BoundedQueue,
    panic_message,
    sync::{shutdown::ShutdownSignal, stats::WaitStats},
    PipeError,
};

use self::{
    config::PipelineConfig,
    consumer::{ConsumerLoop, ConsumerReport},
    producer::{ProducerLoop, ProducerReport},
};

/// Everything observed during one run, assembled after all threads joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub producers: Vec<ProducerReport>,
    pub consumers: Vec<ConsumerReport>,
    pub waits: WaitStats,
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Items accepted by the queue across all producers.
    pub fn produced(&self) -> usize {
        self.producers.iter().map(|p| p.offered).sum()
    }

    /// Items taken off the queue across all consumers, dropped ones included.
    pub fn consumed(&self) -> usize {
        self.consumers.iter().map(ConsumerReport::received).sum()
    }

    pub fn processed(&self) -> usize {
        self.consumers.iter().map(|c| c.processed).sum()
    }

    pub fn malformed(&self) -> usize {
        self.consumers.iter().map(|c| c.malformed).sum()
    }

    pub fn failed(&self) -> usize {
        self.consumers.iter().map(|c| c.failed).sum()
    }
}

/// One run's worth of shared state.
pub struct Pipeline<T> {
    config: PipelineConfig,
    queue: Arc<BoundedQueue<T>>,
    shutdown: Arc<ShutdownSignal>,
    abort: Arc<ShutdownSignal>,
    live: Arc<AtomicUsize>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Validates `config` before anything is allocated or spawned.
    pub fn new(config: PipelineConfig) -> Result<Self, PipeError> {
        config.validate()?;
        let shutdown = Arc::new(ShutdownSignal::new());
        let queue = BoundedQueue::with_signal(config.queue_capacity, Arc::clone(&shutdown))?;
        Ok(Self {
            config,
            queue,
            shutdown,
            abort: Arc::new(ShutdownSignal::new()),
            live: Arc::new(AtomicUsize::new(config.producer_count)),
        })
    }
}

impl<T> Pipeline<T> {
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<BoundedQueue<T>> {
        &self.queue
    }

    /// Fires once the last producer finished its source.
    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Handle an outside caller can arm to stop producers early.
    pub fn abort_handle(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.abort)
    }

    pub fn abort(&self) {
        self.abort.arm();
    }

    /// A producer loop wired to this run. Each of the `producer_count` loops
    /// must run to completion for shutdown to fire.
    pub fn producer(&self, id: usize) -> ProducerLoop<T> {
        ProducerLoop::new(
            id,
            Arc::clone(&self.queue),
            Arc::clone(&self.abort),
            Arc::clone(&self.live),
        )
        .with_poll(self.config.cancel_poll())
        .with_pace(self.config.producer_pace())
    }

    pub fn consumer(&self, id: usize) -> ConsumerLoop<T> {
        ConsumerLoop::new(id, Arc::clone(&self.queue))
    }
}

impl<T: Send> Pipeline<T> {
    /// Run one producer per entry of `sources` and `consumer_count` consumers
    /// applying `handler`, returning once every thread has joined.
    ///
    /// If any producer fails, the queue is closed so consumers drain what was
    /// already accepted and exit; the first producer error is then returned.
    pub fn run<S, H>(self, sources: Vec<S>, handler: &H) -> Result<PipelineReport, PipeError>
    where
        S: IntoIterator<Item = T> + Send,
        H: Fn(T) -> Result<(), PipeError> + Sync,
    {
        if sources.len() != self.config.producer_count {
            return Err(PipeError::InvalidConfiguration(format!(
                "expected {} producer sources, got {}",
                self.config.producer_count,
                sources.len()
            )));
        }

        let started = Instant::now();
        let (producers, consumers, failure) = thread::scope(|scope| {
            let mut consumer_handles = Vec::with_capacity(self.config.consumer_count);
            let mut failure: Option<PipeError> = None;

            for id in 0..self.config.consumer_count {
                let mut consumer = self.consumer(id);
                let spawned = thread::Builder::new()
                    .name(format!("consumer-{id}"))
                    .spawn_scoped(scope, move || consumer.run(handler));
                match spawned {
                    Ok(handle) => consumer_handles.push(handle),
                    Err(err) => {
                        failure.get_or_insert(PipeError::Spawn(err.to_string()));
                    }
                }
            }

            let mut producer_handles = Vec::with_capacity(sources.len());
            if failure.is_none() {
                for (id, source) in sources.into_iter().enumerate() {
                    let mut producer = self.producer(id);
                    let spawned = thread::Builder::new()
                        .name(format!("producer-{id}"))
                        .spawn_scoped(scope, move || producer.run(source));
                    match spawned {
                        Ok(handle) => producer_handles.push(handle),
                        Err(err) => {
                            failure.get_or_insert(PipeError::Spawn(err.to_string()));
                            break;
                        }
                    }
                }
            }

            let mut producers = Vec::with_capacity(producer_handles.len());
            for handle in producer_handles {
                match handle.join() {
                    Ok(Ok(report)) => producers.push(report),
                    Ok(Err(err)) => {
                        failure.get_or_insert(err);
                    }
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        warn!(reason = %reason, "producer thread panicked");
                        failure.get_or_insert(PipeError::WorkerPanicked(reason));
                    }
                }
            }
            if failure.is_some() {
                // shutdown will never be armed by a producer, end the stream here
                self.queue.close();
            }

            let mut consumers = Vec::with_capacity(consumer_handles.len());
            for handle in consumer_handles {
                match handle.join() {
                    Ok(report) => consumers.push(report),
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        warn!(reason = %reason, "consumer thread panicked");
                        failure.get_or_insert(PipeError::WorkerPanicked(reason));
                    }
                }
            }
            (producers, consumers, failure)
        });

        if let Some(err) = failure {
            return Err(err);
        }

        let report = PipelineReport {
            producers,
            consumers,
            waits: self.queue.stats(),
            elapsed: started.elapsed(),
        };
        debug!(
            produced = report.produced(),
            consumed = report.consumed(),
            fill_events = report.waits.fill_events,
            empty_events = report.waits.empty_events,
            "pipeline run complete"
        );
        Ok(report)
    }
}

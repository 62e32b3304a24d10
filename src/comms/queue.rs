//! Fixed-capacity blocking mailbox.
//!
//! `BoundedQueue` is the one lock every pipeline loop contends on. A single mutex
//! guards the slots, the closed flag and the wait accounting. Two condition
//! variables hang off that mutex: `not_full` parks producers and `not_empty`
//! parks consumers. Every predicate is re-checked inside the critical section
//! after each wakeup, so neither spurious wakeups nor a shutdown racing a
//! consumer's check can strand a thread.
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use crate::{
    sync::{
        shutdown::{ShutdownListener, ShutdownSignal},
        stats::WaitStats,
    },
    PipeError,
};

/// What a consumer receives from [`BoundedQueue::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// The oldest queued item.
    Item(T),
    /// The queue is empty and nothing will ever be queued again.
    EndOfStream,
}

impl<T> Delivery<T> {
    pub fn into_item(self) -> Option<T> {
        match self {
            Delivery::Item(item) => Some(item),
            Delivery::EndOfStream => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Delivery::EndOfStream)
    }
}

#[derive(Debug)]
struct Slots<T> {
    items: VecDeque<T>,
    closed: bool,
    stats: WaitStats,
}

/// Bounded multi-producer, multi-consumer FIFO with blocking `put`/`get`.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    slots: Mutex<Slots<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    shutdown: Arc<ShutdownSignal>,
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Create a queue with its own shutdown signal.
    pub fn new(capacity: usize) -> Result<Arc<Self>, PipeError> {
        Self::with_signal(capacity, Arc::new(ShutdownSignal::new()))
    }

    /// Create a queue whose end of stream is driven by `shutdown`. The queue
    /// registers itself so that arming the signal wakes its parked consumers.
    pub fn with_signal(
        capacity: usize,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<Arc<Self>, PipeError> {
        if capacity == 0 {
            return Err(PipeError::InvalidConfiguration(
                "queue capacity must be greater than 0".to_string(),
            ));
        }
        let queue = Arc::new(Self {
            slots: Mutex::new(Slots {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                stats: WaitStats::new(),
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
            shutdown: Arc::clone(&shutdown),
        });
        let weak = Arc::downgrade(&queue);
        let listener: Weak<dyn ShutdownListener> = weak;
        shutdown.register(listener);
        Ok(queue)
    }
}

impl<T> BoundedQueue<T> {
    /// Enqueue `item`, blocking while the queue is full.
    ///
    /// Fails with `QueueClosed` once the queue was closed or its shutdown signal
    /// fired, including while this call was blocked; the item is dropped.
    pub fn put(&self, item: T) -> Result<(), PipeError> {
        let mut slots = self.slots.lock();
        self.wait_for_space(&mut slots, None)?;
        slots.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Like [`put`](Self::put), but while blocked re-checks `cancel` at least
    /// every `poll`. Returns `Aborted` if `cancel` fired before space freed up.
    pub fn put_cancellable(
        &self,
        item: T,
        cancel: &ShutdownSignal,
        poll: Duration,
    ) -> Result<(), PipeError> {
        let mut slots = self.slots.lock();
        self.wait_for_space(&mut slots, Some((cancel, poll)))?;
        slots.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    fn wait_for_space(
        &self,
        slots: &mut MutexGuard<'_, Slots<T>>,
        cancel: Option<(&ShutdownSignal, Duration)>,
    ) -> Result<(), PipeError> {
        if self.finished(slots) {
            return Err(PipeError::QueueClosed);
        }
        if slots.items.len() < self.capacity {
            return Ok(());
        }

        trace!(capacity = self.capacity, "queue full, producer waiting");
        let started = Instant::now();
        let mut outcome = Ok(());
        while slots.items.len() >= self.capacity {
            if self.finished(slots) {
                outcome = Err(PipeError::QueueClosed);
                break;
            }
            match cancel {
                Some((cancel, poll)) => {
                    if cancel.is_set() {
                        outcome = Err(PipeError::Aborted);
                        break;
                    }
                    self.not_full.wait_for(slots, poll);
                }
                None => self.not_full.wait(slots),
            }
        }
        slots.stats.record_fill(started.elapsed());
        outcome
    }

    fn finished(&self, slots: &Slots<T>) -> bool {
        slots.closed || self.shutdown.is_set()
    }

    /// Dequeue the oldest item, blocking while the queue is empty and the
    /// stream has not finished.
    pub fn get(&self) -> Delivery<T> {
        let mut slots = self.slots.lock();
        if slots.items.is_empty() && !self.finished(&slots) {
            trace!("queue empty, consumer waiting");
            let started = Instant::now();
            while slots.items.is_empty() && !self.finished(&slots) {
                self.not_empty.wait(&mut slots);
            }
            slots.stats.record_empty(started.elapsed());
        }
        self.take(&mut slots)
    }

    /// Like [`get`](Self::get), but gives up after `timeout`. Returns `None` if
    /// nothing was delivered in time and the stream is still open.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Delivery<T>> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();
        if slots.items.is_empty() && !self.finished(&slots) {
            let started = Instant::now();
            while slots.items.is_empty() && !self.finished(&slots) {
                if self.not_empty.wait_until(&mut slots, deadline).timed_out() {
                    break;
                }
            }
            slots.stats.record_empty(started.elapsed());
            if slots.items.is_empty() && !self.finished(&slots) {
                return None;
            }
        }
        Some(self.take(&mut slots))
    }

    fn take(&self, slots: &mut MutexGuard<'_, Slots<T>>) -> Delivery<T> {
        match slots.items.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Delivery::Item(item)
            }
            None => Delivery::EndOfStream,
        }
    }

    /// Explicit teardown by the owner. Later `put`s fail with `QueueClosed`;
    /// consumers drain what is left and then see end of stream.
    pub fn close(&self) {
        let mut slots = self.slots.lock();
        if slots.closed {
            return;
        }
        slots.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }

    pub fn len(&self) -> usize {
        self.slots.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Snapshot of the wait accounting so far.
    pub fn stats(&self) -> WaitStats {
        self.slots.lock().stats.clone()
    }
}

impl<T: Send> ShutdownListener for BoundedQueue<T> {
    fn on_shutdown(&self) {
        // taking the lock orders this broadcast after any in-flight predicate check
        let _slots = self.slots.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

//! One-shot, broadcastable stop flag.
//!
//! A `ShutdownSignal` only ever moves from unset to set. Arming it wakes every
//! thread parked in [`ShutdownSignal::wait_or_timeout`] and notifies every
//! registered [`ShutdownListener`], which is how queues wake their blocked
//! consumers without polling.
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::Weak;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Anything that parks threads on its own condition variables and must wake
/// them when a signal fires.
pub trait ShutdownListener: Send + Sync {
    /// Called once, after the flag is visible as set. Implementors must take the
    /// lock their waiters check the flag under before broadcasting.
    fn on_shutdown(&self);
}

/// Idempotent stop flag shared by every loop of a run.
pub struct ShutdownSignal {
    armed: AtomicBool,
    gate: Mutex<bool>,
    cond: Condvar,
    listeners: Mutex<Vec<Weak<dyn ShutdownListener>>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        ShutdownSignal::new()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("armed", &self.is_set())
            .finish()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            gate: Mutex::new(false),
            cond: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Set the flag and wake everyone. Returns `true` only for the call that
    /// performed the transition; later calls are no-ops.
    pub fn arm(&self) -> bool {
        {
            let mut armed = self.gate.lock();
            if *armed {
                return false;
            }
            *armed = true;
            self.armed.store(true, Release);
        }
        self.cond.notify_all();

        // flag is already visible, so anyone registering from here on notifies itself
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners.iter().filter_map(Weak::upgrade) {
            listener.on_shutdown();
        }
        true
    }

    /// Non-blocking read of the flag.
    pub fn is_set(&self) -> bool {
        self.armed.load(Acquire)
    }

    /// Block until the signal is armed or `timeout` elapses, whichever comes
    /// first. Returns whether the signal fired.
    pub fn wait_or_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut armed = self.gate.lock();
        while !*armed {
            if self.cond.wait_until(&mut armed, deadline).timed_out() {
                break;
            }
        }
        *armed
    }

    /// Attach a listener to be notified on `arm`. A listener registered after
    /// the signal fired is notified immediately.
    pub fn register(&self, listener: Weak<dyn ShutdownListener>) {
        {
            let mut listeners = self.listeners.lock();
            if !self.is_set() {
                listeners.retain(|l| l.strong_count() > 0);
                listeners.push(listener);
                return;
            }
        }
        if let Some(listener) = listener.upgrade() {
            listener.on_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::SeqCst;
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct CountingListener {
        calls: AtomicUsize,
    }

    impl ShutdownListener for CountingListener {
        fn on_shutdown(&self) {
            self.calls.fetch_add(1, SeqCst);
        }
    }

    #[test]
    fn arm_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_set());
        assert!(signal.arm());
        assert!(signal.is_set());
        assert!(!signal.arm(), "second arm must be a no-op");
        assert!(signal.is_set());
    }

    #[test]
    fn wait_times_out_when_never_armed() {
        let signal = ShutdownSignal::new();
        let started = Instant::now();
        assert!(!signal.wait_or_timeout(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_returns_immediately_once_armed() {
        let signal = ShutdownSignal::new();
        signal.arm();
        assert!(signal.wait_or_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn arm_wakes_every_waiter() {
        let signal = Arc::new(ShutdownSignal::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let signal = Arc::clone(&signal);
                thread::spawn(move || signal.wait_or_timeout(Duration::from_secs(10)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        signal.arm();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn listeners_are_notified_once() {
        let signal = ShutdownSignal::new();
        let listener = Arc::new(CountingListener::default());
        let weak: Weak<dyn ShutdownListener> =
            Arc::downgrade(&(Arc::clone(&listener) as Arc<dyn ShutdownListener>));
        signal.register(weak);

        signal.arm();
        signal.arm();
        assert_eq!(listener.calls.load(SeqCst), 1);
    }

    #[test]
    fn late_listener_is_notified_on_register() {
        let signal = ShutdownSignal::new();
        signal.arm();

        let listener = Arc::new(CountingListener::default());
        let weak: Weak<dyn ShutdownListener> =
            Arc::downgrade(&(Arc::clone(&listener) as Arc<dyn ShutdownListener>));
        signal.register(weak);
        assert_eq!(listener.calls.load(SeqCst), 1);
    }

    #[test]
    fn dropped_listeners_are_skipped() {
        let signal = ShutdownSignal::new();
        {
            let listener: Arc<dyn ShutdownListener> = Arc::new(CountingListener::default());
            signal.register(Arc::downgrade(&listener));
        }
        assert!(signal.arm());
    }
}

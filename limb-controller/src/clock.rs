use lazy_static::lazy_static;
use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

lazy_static! {
    static ref PROCESS_START: Instant = Instant::now();
}

/// Source of time for the control loop, in seconds.
///
/// Expected to be monotonic, but the arm only checks it.
/// Any `FnMut() -> f64` closure can be used as a clock,
/// which is handy for driving the loop from simulator time.
pub trait Clock: Send {
    fn now(&mut self) -> f64;
}

impl<F> Clock for F
where
    F: FnMut() -> f64 + Send,
{
    fn now(&mut self) -> f64 {
        self()
    }
}

/// Wall clock time elapsed since process start
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub fn new() -> Self {
        // touch the start instant so that it isn't initialized lazily on the first tick
        lazy_static::initialize(&PROCESS_START);
        MonotonicClock
    }
}

impl Clock for MonotonicClock {
    fn now(&mut self) -> f64 {
        PROCESS_START.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test or simulator can keep one handle
/// and hand the other to the arm.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, time: f64) {
        *self.lock() = time;
    }

    pub fn advance(&self, seconds: f64) {
        *self.lock() += seconds;
    }

    pub fn time(&self) -> f64 {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, f64> {
        // a poisoned clock still holds a valid f64
        self.time.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&mut self) -> f64 {
        self.time()
    }
}

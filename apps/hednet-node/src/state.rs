use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters shared between the bandwidth worker and the agent owner.
///
/// Byte and point increments are single-writer (the worker task); the owner
/// only reads them for the stop-check and logging. Once `running` is cleared
/// nothing is added except the single final flush report in
/// [`crate::agent::NodeAgent::stop`].
#[derive(Debug, Default)]
pub struct RunState {
    running: AtomicBool,
    total_bytes: AtomicU64,
    session_points: Mutex<f64>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Add downloaded bytes and return the new total.
    pub fn add_bytes(&self, bytes: u64) -> u64 {
        self.total_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    /// Credit points confirmed by the server and return the session total.
    pub fn credit_points(&self, points: f64) -> f64 {
        let mut guard = self.session_points.lock().unwrap();
        *guard += points;
        *guard
    }

    pub fn session_points(&self) -> f64 {
        *self.session_points.lock().unwrap()
    }
}

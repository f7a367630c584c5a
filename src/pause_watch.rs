//! Collection-pause watchdog.
//!
//! Pause timing is unrelated to exception correlation, so it keeps its own
//! lock; the two are never held at the same time.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A pause that ran past the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseIncident {
    pub duration: Duration,
    pub threshold: Duration,
}

/// Stamps pause starts and measures them at the finish.
#[derive(Debug)]
pub struct PauseWatch {
    threshold: Duration,
    started: Mutex<Option<Instant>>,
}

impl PauseWatch {
    pub fn new(threshold: Duration) -> Self {
        PauseWatch {
            threshold,
            started: Mutex::new(None),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Stamp the start of a pause. A start with one already open replaces
    /// the stamp; the runtime occasionally skips a finish notification.
    pub fn pause_start(&self) {
        let mut started = self
            .started
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if started.replace(Instant::now()).is_some() {
            tracing::debug!("pause start with one already open, restarting the clock");
        }
    }

    /// Close the open pause and report it if it overran the threshold.
    pub fn pause_finish(&self) -> Option<PauseIncident> {
        // Take the timestamp before the lock so queueing here never
        // inflates the measurement.
        self.pause_finish_at(Instant::now())
    }

    /// Close the open pause as if it ended at `ended`. The replay tool uses
    /// this to model pauses without sleeping through them.
    pub fn pause_finish_at(&self, ended: Instant) -> Option<PauseIncident> {
        let started = self
            .started
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()?;
        let duration = ended.saturating_duration_since(started);
        if duration > self.threshold {
            Some(PauseIncident {
                duration,
                threshold: self.threshold,
            })
        } else {
            None
        }
    }
}

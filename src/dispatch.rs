//! Hands reports from the runtime's callback threads to a sidecar thread
//! that owns all sink I/O.
//!
//! Callback threads only push onto a lock-free queue and return; the
//! monitored runtime never waits on a socket or a disk. A full queue drops
//! the report and counts the drop instead of blocking.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::report::ReportEnvelope;
use crate::reporter::Reporter;

/// Default queue capacity. Reports are rare; a burst larger than this means
/// the process is in far deeper trouble than a lost report.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Sidecar poll interval while the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Delivery counters, readable at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub submitted: u64,
    pub dropped: u64,
}

impl DispatchStats {
    /// Envelopes that actually made it onto the queue.
    pub fn accepted(&self) -> u64 {
        self.submitted - self.dropped
    }
}

/// Queue plus sidecar thread delivering envelopes to a [`Reporter`].
pub struct ReportDispatcher {
    queue: Arc<ArrayQueue<ReportEnvelope>>,
    shutdown: Arc<AtomicBool>,
    submitted: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    sidecar: Option<JoinHandle<()>>,
}

impl ReportDispatcher {
    /// Start the sidecar thread.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, reporter: Arc<Reporter>) -> Self {
        assert!(capacity > 0, "dispatch queue capacity must be greater than zero");
        let queue = Arc::new(ArrayQueue::new(capacity));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_queue = Arc::clone(&queue);
        let worker_shutdown = Arc::clone(&shutdown);
        let sidecar = std::thread::Builder::new()
            .name("centinela-dispatch".to_string())
            .spawn(move || sidecar_loop(&worker_queue, &worker_shutdown, &reporter))
            .ok();
        if sidecar.is_none() {
            tracing::warn!("could not start the dispatch sidecar; reports will queue up");
        }

        ReportDispatcher {
            queue,
            shutdown,
            submitted: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            sidecar,
        }
    }

    /// Enqueue one envelope. Never blocks; a full queue drops it.
    pub fn submit(&self, envelope: ReportEnvelope) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if let Err(rejected) = self.queue.push(envelope) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "dispatch queue full, dropping report: {}",
                rejected.report.reason
            );
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Stop the sidecar after it drains everything still queued.
    pub fn shutdown(mut self) -> DispatchStats {
        self.stop_sidecar();
        self.stats()
    }

    fn stop_sidecar(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sidecar.take() {
            if handle.join().is_err() {
                tracing::warn!("dispatch sidecar ended with a panic");
            }
        }
    }
}

impl Drop for ReportDispatcher {
    fn drop(&mut self) {
        self.stop_sidecar();
    }
}

fn sidecar_loop(
    queue: &ArrayQueue<ReportEnvelope>,
    shutdown: &AtomicBool,
    reporter: &Reporter,
) {
    loop {
        let mut delivered = false;
        while let Some(envelope) = queue.pop() {
            reporter.dispatch(&envelope);
            delivered = true;
        }
        if shutdown.load(Ordering::SeqCst) {
            // One last drain for anything that slipped in while delivering.
            while let Some(envelope) = queue.pop() {
                reporter.dispatch(&envelope);
            }
            break;
        }
        if !delivered {
            std::thread::sleep(IDLE_SLEEP);
        }
    }
}

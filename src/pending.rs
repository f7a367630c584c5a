//! Holding area for uncaught exceptions whose fate is still open.
//!
//! An exception that leaves managed code without a catching frame is not
//! reported on the spot: native code further down may still catch it. Its
//! ready-to-send report parks here until a matching catch event resolves it
//! or the owning thread terminates and flushes it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::event::{ExceptionRef, ThreadId};
use crate::report::ExceptionReport;
use crate::thread_map::ThreadMap;

/// Upper bound of parked reports per thread. Deep native call chains can
/// stack several postponed exceptions before any of them resolves.
pub const DEFAULT_PENDING_LIMIT: usize = 8;

/// A postponed report plus the identity needed to resolve it later.
#[derive(Debug)]
pub struct PendingReport {
    pub exception: ExceptionRef,
    pub report: ExceptionReport,
}

/// Lock-free view of whether any pending entries exist at all.
///
/// Read outside the agent lock to skip catch events when nothing is parked
/// anywhere. Relaxed ordering is enough: a catch that can match an entry
/// runs on the same thread that parked it, so its own earlier store is
/// always visible; other threads at worst take the slow path or skip work
/// they could not complete anyway.
#[derive(Debug, Clone)]
pub struct PendingGauge(Arc<AtomicUsize>);

impl PendingGauge {
    pub fn is_clear(&self) -> bool {
        self.0.load(Ordering::Relaxed) == 0
    }

    pub fn outstanding(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-thread queues of postponed reports.
///
/// Queues are bounded: parking into a full queue displaces the oldest entry
/// back to the caller, which must flush it rather than lose it.
#[derive(Debug)]
pub struct PendingStore {
    queues: ThreadMap<VecDeque<PendingReport>>,
    limit: usize,
    outstanding: Arc<AtomicUsize>,
}

impl PendingStore {
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "pending limit must be greater than zero");
        PendingStore {
            queues: ThreadMap::new(),
            limit,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle for lock-free emptiness checks.
    pub fn gauge(&self) -> PendingGauge {
        PendingGauge(Arc::clone(&self.outstanding))
    }

    /// Park a report for `tid`. Returns the oldest entry when the queue was
    /// already full and had to make room.
    ///
    /// Each exception object holds at most one slot per queue: parking an
    /// identity that is already present swaps the newer report into its
    /// slot instead of queueing a duplicate.
    pub fn stash(&mut self, tid: ThreadId, pending: PendingReport) -> Option<PendingReport> {
        let queue = self.queues.get_or_insert_with(tid, VecDeque::new);
        if let Some(slot) = queue.iter_mut().find(|p| p.exception == pending.exception) {
            *slot = pending;
            return None;
        }
        let displaced = if queue.len() == self.limit {
            queue.pop_front()
        } else {
            self.outstanding.fetch_add(1, Ordering::Relaxed);
            None
        };
        queue.push_back(pending);
        displaced
    }

    /// Whether `tid` has a parked entry for this exact exception object.
    pub fn matches(&self, tid: ThreadId, exception: ExceptionRef) -> bool {
        self.queues
            .get(tid)
            .is_some_and(|queue| queue.iter().any(|p| p.exception == exception))
    }

    /// Remove and return the parked entry for this exact exception object.
    /// Entries for other exceptions on the same thread stay put.
    pub fn take_if_matching(
        &mut self,
        tid: ThreadId,
        exception: ExceptionRef,
    ) -> Option<PendingReport> {
        let (taken, now_empty) = {
            let queue = self.queues.get_mut(tid)?;
            let position = queue.iter().position(|p| p.exception == exception)?;
            let taken = queue.remove(position)?;
            let now_empty = queue.is_empty();
            (taken, now_empty)
        };
        if now_empty {
            self.queues.remove(tid);
        }
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        Some(taken)
    }

    /// Remove and return everything parked for `tid`, oldest first. Used at
    /// thread termination.
    pub fn take_unconditionally(&mut self, tid: ThreadId) -> Vec<PendingReport> {
        let drained: Vec<PendingReport> = self
            .queues
            .remove(tid)
            .map(Vec::from)
            .unwrap_or_default();
        if !drained.is_empty() {
            self.outstanding.fetch_sub(drained.len(), Ordering::Relaxed);
        }
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

//! The correlation core: turns raw exception events into at-most-once
//! report decisions.
//!
//! Per thread it keeps a dedup window of already-reported identities and a
//! queue of postponed uncaught reports. A thrown event either gets ignored,
//! suppressed, reported on the spot, or parked; a catch event resolves a
//! parked entry one way or the other; thread termination flushes whatever
//! is left. Every decision is made under the caller's lock with no I/O.

use crate::config::{AgentConfig, ExecutableSource, TypeFilter};
use crate::dedup_ring::DedupRing;
use crate::error::MetadataError;
use crate::event::{CaughtEvent, ExceptionRef, ThreadId, ThrownEvent};
use crate::format;
use crate::pending::{PendingGauge, PendingReport, PendingStore};
use crate::report::{ExceptionReport, ReportKind};
use crate::runtime::RuntimeInspector;
use crate::stats::CorrelationStats;
use crate::thread_map::ThreadMap;

/// Policy knobs the core works from.
#[derive(Debug, Clone)]
pub struct CorrelationPolicy {
    pub caught_types: TypeFilter,
    pub dedup_capacity: usize,
    pub pending_limit: usize,
    pub executable: ExecutableSource,
    pub diagnostic_methods: Vec<String>,
}

impl From<&AgentConfig> for CorrelationPolicy {
    fn from(config: &AgentConfig) -> Self {
        CorrelationPolicy {
            caught_types: config.caught_types.clone(),
            dedup_capacity: config.dedup_capacity,
            pending_limit: config.pending_limit,
            executable: config.executable,
            diagnostic_methods: config.diagnostic_methods.clone(),
        }
    }
}

/// What the core decided about one thrown event.
#[derive(Debug)]
pub enum ThrowDisposition {
    /// Outside the reporting policy; nothing was recorded.
    Ignored,
    /// The thread's dedup window already has this identity.
    Suppressed,
    /// Parked until a catch or thread termination resolves it. `displaced`
    /// carries a report pushed out of a full queue, which must be delivered
    /// now.
    Postponed { displaced: Option<ExceptionReport> },
    /// Reported on the spot.
    Reported(ExceptionReport),
    /// Metadata was unavailable; the event is dropped, state unchanged.
    Skipped(MetadataError),
}

/// What the core decided about one catch event.
#[derive(Debug)]
pub enum CatchDisposition {
    /// Nothing is parked anywhere; the event needed no work.
    NonePending,
    /// Nothing parked matches this thread and exception object.
    NoMatch,
    /// Parked entry dropped: the dedup window already had the identity.
    Suppressed,
    /// Parked entry resolved into a caught report.
    Resolved(ExceptionReport),
    /// Metadata was unavailable; the parked entry stays for thread end.
    Skipped(MetadataError),
}

/// Outcome of a thread-termination flush.
#[derive(Debug, Default)]
pub struct ThreadEndSummary {
    /// Reports to deliver, oldest first.
    pub flushed: Vec<ExceptionReport>,
    /// Parked entries dropped as duplicates of earlier deliveries.
    pub suppressed: usize,
    /// Whether the thread had any tracked state at all.
    pub had_state: bool,
}

/// Per-thread exception lifecycle state plus the decision logic over it.
#[derive(Debug)]
pub struct Correlator {
    policy: CorrelationPolicy,
    rings: ThreadMap<DedupRing>,
    pending: PendingStore,
    stats: CorrelationStats,
}

impl Correlator {
    /// # Panics
    ///
    /// Panics if the policy carries a zero dedup capacity or pending limit;
    /// the configuration layer rejects both before anything gets here.
    pub fn new(policy: CorrelationPolicy) -> Self {
        assert!(
            policy.dedup_capacity > 0,
            "dedup ring capacity must be greater than zero"
        );
        let pending = PendingStore::new(policy.pending_limit);
        Correlator {
            policy,
            rings: ThreadMap::new(),
            pending,
            stats: CorrelationStats::default(),
        }
    }

    /// Lock-free emptiness view of the pending store, for the catch fast
    /// path.
    pub fn pending_gauge(&self) -> PendingGauge {
        self.pending.gauge()
    }

    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }

    /// Decide what to do with a thrown event.
    pub fn on_thrown(
        &mut self,
        event: &ThrownEvent,
        runtime: &dyn RuntimeInspector,
    ) -> ThrowDisposition {
        self.stats.thrown_seen += 1;

        // A caught-at-throw occurrence only matters when the caught list
        // names its type, so settle that before touching any state.
        let mut type_name = None;
        if event.caught_at_throw() {
            if self.policy.caught_types.is_empty() {
                self.stats.ignored += 1;
                return ThrowDisposition::Ignored;
            }
            let name = match runtime.exception_type(event.exception) {
                Ok(descriptor) => format::normalize_type_name(&descriptor),
                Err(err) => {
                    self.stats.skipped_metadata += 1;
                    return ThrowDisposition::Skipped(err);
                }
            };
            if !self.policy.caught_types.matches(&name) {
                self.stats.ignored += 1;
                return ThrowDisposition::Ignored;
            }
            type_name = Some(name);
        }

        if self.ring_contains(event.tid, event.exception) {
            self.stats.suppressed += 1;
            return ThrowDisposition::Suppressed;
        }

        let report = match self.build_report(event, type_name, runtime) {
            Ok(report) => report,
            Err(err) => {
                self.stats.skipped_metadata += 1;
                return ThrowDisposition::Skipped(err);
            }
        };

        if event.caught_at_throw() {
            self.remember_reported(event.tid, event.exception);
            self.stats.reported_immediate += 1;
            ThrowDisposition::Reported(report)
        } else {
            self.stats.postponed += 1;
            let displaced = self.pending.stash(
                event.tid,
                PendingReport {
                    exception: event.exception,
                    report,
                },
            );
            let displaced = match displaced {
                Some(old) => self.flush_displaced(event.tid, old),
                None => None,
            };
            ThrowDisposition::Postponed { displaced }
        }
    }

    /// Decide what to do with a catch event.
    pub fn on_caught(
        &mut self,
        event: &CaughtEvent,
        runtime: &dyn RuntimeInspector,
    ) -> CatchDisposition {
        if self.pending.is_empty() {
            return CatchDisposition::NonePending;
        }
        self.stats.caught_examined += 1;

        if !self.pending.matches(event.tid, event.exception) {
            self.stats.unmatched_catches += 1;
            return CatchDisposition::NoMatch;
        }

        if self.ring_contains(event.tid, event.exception) {
            let _ = self.pending.take_if_matching(event.tid, event.exception);
            self.stats.suppressed += 1;
            return CatchDisposition::Suppressed;
        }

        // The catching frame names the report. Resolve it before consuming
        // the parked entry, so a metadata failure leaves the entry in place
        // for the thread-end flush.
        let frame = match runtime.frame_info(event.frame) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.skipped_metadata += 1;
                return CatchDisposition::Skipped(err);
            }
        };

        let Some(mut parked) = self.pending.take_if_matching(event.tid, event.exception) else {
            // Not reachable: the probe above found the entry under the same
            // lock.
            self.stats.unmatched_catches += 1;
            return CatchDisposition::NoMatch;
        };

        let class = format::normalize_type_name(&frame.class);
        parked.report.kind = ReportKind::Caught;
        parked.report.reason =
            format::format_reason(true, &parked.report.type_name, &class, &frame.method);
        self.remember_reported(event.tid, event.exception);
        self.stats.reported_caught += 1;
        CatchDisposition::Resolved(parked.report)
    }

    /// Tear down a terminating thread's state and flush whatever it still
    /// owed.
    pub fn on_thread_end(&mut self, tid: ThreadId) -> ThreadEndSummary {
        let drained = self.pending.take_unconditionally(tid);
        let ring = self.rings.remove(tid);
        let had_state = ring.is_some() || !drained.is_empty();

        let mut summary = ThreadEndSummary {
            had_state,
            ..ThreadEndSummary::default()
        };
        for parked in drained {
            let duplicate = ring
                .as_ref()
                .is_some_and(|ring| ring.contains(parked.exception));
            if duplicate {
                summary.suppressed += 1;
                self.stats.suppressed += 1;
            } else {
                self.stats.reported_uncaught += 1;
                summary.flushed.push(parked.report);
            }
        }
        if had_state {
            self.stats.threads_torn_down += 1;
        }
        summary
    }

    /// Number of threads with live state; replay surfaces this at the end
    /// so leaks show up.
    pub fn tracked_threads(&self) -> usize {
        self.rings.len()
    }

    fn ring_contains(&self, tid: ThreadId, exception: ExceptionRef) -> bool {
        self.rings
            .get(tid)
            .is_some_and(|ring| ring.contains(exception))
    }

    /// Record a delivery in the thread's dedup window, creating the window
    /// on first use.
    fn remember_reported(&mut self, tid: ThreadId, exception: ExceptionRef) {
        let capacity = self.policy.dedup_capacity;
        self.rings
            .get_or_insert_with(tid, || DedupRing::new(capacity))
            .push(exception);
    }

    /// A report pushed out of a full pending queue is delivered right away
    /// unless the window already saw it. The thread is still alive, so the
    /// identity is recorded like any other delivery.
    fn flush_displaced(
        &mut self,
        tid: ThreadId,
        displaced: PendingReport,
    ) -> Option<ExceptionReport> {
        if self.ring_contains(tid, displaced.exception) {
            self.stats.suppressed += 1;
            return None;
        }
        self.remember_reported(tid, displaced.exception);
        self.stats.displaced += 1;
        Some(displaced.report)
    }

    fn build_report(
        &self,
        event: &ThrownEvent,
        prefetched_type: Option<String>,
        runtime: &dyn RuntimeInspector,
    ) -> Result<ExceptionReport, MetadataError> {
        let frame = runtime.frame_info(event.frame)?;
        let type_name = match prefetched_type {
            Some(name) => name,
            None => format::normalize_type_name(&runtime.exception_type(event.exception)?),
        };
        let caught = event.caught_at_throw();
        let class = format::normalize_type_name(&frame.class);
        let reason = format::format_reason(caught, &type_name, &class, &frame.method);

        let want_module = self.policy.executable == ExecutableSource::ThrowingModule;
        let (stack_trace, executable) =
            match runtime.render_stack_trace(event.tid, event.exception, want_module) {
                Some(mut trace) => {
                    format::truncate_on_boundary(&mut trace.text, format::MAX_TRACE_LEN);
                    (Some(trace.text), trace.module)
                }
                None => (None, None),
            };

        Ok(ExceptionReport {
            kind: if caught {
                ReportKind::Caught
            } else {
                ReportKind::Uncaught
            },
            reason,
            type_name,
            stack_trace,
            executable,
            details: self.collect_diagnostics(runtime),
            tid: Some(event.tid),
        })
    }

    fn collect_diagnostics(&self, runtime: &dyn RuntimeInspector) -> Vec<(String, String)> {
        self.policy
            .diagnostic_methods
            .iter()
            .filter_map(|method| {
                runtime
                    .call_diagnostic(method)
                    .map(|output| (method.clone(), output))
            })
            .collect()
    }
}

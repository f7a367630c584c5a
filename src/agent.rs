//! The assembled agent: correlation state behind one shared lock, delivery
//! behind a queue, pause timing behind its own lock.
//!
//! Entry points mirror the runtime's callbacks and are safe to call from
//! any of its threads. Decisions happen under the shared lock; the lock is
//! released before any report leaves the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use crate::config::AgentConfig;
use crate::correlator::{
    CatchDisposition, CorrelationPolicy, Correlator, ThrowDisposition,
};
use crate::dispatch::{DispatchStats, ReportDispatcher, DEFAULT_QUEUE_CAPACITY};
use crate::event::{CaughtEvent, ThreadId, ThrownEvent};
use crate::pause_watch::{PauseIncident, PauseWatch};
use crate::pending::PendingGauge;
use crate::process_info::{ProcessSnapshot, RuntimeEnvironment};
use crate::report::{ExceptionReport, ReportEnvelope, ReportKind};
use crate::reporter::Reporter;
use crate::runtime::RuntimeInspector;
use crate::stats::CorrelationStats;

struct StartupContext {
    process: Arc<ProcessSnapshot>,
    environment: Arc<RuntimeEnvironment>,
}

/// In-process exception monitoring agent.
pub struct Agent {
    config: AgentConfig,
    runtime: Arc<dyn RuntimeInspector>,
    state: Mutex<Correlator>,
    gauge: PendingGauge,
    reporter: Arc<Reporter>,
    dispatcher: ReportDispatcher,
    pause_watch: PauseWatch,
    pause_overruns: AtomicU64,
    startup: OnceLock<StartupContext>,
}

impl Agent {
    /// Assemble with sinks derived from the configuration.
    pub fn new(config: AgentConfig, runtime: Arc<dyn RuntimeInspector>) -> Self {
        let reporter = Arc::new(Reporter::from_config(&config));
        Agent::with_reporter(config, runtime, reporter)
    }

    /// Assemble with a caller-supplied sink set.
    pub fn with_reporter(
        config: AgentConfig,
        runtime: Arc<dyn RuntimeInspector>,
        reporter: Arc<Reporter>,
    ) -> Self {
        let correlator = Correlator::new(CorrelationPolicy::from(&config));
        let gauge = correlator.pending_gauge();
        let dispatcher = ReportDispatcher::new(DEFAULT_QUEUE_CAPACITY, Arc::clone(&reporter));
        let pause_watch = PauseWatch::new(config.pause_threshold);
        Agent {
            config,
            runtime,
            state: Mutex::new(correlator),
            gauge,
            reporter,
            dispatcher,
            pause_watch,
            pause_overruns: AtomicU64::new(0),
            startup: OnceLock::new(),
        }
    }

    /// The runtime finished booting. Captures process context and runs the
    /// sink banners.
    pub fn on_vm_init(&self) {
        let context = self.startup_context();
        tracing::info!(
            "exception monitoring attached to pid {}",
            context.process.pid
        );
        self.reporter.announce(&context.environment);
    }

    /// A thrown-exception callback.
    pub fn on_exception(&self, event: ThrownEvent) {
        // A caught-at-throw event cannot produce anything while the caught
        // list is empty; skip the lock entirely.
        if event.caught_at_throw() && self.config.caught_types.is_empty() {
            return;
        }

        let disposition = self.correlator().on_thrown(&event, self.runtime.as_ref());
        match disposition {
            ThrowDisposition::Reported(report) => {
                tracing::debug!("reporting from {}: {}", event.tid, report.reason);
                self.emit(report);
            }
            ThrowDisposition::Postponed { displaced } => {
                tracing::debug!("postponing uncaught {} from {}", event.exception, event.tid);
                if let Some(report) = displaced {
                    tracing::warn!(
                        "pending queue for {} overflowed, reporting the oldest entry early",
                        event.tid
                    );
                    self.emit(report);
                }
            }
            ThrowDisposition::Suppressed => {
                tracing::debug!("{} from {} was already reported", event.exception, event.tid);
            }
            ThrowDisposition::Ignored => {}
            ThrowDisposition::Skipped(err) => {
                tracing::warn!("dropping thrown event from {}: {err}", event.tid);
            }
        }
    }

    /// A caught-exception callback.
    pub fn on_exception_catch(&self, event: CaughtEvent) {
        // Nothing is pending anywhere, which is the common case; stay off
        // the lock. The gauge cannot miss an entry parked by this same
        // thread, and entries never migrate between threads.
        if self.gauge.is_clear() {
            return;
        }

        let disposition = self.correlator().on_caught(&event, self.runtime.as_ref());
        match disposition {
            CatchDisposition::Resolved(report) => {
                tracing::debug!("catch on {} resolved: {}", event.tid, report.reason);
                self.emit(report);
            }
            CatchDisposition::Suppressed => {
                tracing::debug!("{} on {} was already reported", event.exception, event.tid);
            }
            CatchDisposition::Skipped(err) => {
                tracing::warn!("dropping catch event from {}: {err}", event.tid);
            }
            CatchDisposition::NonePending | CatchDisposition::NoMatch => {}
        }
    }

    /// A thread-termination callback.
    pub fn on_thread_end(&self, tid: ThreadId) {
        let summary = self.correlator().on_thread_end(tid);
        if summary.had_state {
            tracing::debug!(
                "{} ended, flushing {} report(s), {} suppressed",
                tid,
                summary.flushed.len(),
                summary.suppressed
            );
        }
        for report in summary.flushed {
            self.emit(report);
        }
    }

    /// A collection pause began.
    pub fn on_pause_start(&self) {
        self.pause_watch.pause_start();
    }

    /// A collection pause ended.
    pub fn on_pause_finish(&self) {
        self.finish_pause(self.pause_watch.pause_finish());
    }

    /// A collection pause ended at `ended`. Lets the replay tool model long
    /// pauses without sleeping through them.
    pub fn on_pause_finish_at(&self, ended: Instant) {
        self.finish_pause(self.pause_watch.pause_finish_at(ended));
    }

    /// Correlation counters with the pause count folded in.
    pub fn stats(&self) -> CorrelationStats {
        let mut stats = self.correlator().stats().clone();
        stats.pause_overruns = self.pause_overruns.load(Ordering::Relaxed);
        stats
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Threads with live correlation state right now.
    pub fn tracked_threads(&self) -> usize {
        self.correlator().tracked_threads()
    }

    /// Deliver everything still queued and stop the dispatch sidecar.
    pub fn shutdown(self) -> DispatchStats {
        tracing::debug!("shutting down report dispatch");
        let Agent { dispatcher, .. } = self;
        dispatcher.shutdown()
    }

    fn correlator(&self) -> MutexGuard<'_, Correlator> {
        // A panicking callback must not wedge every thread that follows.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn startup_context(&self) -> &StartupContext {
        self.startup.get_or_init(|| StartupContext {
            process: Arc::new(ProcessSnapshot::capture(self.runtime.as_ref())),
            environment: Arc::new(RuntimeEnvironment::collect(self.runtime.as_ref())),
        })
    }

    fn emit(&self, mut report: ExceptionReport) {
        let context = self.startup_context();
        if report.executable.is_none() {
            report.executable = context.process.main_artifact.clone();
        }
        self.dispatcher.submit(ReportEnvelope {
            report,
            process: Arc::clone(&context.process),
            environment: Arc::clone(&context.environment),
        });
    }

    fn finish_pause(&self, incident: Option<PauseIncident>) {
        let Some(incident) = incident else {
            return;
        };
        self.pause_overruns.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "collection pause of {:.3}s overran the {:.3}s threshold",
            incident.duration.as_secs_f64(),
            incident.threshold.as_secs_f64()
        );
        self.emit(pause_report(incident));
    }
}

fn pause_report(incident: PauseIncident) -> ExceptionReport {
    ExceptionReport {
        kind: ReportKind::PauseOverrun,
        reason: format!(
            "Collection pause took {:.3}s, over the {:.3}s threshold",
            incident.duration.as_secs_f64(),
            incident.threshold.as_secs_f64()
        ),
        type_name: "collection-pause".to_string(),
        stack_trace: Some("no stack trace".to_string()),
        executable: None,
        details: Vec::new(),
        tid: None,
    }
}

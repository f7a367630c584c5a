//! Property-based tests over the dedup window, the pending store and the
//! correlation core.
//!
//! The interesting invariants here are the bounded ones: state never grows
//! past its configured limits no matter what the event stream looks like,
//! and within an unevicted window every distinct exception identity is
//! delivered exactly once.

use proptest::prelude::*;

use centinela::config::{ExecutableSource, TypeFilter};
use centinela::correlator::{CatchDisposition, CorrelationPolicy, Correlator};
use centinela::dedup_ring::DedupRing;
use centinela::event::{CaughtEvent, ExceptionRef, MethodRef, ThreadId, ThrownEvent};
use centinela::format;
use centinela::pending::{PendingReport, PendingStore};
use centinela::report::{ExceptionReport, ReportKind};
use centinela::runtime::ScriptedRuntime;

fn skeleton_report(tid: i64) -> ExceptionReport {
    ExceptionReport {
        kind: ReportKind::Uncaught,
        reason: String::new(),
        type_name: String::new(),
        stack_trace: None,
        executable: None,
        details: Vec::new(),
        tid: Some(ThreadId::new(tid)),
    }
}

fn wide_policy(pending_limit: usize) -> CorrelationPolicy {
    CorrelationPolicy {
        caught_types: TypeFilter::none(),
        // Wide enough that nothing is ever evicted in these runs.
        dedup_capacity: 64,
        pending_limit,
        executable: ExecutableSource::MainArtifact,
        diagnostic_methods: Vec::new(),
    }
}

fn runtime_with_identities(count: u64) -> ScriptedRuntime {
    let mut rt = ScriptedRuntime::new();
    rt.define_frame(MethodRef::new(1), "com.example.Worker", "step");
    for id in 0..count {
        rt.define_type(ExceptionRef::new(id), "Lcom/example/StormError;");
    }
    rt
}

fn throw(tid: i64, id: u64) -> ThrownEvent {
    ThrownEvent {
        tid: ThreadId::new(tid),
        exception: ExceptionRef::new(id),
        frame: MethodRef::new(1),
        catch_frame: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_ring_keeps_exactly_the_newest_identities(
        capacity in 1usize..6,
        count in 0u64..40,
    ) {
        let mut ring = DedupRing::new(capacity);
        for id in 0..count {
            ring.push(ExceptionRef::new(id));
        }

        prop_assert_eq!(ring.len(), count.min(capacity as u64) as usize);
        let oldest_kept = count.saturating_sub(capacity as u64);
        for id in 0..count {
            prop_assert_eq!(ring.contains(ExceptionRef::new(id)), id >= oldest_kept);
        }
    }

    #[test]
    fn prop_ring_never_exceeds_capacity(
        capacity in 1usize..8,
        raws in prop::collection::vec(0u64..20, 0..100),
    ) {
        let mut ring = DedupRing::new(capacity);
        for raw in &raws {
            ring.push(ExceptionRef::new(*raw));
        }
        prop_assert!(ring.len() <= capacity);
        if let Some(last) = raws.last() {
            prop_assert!(ring.contains(ExceptionRef::new(*last)));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_pending_store_respects_its_limit(
        limit in 1usize..6,
        count in 0u64..30,
    ) {
        let mut store = PendingStore::new(limit);
        let gauge = store.gauge();
        let mut displaced = 0u64;
        for id in 0..count {
            let entry = PendingReport {
                exception: ExceptionRef::new(id),
                report: skeleton_report(1),
            };
            if store.stash(ThreadId::new(1), entry).is_some() {
                displaced += 1;
            }
        }

        prop_assert_eq!(displaced, count.saturating_sub(limit as u64));
        prop_assert_eq!(gauge.outstanding() as u64, count.min(limit as u64));
    }

    #[test]
    fn prop_restashing_never_grows_the_store(
        limit in 1usize..6,
        raws in prop::collection::vec(0u64..10, 0..60),
    ) {
        let mut store = PendingStore::new(limit);
        let gauge = store.gauge();
        let mut distinct = std::collections::HashSet::new();
        for raw in &raws {
            distinct.insert(*raw);
            let entry = PendingReport {
                exception: ExceptionRef::new(*raw),
                report: skeleton_report(1),
            };
            let _ = store.stash(ThreadId::new(1), entry);
            prop_assert!(gauge.outstanding() <= limit);
            prop_assert!(gauge.outstanding() <= distinct.len());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// With a window wide enough to never evict, every distinct identity is
    /// delivered exactly once however often it is rethrown and however small
    /// the pending queue is.
    #[test]
    fn prop_each_identity_delivers_exactly_once_inside_the_window(
        count in 1u64..40,
        rethrows in 1usize..4,
        pending_limit in 1usize..6,
    ) {
        let rt = runtime_with_identities(count);
        let mut core = Correlator::new(wide_policy(pending_limit));
        let gauge = core.pending_gauge();

        let mut delivered = 0u64;
        for _ in 0..rethrows {
            for id in 0..count {
                if let centinela::correlator::ThrowDisposition::Postponed {
                    displaced: Some(_),
                } = core.on_thrown(&throw(1, id), &rt)
                {
                    delivered += 1;
                }
            }
        }
        let summary = core.on_thread_end(ThreadId::new(1));
        delivered += summary.flushed.len() as u64;

        prop_assert_eq!(delivered, count);
        prop_assert_eq!(core.stats().total_reported(), count);
        prop_assert!(gauge.is_clear());
        prop_assert_eq!(core.tracked_threads(), 0);
    }

    #[test]
    fn prop_catches_on_another_thread_never_resolve(
        count in 1u64..20,
    ) {
        let rt = runtime_with_identities(count);
        let mut core = Correlator::new(wide_policy(8));

        for id in 0..count {
            core.on_thrown(&throw(1, id), &rt);
            // The same identity caught on a different thread must not touch
            // the parked entry.
            let disposition = core.on_caught(
                &CaughtEvent {
                    tid: ThreadId::new(2),
                    exception: ExceptionRef::new(id),
                    frame: MethodRef::new(1),
                },
                &rt,
            );
            prop_assert!(matches!(disposition, CatchDisposition::NoMatch));
        }

        let flushed = core.on_thread_end(ThreadId::new(1)).flushed.len() as u64;
        let displaced = core.stats().displaced;
        prop_assert_eq!(flushed + displaced, count);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_reason_never_exceeds_the_cap(
        exception_type in "[a-zA-Z0-9._$]{0,300}",
        class in "[a-zA-Z0-9._$]{0,300}",
        method in "[a-zA-Z0-9_$]{0,100}",
    ) {
        let reason = format::format_reason(false, &exception_type, &class, &method);
        prop_assert!(reason.len() <= format::MAX_REASON_LEN);
    }

    #[test]
    fn prop_reason_cap_holds_for_multibyte_names(
        exception_type in "\\PC{0,120}",
        class in "\\PC{0,120}",
        method in "\\PC{0,60}",
    ) {
        let reason = format::format_reason(true, &exception_type, &class, &method);
        prop_assert!(reason.len() <= format::MAX_REASON_LEN);
    }

    #[test]
    fn prop_normalize_unwraps_descriptors(
        inner in "[a-z][a-z0-9/]{0,40}",
    ) {
        let descriptor = format!("L{inner};");
        prop_assert_eq!(
            format::normalize_type_name(&descriptor),
            inner.replace('/', ".")
        );
    }

    #[test]
    fn prop_normalized_names_carry_no_slashes(
        descriptor in "[A-Za-z0-9/;.$]{0,60}",
    ) {
        prop_assert!(!format::normalize_type_name(&descriptor).contains('/'));
    }

    #[test]
    fn prop_truncation_respects_char_boundaries(
        text in "\\PC{0,80}",
        max in 0usize..100,
    ) {
        let mut truncated = text.clone();
        format::truncate_on_boundary(&mut truncated, max);
        prop_assert!(truncated.len() <= max);
        prop_assert!(text.starts_with(&truncated));
    }
}

//! Concurrent callback stress tests.
//!
//! The agent's entry points are called from whatever thread the monitored
//! runtime happens to be on, so these tests hammer one shared agent from
//! many OS threads and assert the accounting still adds up afterwards.

use centinela::agent::Agent;
use centinela::config::AgentConfig;
use centinela::error::SinkError;
use centinela::event::{CaughtEvent, ExceptionRef, MethodRef, ThreadId, ThrownEvent};
use centinela::report::ReportEnvelope;
use centinela::reporter::{MemorySink, Reporter, ReportSink};
use centinela::runtime::ScriptedRuntime;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WORKERS: i64 = 8;
const STORM: usize = 50;

/// Each worker thread gets its own exception object and throw frame.
fn scripted_runtime() -> ScriptedRuntime {
    let mut rt = ScriptedRuntime::new();
    for worker in 0..WORKERS as u64 {
        rt.define_type(
            ExceptionRef::new(100 + worker),
            "Ljava/lang/IllegalStateException;",
        );
    }
    rt.define_frame(MethodRef::new(10), "com.example.Worker", "step");
    rt.define_frame(MethodRef::new(20), "com.example.Supervisor", "guard");
    rt
}

fn shared_agent(config: AgentConfig, reporter: Reporter) -> Arc<Agent> {
    Arc::new(Agent::with_reporter(
        config,
        Arc::new(scripted_runtime()),
        Arc::new(reporter),
    ))
}

fn reclaim(agent: Arc<Agent>) -> Agent {
    Arc::try_unwrap(agent)
        .map_err(|_| "agent still shared after joins")
        .unwrap()
}

fn throw(worker: i64) -> ThrownEvent {
    ThrownEvent {
        tid: ThreadId::new(worker),
        exception: ExceptionRef::new(100 + worker as u64),
        frame: MethodRef::new(10),
        catch_frame: None,
    }
}

#[test]
fn test_parallel_crashes_each_report_once() {
    let sink = MemorySink::new();
    let agent = shared_agent(
        AgentConfig::default(),
        Reporter::with_sinks(vec![Box::new(sink.clone())]),
    );

    let mut handles = vec![];
    for worker in 0..WORKERS {
        let agent = agent.clone();
        handles.push(thread::spawn(move || {
            agent.on_exception(throw(worker));
            agent.on_thread_end(ThreadId::new(worker));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = reclaim(agent).shutdown();
    assert_eq!(stats.submitted, WORKERS as u64);
    assert_eq!(stats.dropped, 0);
    assert_eq!(sink.len(), WORKERS as usize);
}

#[test]
fn test_parallel_rethrow_storms_stay_deduped() {
    let sink = MemorySink::new();
    let agent = shared_agent(
        AgentConfig::default(),
        Reporter::with_sinks(vec![Box::new(sink.clone())]),
    );

    let mut handles = vec![];
    for worker in 0..WORKERS {
        let agent = agent.clone();
        handles.push(thread::spawn(move || {
            // The same object thrown over and over reparks in place.
            for _ in 0..STORM {
                agent.on_exception(throw(worker));
            }
            agent.on_thread_end(ThreadId::new(worker));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let agent = reclaim(agent);
    let stats = agent.stats();
    assert_eq!(stats.thrown_seen, (WORKERS as u64) * (STORM as u64));
    assert_eq!(stats.reported_uncaught, WORKERS as u64);
    agent.shutdown();
    assert_eq!(sink.len(), WORKERS as usize);
}

#[test]
fn test_interleaved_catches_balance_the_books() {
    let config = AgentConfig::from_options("caught=java.lang.IllegalStateException").unwrap();
    let sink = MemorySink::new();
    let agent = shared_agent(config, Reporter::with_sinks(vec![Box::new(sink.clone())]));

    let mut handles = vec![];
    for worker in 0..WORKERS {
        let agent = agent.clone();
        handles.push(thread::spawn(move || {
            agent.on_exception(throw(worker));
            // Even-numbered workers recover their exception, odd ones crash.
            if worker % 2 == 0 {
                agent.on_exception_catch(CaughtEvent {
                    tid: ThreadId::new(worker),
                    exception: ExceptionRef::new(100 + worker as u64),
                    frame: MethodRef::new(20),
                });
            }
            agent.on_thread_end(ThreadId::new(worker));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let agent = reclaim(agent);
    let stats = agent.stats();
    let workers = WORKERS as u64;
    assert_eq!(stats.postponed, workers);
    assert_eq!(stats.reported_caught, workers / 2);
    assert_eq!(stats.reported_uncaught, workers - workers / 2);
    assert_eq!(stats.total_reported(), workers);
    assert_eq!(agent.tracked_threads(), 0);
    agent.shutdown();
    assert_eq!(sink.len(), WORKERS as usize);
}

/// Sink that takes a millisecond per report, so a flood outruns the queue.
#[derive(Clone)]
struct SlowSink {
    inner: MemorySink,
}

impl ReportSink for SlowSink {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn deliver(&self, envelope: &ReportEnvelope) -> Result<(), SinkError> {
        thread::sleep(Duration::from_millis(1));
        self.inner.deliver(envelope)
    }
}

#[test]
fn test_queue_overflow_drops_are_accounted() {
    let mut rt = ScriptedRuntime::new();
    rt.define_frame(MethodRef::new(10), "com.example.Worker", "step");
    for i in 0..500u64 {
        rt.define_type(ExceptionRef::new(10_000 + i), "Lcom/example/FloodError;");
    }
    let sink = MemorySink::new();
    let slow = SlowSink { inner: sink.clone() };
    let agent = Arc::new(Agent::with_reporter(
        AgentConfig::default(),
        Arc::new(rt),
        Arc::new(Reporter::with_sinks(vec![Box::new(slow)])),
    ));

    // Distinct identities on one thread force a fresh report per throw once
    // the pending queue starts displacing, flooding the dispatch queue much
    // faster than the slow sink drains it.
    for i in 0..500u64 {
        agent.on_exception(ThrownEvent {
            tid: ThreadId::new(1),
            exception: ExceptionRef::new(10_000 + i),
            frame: MethodRef::new(10),
            catch_frame: None,
        });
    }
    agent.on_thread_end(ThreadId::new(1));

    let stats = reclaim(agent).shutdown();
    // Exact counts depend on timing; the invariant does not.
    assert!(stats.dropped > 0);
    assert_eq!(stats.accepted() + stats.dropped, stats.submitted);
    assert_eq!(sink.len() as u64, stats.accepted());
}

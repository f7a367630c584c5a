//! Offline replay of recorded event streams.
//!
//! A stream is JSON lines, one object per runtime event. The loader builds
//! a [`ScriptedRuntime`] from the metadata carried on each line and a flat
//! event list; the runner then drives an [`Agent`] with it exactly as the
//! live callbacks would. Blank lines and `#` comments are skipped.
//!
//! Omitting metadata is meaningful: a `thrown` line without `class` and
//! `method` replays as a frame the runtime cannot describe, which is how
//! the metadata-failure paths get exercised from a fixture.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::BufRead;
use std::time::{Duration, Instant};

use crate::agent::Agent;
use crate::event::{CaughtEvent, ExceptionRef, MethodRef, ThreadId, ThrownEvent};
use crate::format;
use crate::runtime::{ScriptedRuntime, UNKNOWN_THREAD_NAME};

/// One parsed line of a stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", deny_unknown_fields)]
enum StreamLine {
    VmInit,
    MainArtifact {
        value: String,
    },
    Environment {
        key: String,
        value: String,
    },
    Diagnostic {
        method: String,
        output: String,
    },
    Thrown {
        tid: i64,
        exception: u64,
        #[serde(rename = "type")]
        type_name: Option<String>,
        class: Option<String>,
        method: Option<String>,
        caught_by: Option<FrameSpec>,
        trace: Option<Vec<String>>,
        thread_name: Option<String>,
        module: Option<String>,
    },
    Caught {
        tid: i64,
        exception: u64,
        class: Option<String>,
        method: Option<String>,
    },
    ThreadEnd {
        tid: i64,
    },
    PauseStart,
    PauseFinish {
        elapsed_ms: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
struct FrameSpec {
    class: Option<String>,
    method: Option<String>,
}

/// One event ready to hand to an [`Agent`].
#[derive(Debug, Clone, Copy)]
pub enum AgentEvent {
    VmInit,
    Thrown(ThrownEvent),
    Caught(CaughtEvent),
    ThreadEnd(ThreadId),
    PauseStart,
    PauseFinish { simulated: Option<Duration> },
}

/// A loaded stream: the scripted runtime and the events to drive.
#[derive(Debug)]
pub struct ReplaySession {
    pub runtime: ScriptedRuntime,
    pub events: Vec<AgentEvent>,
}

/// Parse a stream. Fails on the first malformed line, naming it.
pub fn load_stream(reader: impl BufRead) -> Result<ReplaySession> {
    let mut runtime = ScriptedRuntime::new();
    let mut events = Vec::new();
    let mut next_method: u64 = 1;

    for (index, line) in reader.lines().enumerate() {
        let number = index + 1;
        let line = line.with_context(|| format!("reading stream line {number}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed: StreamLine = serde_json::from_str(trimmed)
            .with_context(|| format!("parsing stream line {number}"))?;

        match parsed {
            StreamLine::VmInit => events.push(AgentEvent::VmInit),
            StreamLine::MainArtifact { value } => runtime.set_main_artifact(value),
            StreamLine::Environment { key, value } => runtime.push_environment(key, value),
            StreamLine::Diagnostic { method, output } => {
                runtime.define_diagnostic(method, output);
            }
            StreamLine::Thrown {
                tid,
                exception,
                type_name,
                class,
                method,
                caught_by,
                trace,
                thread_name,
                module,
            } => {
                let tid = ThreadId::new(tid);
                let exception = ExceptionRef::new(exception);
                if let Some(type_name) = type_name {
                    runtime.define_type(exception, type_name);
                }
                let frame = allocate_frame(&mut runtime, &mut next_method, class, method);
                let catch_frame = caught_by.map(|spec| {
                    allocate_frame(&mut runtime, &mut next_method, spec.class, spec.method)
                });
                if let Some(lines) = trace {
                    let thread = thread_name.as_deref().unwrap_or(UNKNOWN_THREAD_NAME);
                    let mut text = format::trace_header(thread);
                    text.push_str(&lines.join("\n"));
                    text.push('\n');
                    runtime.define_trace(exception, text, module);
                }
                events.push(AgentEvent::Thrown(ThrownEvent {
                    tid,
                    exception,
                    frame,
                    catch_frame,
                }));
            }
            StreamLine::Caught {
                tid,
                exception,
                class,
                method,
            } => {
                let frame = allocate_frame(&mut runtime, &mut next_method, class, method);
                events.push(AgentEvent::Caught(CaughtEvent {
                    tid: ThreadId::new(tid),
                    exception: ExceptionRef::new(exception),
                    frame,
                }));
            }
            StreamLine::ThreadEnd { tid } => {
                events.push(AgentEvent::ThreadEnd(ThreadId::new(tid)));
            }
            StreamLine::PauseStart => events.push(AgentEvent::PauseStart),
            StreamLine::PauseFinish { elapsed_ms } => events.push(AgentEvent::PauseFinish {
                simulated: elapsed_ms.map(Duration::from_millis),
            }),
        }
    }

    Ok(ReplaySession { runtime, events })
}

/// Drive an agent through a loaded event list.
pub fn run(agent: &Agent, events: &[AgentEvent]) {
    for event in events {
        match event {
            AgentEvent::VmInit => agent.on_vm_init(),
            AgentEvent::Thrown(thrown) => agent.on_exception(*thrown),
            AgentEvent::Caught(caught) => agent.on_exception_catch(*caught),
            AgentEvent::ThreadEnd(tid) => agent.on_thread_end(*tid),
            AgentEvent::PauseStart => agent.on_pause_start(),
            AgentEvent::PauseFinish { simulated } => match simulated {
                Some(elapsed) => agent.on_pause_finish_at(Instant::now() + *elapsed),
                None => agent.on_pause_finish(),
            },
        }
    }
}

/// Each event line gets fresh frame handles; identity only matters for
/// exceptions, never for methods.
fn allocate_frame(
    runtime: &mut ScriptedRuntime,
    next_method: &mut u64,
    class: Option<String>,
    method: Option<String>,
) -> MethodRef {
    let handle = MethodRef::new(*next_method);
    *next_method += 1;
    if let (Some(class), Some(method)) = (class, method) {
        runtime.define_frame(handle, class, method);
    }
    handle
}

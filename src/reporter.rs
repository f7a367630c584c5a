//! Report destinations and the fan-out across them.
//!
//! Every enabled destination sees each report exactly once. A destination
//! that fails is logged and, where the failure is clearly permanent,
//! disabled; the others keep going. Nothing in here may panic the process
//! over a bad report.

use serde_json::json;
use std::ffi::CString;
use std::fs::File;
use std::io::Write as _;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{AgentConfig, LogOutput};
use crate::error::SinkError;
use crate::process_info::RuntimeEnvironment;
use crate::report::{ExceptionReport, ReportEnvelope};

/// Problem-service record type for incidents from managed runtimes.
const PROBLEM_TYPE: &str = "managed-runtime";
const PROBLEM_ANALYZER: &str = "centinela";
const UNKNOWN_EXECUTABLE: &str = "*unknown*";

/// One report destination.
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver one report. Called off the runtime's callback threads.
    fn deliver(&self, envelope: &ReportEnvelope) -> Result<(), SinkError>;

    /// One-time startup banner. Most sinks have none.
    fn announce(&self, _environment: &RuntimeEnvironment) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Fan-out over the configured sinks.
pub struct Reporter {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl Reporter {
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut sinks: Vec<Box<dyn ReportSink>> = Vec::new();
        if config.output != LogOutput::Disabled {
            sinks.push(Box::new(FileSink::new(config.output.clone())));
        }
        if config.syslog {
            sinks.push(Box::new(SyslogSink));
        }
        if let Some(path) = &config.event_log {
            sinks.push(Box::new(EventLogSink::new(path.clone())));
        }
        if config.problem_service {
            sinks.push(Box::new(ProblemSink::new(config.problem_socket.clone())));
        }
        Reporter { sinks }
    }

    pub fn with_sinks(sinks: Vec<Box<dyn ReportSink>>) -> Self {
        Reporter { sinks }
    }

    pub fn push_sink(&mut self, sink: Box<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Hand one envelope to every sink. Failures are logged, never raised.
    pub fn dispatch(&self, envelope: &ReportEnvelope) {
        for sink in &self.sinks {
            if let Err(err) = sink.deliver(envelope) {
                tracing::warn!("report delivery through {} failed: {err}", sink.name());
            }
        }
    }

    /// Run every sink's startup banner.
    pub fn announce(&self, environment: &RuntimeEnvironment) {
        for sink in &self.sinks {
            if let Err(err) = sink.announce(environment) {
                tracing::warn!("startup banner for {} failed: {err}", sink.name());
            }
        }
    }
}

/// Poisoned locks are recovered; delivery keeps going after a panic
/// elsewhere.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Stable hash folding equivalent incidents together downstream. Derived
/// from the type name and the trace (or the reason when no trace exists).
pub fn duphash(report: &ExceptionReport) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(report.type_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(
        report
            .stack_trace
            .as_deref()
            .unwrap_or(&report.reason)
            .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
enum FileState {
    Unopened(LogOutput),
    Open(File),
    Disabled,
}

/// Per-process log file mirroring every report as plain text.
///
/// The file opens lazily on first use. An open failure disables the sink
/// for the rest of the process; later deliveries become silent no-ops.
pub struct FileSink {
    pid: i32,
    state: Mutex<FileState>,
}

impl FileSink {
    pub fn new(output: LogOutput) -> Self {
        FileSink {
            pid: nix::unistd::getpid().as_raw(),
            state: Mutex::new(FileState::Unopened(output)),
        }
    }

    fn ensure_open(&self, state: &mut FileState) -> Result<(), SinkError> {
        if let FileState::Unopened(output) = &*state {
            match output.resolve(self.pid) {
                None => *state = FileState::Disabled,
                Some(path) => match File::create(&path) {
                    Ok(file) => *state = FileState::Open(file),
                    Err(err) => {
                        *state = FileState::Disabled;
                        return Err(SinkError::Io(err));
                    }
                },
            }
        }
        Ok(())
    }
}

impl ReportSink for FileSink {
    fn name(&self) -> &'static str {
        "log file"
    }

    fn deliver(&self, envelope: &ReportEnvelope) -> Result<(), SinkError> {
        let mut state = lock_or_recover(&self.state);
        self.ensure_open(&mut state)?;
        let FileState::Open(file) = &mut *state else {
            return Ok(());
        };
        let report = &envelope.report;
        writeln!(file, "{}", report.reason)?;
        if let Some(trace) = &report.stack_trace {
            file.write_all(trace.as_bytes())?;
            if !trace.ends_with('\n') {
                writeln!(file)?;
            }
        }
        if let Some(executable) = &report.executable {
            writeln!(file, "executable: {executable}")?;
        }
        for (label, value) in &report.details {
            writeln!(file, "{label} = {value}")?;
        }
        writeln!(file)?;
        Ok(())
    }

    fn announce(&self, environment: &RuntimeEnvironment) -> Result<(), SinkError> {
        if environment.is_empty() {
            return Ok(());
        }
        let mut state = lock_or_recover(&self.state);
        self.ensure_open(&mut state)?;
        let FileState::Open(file) = &mut *state else {
            return Ok(());
        };
        file.write_all(environment.render().as_bytes())?;
        writeln!(file)?;
        Ok(())
    }
}

/// Mirrors each report to syslog at error priority.
pub struct SyslogSink;

impl ReportSink for SyslogSink {
    fn name(&self) -> &'static str {
        "syslog"
    }

    fn deliver(&self, envelope: &ReportEnvelope) -> Result<(), SinkError> {
        let report = &envelope.report;
        let mut message = report.reason.clone();
        if let Some(trace) = &report.stack_trace {
            message.push('\n');
            message.push_str(trace);
        }
        syslog_err(&message)
    }
}

fn syslog_err(message: &str) -> Result<(), SinkError> {
    // Interior NULs would truncate the record.
    let sanitized = message.replace('\0', " ");
    let text = CString::new(sanitized).map_err(|_| SinkError::Encoding)?;
    unsafe {
        libc::syslog(libc::LOG_ERR, b"%s\0".as_ptr().cast(), text.as_ptr());
    }
    Ok(())
}

#[derive(Debug)]
enum EventLogState {
    Unopened(PathBuf),
    Open(File),
    Disabled,
}

/// Structured event log: one JSON object per report, appended to a file.
pub struct EventLogSink {
    state: Mutex<EventLogState>,
}

impl EventLogSink {
    pub fn new(path: PathBuf) -> Self {
        EventLogSink {
            state: Mutex::new(EventLogState::Unopened(path)),
        }
    }
}

impl ReportSink for EventLogSink {
    fn name(&self) -> &'static str {
        "event log"
    }

    fn deliver(&self, envelope: &ReportEnvelope) -> Result<(), SinkError> {
        let mut state = lock_or_recover(&self.state);
        if let EventLogState::Unopened(path) = &*state {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => *state = EventLogState::Open(file),
                Err(err) => {
                    *state = EventLogState::Disabled;
                    return Err(SinkError::Io(err));
                }
            }
        }
        let EventLogState::Open(file) = &mut *state else {
            return Ok(());
        };

        let report = &envelope.report;
        let record = json!({
            "timestamp": unix_seconds(),
            "kind": report.kind,
            "reason": report.reason,
            "type": report.type_name,
            "thread": report.tid,
            "executable": report.executable,
            "stack_trace": report.stack_trace,
            "details": detail_map(report),
            "pid": envelope.process.pid,
        });
        serde_json::to_writer(&mut *file, &record).map_err(|_| SinkError::Encoding)?;
        writeln!(file)?;
        Ok(())
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn detail_map(report: &ExceptionReport) -> serde_json::Map<String, serde_json::Value> {
    report
        .details
        .iter()
        .map(|(label, value)| (label.clone(), serde_json::Value::String(value.clone())))
        .collect()
}

/// Client for the external problem-collecting service.
///
/// One connection per report, then the socket is closed; that is the
/// service's ingestion contract. The service insists on a stack trace, so
/// reports without one are skipped here and live on in the other sinks.
pub struct ProblemSink {
    socket: PathBuf,
}

impl ProblemSink {
    pub fn new(socket: PathBuf) -> Self {
        ProblemSink { socket }
    }

    fn payload(envelope: &ReportEnvelope, trace: &str) -> serde_json::Value {
        let report = &envelope.report;
        let process = &envelope.process;
        let executable = report
            .executable
            .as_deref()
            .or(process.executable.as_deref())
            .unwrap_or(UNKNOWN_EXECUTABLE);
        json!({
            "type": PROBLEM_TYPE,
            "analyzer": PROBLEM_ANALYZER,
            "kind": report.kind,
            "reason": report.reason,
            "backtrace": trace,
            "executable": executable,
            "pid": process.pid,
            "uid": process.uid,
            "cmdline": process.command_line,
            "process_executable": process.executable,
            "environment": envelope.environment.render(),
            "details": detail_map(report),
            "duphash": duphash(report),
            "version": env!("CARGO_PKG_VERSION"),
        })
    }
}

impl ReportSink for ProblemSink {
    fn name(&self) -> &'static str {
        "problem service"
    }

    fn deliver(&self, envelope: &ReportEnvelope) -> Result<(), SinkError> {
        let Some(trace) = &envelope.report.stack_trace else {
            tracing::debug!(
                "skipping problem-service submission without a stack trace: {}",
                envelope.report.reason
            );
            return Ok(());
        };
        let service_error = |source| SinkError::ProblemService {
            path: self.socket.clone(),
            source,
        };

        let mut bytes =
            serde_json::to_vec(&Self::payload(envelope, trace)).map_err(|_| SinkError::Encoding)?;
        bytes.push(b'\n');

        let mut stream = UnixStream::connect(&self.socket).map_err(service_error)?;
        stream.write_all(&bytes).map_err(service_error)?;
        let _ = stream.shutdown(Shutdown::Write);
        Ok(())
    }
}

/// Collecting sink for tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    reports: std::sync::Arc<Mutex<Vec<ExceptionReport>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn reports(&self) -> Vec<ExceptionReport> {
        lock_or_recover(&self.reports).clone()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.reports).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn deliver(&self, envelope: &ReportEnvelope) -> Result<(), SinkError> {
        lock_or_recover(&self.reports).push(envelope.report.clone());
        Ok(())
    }
}

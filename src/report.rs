//! Report payloads handed from the correlation core to the delivery side.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::event::ThreadId;
use crate::process_info::{ProcessSnapshot, RuntimeEnvironment};

/// Why an occurrence was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Left managed code with no catching frame and was flushed at thread
    /// termination (or displaced from a full pending queue).
    Uncaught,
    /// Caught by managed code while its type is on the caught-report list.
    Caught,
    /// A collection pause overran the configured threshold.
    PauseOverrun,
}

/// One incident report.
///
/// Built exactly once per reported occurrence; the correlation core keeps no
/// copy after handing it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionReport {
    pub kind: ReportKind,
    /// Short human-readable reason line, already length-capped.
    pub reason: String,
    /// Dotted fully-qualified type name of the exception.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Rendered stack trace. Absent when the runtime could not produce one;
    /// most destinations still accept the report without it.
    pub stack_trace: Option<String>,
    /// Module or artifact blamed for the incident. Filled with the process
    /// main artifact at delivery time when the core left it empty.
    pub executable: Option<String>,
    /// Free-form diagnostic pairs gathered alongside the report.
    pub details: Vec<(String, String)>,
    /// Thread the occurrence belonged to; pause reports have none.
    pub tid: Option<ThreadId>,
}

/// A report joined with the process-wide context captured at startup.
///
/// This is the unit the dispatch queue carries; sinks only ever see
/// envelopes.
#[derive(Debug, Clone)]
pub struct ReportEnvelope {
    pub report: ExceptionReport,
    pub process: Arc<ProcessSnapshot>,
    pub environment: Arc<RuntimeEnvironment>,
}

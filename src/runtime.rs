//! The narrow seam to the monitored runtime.
//!
//! The agent never walks runtime internals itself. Everything it needs to
//! say about an exception comes through [`RuntimeInspector`], and every
//! lookup may fail: the runtime owns this data and can be unable to produce
//! it mid-shutdown or for synthetic frames.

use std::collections::HashMap;

use crate::error::MetadataError;
use crate::event::{ExceptionRef, MethodRef, ThreadId};

/// Name used in trace headers when the runtime cannot name a thread.
pub const UNKNOWN_THREAD_NAME: &str = "unknown";

/// Method context of a stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Dotted fully-qualified name of the declaring class. Empty when the
    /// runtime reports a classless frame.
    pub class: String,
    /// Bare method name.
    pub method: String,
}

impl FrameInfo {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        FrameInfo {
            class: class.into(),
            method: method.into(),
        }
    }
}

/// A stack trace rendered by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedTrace {
    /// Complete multi-line text, header included.
    pub text: String,
    /// Module or archive the deepest frame was loaded from, when asked for.
    pub module: Option<String>,
}

/// Read-only metadata channel into the monitored runtime.
///
/// Implementations are called with the agent's shared lock held and must not
/// call back into the agent.
pub trait RuntimeInspector: Send + Sync {
    /// Type name of the exception object, in whatever descriptor form the
    /// runtime uses natively.
    fn exception_type(&self, exception: ExceptionRef) -> Result<String, MetadataError>;

    /// Declaring class and name of a frame's method.
    fn frame_info(&self, method: MethodRef) -> Result<FrameInfo, MetadataError>;

    /// Render the exception's stack trace as seen from `tid`. `want_module`
    /// additionally asks for the deepest frame's originating module. `None`
    /// means the runtime could not produce a trace; reports go out without
    /// one.
    fn render_stack_trace(
        &self,
        tid: ThreadId,
        exception: ExceptionRef,
        want_module: bool,
    ) -> Option<RenderedTrace>;

    /// Invoke a static no-argument diagnostic method by its dotted name and
    /// return its result, if the runtime could run it.
    fn call_diagnostic(&self, method: &str) -> Option<String>;

    /// The artifact (archive or entry-point class) the process was started
    /// from.
    fn main_artifact(&self) -> Option<String>;

    /// The runtime's descriptive property set, in render order.
    fn environment(&self) -> Vec<(String, String)>;
}

/// Table-driven [`RuntimeInspector`] backing the replay tool and tests.
///
/// Lookups answer from prefilled tables; anything absent behaves exactly
/// like a runtime that failed to produce the metadata.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    types: HashMap<ExceptionRef, String>,
    frames: HashMap<MethodRef, FrameInfo>,
    traces: HashMap<ExceptionRef, RenderedTrace>,
    diagnostics: HashMap<String, String>,
    main_artifact: Option<String>,
    environment: Vec<(String, String)>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        ScriptedRuntime::default()
    }

    pub fn define_type(&mut self, exception: ExceptionRef, type_name: impl Into<String>) {
        self.types.insert(exception, type_name.into());
    }

    pub fn define_frame(
        &mut self,
        method: MethodRef,
        class: impl Into<String>,
        name: impl Into<String>,
    ) {
        self.frames.insert(method, FrameInfo::new(class, name));
    }

    pub fn define_trace(
        &mut self,
        exception: ExceptionRef,
        text: impl Into<String>,
        module: Option<String>,
    ) {
        self.traces.insert(
            exception,
            RenderedTrace {
                text: text.into(),
                module,
            },
        );
    }

    pub fn define_diagnostic(&mut self, method: impl Into<String>, result: impl Into<String>) {
        self.diagnostics.insert(method.into(), result.into());
    }

    pub fn set_main_artifact(&mut self, artifact: impl Into<String>) {
        self.main_artifact = Some(artifact.into());
    }

    pub fn push_environment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.push((key.into(), value.into()));
    }
}

impl RuntimeInspector for ScriptedRuntime {
    fn exception_type(&self, exception: ExceptionRef) -> Result<String, MetadataError> {
        self.types
            .get(&exception)
            .cloned()
            .ok_or(MetadataError::TypeUnavailable(exception))
    }

    fn frame_info(&self, method: MethodRef) -> Result<FrameInfo, MetadataError> {
        self.frames
            .get(&method)
            .cloned()
            .ok_or(MetadataError::FrameUnavailable(method))
    }

    fn render_stack_trace(
        &self,
        _tid: ThreadId,
        exception: ExceptionRef,
        want_module: bool,
    ) -> Option<RenderedTrace> {
        let mut trace = self.traces.get(&exception).cloned()?;
        if !want_module {
            trace.module = None;
        }
        Some(trace)
    }

    fn call_diagnostic(&self, method: &str) -> Option<String> {
        self.diagnostics.get(method).cloned()
    }

    fn main_artifact(&self) -> Option<String> {
        self.main_artifact.clone()
    }

    fn environment(&self) -> Vec<(String, String)> {
        self.environment.clone()
    }
}

//! Identifiers and event payloads delivered by the monitored runtime.
//!
//! All handles are opaque: the agent never dereferences them, it only
//! compares them for identity and hands them back to the runtime when it
//! needs metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a live thread inside the monitored runtime.
///
/// The runtime guarantees the value stays fixed for the thread's lifetime
/// and is not recycled while the agent still tracks state for it. Zero is a
/// valid identifier like any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(i64);

impl ThreadId {
    pub const fn new(raw: i64) -> Self {
        ThreadId(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// Opaque handle to one exception occurrence.
///
/// Two handles compare equal exactly when they designate the same exception
/// object in the monitored runtime. The raw value carries no other meaning;
/// it is not derived from the exception's message or type, so two distinct
/// occurrences with identical text stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionRef(u64);

impl ExceptionRef {
    pub const fn new(raw: u64) -> Self {
        ExceptionRef(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExceptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exception#{:#x}", self.0)
    }
}

/// Opaque handle to the method owning a stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodRef(u64);

impl MethodRef {
    pub const fn new(raw: u64) -> Self {
        MethodRef(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{:#x}", self.0)
    }
}

/// A thrown-exception event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrownEvent {
    /// Thread the exception was raised on.
    pub tid: ThreadId,
    /// The exception object itself.
    pub exception: ExceptionRef,
    /// Method of the frame the throw happened in.
    pub frame: MethodRef,
    /// Method of the frame that will catch the exception, when the runtime
    /// already located one in managed code. `None` means the exception is on
    /// its way out of managed code and may still be intercepted by native
    /// callers.
    pub catch_frame: Option<MethodRef>,
}

impl ThrownEvent {
    /// Whether the runtime already knows a managed frame will catch this.
    pub fn caught_at_throw(&self) -> bool {
        self.catch_frame.is_some()
    }
}

/// A caught-exception event. Delivered on the catching thread once a frame
/// actually receives the exception object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaughtEvent {
    pub tid: ThreadId,
    pub exception: ExceptionRef,
    /// Method of the catching frame.
    pub frame: MethodRef,
}

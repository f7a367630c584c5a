//! Centinela - In-process exception lifecycle monitor for managed runtimes
//!
//! This library tracks thrown, caught and thread-end events coming out of a
//! monitored runtime, correlates them into at-most-once report decisions,
//! deduplicates repeats per thread, and hands finished reports to a set of
//! delivery sinks off the runtime's callback path.

pub mod agent;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod dedup_ring;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod format;
pub mod pause_watch;
pub mod pending;
pub mod process_info;
pub mod replay;
pub mod report;
pub mod reporter;
pub mod runtime;
pub mod stats;
pub mod thread_map;

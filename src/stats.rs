//! Counters describing what the correlation core decided.

use serde::Serialize;
use std::fmt::Write as _;

/// Outcome counters, one per decision the core can reach.
///
/// `caught_examined` counts only catch events that reached the core; the
/// lock-free no-pending fast path filters the rest out before they get
/// this far.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelationStats {
    pub thrown_seen: u64,
    pub caught_examined: u64,
    /// Reported at throw time (caught-at-throw with a listed type).
    pub reported_immediate: u64,
    /// Postponed reports resolved by a matching catch.
    pub reported_caught: u64,
    /// Postponed reports flushed at thread termination.
    pub reported_uncaught: u64,
    /// Postponed reports displaced out of a full queue and flushed early.
    pub displaced: u64,
    pub postponed: u64,
    /// Occurrences dropped because the dedup window already had them.
    pub suppressed: u64,
    /// Catch events with no matching parked entry.
    pub unmatched_catches: u64,
    /// Thrown events outside the reporting policy.
    pub ignored: u64,
    /// Events dropped because runtime metadata was unavailable.
    pub skipped_metadata: u64,
    pub threads_torn_down: u64,
    /// Collection pauses that overran the threshold. Maintained by the
    /// agent, not the core.
    pub pause_overruns: u64,
}

impl CorrelationStats {
    /// Total number of reports emitted, on any path.
    pub fn total_reported(&self) -> u64 {
        self.reported_immediate
            + self.reported_caught
            + self.reported_uncaught
            + self.displaced
            + self.pause_overruns
    }

    /// Two-column summary table.
    pub fn render(&self) -> String {
        let rows = [
            ("thrown events seen", self.thrown_seen),
            ("catch events examined", self.caught_examined),
            ("reported at throw", self.reported_immediate),
            ("reported on catch", self.reported_caught),
            ("reported at thread end", self.reported_uncaught),
            ("reported after displacement", self.displaced),
            ("postponed", self.postponed),
            ("suppressed as duplicates", self.suppressed),
            ("catches without a match", self.unmatched_catches),
            ("ignored by policy", self.ignored),
            ("skipped on missing metadata", self.skipped_metadata),
            ("threads torn down", self.threads_torn_down),
            ("pause overruns", self.pause_overruns),
        ];
        let mut out = String::new();
        let _ = writeln!(out, "{:<28} {:>8}", "outcome", "count");
        let _ = writeln!(out, "{:-<28} {:->8}", "", "");
        for (label, count) in rows {
            let _ = writeln!(out, "{label:<28} {count:>8}");
        }
        let _ = writeln!(out, "{:-<28} {:->8}", "", "");
        let _ = writeln!(out, "{:<28} {:>8}", "total reported", self.total_reported());
        out
    }

    /// Print the summary table to stderr.
    pub fn print_summary(&self) {
        eprint!("{}", self.render());
    }
}

//! Process-wide facts captured once at startup and attached to every
//! outgoing report.

use serde::Serialize;
use std::fmt::Write as _;

use crate::runtime::RuntimeInspector;

/// Identity of the monitored process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: i32,
    pub uid: u32,
    /// Resolved `/proc/<pid>/exe` target, link decorations stripped.
    pub executable: Option<String>,
    /// `/proc/<pid>/cmdline` with NUL separators turned into spaces.
    pub command_line: Option<String>,
    /// The artifact the runtime says it was started from.
    pub main_artifact: Option<String>,
}

impl ProcessSnapshot {
    pub fn capture(runtime: &dyn RuntimeInspector) -> Self {
        let pid = nix::unistd::getpid().as_raw();
        let uid = nix::unistd::getuid().as_raw();
        ProcessSnapshot {
            pid,
            uid,
            executable: read_executable(pid),
            command_line: read_command_line(pid),
            main_artifact: runtime.main_artifact(),
        }
    }
}

/// The runtime's descriptive property dump, in render order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeEnvironment {
    pairs: Vec<(String, String)>,
}

impl RuntimeEnvironment {
    pub fn collect(runtime: &dyn RuntimeInspector) -> Self {
        let mut pairs = runtime.environment();
        if let Ok(cwd) = std::env::current_dir() {
            pairs.push((
                "working.directory".to_string(),
                cwd.to_string_lossy().into_owned(),
            ));
        }
        RuntimeEnvironment { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Aligned `key: value` lines for log banners.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.pairs {
            let _ = writeln!(out, "{key:<30}: {value}");
        }
        out
    }
}

fn read_executable(pid: i32) -> Option<String> {
    let link = std::fs::read_link(format!("/proc/{pid}/exe")).ok()?;
    let text = link.to_string_lossy().into_owned();
    Some(strip_link_decorations(&text).to_string())
}

/// The kernel appends ` (deleted)` to unlinked targets, and prelink leaves
/// `.#prelink#.XXXXXX` suffixes behind. Neither belongs in a report.
fn strip_link_decorations(path: &str) -> &str {
    let path = path.strip_suffix(" (deleted)").unwrap_or(path);
    match path.find(".#prelink#.") {
        Some(cut) => &path[..cut],
        None => path,
    }
}

fn read_command_line(pid: i32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    command_line_from_bytes(&raw)
}

fn command_line_from_bytes(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let spaced: Vec<u8> = raw
        .iter()
        .map(|&byte| if byte == 0 { b' ' } else { byte })
        .collect();
    let text = String::from_utf8_lossy(&spaced).trim_end().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

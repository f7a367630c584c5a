//! Agent configuration.
//!
//! Three layers merge in order: compiled-in defaults, an optional TOML file,
//! and the options string handed over on attach. Later layers win. The
//! options string uses the `key=value,key=value` form typical for in-process
//! agents; the file uses the same keys as TOML fields.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup_ring::DEFAULT_DEDUP_CAPACITY;
use crate::error::{ConfigError, ConfigResult};
use crate::pending::DEFAULT_PENDING_LIMIT;

/// Pauses longer than this are reported unless configured otherwise.
pub const DEFAULT_PAUSE_THRESHOLD: Duration = Duration::from_secs(1);

/// Problem-service socket used when none is configured.
pub const DEFAULT_PROBLEM_SOCKET: &str = "/run/centinela/report.socket";

/// Name of the per-process log file.
pub fn default_log_name(pid: i32) -> String {
    format!("centinela_{pid}.log")
}

/// Where the per-process log file goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// `centinela_<pid>.log` in the working directory.
    #[default]
    Default,
    /// No log file at all.
    Disabled,
    /// An explicit file, or a directory to place the default name in.
    Path(PathBuf),
}

impl LogOutput {
    /// Resolve to a concrete path, or `None` when logging is off. The
    /// directory case is decided by looking at the filesystem, so call this
    /// once at open time.
    pub fn resolve(&self, pid: i32) -> Option<PathBuf> {
        match self {
            LogOutput::Default => Some(PathBuf::from(default_log_name(pid))),
            LogOutput::Disabled => None,
            LogOutput::Path(path) => {
                if path.is_dir() {
                    Some(path.join(default_log_name(pid)))
                } else {
                    Some(path.clone())
                }
            }
        }
    }
}

/// What goes into a report's executable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutableSource {
    /// The artifact the process was started from.
    #[default]
    MainArtifact,
    /// The module of the frame the exception came out of.
    ThrowingModule,
}

/// Allow list deciding which caught exceptions still get reported.
///
/// Entries are dotted fully-qualified type names. An entry wrapped in
/// slashes, `/.../`, is compiled as a regular expression and matched against
/// the whole name. In the one-line options form entries are separated by
/// colons, so patterns there cannot contain a colon; the file form takes an
/// array and has no such limit.
#[derive(Debug, Clone, Default)]
pub struct TypeFilter {
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

impl TypeFilter {
    /// The empty filter: no caught exception is ever reported.
    pub fn none() -> Self {
        TypeFilter::default()
    }

    pub fn from_entries<I, S>(entries: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = TypeFilter::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if entry.len() >= 2 && entry.starts_with('/') && entry.ends_with('/') {
                let pattern = &entry[1..entry.len() - 1];
                let regex = Regex::new(pattern).map_err(|source| ConfigError::BadPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
                filter.patterns.push(regex);
            } else {
                filter.names.insert(entry.to_string());
            }
        }
        Ok(filter)
    }

    /// Parse the colon-separated one-line form.
    pub fn parse_spec(spec: &str) -> ConfigResult<Self> {
        TypeFilter::from_entries(spec.split(':'))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.patterns.is_empty()
    }

    pub fn matches(&self, type_name: &str) -> bool {
        self.names.contains(type_name) || self.patterns.iter().any(|re| re.is_match(type_name))
    }
}

/// Fully merged agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub output: LogOutput,
    pub syslog: bool,
    /// Structured event log, one JSON object per report.
    pub event_log: Option<PathBuf>,
    /// Whether to hand reports to the external problem service.
    pub problem_service: bool,
    pub problem_socket: PathBuf,
    pub caught_types: TypeFilter,
    pub executable: ExecutableSource,
    pub dedup_capacity: usize,
    pub pending_limit: usize,
    pub pause_threshold: Duration,
    /// Static no-argument diagnostic methods invoked per report.
    pub diagnostic_methods: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            output: LogOutput::Default,
            syslog: true,
            event_log: None,
            problem_service: false,
            problem_socket: PathBuf::from(DEFAULT_PROBLEM_SOCKET),
            caught_types: TypeFilter::none(),
            executable: ExecutableSource::MainArtifact,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            pending_limit: DEFAULT_PENDING_LIMIT,
            pause_threshold: DEFAULT_PAUSE_THRESHOLD,
            diagnostic_methods: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Build from an attach options string alone. A `conffile=` key inside
    /// the string pulls in a file layer first.
    pub fn from_options(options: &str) -> ConfigResult<Self> {
        AgentConfig::from_sources(None, options)
    }

    /// Build from an explicit file plus an options string. A `conffile=` key
    /// in the options wins over the explicit path.
    pub fn from_sources(conffile: Option<&Path>, options: &str) -> ConfigResult<Self> {
        let overlay = OptionsOverlay::parse(options)?;
        let mut config = AgentConfig::default();
        let file = overlay.conffile.as_deref().or(conffile);
        if let Some(path) = file {
            FileOverlay::load(path)?.apply(&mut config)?;
        }
        overlay.apply(&mut config)?;
        Ok(config)
    }
}

/// Values collected from the options string; `None` means "not mentioned".
#[derive(Debug, Default)]
struct OptionsOverlay {
    output: Option<String>,
    syslog: Option<bool>,
    eventlog: Option<String>,
    problems: Option<bool>,
    socket: Option<String>,
    caught: Option<String>,
    executable: Option<String>,
    capacity: Option<String>,
    pending: Option<String>,
    pausethreshold: Option<String>,
    diag: Option<String>,
    conffile: Option<PathBuf>,
}

impl OptionsOverlay {
    fn parse(options: &str) -> ConfigResult<Self> {
        let mut overlay = OptionsOverlay::default();
        for item in options.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let Some((key, value)) = item.split_once('=') else {
                return Err(ConfigError::InvalidValue {
                    key: item.to_string(),
                    value: String::new(),
                    reason: "expected key=value".to_string(),
                });
            };
            let value = value.trim();
            match key.trim() {
                "output" => overlay.output = Some(value.to_string()),
                "syslog" => overlay.syslog = Some(parse_switch("syslog", value)?),
                "eventlog" => overlay.eventlog = Some(value.to_string()),
                "problems" => overlay.problems = Some(parse_switch("problems", value)?),
                "socket" => overlay.socket = Some(value.to_string()),
                "caught" => overlay.caught = Some(value.to_string()),
                "executable" => overlay.executable = Some(value.to_string()),
                "capacity" => overlay.capacity = Some(value.to_string()),
                "pending" => overlay.pending = Some(value.to_string()),
                "pausethreshold" => overlay.pausethreshold = Some(value.to_string()),
                "diag" => overlay.diag = Some(value.to_string()),
                "conffile" => overlay.conffile = Some(PathBuf::from(value)),
                other => return Err(ConfigError::UnknownKey(other.to_string())),
            }
        }
        Ok(overlay)
    }

    fn apply(&self, config: &mut AgentConfig) -> ConfigResult<()> {
        if let Some(output) = &self.output {
            config.output = parse_output(output);
        }
        if let Some(syslog) = self.syslog {
            config.syslog = syslog;
        }
        if let Some(eventlog) = &self.eventlog {
            config.event_log = parse_optional_path(eventlog);
        }
        if let Some(problems) = self.problems {
            config.problem_service = problems;
        }
        if let Some(socket) = &self.socket {
            if socket.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "socket".to_string(),
                    value: socket.clone(),
                    reason: "expected a socket path".to_string(),
                });
            }
            config.problem_socket = PathBuf::from(socket);
        }
        if let Some(caught) = &self.caught {
            config.caught_types = TypeFilter::parse_spec(caught)?;
        }
        if let Some(executable) = &self.executable {
            config.executable = parse_executable(executable)?;
        }
        if let Some(capacity) = &self.capacity {
            config.dedup_capacity = parse_positive("capacity", capacity)?;
        }
        if let Some(pending) = &self.pending {
            config.pending_limit = parse_positive("pending", pending)?;
        }
        if let Some(threshold) = &self.pausethreshold {
            let seconds: u64 =
                threshold
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "pausethreshold".to_string(),
                        value: threshold.clone(),
                        reason: "expected whole seconds".to_string(),
                    })?;
            config.pause_threshold = Duration::from_secs(seconds);
        }
        if let Some(diag) = &self.diag {
            config.diagnostic_methods = diag
                .split(':')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }
}

/// The TOML file layer. Same keys as the options string; list-valued keys
/// become arrays.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileOverlay {
    output: Option<String>,
    syslog: Option<bool>,
    eventlog: Option<String>,
    problems: Option<bool>,
    socket: Option<PathBuf>,
    caught: Option<Vec<String>>,
    executable: Option<String>,
    capacity: Option<usize>,
    pending: Option<usize>,
    pausethreshold: Option<u64>,
    diag: Option<Vec<String>>,
}

impl FileOverlay {
    fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::FileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply(&self, config: &mut AgentConfig) -> ConfigResult<()> {
        if let Some(output) = &self.output {
            config.output = parse_output(output);
        }
        if let Some(syslog) = self.syslog {
            config.syslog = syslog;
        }
        if let Some(eventlog) = &self.eventlog {
            config.event_log = parse_optional_path(eventlog);
        }
        if let Some(problems) = self.problems {
            config.problem_service = problems;
        }
        if let Some(socket) = &self.socket {
            config.problem_socket = socket.clone();
        }
        if let Some(caught) = &self.caught {
            config.caught_types = TypeFilter::from_entries(caught)?;
        }
        if let Some(executable) = &self.executable {
            config.executable = parse_executable(executable)?;
        }
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return Err(zero_error("capacity"));
            }
            config.dedup_capacity = capacity;
        }
        if let Some(pending) = self.pending {
            if pending == 0 {
                return Err(zero_error("pending"));
            }
            config.pending_limit = pending;
        }
        if let Some(seconds) = self.pausethreshold {
            config.pause_threshold = Duration::from_secs(seconds);
        }
        if let Some(diag) = &self.diag {
            config.diagnostic_methods = diag.clone();
        }
        Ok(())
    }
}

fn parse_output(value: &str) -> LogOutput {
    if value.is_empty() {
        LogOutput::Disabled
    } else {
        LogOutput::Path(PathBuf::from(value))
    }
}

fn parse_optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn parse_switch(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "yes" | "true" | "1" => Ok(true),
        "off" | "no" | "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected on/off".to_string(),
        }),
    }
}

fn parse_executable(value: &str) -> ConfigResult<ExecutableSource> {
    match value {
        "mainclass" => Ok(ExecutableSource::MainArtifact),
        "threadclass" => Ok(ExecutableSource::ThrowingModule),
        _ => Err(ConfigError::InvalidValue {
            key: "executable".to_string(),
            value: value.to_string(),
            reason: "expected mainclass or threadclass".to_string(),
        }),
    }
}

fn parse_positive(key: &str, value: &str) -> ConfigResult<usize> {
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        Ok(_) => Err(zero_error(key)),
        Err(_) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a positive integer".to_string(),
        }),
    }
}

fn zero_error(key: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: "0".to_string(),
        reason: "must be greater than zero".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_options("").unwrap();
        assert_eq!(config.output, LogOutput::Default);
        assert!(config.syslog);
        assert!(config.event_log.is_none());
        assert!(!config.problem_service);
        assert!(config.caught_types.is_empty());
        assert_eq!(config.executable, ExecutableSource::MainArtifact);
        assert_eq!(config.dedup_capacity, DEFAULT_DEDUP_CAPACITY);
        assert_eq!(config.pending_limit, DEFAULT_PENDING_LIMIT);
        assert_eq!(config.pause_threshold, DEFAULT_PAUSE_THRESHOLD);
    }

    #[test]
    fn test_options_string_round() {
        let config = AgentConfig::from_options(
            "output=/tmp/logs,syslog=off,problems=on,caught=java.lang.OutOfMemoryError,\
             executable=threadclass,capacity=3,pending=2,pausethreshold=5",
        )
        .unwrap();
        assert_eq!(config.output, LogOutput::Path(PathBuf::from("/tmp/logs")));
        assert!(!config.syslog);
        assert!(config.problem_service);
        assert!(config.caught_types.matches("java.lang.OutOfMemoryError"));
        assert!(!config.caught_types.matches("java.lang.Error"));
        assert_eq!(config.executable, ExecutableSource::ThrowingModule);
        assert_eq!(config.dedup_capacity, 3);
        assert_eq!(config.pending_limit, 2);
        assert_eq!(config.pause_threshold, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_output_disables_the_log() {
        let config = AgentConfig::from_options("output=").unwrap();
        assert_eq!(config.output, LogOutput::Disabled);
        assert!(config.output.resolve(1).is_none());
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let err = AgentConfig::from_options("colour=red").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(key) if key == "colour"));
    }

    #[test]
    fn test_key_without_value_is_an_error() {
        assert!(AgentConfig::from_options("syslog").is_err());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(AgentConfig::from_options("capacity=0").is_err());
        assert!(AgentConfig::from_options("pending=0").is_err());
    }

    #[test]
    fn test_bad_switch_value() {
        let err = AgentConfig::from_options("problems=maybe").unwrap_err();
        assert!(err.to_string().contains("problems"));
    }

    #[test]
    fn test_caught_patterns() {
        let filter = TypeFilter::parse_spec(
            "java.lang.ClassNotFoundException:/.*LinkageError/",
        )
        .unwrap();
        assert!(filter.matches("java.lang.ClassNotFoundException"));
        assert!(filter.matches("java.lang.UnsatisfiedLinkageError"));
        assert!(!filter.matches("java.lang.RuntimeException"));
    }

    #[test]
    fn test_bad_pattern_is_an_error() {
        let err = TypeFilter::parse_spec("/[unclosed/").unwrap_err();
        assert!(matches!(err, ConfigError::BadPattern { .. }));
    }

    #[test]
    fn test_diag_list() {
        let config = AgentConfig::from_options("diag=com.example.Debug.dump:com.example.Heap.stat")
            .unwrap();
        assert_eq!(
            config.diagnostic_methods,
            vec!["com.example.Debug.dump", "com.example.Heap.stat"]
        );
    }

    #[test]
    fn test_file_layer_then_options_win() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "syslog = false\ncapacity = 9\ncaught = [\"java.io.IOException\", \"/^com\\\\.corp\\\\..*/\"]"
        )
        .unwrap();

        let options = format!("capacity=2,conffile={}", file.path().display());
        let config = AgentConfig::from_options(&options).unwrap();
        // From the file:
        assert!(!config.syslog);
        assert!(config.caught_types.matches("java.io.IOException"));
        assert!(config.caught_types.matches("com.corp.Anything"));
        // Options override the file:
        assert_eq!(config.dedup_capacity, 2);
    }

    #[test]
    fn test_explicit_conffile_argument() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pausethreshold = 7").unwrap();
        let config = AgentConfig::from_sources(Some(file.path()), "").unwrap();
        assert_eq!(config.pause_threshold, Duration::from_secs(7));
    }

    #[test]
    fn test_missing_conffile_is_an_error() {
        let err = AgentConfig::from_options("conffile=/no/such/file.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_unknown_file_key_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "colour = \"red\"").unwrap();
        let err = AgentConfig::from_sources(Some(file.path()), "").unwrap_err();
        assert!(matches!(err, ConfigError::FileParse { .. }));
    }

    #[test]
    fn test_log_output_resolution() {
        assert_eq!(
            LogOutput::Default.resolve(42),
            Some(PathBuf::from("centinela_42.log"))
        );
        let dir = tempfile::tempdir().unwrap();
        let output = LogOutput::Path(dir.path().to_path_buf());
        assert_eq!(
            output.resolve(42),
            Some(dir.path().join("centinela_42.log"))
        );
        let output = LogOutput::Path(PathBuf::from("/tmp/explicit.log"));
        assert_eq!(output.resolve(42), Some(PathBuf::from("/tmp/explicit.log")));
    }
}

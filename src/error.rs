//! Error types for configuration, runtime metadata lookups, and report
//! delivery. Each class degrades differently: configuration errors abort
//! setup, metadata errors drop a single event, sink errors disable a single
//! destination. None of them may take the monitored process down.

use std::path::PathBuf;
use thiserror::Error;

use crate::event::{ExceptionRef, MethodRef};

/// Errors raised while assembling the agent configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown option '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for option '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid caught-type pattern '{pattern}'")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("cannot read configuration file {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration file {path}")]
    FileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A runtime metadata lookup that could not be completed.
///
/// The event being processed is dropped and correlation state is left as it
/// was. The monitored process is never aborted over missing metadata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("type name unavailable for {0}")]
    TypeUnavailable(ExceptionRef),

    #[error("method context unavailable for {0}")]
    FrameUnavailable(MethodRef),
}

/// A report destination that failed to accept a delivery.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("i/o error")]
    Io(#[from] std::io::Error),

    #[error("problem service at {path} did not accept the report")]
    ProblemService {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("report text contains bytes this sink cannot carry")]
    Encoding,
}

//! CLI argument parsing for Centinela

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "centinela")]
#[command(version)]
#[command(about = "Exception lifecycle monitor for managed runtimes", long_about = None)]
pub struct Cli {
    /// Agent options as a comma-separated key=value list
    /// (e.g. -A caught=java.lang.OutOfMemoryError,syslog=off)
    #[arg(short = 'A', long = "options", value_name = "OPTS")]
    pub options: Option<String>,

    /// Read configuration defaults from a TOML file
    #[arg(long = "conffile", value_name = "PATH")]
    pub conffile: Option<PathBuf>,

    /// Print a correlation summary table after the stream ends
    #[arg(short = 'c', long = "summary")]
    pub summary: bool,

    /// Enable debug logging on stderr
    #[arg(long)]
    pub debug: bool,

    /// Event stream to replay, one JSON object per line ('-' for stdin)
    #[arg(value_name = "STREAM", default_value = "-")]
    pub stream: PathBuf,
}

use anyhow::{Context, Result};
use centinela::{agent::Agent, cli::Cli, config::AgentConfig, replay};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Open the stream argument, treating `-` as stdin.
fn open_stream(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        let file =
            File::open(path).with_context(|| format!("opening event stream {}", path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let options = args.options.as_deref().unwrap_or("");
    let config = AgentConfig::from_sources(args.conffile.as_deref(), options)?;

    let reader = open_stream(&args.stream)?;
    let session = replay::load_stream(reader)?;

    let agent = Agent::new(config, Arc::new(session.runtime));
    replay::run(&agent, &session.events);

    let stats = agent.stats();
    let dispatch = agent.shutdown();

    if args.summary {
        stats.print_summary();
        eprintln!(
            "{} report(s) delivered, {} dropped at the queue",
            dispatch.accepted(),
            dispatch.dropped
        );
    }

    Ok(())
}

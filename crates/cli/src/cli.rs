use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};

/// bbtrace: basic-block trace collection for instrumented processes
///
/// Streams which code of selected images ran to a consumer over a named pipe.
/// `listen` is the consumer side; `replay` drives the collector from a script
/// standing in for an instrumentation engine.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_parser = validate_file)]
    pub conffile: Option<PathBuf>,

    /// Path to log file.
    ///
    /// Logs go to stderr when unset.
    #[arg(short, long, global = true)]
    pub logfile: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Read a trace from a FIFO and print a JSON summary.
    Listen {
        /// FIFO to read from; created if it does not exist.
        path: PathBuf,

        /// Leave a FIFO created by this command in place afterwards.
        #[arg(short, long)]
        keep: bool,
    },

    /// Drive the collector with engine events read from a JSON-lines file.
    Replay {
        /// Script with one engine event per line.
        #[arg(value_parser = validate_file)]
        script: PathBuf,
    },

    /// Show the negotiated channel capacity and the event buffer size.
    Capacity,

    /// Print the effective configuration as TOML.
    Config,
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

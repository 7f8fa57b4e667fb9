use anyhow::Context;
use bbtrace::{
    capacity::capacity,
    cli::{Cli, Command},
    listen::listen,
    replay::replay,
};
use clap::Parser;
use config::Config;
use serde::Serialize;
use std::{
    fs::File,
    io::{self, Write},
    sync::Arc,
};
use tracing::debug;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let writer = match &cli.logfile {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.tracing_level_filter())
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(cli.logfile.is_none())
        .with_writer(writer)
        .init();

    debug!(config = ?cli);

    let config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        _ => Config::new(),
    };

    match cli.command {
        Command::Listen { path, keep } => print_json(&listen(&path, keep)?),
        Command::Replay { script } => print_json(&replay(&config, &script)?),
        Command::Capacity => print_json(&capacity(&config)?),
        Command::Config => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(config.to_toml()?.as_bytes())?;
            Ok(stdout.flush()?)
        }
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read script {path}: {source}")]
    ReadScript {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid event on line {line}: {source}")]
    ParseEvent {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Collector did not exit after a timeout")]
    TimeoutIgnored,

    #[error(transparent)]
    Collector(#[from] collector::Error),
}

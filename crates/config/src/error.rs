#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to extract config: {0}")]
    Extract(#[from] figment::Error),

    #[error("failed to serialize TOML: {0}")]
    TomlSer(#[from] toml_edit::ser::Error),

    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("no output channel configured")]
    MissingChannel,

    #[error("whitelist has {0} entries, at most 255 fit in the trace header")]
    TooManyImages(usize),

    #[error("whitelist entry {0} is empty")]
    EmptyPattern(usize),

    #[error("whitelist entry {index} is {len} bytes long, at most 65535 fit in the trace header")]
    PatternTooLong { index: usize, len: usize },

    #[error("unknown timeout signal: {0}")]
    UnknownSignal(String),
}

use std::path::PathBuf;

/// Represents all possible errors that can occur in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration or whitelist was rejected.
    #[error("Invalid config: {0}")]
    Config(#[from] config::Error),

    /// The platform's maximum channel size could not be read.
    #[error("Failed to query channel capacity from {path}: {source}")]
    CapacityQuery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The platform's maximum channel size was not a number.
    #[error("Unparsable channel capacity: {0:?}")]
    CapacityParse(String),

    /// The channel cannot hold even a single record in half its capacity.
    #[error("Channel capacity of {0} bytes is too small to buffer a single record")]
    CapacityTooSmall(usize),

    /// Creating the named pipe failed.
    #[error("Failed to create fifo {path}: {source}")]
    CreateFifo {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// Opening the channel failed.
    #[error("Failed to open channel {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Resizing the pipe buffer failed.
    #[error("Failed to resize channel to {size} bytes: {source}")]
    Resize {
        size: usize,
        #[source]
        source: nix::Error,
    },

    /// The consumer went away or the channel broke mid-write.
    #[error("Failed to write to channel: {0}")]
    Write(#[source] std::io::Error),

    /// The channel was already closed.
    #[error("Channel is closed")]
    ChannelClosed,

    /// Installing the timeout signal handler failed.
    #[error("Failed to install timeout handler: {0}")]
    SignalHandler(#[source] std::io::Error),

    /// The timeout watcher thread could not be started.
    #[error("Failed to spawn timeout watcher: {0}")]
    Spawn(#[source] std::io::Error),

    /// Reading a trace stream failed.
    #[error("Failed to read trace: {0}")]
    Read(#[source] std::io::Error),

    /// A trace stream ended in the middle of a header or record.
    #[error("Trace stream truncated while reading {0}")]
    Truncated(&'static str),
}

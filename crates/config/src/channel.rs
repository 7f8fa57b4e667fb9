#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Channel {
    /// Path of the named pipe (or plain file) the trace is written to.
    pub path: PathBuf,

    /// Upper bound on the negotiated channel capacity, in bytes.
    ///
    /// `None` means use whatever the platform allows.
    pub capacity: Option<usize>,

    /// Create the FIFO if it does not exist yet.
    pub create: bool,
}

impl Channel {
    /// Clamp a platform capacity to the configured bound.
    pub fn clamp(&self, platform: usize) -> usize {
        self.capacity.map_or(platform, |cap| cap.min(platform))
    }
}

#![forbid(unsafe_code)]

use crate::Error;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::{str::FromStr, time::Duration};

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeout {
    /// Name of the signal the operator raises to stop the run, eg. `SIGUSR2`.
    pub signal: String,

    /// How long the watcher blocks before re-checking for shutdown, in
    /// milliseconds.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub poll_interval: Duration,
}

impl Default for Timeout {
    fn default() -> Self {
        Self {
            signal: "SIGUSR2".into(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl Timeout {
    pub fn signal(&self) -> Result<Signal, Error> {
        Signal::from_str(&self.signal).map_err(|_| Error::UnknownSignal(self.signal.clone()))
    }
}

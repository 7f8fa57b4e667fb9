//! Drives a collector from a script of engine events.
//!
//! Each non-empty line of the script is one JSON object tagged by `event`:
//!
//! ```text
//! {"event": "image_loaded", "path": "/usr/lib/libfoo.so", "low": 4096, "high": 8191}
//! {"event": "code_reached", "address": 4352}
//! {"event": "context_change", "reason": "fatal_signal", "info": 11}
//! {"event": "timeout"}
//! {"event": "exit"}
//! ```
//!
//! Lines starting with `#` are skipped.

use crate::error::Error;
use collector::{Collector, ContextChangeReason, ExitProcess, ProcessControl, Stats};
use config::Config;
use flume::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Deserializer, Serialize, de};
use std::{io::Write, path::Path, time::Duration};
use tracing::{debug, info, warn};

/// Poll interval of the timeout watcher when the config does not set one.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a timeout may take to reach the exit request.
const EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ImageLoaded {
        path: String,
        low: u64,
        high: u64,
    },
    ImageUnloaded {
        low: u64,
    },
    CodeReached {
        address: u64,
        /// Consecutive executions of the same block.
        #[serde(default = "one")]
        count: u64,
    },
    ContextChange {
        reason: ChangeReason,
        /// Signal number or exception code. Exception codes may be written
        /// signed or as unsigned 32-bit values.
        #[serde(default, deserialize_with = "engine_code")]
        info: i32,
    },
    Timeout,
    Exit,
}

fn one() -> u64 {
    1
}

/// Accept any value that fits 32 bits, signed or unsigned.
fn engine_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    let code = i64::deserialize(deserializer)?;
    i32::try_from(code)
        .or_else(|_| u32::try_from(code).map(|code| code as i32))
        .map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Signed(code), &"a 32-bit engine code")
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    FatalSignal,
    Exception,
    Other,
}

impl From<ChangeReason> for ContextChangeReason {
    fn from(reason: ChangeReason) -> Self {
        match reason {
            ChangeReason::FatalSignal => Self::FatalSignal,
            ChangeReason::Exception => Self::Exception,
            ChangeReason::Other => Self::Other,
        }
    }
}

/// Parse a script. Blank lines and `#` comments are skipped.
pub fn parse(script: &str) -> Result<Vec<EngineEvent>, Error> {
    script
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| Error::ParseEvent {
                line: index + 1,
                source,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Report {
    pub stats: Stats,
    /// Status the collector asked the process to exit with, if it did.
    pub exit_status: Option<i32>,
    /// Events left unplayed because the process was asked to exit.
    pub skipped: usize,
}

/// Forwards exit requests to the replay loop. Channel failures end the
/// process like they would under an engine.
#[derive(Debug, Clone)]
struct ReplayControl {
    exits: Sender<i32>,
}

impl ProcessControl for ReplayControl {
    fn exit_application(&self, status: i32) {
        if self.exits.try_send(status).is_err() {
            debug!(status, "exit already requested");
        }
    }

    fn abort(&self, error: &collector::Error) {
        ExitProcess.abort(error);
    }
}

/// Replay the script at `path` against a collector built from `config`.
pub fn replay(config: &Config, path: &Path) -> Result<Report, Error> {
    let script = std::fs::read_to_string(path).map_err(|source| Error::ReadScript {
        path: path.to_owned(),
        source,
    })?;
    let events = parse(&script)?;
    debug!(events = events.len(), "script parsed");

    // timeouts come from the script rather than a signal
    let mut config = config.clone();
    let poll_interval = config
        .timeout
        .take()
        .map_or(DEFAULT_POLL_INTERVAL, |timeout| timeout.poll_interval);

    let (exit_tx, exit_rx) = flume::bounded(1);
    let collector = Collector::from_config(&config, ReplayControl { exits: exit_tx })?;
    let (timeout_tx, timeout_rx) = flume::unbounded();
    collector.watch(timeout_rx, poll_interval)?;

    Replayer {
        collector,
        timeouts: timeout_tx,
        exits: exit_rx,
    }
    .run(events)
}

struct Replayer<W> {
    collector: Collector<W>,
    timeouts: Sender<()>,
    exits: Receiver<i32>,
}

impl<W: Write + Send + 'static> Replayer<W> {
    fn run(self, events: Vec<EngineEvent>) -> Result<Report, Error> {
        let total = events.len();
        let mut exit_status = None;
        let mut played = 0;

        for event in events {
            played += 1;
            match event {
                EngineEvent::ImageLoaded { path, low, high } => {
                    match self.collector.on_image_loaded(&path, low, high) {
                        Some(index) => info!(%path, %index, "image loaded"),
                        None => debug!(%path, "image not whitelisted"),
                    }
                }
                EngineEvent::ImageUnloaded { low } => {
                    self.collector.on_image_unloaded(low);
                }
                EngineEvent::CodeReached { address, count } => {
                    match self.collector.instrument(address) {
                        Some(image) => {
                            for _ in 0..count {
                                self.collector.on_code_reached(&image, address);
                            }
                        }
                        None => debug!(address, "address outside traced images"),
                    }
                }
                EngineEvent::ContextChange { reason, info } => {
                    self.collector.on_context_change(reason.into(), info);
                }
                EngineEvent::Timeout => {
                    // the watcher may already be gone after an earlier timeout
                    let _ = self.timeouts.send(());
                    match self.exits.recv_timeout(EXIT_GRACE) {
                        Ok(status) => {
                            exit_status = Some(status);
                            break;
                        }
                        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                            return Err(Error::TimeoutIgnored);
                        }
                    }
                }
                EngineEvent::Exit => break,
            }
        }

        let skipped = total - played;
        if skipped > 0 {
            warn!(skipped, "process exited before the script ended");
        }
        self.collector.on_process_exit();
        Ok(Report {
            stats: self.collector.stats(),
            exit_status,
            skipped,
        })
    }
}

use crate::{
    Error,
    buffer::EventBuffer,
    channel::{self, Channel},
    termination::{ContextChangeReason, ProcessControl, Reason},
    watcher::{SignalTrigger, TimeoutTrigger, Watcher},
    whitelist::{ImageIndex, ImageRef, Whitelist},
    wire::Record,
};
use config::Config;
use humansize::{BINARY, format_size};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use serde::Serialize;
use std::{fs::File, io::Write, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Counters describing what the collector did so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Block records accepted into the buffer.
    pub records: u64,
    /// Terminal records written.
    pub terminals: u64,
    /// Events that arrived after the trace was terminated or closed.
    pub dropped: u64,
    /// Buffer flushes that reached the channel.
    pub flushes: u64,
    /// Bytes written to the channel, header included.
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// A timeout sentinel was written; the process is being torn down.
    Terminating,
    /// The final flush happened or the channel broke.
    Closed,
}

#[derive(Debug)]
struct Pipeline<W> {
    buffer: EventBuffer,
    channel: Channel<W>,
    phase: Phase,
    stats: Stats,
}

impl<W: Write> Pipeline<W> {
    fn append(&mut self, record: Record) -> Result<(), Error> {
        if self.buffer.is_full() {
            self.flush()?;
        }
        self.buffer.push(&record);
        match record {
            Record::Block { .. } => self.stats.records += 1,
            Record::Terminal(_) => self.stats.terminals += 1,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.channel.flush(&mut self.buffer)?;
        self.stats.flushes += 1;
        Ok(())
    }

    fn stats(&self) -> Stats {
        Stats {
            bytes_written: self.channel.bytes_written(),
            ..self.stats
        }
    }
}

/// State shared between engine callbacks and the timeout watcher.
struct Shared<W> {
    pipeline: Mutex<Pipeline<W>>,
    control: Arc<dyn ProcessControl>,
}

impl<W: Write> Shared<W> {
    fn append(&self, record: Record) {
        let mut pipeline = self.pipeline.lock();
        if pipeline.phase != Phase::Running {
            pipeline.stats.dropped += 1;
            return;
        }
        if let Err(error) = pipeline.append(record) {
            self.fail(pipeline, error);
        }
    }

    /// Write a terminal record and push it out immediately so a crash
    /// without a fini notification cannot strand it. On success the
    /// pipeline moves to `next` before the lock is released.
    fn terminate(&self, reason: Reason, next: Phase) -> bool {
        let mut pipeline = self.pipeline.lock();
        if pipeline.phase != Phase::Running {
            pipeline.stats.dropped += 1;
            return false;
        }
        let written = pipeline
            .append(Record::Terminal(reason.code()))
            .and_then(|()| pipeline.flush());
        match written {
            Ok(()) => {
                pipeline.phase = next;
                info!(?reason, code = reason.code(), "terminal record written");
                true
            }
            Err(error) => {
                self.fail(pipeline, error);
                false
            }
        }
    }

    fn timeout(&self) {
        if self.terminate(Reason::Timeout, Phase::Terminating) {
            self.control.exit_application(0);
        }
    }

    fn finish(&self) {
        let mut pipeline = self.pipeline.lock();
        if pipeline.phase == Phase::Closed {
            return;
        }
        let closed = pipeline.flush().and_then(|()| pipeline.channel.close());
        pipeline.phase = Phase::Closed;
        let stats = pipeline.stats();
        drop(pipeline);

        match closed {
            Ok(()) => info!(
                records = stats.records,
                terminals = stats.terminals,
                dropped = stats.dropped,
                flushes = stats.flushes,
                written = %format_size(stats.bytes_written, BINARY),
                "trace complete"
            ),
            Err(error) => self.control.abort(&error),
        }
    }

    fn fail(&self, mut pipeline: MutexGuard<'_, Pipeline<W>>, error: Error) {
        pipeline.phase = Phase::Closed;
        drop(pipeline);
        self.control.abort(&error);
    }
}

/// The collection pipeline driven by an instrumentation engine.
///
/// Every callback may be invoked concurrently from any application thread.
/// A single lock guards the buffer for the whole check, flush and append
/// sequence, and the terminated state is checked under the same lock.
pub struct Collector<W> {
    whitelist: RwLock<Whitelist>,
    shared: Arc<Shared<W>>,
    watcher: Mutex<Option<Watcher>>,
}

impl Collector<File> {
    /// Build a collector from configuration: validate it, open the output
    /// channel (blocking until the consumer attaches), write the header and
    /// start the timeout watcher if one is configured.
    pub fn from_config(
        config: &Config,
        control: impl ProcessControl + 'static,
    ) -> Result<Self, Error> {
        config.validate()?;
        let whitelist = Whitelist::new(config.whitelist.iter().cloned())?;
        let channel = channel::open(&config.channel)?;
        let collector = Self::new(whitelist, channel, control)?;

        if let Some(timeout) = &config.timeout {
            let trigger = SignalTrigger::new(timeout.signal()?)?;
            collector.watch(trigger, timeout.poll_interval)?;
        }
        Ok(collector)
    }
}

impl<W: Write + Send + 'static> Collector<W> {
    /// Size the buffer against the channel and send the header.
    pub fn new(
        whitelist: Whitelist,
        mut channel: Channel<W>,
        control: impl ProcessControl + 'static,
    ) -> Result<Self, Error> {
        let buffer = EventBuffer::for_channel(channel.capacity())?;
        let header = whitelist.header();
        channel.write_exact(&header.encode())?;
        info!(
            images = header.images().len(),
            buffer_records = buffer.capacity(),
            "header written"
        );

        Ok(Self {
            whitelist: RwLock::new(whitelist),
            shared: Arc::new(Shared {
                pipeline: Mutex::new(Pipeline {
                    buffer,
                    channel,
                    phase: Phase::Running,
                    stats: Stats::default(),
                }),
                control: Arc::new(control),
            }),
            watcher: Mutex::new(None),
        })
    }

    /// Start a watcher thread that times the run out when `trigger` fires.
    ///
    /// Replaces any previous watcher.
    pub fn watch(&self, trigger: impl TimeoutTrigger, poll_interval: Duration) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        let watcher = Watcher::spawn(trigger, poll_interval, move || shared.timeout())?;
        if let Some(mut previous) = self.watcher.lock().replace(watcher) {
            previous.stop();
        }
        Ok(())
    }

    pub fn on_image_loaded(&self, path: &str, low: u64, high: u64) -> Option<ImageIndex> {
        self.whitelist.write().register(path, low, high)
    }

    pub fn on_image_unloaded(&self, low: u64) -> Option<ImageIndex> {
        self.whitelist.write().unload(low)
    }

    /// Decide whether code at `address` is worth instrumenting. The returned
    /// handle is passed back on every [`on_code_reached`](Self::on_code_reached).
    pub fn instrument(&self, address: u64) -> Option<ImageRef> {
        self.whitelist.read().resolve(address)
    }

    /// Hot path: record that code at `address` in `image` ran.
    pub fn on_code_reached(&self, image: &ImageRef, address: u64) {
        self.shared.append(Record::Block {
            image: image.index.get(),
            offset: image.offset_of(address),
        });
    }

    pub fn on_context_change(&self, reason: ContextChangeReason, info: i32) {
        match Reason::from_context_change(reason, info) {
            Some(reason) => {
                self.shared.terminate(reason, Phase::Running);
            }
            None => debug!(?reason, info, "ignoring context change"),
        }
    }

    /// Operator timeout: write the timeout record, stop accepting events and
    /// ask the engine to exit.
    pub fn on_timeout(&self) {
        self.shared.timeout();
    }

    /// Graceful end of the process: stop the watcher, flush what is left and
    /// close the channel.
    pub fn on_process_exit(&self) {
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        self.shared.finish();
    }

    pub fn whitelist(&self) -> RwLockReadGuard<'_, Whitelist> {
        self.whitelist.read()
    }

    pub fn stats(&self) -> Stats {
        self.shared.pipeline.lock().stats()
    }

    /// The final flush happened or the channel broke; nothing more will be
    /// written.
    pub fn is_closed(&self) -> bool {
        self.shared.pipeline.lock().phase == Phase::Closed
    }

    /// Capacity of the event buffer in records.
    pub fn buffer_capacity(&self) -> usize {
        self.shared.pipeline.lock().buffer.capacity()
    }
}

impl<W> Drop for Collector<W> {
    fn drop(&mut self) {
        if self.shared.pipeline.lock().phase != Phase::Closed {
            warn!("collector dropped without a process exit notification");
        }
    }
}

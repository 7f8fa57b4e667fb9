mod fifo;

pub use fifo::{DEFAULT_CAPACITY, create_fifo, negotiate_capacity, open};

use crate::{Error, buffer::EventBuffer};
use std::io::Write;
use tracing::trace;

/// Write-only byte conduit to the trace consumer.
///
/// Every write is completed in full or fails; a short write is never
/// accepted silently.
#[derive(Debug)]
pub struct Channel<W> {
    writer: Option<W>,
    capacity: usize,
    writes: u64,
    bytes_written: u64,
}

impl<W: Write> Channel<W> {
    /// Wrap an already opened writer whose single-write capacity is
    /// `capacity` bytes.
    pub fn new(writer: W, capacity: usize) -> Self {
        Self {
            writer: Some(writer),
            capacity,
            writes: 0,
            bytes_written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Number of completed `write_exact` calls.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write all of `bytes`, retrying partial and interrupted writes.
    pub fn write_exact(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let writer = self.writer.as_mut().ok_or(Error::ChannelClosed)?;
        writer.write_all(bytes).map_err(Error::Write)?;
        writer.flush().map_err(Error::Write)?;
        self.writes += 1;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Send the buffered records and reset the buffer.
    ///
    /// An empty buffer is a no-op.
    pub fn flush(&mut self, buffer: &mut EventBuffer) -> Result<(), Error> {
        if buffer.is_empty() {
            return Ok(());
        }
        trace!(records = buffer.len(), "flushing event buffer");
        self.write_exact(buffer.as_bytes())?;
        buffer.clear();
        Ok(())
    }

    /// Flush and drop the writer. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        match self.writer.take() {
            Some(mut writer) => writer.flush().map_err(Error::Write),
            None => Ok(()),
        }
    }
}

use crate::{
    Error,
    wire::{RECORD_SIZE, Record},
};

/// Fixed-capacity holding area for encoded records.
///
/// Records are stored already encoded so a flush hands the filled prefix
/// straight to the channel.
#[derive(Debug)]
pub struct EventBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl EventBuffer {
    /// Size the buffer to half of the channel capacity so a full flush fits
    /// in a single channel write.
    pub fn for_channel(channel_capacity: usize) -> Result<Self, Error> {
        let records = (channel_capacity / 2) / RECORD_SIZE;
        if records == 0 {
            return Err(Error::CapacityTooSmall(channel_capacity));
        }
        Ok(Self::with_capacity(records))
    }

    /// A buffer holding exactly `records` records. Panics if `records` is zero.
    pub fn with_capacity(records: usize) -> Self {
        assert!(records > 0, "event buffer needs room for at least one record");
        Self {
            bytes: Vec::with_capacity(records * RECORD_SIZE),
            capacity: records,
        }
    }

    /// Capacity in records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.bytes.len() / RECORD_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Store a record. The caller must flush a full buffer first.
    pub fn push(&mut self, record: &Record) {
        debug_assert!(!self.is_full(), "push into a full event buffer");
        self.bytes.extend_from_slice(&record.encode());
    }

    /// The encoded records from the start of the buffer to the cursor.
    pub fn as_bytes(&self) -> &[u8] {
        debug_assert!(self.bytes.len() <= self.capacity * RECORD_SIZE);
        debug_assert_eq!(self.bytes.len() % RECORD_SIZE, 0);
        &self.bytes
    }

    /// Reset the cursor. Storage is kept.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

//! Consumer side of the trace stream.

use crate::{
    Error,
    wire::{Header, RECORD_SIZE, Record, TIMEOUT_CODE},
};
use serde::Serialize;
use std::io::{ErrorKind, Read};

/// Parses a trace stream: the header first, then records until EOF.
#[derive(Debug)]
pub struct TraceReader<R> {
    inner: R,
    header: Header,
}

impl<R: Read> TraceReader<R> {
    /// Read the header. Blocks until the producer has sent it.
    pub fn new(mut inner: R) -> Result<Self, Error> {
        let header = Header::decode(&mut inner)?;
        Ok(Self { inner, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The next record, or `None` once the producer closed the stream on a
    /// record boundary.
    pub fn next_record(&mut self) -> Result<Option<Record>, Error> {
        let mut bytes = [0; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.inner.read(&mut bytes[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(Error::Truncated("record")),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Read(err)),
            }
        }
        Ok(Some(Record::decode(&bytes)))
    }

    /// Consume the rest of the stream into a summary.
    pub fn summarize(mut self) -> Result<TraceSummary, Error> {
        let mut summary = TraceSummary::new(&self.header);
        while let Some(record) = self.next_record()? {
            summary.add(record);
        }
        Ok(summary)
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub path: String,
    /// Block records seen for this image, repeats included.
    pub hits: u64,
}

/// Per-image hit counts and how the run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    pub images: Vec<ImageSummary>,
    pub records: u64,
    /// Block records naming an index the header does not describe.
    pub unknown: u64,
    /// Code of the last terminal record, if any.
    pub terminal: Option<u64>,
}

impl TraceSummary {
    pub fn new(header: &Header) -> Self {
        Self {
            images: header
                .images()
                .iter()
                .map(|path| ImageSummary {
                    path: path.clone(),
                    hits: 0,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, record: Record) {
        self.records += 1;
        match record {
            Record::Block { image, .. } => {
                match usize::try_from(image)
                    .ok()
                    .and_then(|image| self.images.get_mut(image))
                {
                    Some(summary) => summary.hits += 1,
                    None => self.unknown += 1,
                }
            }
            Record::Terminal(code) => self.terminal = Some(code),
        }
    }

    /// The run was stopped by the operator.
    pub fn timed_out(&self) -> bool {
        self.terminal == Some(TIMEOUT_CODE)
    }

    /// The run ended with a fatal signal or exception.
    pub fn crashed(&self) -> bool {
        self.terminal.is_some_and(|code| code != TIMEOUT_CODE)
    }
}

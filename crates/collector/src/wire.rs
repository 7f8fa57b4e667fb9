//! Byte layout of a trace stream.
//!
//! A stream starts with a header describing the whitelist, followed by a
//! sequence of fixed-size records until the channel closes:
//!
//! ```text
//! header:  [image_count: u8] ([path_len: u16] [path bytes])*
//! record:  [image_index: u64] [offset: u64]
//! ```
//!
//! All integers are little-endian. A record whose index is all ones is a
//! terminal record, and its offset field carries the termination code.

use crate::Error;
use std::io::{self, Read};

/// Size in bytes of one encoded record.
pub const RECORD_SIZE: usize = 16;

/// Image index reserved for terminal records.
pub const TERMINAL_INDEX: u64 = u64::MAX;

/// Termination code written when the operator timed the run out.
///
/// Matches `SIGUSR2` on Linux, the signal used to deliver the timeout there.
pub const TIMEOUT_CODE: u64 = 0xC;

/// One event in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Record {
    /// A basic block at `offset` bytes into whitelist image `image` was hit.
    Block { image: u64, offset: u64 },
    /// The monitored process is going down for the given reason code.
    Terminal(u64),
}

impl Record {
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let (index, offset) = match *self {
            Self::Block { image, offset } => {
                debug_assert_ne!(image, TERMINAL_INDEX, "block record uses the terminal index");
                (image, offset)
            }
            Self::Terminal(code) => (TERMINAL_INDEX, code),
        };
        let mut bytes = [0; RECORD_SIZE];
        bytes[..8].copy_from_slice(&index.to_le_bytes());
        bytes[8..].copy_from_slice(&offset.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut index = [0; 8];
        let mut offset = [0; 8];
        index.copy_from_slice(&bytes[..8]);
        offset.copy_from_slice(&bytes[8..]);
        let (index, offset) = (u64::from_le_bytes(index), u64::from_le_bytes(offset));
        if index == TERMINAL_INDEX {
            Self::Terminal(offset)
        } else {
            Self::Block {
                image: index,
                offset,
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Structural preamble naming each whitelisted image in index order.
///
/// Only built through [`Header::new`] or [`Header::decode`], so the count
/// and every path length fit their wire fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    images: Vec<String>,
}

impl Header {
    pub fn new(images: Vec<String>) -> Result<Self, Error> {
        config::check_whitelist(&images)?;
        Ok(Self { images })
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Size of the encoded header in bytes.
    pub fn encoded_len(&self) -> usize {
        1 + self.images.iter().map(|path| 2 + path.len()).sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        // lengths were checked in `new`, or came off the wire
        bytes.push(self.images.len() as u8);
        for path in &self.images {
            bytes.extend_from_slice(&(path.len() as u16).to_le_bytes());
            bytes.extend_from_slice(path.as_bytes());
        }
        bytes
    }

    pub fn decode(reader: &mut impl Read) -> Result<Self, Error> {
        let mut count = [0; 1];
        read_exact(reader, &mut count, "image count")?;

        let mut images = Vec::with_capacity(count[0].into());
        for _ in 0..count[0] {
            let mut len = [0; 2];
            read_exact(reader, &mut len, "image path length")?;
            let mut path = vec![0; u16::from_le_bytes(len).into()];
            read_exact(reader, &mut path, "image path")?;
            images.push(String::from_utf8_lossy(&path).into_owned());
        }
        Ok(Self { images })
    }
}

pub(crate) fn read_exact(
    reader: &mut impl Read,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), Error> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::Truncated(what),
        _ => Error::Read(err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn header_layout_is_exact() {
        let header = Header::new(vec!["libfoo".into(), "ab".into()]).unwrap();
        assert_eq!(
            header.encode(),
            [
                &[2u8][..],
                &[6, 0][..],
                &b"libfoo"[..],
                &[2, 0][..],
                &b"ab"[..],
            ]
            .concat()
        );
        assert_eq!(header.encoded_len(), 1 + 2 + 6 + 2 + 2);
    }

    #[test]
    fn empty_header_is_a_single_zero() {
        assert_eq!(Header::default().encode(), vec![0]);
    }

    #[test]
    fn header_rejects_too_many_images() {
        let images = (0..256).map(|i| i.to_string()).collect();
        assert!(matches!(
            Header::new(images),
            Err(Error::Config(config::Error::TooManyImages(256)))
        ));
    }

    #[test]
    fn largest_header_keeps_its_count() {
        let images: Vec<String> = (0..255).map(|i| i.to_string()).collect();
        let header = Header::new(images.clone()).unwrap();
        let bytes = header.encode();
        assert_eq!(bytes[0], 255);
        assert_eq!(Header::decode(&mut bytes.as_slice()).unwrap().images(), images);
    }

    #[test]
    fn header_rejects_overlong_path() {
        let images = vec!["a".into(), "p".repeat(usize::from(u16::MAX) + 1)];
        assert!(matches!(
            Header::new(images),
            Err(Error::Config(config::Error::PatternTooLong { index: 1, .. }))
        ));
    }

    #[test]
    fn terminal_record_uses_all_ones_index() {
        let bytes = Record::Terminal(11).encode();
        assert_eq!(&bytes[..8], &[0xFF; 8]);
        assert_eq!(&bytes[8..], &11u64.to_le_bytes());
        assert_eq!(Record::decode(&bytes), Record::Terminal(11));
    }

    #[test]
    fn block_record_layout() {
        let bytes = Record::Block {
            image: 1,
            offset: 0x500,
        }
        .encode();
        assert_eq!(bytes, [1, 0, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn truncated_header_is_reported() {
        let bytes = [1u8, 10, 0, b'l', b'i', b'b'];
        let err = Header::decode(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, Error::Truncated("image path")));
    }

    proptest! {
        #[test]
        fn header_decodes_what_it_encodes(images in prop::collection::vec("[a-z./]{1,40}", 0..20)) {
            let header = Header::new(images).unwrap();
            let bytes = header.encode();
            prop_assert_eq!(bytes.len(), header.encoded_len());
            let decoded = Header::decode(&mut bytes.as_slice()).unwrap();
            prop_assert_eq!(decoded, header);
        }
    }
}

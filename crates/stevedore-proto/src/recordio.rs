//! RecordIO framing for the subscribe stream.
//!
//! The agent writes the event stream as `<decimal length>\n<length bytes>`
//! records. The decoder is incremental: feed it whatever chunk sizes the
//! transport produces and drain complete records as they materialize.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Upper bound for a single record. A frame above this is treated as stream
/// corruption rather than an allocation request.
pub const MAX_RECORD_LEN: usize = 4 * 1024 * 1024;

/// Longest accepted length prefix: `MAX_RECORD_LEN` has 7 digits.
const MAX_PREFIX_DIGITS: usize = 8;

/// Encodes one record into its framed form.
pub fn encode(payload: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(payload.len() + MAX_PREFIX_DIGITS + 1);
    framed.extend_from_slice(payload.len().to_string().as_bytes());
    framed.extend_from_slice(b"\n");
    framed.extend_from_slice(payload);
    framed.freeze()
}

/// Incremental record decoder.
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: BytesMut,
    /// Length of the record currently being read, once its prefix is parsed.
    pending_len: Option<usize>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transport chunk to the internal buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete record, or `None` when more input is needed.
    pub fn next_record(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.pending_len {
                None => {
                    let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
                        if self.buffer.len() > MAX_PREFIX_DIGITS {
                            return Err(Error::InvalidLengthPrefix(
                                String::from_utf8_lossy(&self.buffer).into_owned(),
                            ));
                        }
                        return Ok(None);
                    };
                    let prefix = self.buffer.split_to(newline + 1);
                    let digits = &prefix[..newline];
                    let text = std::str::from_utf8(digits)
                        .map_err(|_| invalid_prefix(digits))?
                        .trim();
                    let len: usize = text.parse().map_err(|_| invalid_prefix(digits))?;
                    if len > MAX_RECORD_LEN {
                        return Err(Error::RecordTooLarge {
                            got: len,
                            max: MAX_RECORD_LEN,
                        });
                    }
                    self.pending_len = Some(len);
                }
                Some(len) => {
                    if self.buffer.len() < len {
                        return Ok(None);
                    }
                    self.pending_len = None;
                    let record = self.buffer.split_to(len).freeze();
                    return Ok(Some(record));
                }
            }
        }
    }

    /// True when no partial record is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.remaining() == 0 && self.pending_len.is_none()
    }
}

fn invalid_prefix(digits: &[u8]) -> Error {
    Error::InvalidLengthPrefix(String::from_utf8_lossy(digits).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_records_split_across_chunks() {
        let mut framed = Vec::new();
        for payload in [&b"hello"[..], &b""[..], &b"world!"[..]] {
            framed.extend_from_slice(&encode(payload));
        }
        let mut decoder = Decoder::new();

        let mut records = Vec::new();
        // One byte at a time, the worst case a transport can produce.
        for byte in framed {
            decoder.feed(&[byte]);
            while let Some(record) = decoder.next_record().unwrap() {
                records.push(record);
            }
        }

        assert_eq!(records, vec![&b"hello"[..], &b""[..], &b"world!"[..]]);
        assert!(decoder.is_empty());
    }

    #[test]
    fn rejects_non_numeric_length_prefix() {
        let mut decoder = Decoder::new();
        decoder.feed(b"abc\nxxx");
        assert!(matches!(
            decoder.next_record(),
            Err(Error::InvalidLengthPrefix(_))
        ));
    }

    #[test]
    fn rejects_unterminated_oversized_prefix() {
        let mut decoder = Decoder::new();
        decoder.feed(b"123456789123456789");
        assert!(matches!(
            decoder.next_record(),
            Err(Error::InvalidLengthPrefix(_))
        ));
    }

    #[test]
    fn rejects_records_above_the_frame_limit() {
        let mut decoder = Decoder::new();
        decoder.feed(format!("{}\n", MAX_RECORD_LEN + 1).as_bytes());
        assert!(matches!(
            decoder.next_record(),
            Err(Error::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn waits_for_the_full_record_body() {
        let mut decoder = Decoder::new();
        decoder.feed(b"5\nhel");
        assert!(decoder.next_record().unwrap().is_none());
        decoder.feed(b"lo");
        assert_eq!(decoder.next_record().unwrap().unwrap(), &b"hello"[..]);
    }
}

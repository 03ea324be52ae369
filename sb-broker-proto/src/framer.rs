//! Packet Framer (C2, §4.2).
//!
//! Exposes explicit `fill`/`consume` primitives over a buffered accumulator,
//! addressing the ambiguity in the source's `inputstream_read` loop (§9):
//! this framer always consumes exactly the number of bytes a record or a
//! fixed-size handshake packet declares, never fewer, never guessing from a
//! read's return value.

use crate::wire::{RecordHeader, RECORD_HEADER_LEN};
use crate::TunnelError;

/// Accumulates raw bytes from the stream and yields complete handshake
/// packets or Message records once enough bytes have arrived.
#[derive(Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append newly-read bytes from the stream. Corresponds to the "available
    /// read" bytes in §4.2 — may be fewer than a full record.
    pub fn fill(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// If at least `len` bytes are buffered, drain and return exactly `len`
    /// of them (used for the fixed-size Hello/Initiate packets). Otherwise
    /// suspend: return `None` and wait for the next `fill`.
    pub fn next_fixed(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.buf.len() < len {
            return None;
        }
        Some(self.buf.drain(..len).collect())
    }

    /// If a complete Message record is buffered, drain and return its raw
    /// bytes (header + ciphertext). Returns `Ok(None)` to suspend pending
    /// more bytes, and `Err` if the header's magic/type is malformed.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, TunnelError> {
        if self.buf.len() < RECORD_HEADER_LEN {
            return Ok(None);
        }
        let header = RecordHeader::parse(&self.buf[..RECORD_HEADER_LEN])
            .ok_or(TunnelError::BadHeader)?;
        let record_len = header.record_len();
        if self.buf.len() < record_len {
            return Ok(None);
        }
        Ok(Some(self.buf.drain(..record_len).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_packet_waits_for_enough_bytes() {
        let mut framer = Framer::new();
        framer.fill(&[1, 2, 3]);
        assert_eq!(framer.next_fixed(5), None);
        framer.fill(&[4, 5]);
        assert_eq!(framer.next_fixed(5), Some(vec![1, 2, 3, 4, 5]));
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn record_split_across_three_reads_assembles_whole() {
        let header = RecordHeader::write(2, &[0u8; 16], 6);
        let body = b"plugin";

        let mut framer = Framer::new();
        framer.fill(&header[..20]);
        assert!(framer.next_record().unwrap().is_none());
        framer.fill(&header[20..]);
        assert!(framer.next_record().unwrap().is_none());
        framer.fill(body);
        let record = framer.next_record().unwrap().expect("complete record");
        assert_eq!(record.len(), RECORD_HEADER_LEN + body.len());
        assert_eq!(&record[RECORD_HEADER_LEN..], body);
    }

    #[test]
    fn two_records_back_to_back_both_drain() {
        let mut framer = Framer::new();
        let h1 = RecordHeader::write(2, &[1u8; 16], 3);
        let h2 = RecordHeader::write(4, &[2u8; 16], 4);
        framer.fill(&h1);
        framer.fill(b"abc");
        framer.fill(&h2);
        framer.fill(b"wxyz");

        let r1 = framer.next_record().unwrap().unwrap();
        assert_eq!(&r1[RECORD_HEADER_LEN..], b"abc");
        let r2 = framer.next_record().unwrap().unwrap();
        assert_eq!(&r2[RECORD_HEADER_LEN..], b"wxyz");
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut framer = Framer::new();
        framer.fill(&[0u8; RECORD_HEADER_LEN]);
        assert!(framer.next_record().is_err());
    }
}

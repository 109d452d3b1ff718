//! Captured link-layer record parsing
//!
//! A capture read returns zero or more records packed back to back. Each
//! record starts with a header:
//!
//! ```text
//! 0       8          12          16        18    20
//! +-------+----------+-----------+---------+-----+
//! | tstamp| caplen   | datalen   | hdrlen  | pad |
//! +-------+----------+-----------+---------+-----+
//! ```
//!
//! followed by `caplen` captured bytes starting `hdrlen` bytes into the
//! record. The kernel reports the header length it chose, which may be
//! shorter than the padded header (18 on Ethernet, so that the IP header
//! lands on a word boundary). The next record begins at the word-aligned
//! end of this one.

use tracing::warn;

/// Size of a record header including trailing padding
pub const BPF_HDR_SIZE: usize = 20;

/// Offset where the header fields end
pub const BPF_HDR_FIELDS_LEN: usize = 18;

/// Record alignment inside a capture buffer
pub const BPF_ALIGNMENT: usize = 4;

/// Largest captured payload forwarded to the engine
pub const CAPTURE_PAYLOAD_MAX: usize = 1500;

/// Round `len` up to the record alignment.
pub fn bpf_wordalign(len: usize) -> usize {
    (len + (BPF_ALIGNMENT - 1)) & !(BPF_ALIGNMENT - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordHeader {
    caplen: usize,
    datalen: usize,
    hdrlen: usize,
}

impl RecordHeader {
    fn parse(buf: &[u8]) -> Self {
        let u32_at = |off: usize| {
            u32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]) as usize
        };
        Self {
            caplen: u32_at(8),
            datalen: u32_at(12),
            hdrlen: u16::from_ne_bytes([buf[16], buf[17]]) as usize,
        }
    }
}

/// Iterator over the payloads of the valid records in a capture buffer.
///
/// Truncated records (captured length differs from the on-wire length)
/// and records larger than `capacity` are skipped with a warning. Running
/// out of bytes for a full header, or a record that would extend past the
/// end of the buffer, ends the iteration.
pub struct CapturedFrames<'a> {
    buf: &'a [u8],
    capacity: usize,
}

impl<'a> CapturedFrames<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_capacity(buf, CAPTURE_PAYLOAD_MAX)
    }

    pub fn with_capacity(buf: &'a [u8], capacity: usize) -> Self {
        Self { buf, capacity }
    }
}

impl<'a> Iterator for CapturedFrames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.buf.len() < BPF_HDR_FIELDS_LEN {
                self.buf = &[];
                return None;
            }

            let hdr = RecordHeader::parse(self.buf);
            let record_len = hdr.hdrlen + hdr.caplen;
            let stride = bpf_wordalign(record_len);

            if hdr.hdrlen < BPF_HDR_FIELDS_LEN || record_len > self.buf.len() {
                // we are done
                self.buf = &[];
                return None;
            }

            let record = &self.buf[..record_len];
            self.buf = self.buf.get(stride..).unwrap_or_default();

            if hdr.caplen != hdr.datalen {
                warn!("skipping truncated packet");
                continue;
            }
            if hdr.caplen > self.capacity {
                warn!("packet too big: {} bytes", hdr.caplen);
                continue;
            }

            return Some(&record[hdr.hdrlen..]);
        }
    }
}

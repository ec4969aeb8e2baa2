use byteorder::{ByteOrder, LittleEndian};

use crate::cipher::NONCE_LEN;

pub const MAGIC: &[u8; 4] = b"XSP1";
pub const HEADER_LEN: usize = 4 + 1 + NONCE_LEN + 4 + 8;
pub const TAG_LEN: usize = 16;

const FORMAT_OFFSET: usize = 4;
const N0_OFFSET: usize = FORMAT_OFFSET + 1;
const SEGMENT_SIZE_OFFSET: usize = N0_OFFSET + NONCE_LEN;
const TOTAL_SIZE_OFFSET: usize = SEGMENT_SIZE_OFFSET + 4;

/// The payload layout an XSP object's plaintext stream is in, before it is
/// split into segments. `Plain` is raw content; `WithAttrs` prefixes the
/// content with a length-prefixed attributes blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XspFormat {
    Plain = 1,
    WithAttrs = 2,
}

impl XspFormat {
    fn from_tag(tag: u8) -> trc::Result<Self> {
        match tag {
            1 => Ok(XspFormat::Plain),
            2 => Ok(XspFormat::WithAttrs),
            other => Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .details(format!("unrecognised XSP format tag {other}"))),
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// The fixed-size prefix of every XSP object: format magic, a format tag,
/// the per-object random nonce base segment nonces are derived from, the
/// plaintext segment size used throughout the body (the last segment may be
/// shorter), and the object's total plaintext length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XspHeader {
    pub format: XspFormat,
    pub n0: [u8; NONCE_LEN],
    pub segment_size: u32,
    pub total_size: u64,
}

impl XspHeader {
    pub fn encode(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(MAGIC);
        buf[FORMAT_OFFSET] = self.format.tag();
        buf[N0_OFFSET..N0_OFFSET + NONCE_LEN].copy_from_slice(&self.n0);
        LittleEndian::write_u32(
            &mut buf[SEGMENT_SIZE_OFFSET..SEGMENT_SIZE_OFFSET + 4],
            self.segment_size,
        );
        LittleEndian::write_u64(
            &mut buf[TOTAL_SIZE_OFFSET..TOTAL_SIZE_OFFSET + 8],
            self.total_size,
        );
        buf
    }

    pub fn decode(bytes: &[u8]) -> trc::Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .details("not a recognised XSP object"));
        }
        let format = XspFormat::from_tag(bytes[FORMAT_OFFSET])?;
        let mut n0 = [0u8; NONCE_LEN];
        n0.copy_from_slice(&bytes[N0_OFFSET..N0_OFFSET + NONCE_LEN]);
        let segment_size = LittleEndian::read_u32(&bytes[SEGMENT_SIZE_OFFSET..SEGMENT_SIZE_OFFSET + 4]);
        let total_size = LittleEndian::read_u64(&bytes[TOTAL_SIZE_OFFSET..TOTAL_SIZE_OFFSET + 8]);
        if segment_size == 0 {
            return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
                .into_err()
                .details("zero segment size"));
        }
        Ok(XspHeader {
            format,
            n0,
            segment_size,
            total_size,
        })
    }

    /// Number of segments the body is split into, including a final
    /// possibly-short segment.
    pub fn segment_count(&self) -> u64 {
        if self.total_size == 0 {
            return 0;
        }
        let size = self.segment_size as u64;
        (self.total_size + size - 1) / size
    }

    /// Plaintext length of segment `index`.
    pub fn plaintext_len_of(&self, index: u64) -> u64 {
        let size = self.segment_size as u64;
        let start = index * size;
        (self.total_size - start).min(size)
    }

    /// Byte offset in the encoded object where segment `index`'s ciphertext
    /// (including its trailing AEAD tag) begins.
    pub fn segment_offset(&self, index: u64) -> usize {
        HEADER_LEN + (index as usize) * (self.segment_size as usize + TAG_LEN)
    }
}

//! Segment framing.
//!
//! A segment blob is a fixed header followed by a raw slice of the database's
//! write-ahead log. The header carries the log offset the slice starts at and
//! a CRC32 of the payload, so replay can verify both continuity and
//! integrity before a single byte reaches the restored file.

use crate::ReplicaError;

/// Magic bytes identifying a Selkie segment blob.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SSEG";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// magic + version + offset + payload length + crc32
pub const SEGMENT_HEADER_LEN: usize = 4 + 2 + 8 + 4 + 4;

/// A decoded segment: a byte range of one generation's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Log offset of the first payload byte.
    pub offset: u64,
    /// The raw log bytes.
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(offset: u64, payload: Vec<u8>) -> Self {
        Self { offset, payload }
    }

    /// Serialize to the wire framing.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEGMENT_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&SEGMENT_MAGIC);
        buf.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc32(&self.payload).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse and verify a segment blob. `key` only feeds error messages.
    pub fn decode(key: &str, buf: &[u8]) -> Result<Self, ReplicaError> {
        let corrupt = |reason: &str| ReplicaError::CorruptSegment {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if buf.len() < SEGMENT_HEADER_LEN {
            return Err(corrupt("truncated header"));
        }
        if buf[0..4] != SEGMENT_MAGIC {
            return Err(corrupt("bad magic"));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != SEGMENT_VERSION {
            return Err(corrupt("unsupported version"));
        }

        let offset = u64::from_le_bytes(buf[6..14].try_into().expect("fixed slice"));
        let len = u32::from_le_bytes(buf[14..18].try_into().expect("fixed slice")) as usize;
        let crc = u32::from_le_bytes(buf[18..22].try_into().expect("fixed slice"));

        let payload = &buf[SEGMENT_HEADER_LEN..];
        if payload.len() != len {
            return Err(corrupt("payload length mismatch"));
        }
        if crc32(payload) != crc {
            return Err(corrupt("checksum mismatch"));
        }

        Ok(Self {
            offset,
            payload: payload.to_vec(),
        })
    }
}

/// CRC32 (IEEE) over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        // Standard CRC32 check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn encode_decode_round_trip() {
        let segment = Segment::new(4096, vec![7u8; 128]);
        let decoded = Segment::decode("k", &segment.encode()).unwrap();
        assert_eq!(decoded, segment);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut buf = Segment::new(0, vec![1, 2, 3]).encode();
        buf[0] = b'X';
        let err = Segment::decode("k", &buf).unwrap_err();
        assert!(matches!(err, ReplicaError::CorruptSegment { .. }));
    }

    #[test]
    fn decode_rejects_flipped_payload_bit() {
        let mut buf = Segment::new(0, vec![1, 2, 3, 4]).encode();
        let last = buf.len() - 1;
        buf[last] ^= 0x01;
        let err = Segment::decode("k", &buf).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn decode_rejects_truncation() {
        let buf = Segment::new(0, vec![9; 64]).encode();
        assert!(Segment::decode("k", &buf[..buf.len() - 1]).is_err());
        assert!(Segment::decode("k", &buf[..10]).is_err());
    }

    #[test]
    fn empty_payload_is_valid() {
        let segment = Segment::new(32, Vec::new());
        let decoded = Segment::decode("k", &segment.encode()).unwrap();
        assert_eq!(decoded.payload, Vec::<u8>::new());
        assert_eq!(decoded.offset, 32);
    }
}

//! Reading the SQLite write-ahead log as an append-only byte stream.
//!
//! The WAL file starts with a 32-byte header whose two salt words identify a
//! log epoch: a checkpoint that resets the log rewrites the salts. Frames
//! after the header are `24 + page_size` bytes each and carry their own
//! cumulative checksums, so shipping raw frame bytes preserves SQLite's own
//! integrity chain. We only ever read up to the last complete frame — the
//! writer may be mid-append past that point.

use crate::ReplicaError;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub(crate) const WAL_HEADER_LEN: u64 = 32;
pub(crate) const WAL_FRAME_HEADER_LEN: u64 = 24;

const WAL_MAGIC_LE: u32 = 0x377f_0682;
const WAL_MAGIC_BE: u32 = 0x377f_0683;

/// Parsed WAL file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WalHeader {
    pub page_size: u32,
    pub salt: (u32, u32),
}

impl WalHeader {
    /// Parse the 32-byte header. Returns `None` for anything that is not a
    /// plausible WAL header (e.g. a zero-truncated file).
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < WAL_HEADER_LEN as usize {
            return None;
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().ok()?);
        if magic != WAL_MAGIC_LE && magic != WAL_MAGIC_BE {
            return None;
        }
        let page_size = u32::from_be_bytes(buf[8..12].try_into().ok()?);
        if !(512..=65536).contains(&page_size) || !page_size.is_power_of_two() {
            return None;
        }
        let salt1 = u32::from_be_bytes(buf[16..20].try_into().ok()?);
        let salt2 = u32::from_be_bytes(buf[20..24].try_into().ok()?);
        Some(Self {
            page_size,
            salt: (salt1, salt2),
        })
    }

    /// Length of the log up to the last complete frame, given the raw file
    /// length. Replicable bytes never include a torn tail frame.
    pub fn committed_len(&self, file_len: u64) -> u64 {
        if file_len <= WAL_HEADER_LEN {
            return file_len.min(WAL_HEADER_LEN);
        }
        let frame_len = WAL_FRAME_HEADER_LEN + u64::from(self.page_size);
        let frames = (file_len - WAL_HEADER_LEN) / frame_len;
        WAL_HEADER_LEN + frames * frame_len
    }
}

/// What the log file looks like right now.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WalStatus {
    /// Parsed header, `None` when the file is absent or too short.
    pub header: Option<WalHeader>,
    /// Raw file length in bytes (0 when absent).
    pub len: u64,
}

/// Inspect the WAL file without holding it open.
pub(crate) async fn read_status(wal_path: &Path) -> Result<WalStatus, ReplicaError> {
    let mut file = match File::open(wal_path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(WalStatus {
                header: None,
                len: 0,
            })
        }
        Err(e) => return Err(ReplicaError::io(wal_path, e)),
    };

    let len = file
        .metadata()
        .await
        .map_err(|e| ReplicaError::io(wal_path, e))?
        .len();

    let mut buf = [0u8; WAL_HEADER_LEN as usize];
    let header = if len >= WAL_HEADER_LEN {
        file.read_exact(&mut buf)
            .await
            .map_err(|e| ReplicaError::io(wal_path, e))?;
        WalHeader::parse(&buf)
    } else {
        None
    };

    Ok(WalStatus { header, len })
}

/// Read `[offset, offset + len)` out of the log file.
pub(crate) async fn read_range(
    wal_path: &Path,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>, ReplicaError> {
    let mut file = File::open(wal_path)
        .await
        .map_err(|e| ReplicaError::io(wal_path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| ReplicaError::io(wal_path, e))?;

    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)
        .await
        .map_err(|e| ReplicaError::io(wal_path, e))?;
    Ok(buf)
}

/// Build a synthetic but structurally valid WAL file for tests.
#[cfg(test)]
pub(crate) fn fake_wal(page_size: u32, salt: (u32, u32), frames: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&WAL_MAGIC_BE.to_be_bytes());
    buf.extend_from_slice(&3007000u32.to_be_bytes());
    buf.extend_from_slice(&page_size.to_be_bytes());
    buf.extend_from_slice(&1u32.to_be_bytes()); // checkpoint sequence
    buf.extend_from_slice(&salt.0.to_be_bytes());
    buf.extend_from_slice(&salt.1.to_be_bytes());
    buf.extend_from_slice(&[0u8; 8]); // header checksum, unchecked here

    for frame in 0..frames {
        let mut header = [0u8; WAL_FRAME_HEADER_LEN as usize];
        header[0..4].copy_from_slice(&(frame as u32 + 1).to_be_bytes());
        buf.extend_from_slice(&header);
        buf.extend(std::iter::repeat(frame as u8).take(page_size as usize));
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_header() {
        let wal = fake_wal(4096, (0xAABB, 0xCCDD), 0);
        let header = WalHeader::parse(&wal).unwrap();
        assert_eq!(header.page_size, 4096);
        assert_eq!(header.salt, (0xAABB, 0xCCDD));
    }

    #[test]
    fn parse_rejects_non_wal_bytes() {
        assert!(WalHeader::parse(&[0u8; 32]).is_none());
        assert!(WalHeader::parse(b"SQLite format 3\0").is_none());
    }

    #[test]
    fn committed_len_excludes_torn_tail() {
        let header = WalHeader {
            page_size: 4096,
            salt: (1, 2),
        };
        let frame = WAL_FRAME_HEADER_LEN + 4096;

        assert_eq!(header.committed_len(32), 32);
        assert_eq!(header.committed_len(32 + frame), 32 + frame);
        // 100 bytes of a partially-written second frame don't count.
        assert_eq!(header.committed_len(32 + frame + 100), 32 + frame);
    }

    #[tokio::test]
    async fn status_of_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let status = read_status(&dir.path().join("absent-wal")).await.unwrap();
        assert!(status.header.is_none());
        assert_eq!(status.len, 0);
    }

    #[tokio::test]
    async fn status_and_range_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test-wal");
        let wal = fake_wal(512, (7, 9), 3);
        tokio::fs::write(&path, &wal).await.unwrap();

        let status = read_status(&path).await.unwrap();
        let header = status.header.unwrap();
        assert_eq!(header.salt, (7, 9));
        assert_eq!(status.len, wal.len() as u64);
        assert_eq!(header.committed_len(status.len), wal.len() as u64);

        let tail = read_range(&path, 32, status.len - 32).await.unwrap();
        assert_eq!(tail, wal[32..]);
    }
}

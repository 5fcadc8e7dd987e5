//! Header/Footer record (§3.4, §4.4): a versioned, checksummed metadata
//! block written identically at four file offsets (header_a, footer_a,
//! header_b, footer_b).

use crate::clock::Clock;
use crate::constants::{HEADER_MAJOR_VERSION, HEADER_MINOR_VERSION, HEADER_RECORD_SIZE, MAGIC_VOLUME};
use crate::error::{CacheError, Result};

const MAGIC_OFF: usize = 0;
const CREATE_TIME_OFF: usize = MAGIC_OFF + 4;
const WRITE_POS_OFF: usize = CREATE_TIME_OFF + 8;
const MAJOR_OFF: usize = WRITE_POS_OFF + 8;
const MINOR_OFF: usize = MAJOR_OFF + 4;
const SYNC_SERIAL_OFF: usize = MINOR_OFF + 4;
const DIRS_CHECKSUM_OFF: usize = SYNC_SERIAL_OFF + 8;
const CHECKSUM_OFF: usize = DIRS_CHECKSUM_OFF + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub create_unix_time: i64,
    pub write_pos: u64,
    pub major_version: u32,
    pub minor_version: u32,
    pub sync_serial: u64,
    pub dirs_checksum: u32,
    pub checksum: u32,
}

impl Header {
    /// A freshly initialized header for an empty volume, per §4.3.2 step 3.
    pub fn fresh(clock: &impl Clock, write_pos: u64) -> Self {
        let mut header = Self {
            magic: MAGIC_VOLUME,
            create_unix_time: clock.unix_time(),
            write_pos,
            major_version: HEADER_MAJOR_VERSION,
            minor_version: HEADER_MINOR_VERSION,
            sync_serial: 0,
            dirs_checksum: 0,
            checksum: 0,
        };
        header.checksum = header.compute_checksum();
        header
    }

    /// §4.3.4 step 1: stamp the header for the next flush, incrementing
    /// `sync_serial` and recomputing the record checksum.
    pub fn stamp(&mut self, write_pos: u64, dirs_checksum: u32) {
        self.write_pos = write_pos;
        self.sync_serial = self.sync_serial.wrapping_add(1);
        self.dirs_checksum = dirs_checksum;
        self.checksum = self.compute_checksum();
    }

    /// §3.4: the checksum is computed in a fixed textual encoding of every
    /// other field, then CRC32'd.
    fn checksum_text(&self) -> String {
        format!(
            "{}|{}|{}|{}.{}|{}|{}",
            self.magic,
            self.create_unix_time,
            self.write_pos,
            self.major_version,
            self.minor_version,
            self.sync_serial,
            self.dirs_checksum,
        )
    }

    fn compute_checksum(&self) -> u32 {
        crc32fast::hash(self.checksum_text().as_bytes())
    }

    pub fn marshal(&self) -> [u8; HEADER_RECORD_SIZE as usize] {
        let mut out = [0u8; HEADER_RECORD_SIZE as usize];
        out[MAGIC_OFF..MAGIC_OFF + 4].copy_from_slice(&self.magic.to_be_bytes());
        out[CREATE_TIME_OFF..CREATE_TIME_OFF + 8]
            .copy_from_slice(&self.create_unix_time.to_be_bytes());
        out[WRITE_POS_OFF..WRITE_POS_OFF + 8].copy_from_slice(&self.write_pos.to_be_bytes());
        out[MAJOR_OFF..MAJOR_OFF + 4].copy_from_slice(&self.major_version.to_be_bytes());
        out[MINOR_OFF..MINOR_OFF + 4].copy_from_slice(&self.minor_version.to_be_bytes());
        out[SYNC_SERIAL_OFF..SYNC_SERIAL_OFF + 8].copy_from_slice(&self.sync_serial.to_be_bytes());
        out[DIRS_CHECKSUM_OFF..DIRS_CHECKSUM_OFF + 4]
            .copy_from_slice(&self.dirs_checksum.to_be_bytes());
        out[CHECKSUM_OFF..CHECKSUM_OFF + 4].copy_from_slice(&self.checksum.to_be_bytes());
        out
    }

    /// §4.4 unmarshal: reject on wrong magic or checksum mismatch.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self> {
        if (bytes.len() as u64) < HEADER_RECORD_SIZE {
            return Err(CacheError::VolFileCorrupted { reason: "header record truncated".into() });
        }
        let header = Self {
            magic: u32::from_be_bytes(bytes[MAGIC_OFF..MAGIC_OFF + 4].try_into().unwrap()),
            create_unix_time: i64::from_be_bytes(
                bytes[CREATE_TIME_OFF..CREATE_TIME_OFF + 8].try_into().unwrap(),
            ),
            write_pos: u64::from_be_bytes(bytes[WRITE_POS_OFF..WRITE_POS_OFF + 8].try_into().unwrap()),
            major_version: u32::from_be_bytes(bytes[MAJOR_OFF..MAJOR_OFF + 4].try_into().unwrap()),
            minor_version: u32::from_be_bytes(bytes[MINOR_OFF..MINOR_OFF + 4].try_into().unwrap()),
            sync_serial: u64::from_be_bytes(
                bytes[SYNC_SERIAL_OFF..SYNC_SERIAL_OFF + 8].try_into().unwrap(),
            ),
            dirs_checksum: u32::from_be_bytes(
                bytes[DIRS_CHECKSUM_OFF..DIRS_CHECKSUM_OFF + 4].try_into().unwrap(),
            ),
            checksum: u32::from_be_bytes(bytes[CHECKSUM_OFF..CHECKSUM_OFF + 4].try_into().unwrap()),
        };

        if header.magic != MAGIC_VOLUME {
            return Err(CacheError::VolFileCorrupted {
                reason: format!("bad magic: {:#x}", header.magic),
            });
        }
        if header.checksum != header.compute_checksum() {
            return Err(CacheError::VolFileCorrupted { reason: "header checksum mismatch".into() });
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[test]
    fn marshal_unmarshal_round_trips() {
        let mut header = Header::fresh(&FixedClock(1_700_000_000), 4096);
        header.stamp(8192, 0xdead_beef);
        let back = Header::unmarshal(&header.marshal()).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let header = Header::fresh(&FixedClock(0), 0);
        let mut bytes = header.marshal();
        bytes[0] ^= 0xff;
        assert!(Header::unmarshal(&bytes).is_err());
    }

    #[test]
    fn mutated_field_without_recomputed_checksum_is_rejected() {
        let header = Header::fresh(&FixedClock(0), 4096);
        let mut bytes = header.marshal();
        bytes[WRITE_POS_OFF] ^= 0xff;
        assert!(Header::unmarshal(&bytes).is_err());
    }
}

//! Chunk codec (§3.5, §4.1): a self-describing, CRC-protected (key, value)
//! record with a fixed 8 KiB header. The header is oversized specifically
//! so that scanning never needs a separate length-prefix read: the key
//! field alone reserves 4 KiB, and the remainder is zero padding up to
//! `CHUNK_HEADER_SIZE`.

use crate::constants::{CHUNK_DATA_MAX_SIZE, CHUNK_HEADER_SIZE, CHUNK_KEY_MAX_SIZE, MAGIC_CHUNK};
use crate::error::{CacheError, Result};
use crate::io::RandomAccess;

const MAGIC_LEN: usize = 4;
const CHECKSUM_LEN: usize = 4;
const KEY_OFF: usize = MAGIC_LEN + CHECKSUM_LEN;
const DATA_LENGTH_OFF: usize = KEY_OFF + CHUNK_KEY_MAX_SIZE;
const HEADER_SIZE_OFF: usize = DATA_LENGTH_OFF + 4;
const HEADER_CHECKSUM_OFF: usize = HEADER_SIZE_OFF + 4;

#[derive(Clone, Copy, Debug)]
struct ChunkHeader {
    magic: u32,
    data_checksum: u32,
    key_len: usize,
    key_buf: [u8; CHUNK_KEY_MAX_SIZE],
    data_length: u32,
    header_size: u32,
    header_checksum: u32,
}

impl ChunkHeader {
    /// §3.5a: CRC32 over a canonical text rendering of every header field
    /// except the key bytes (those are read back verbatim and are far
    /// larger than is useful to re-hash on every open).
    fn checksum_text(&self) -> String {
        format!("{}|{}|{}|{}", self.magic, self.data_checksum, self.data_length, self.header_size)
    }

    fn compute_header_checksum(&self) -> u32 {
        crc32fast::hash(self.checksum_text().as_bytes())
    }
}

/// An on-disk (key, value) record: fixed 8 KiB header plus `data_length`
/// bytes of payload.
#[derive(Clone, Debug)]
pub struct Chunk {
    header: ChunkHeader,
    data: Vec<u8>,
}

impl Chunk {
    /// §4.1 set: validates sizes, computes both CRCs.
    pub fn set(key: &[u8], data: &[u8]) -> Result<Self> {
        if key.len() > CHUNK_KEY_MAX_SIZE {
            return Err(CacheError::KeyTooLarge { len: key.len(), max: CHUNK_KEY_MAX_SIZE });
        }
        if data.len() > CHUNK_DATA_MAX_SIZE {
            return Err(CacheError::DataTooLarge { len: data.len(), max: CHUNK_DATA_MAX_SIZE });
        }

        let mut key_buf = [0u8; CHUNK_KEY_MAX_SIZE];
        key_buf[..key.len()].copy_from_slice(key);

        let mut header = ChunkHeader {
            magic: MAGIC_CHUNK,
            data_checksum: crc32fast::hash(data),
            key_len: key.len(),
            key_buf,
            data_length: data.len() as u32,
            header_size: CHUNK_HEADER_SIZE as u32,
            header_checksum: 0,
        };
        header.header_checksum = header.compute_header_checksum();

        Ok(Self { header, data: data.to_vec() })
    }

    /// §4.1 marshal: `[header(8192, zero-padded)][data]`.
    pub fn marshal(&self) -> Vec<u8> {
        let total = CHUNK_HEADER_SIZE as usize + self.data.len();
        let mut out = vec![0u8; total];
        out[0..4].copy_from_slice(&self.header.magic.to_be_bytes());
        out[4..8].copy_from_slice(&self.header.data_checksum.to_be_bytes());
        out[KEY_OFF..KEY_OFF + CHUNK_KEY_MAX_SIZE].copy_from_slice(&self.header.key_buf);
        out[DATA_LENGTH_OFF..DATA_LENGTH_OFF + 4]
            .copy_from_slice(&self.header.data_length.to_be_bytes());
        out[HEADER_SIZE_OFF..HEADER_SIZE_OFF + 4]
            .copy_from_slice(&self.header.header_size.to_be_bytes());
        out[HEADER_CHECKSUM_OFF..HEADER_CHECKSUM_OFF + 4]
            .copy_from_slice(&self.header.header_checksum.to_be_bytes());
        out[CHUNK_HEADER_SIZE as usize..].copy_from_slice(&self.data);
        out
    }

    /// §4.1 unmarshal: read the fixed header, then `data_length` bytes of
    /// payload, then run `verify`.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHUNK_HEADER_SIZE as usize {
            return Err(CacheError::ChunkVerifyFailed { reason: "buffer shorter than fixed header" });
        }

        let magic = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let data_checksum = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let mut key_buf = [0u8; CHUNK_KEY_MAX_SIZE];
        key_buf.copy_from_slice(&bytes[KEY_OFF..KEY_OFF + CHUNK_KEY_MAX_SIZE]);
        let key_len = key_buf.iter().position(|&b| b == 0).unwrap_or(CHUNK_KEY_MAX_SIZE);
        let data_length =
            u32::from_be_bytes(bytes[DATA_LENGTH_OFF..DATA_LENGTH_OFF + 4].try_into().unwrap());
        let header_size =
            u32::from_be_bytes(bytes[HEADER_SIZE_OFF..HEADER_SIZE_OFF + 4].try_into().unwrap());
        let header_checksum = u32::from_be_bytes(
            bytes[HEADER_CHECKSUM_OFF..HEADER_CHECKSUM_OFF + 4].try_into().unwrap(),
        );

        let header =
            ChunkHeader { magic, data_checksum, key_len, key_buf, data_length, header_size, header_checksum };

        let data_start = CHUNK_HEADER_SIZE as usize;
        let data_end = data_start + data_length as usize;
        if bytes.len() < data_end {
            return Err(CacheError::ChunkVerifyFailed { reason: "buffer shorter than declared data_length" });
        }

        let chunk = Self { header, data: bytes[data_start..data_end].to_vec() };
        chunk.verify()?;
        Ok(chunk)
    }

    /// §4.1 verify: magic, header checksum, declared length, payload CRC.
    pub fn verify(&self) -> Result<()> {
        if self.header.magic != MAGIC_CHUNK {
            return Err(CacheError::ChunkVerifyFailed { reason: "bad magic" });
        }
        if self.header.header_checksum != self.header.compute_header_checksum() {
            return Err(CacheError::ChunkVerifyFailed { reason: "header checksum mismatch" });
        }
        if self.data.len() != self.header.data_length as usize {
            return Err(CacheError::ChunkVerifyFailed { reason: "data length mismatch" });
        }
        if crc32fast::hash(&self.data) != self.header.data_checksum {
            return Err(CacheError::ChunkVerifyFailed { reason: "data checksum mismatch" });
        }
        Ok(())
    }

    /// §4.1 read_at: read `declared_size` bytes then unmarshal. Callers pass
    /// the Dir entry's approximate size, which already covers the fixed
    /// 8192-byte header plus payload (see `Volume::get`).
    pub fn read_at<R: RandomAccess>(reader: &R, offset: u64, declared_size: u64) -> Result<Self> {
        let mut buf = vec![0u8; declared_size as usize];
        if declared_size < CHUNK_HEADER_SIZE {
            return Err(CacheError::ChunkVerifyFailed { reason: "declared size smaller than fixed header" });
        }
        reader.read_exact_at(&mut buf, offset)?;
        Self::unmarshal(&buf)
    }

    /// §4.1 write_at: marshal and write at `offset`.
    pub fn write_at<W: RandomAccess>(&self, writer: &W, offset: u64) -> Result<()> {
        let bytes = self.marshal();
        writer.write_all_at(&bytes, offset)?;
        Ok(())
    }

    /// Right-trims the stored key of its NUL padding.
    pub fn key(&self) -> &[u8] {
        &self.header.key_buf[..self.header.key_len]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

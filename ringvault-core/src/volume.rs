//! Volume: file layout, offset arithmetic, the circular write cursor,
//! metadata serialize/restore, the periodic flush loop, and the public
//! `get`/`set` surface (§4.3).

use crate::chunk::Chunk;
use crate::clock::{Clock, SystemClock};
use crate::constants::{CHUNK_HEADER_SIZE, CHUNK_KEY_MAX_SIZE, DEFAULT_FLUSH_INTERVAL_SECS, DIR_ENTRY_SIZE, HEADER_RECORD_SIZE};
use crate::digest::{KeyDigest, Md5Digest};
use crate::dir_manager::{DirManager, Segmentation};
use crate::error::{CacheError, Result};
use crate::header::Header;
use crate::io::RandomAccess;
use serde::Serialize;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Caller-supplied configuration for `Volume::open`.
pub struct VolumeOptions {
    pub file: Arc<dyn RandomAccess>,
    pub file_size: u64,
    pub chunk_avg_size: u64,
    pub flush_interval: Duration,
}

impl VolumeOptions {
    pub fn new(file: Arc<dyn RandomAccess>, file_size: u64, chunk_avg_size: u64) -> Self {
        Self {
            file,
            file_size,
            chunk_avg_size,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
        }
    }
}

/// §4.3.1: byte offsets of every region in the volume file, derived once
/// from `file_size` and the directory's realized `total_entries`.
#[derive(Clone, Copy, Debug)]
struct Offsets {
    header_a: u64,
    footer_a: u64,
    header_b: u64,
    footer_b: u64,
    dir_a: u64,
    dir_b: u64,
    data_offset: u64,
    file_size: u64,
}

impl Offsets {
    fn compute(file_size: u64, total_entries: u64) -> Self {
        let h = HEADER_RECORD_SIZE;
        let dirs_bytes = total_entries * DIR_ENTRY_SIZE;
        let data_offset = 2 * (2 * h + dirs_bytes);
        let header_a = 0;
        let footer_a = h + dirs_bytes;
        let header_b = footer_a + h;
        let footer_b = header_b + h + dirs_bytes;
        let dir_a = header_a + h;
        let dir_b = header_b + h;
        Self {
            header_a,
            footer_a,
            header_b,
            footer_b,
            dir_a,
            dir_b,
            data_offset,
            file_size,
        }
    }
}

/// Per-segment `(used, free)` counts reported by `Volume::stats()`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SegmentStat {
    pub used: u64,
    pub free: u64,
}

/// A snapshot of volume health, the library-level counterpart of the
/// original project's verify/repair reports, exposed to the CLI's `stat`
/// subcommand.
#[derive(Clone, Debug, Serialize)]
pub struct VolumeStats {
    pub corrupted: bool,
    pub sync_serial: u64,
    pub write_pos: u64,
    pub data_offset: u64,
    pub file_size: u64,
    pub segments: Vec<SegmentStat>,
}

/// §4.3.3: read and verify one metadata region (header + directory bytes).
fn restore_region(
    file: &dyn RandomAccess,
    header_off: u64,
    dir_off: u64,
    seg: Segmentation,
) -> Result<(Header, DirManager)> {
    let mut hbuf = vec![0u8; HEADER_RECORD_SIZE as usize];
    file.read_exact_at(&mut hbuf, header_off)?;
    let header = Header::unmarshal(&hbuf)?;

    let dirs_len = seg.total_entries * DIR_ENTRY_SIZE;
    let mut dbuf = vec![0u8; dirs_len as usize];
    file.read_exact_at(&mut dbuf, dir_off)?;
    let crc = crc32fast::hash(&dbuf);
    if crc != header.dirs_checksum {
        return Err(CacheError::VolFileCorrupted { reason: "directory checksum mismatch".into() });
    }

    let entries = DirManager::entries_from_bytes(seg, &dbuf)
        .ok_or_else(|| CacheError::VolFileCorrupted { reason: "directory byte length mismatch".into() })?;
    Ok((header, DirManager::from_entries(seg, entries)))
}

/// §4.3.3: try region A, then fall back to region B (§9 open question,
/// resolved in favor of mirroring writes into both and using B as a
/// restore fallback — see DESIGN.md).
fn restore_meta(file: &dyn RandomAccess, offsets: &Offsets, seg: Segmentation) -> Result<(Header, DirManager)> {
    match restore_region(file, offsets.header_a, offsets.dir_a, seg) {
        Ok(result) => Ok(result),
        Err(a_err) => restore_region(file, offsets.header_b, offsets.dir_b, seg).map_err(|_| a_err),
    }
}

struct VolumeInner<D, C> {
    file: Arc<dyn RandomAccess>,
    offsets: Offsets,
    dir: DirManager,
    write_pos: Mutex<u64>,
    header: Mutex<Header>,
    digest: D,
    #[allow(dead_code)]
    clock: C,
    chunk_avg_size: u64,
}

impl<D: KeyDigest, C: Clock> VolumeInner<D, C> {
    /// §4.3.4: stamp the header, mirror header+footer and directory bytes
    /// into both metadata regions.
    fn flush_meta(&self) -> Result<()> {
        let dirs_bytes = self.dir.to_bytes();
        let dirs_checksum = crc32fast::hash(&dirs_bytes);
        let write_pos = *self.write_pos.lock().unwrap();

        let header_bytes = {
            let mut header = self.header.lock().unwrap();
            header.stamp(write_pos, dirs_checksum);
            header.marshal()
        };

        self.file.write_all_at(&header_bytes, self.offsets.header_a)?;
        self.file.write_all_at(&header_bytes, self.offsets.footer_a)?;
        self.file.write_all_at(&header_bytes, self.offsets.header_b)?;
        self.file.write_all_at(&header_bytes, self.offsets.footer_b)?;
        self.file.write_all_at(&dirs_bytes, self.offsets.dir_a)?;
        self.file.write_all_at(&dirs_bytes, self.offsets.dir_b)?;
        Ok(())
    }

    /// §4.3.5
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > CHUNK_KEY_MAX_SIZE {
            return Err(CacheError::KeyTooLarge { len: key.len(), max: CHUNK_KEY_MAX_SIZE });
        }
        if value.len() as u64 > self.chunk_avg_size {
            return Err(CacheError::DataTooLarge { len: value.len(), max: self.chunk_avg_size as usize });
        }

        let chunk = Chunk::set(key, value)?;
        let binary_length = CHUNK_HEADER_SIZE + value.len() as u64;
        // Even a chunk starting exactly at `data_offset` must still fit
        // before `file_size`; a misconfigured `chunk_avg_size` could
        // otherwise push `write_pos` past the end of the file on wrap
        // (invariant #10: write_pos must always land within the data
        // region).
        if self.offsets.data_offset + binary_length > self.offsets.file_size {
            return Err(CacheError::DataTooLarge { len: value.len(), max: self.chunk_avg_size as usize });
        }

        let write_offset = {
            let mut wp = self.write_pos.lock().unwrap();
            if *wp + binary_length > self.offsets.file_size {
                *wp = self.offsets.data_offset;
            }
            let offset = *wp;
            *wp += binary_length;
            offset
        };

        self.dir.set(key, write_offset, binary_length, &self.digest);
        chunk.write_at(&*self.file, write_offset)?;
        Ok(())
    }

    /// §4.3.6
    fn get(&self, key: &[u8]) -> Result<(bool, Vec<u8>)> {
        if key.len() > CHUNK_KEY_MAX_SIZE {
            return Err(CacheError::KeyTooLarge { len: key.len(), max: CHUNK_KEY_MAX_SIZE });
        }

        let Some((_, entry)) = self.dir.get(key, &self.digest) else {
            return Ok((false, Vec::new()));
        };
        let Some(offset) = entry.offset() else {
            return Ok((false, Vec::new()));
        };

        // The (big, size) class rounds up to the nearest representable
        // bucket, which can overshoot the actual chunk length; never let
        // that push the read past the end of the data region.
        let read_len = entry.approx_size().min(self.offsets.file_size.saturating_sub(offset));

        match Chunk::read_at(&*self.file, offset, read_len) {
            Ok(chunk) => Ok((true, chunk.into_data())),
            // The circular writer may have overwritten this region since
            // the directory entry was recorded; the CRC catches the torn
            // write and this is reported as a plain miss (§4.3.6, §7).
            Err(CacheError::ChunkVerifyFailed { .. }) => Ok((false, Vec::new())),
            Err(e) => Err(e),
        }
    }

    fn stats(&self, corrupted: bool) -> VolumeStats {
        let segments =
            self.dir.segment_stats().into_iter().map(|(used, free)| SegmentStat { used, free }).collect();
        let header = self.header.lock().unwrap();
        VolumeStats {
            corrupted,
            sync_serial: header.sync_serial,
            write_pos: *self.write_pos.lock().unwrap(),
            data_offset: self.offsets.data_offset,
            file_size: self.offsets.file_size,
            segments,
        }
    }
}

struct FlushHandle {
    stop_tx: mpsc::Sender<()>,
    join: thread::JoinHandle<()>,
}

/// A single backing file comprising two redundant metadata regions and one
/// circular data region (§3.3). `D` and `C` are the key-digest and clock
/// collaborators (§9: "no dynamic dispatch required" — both are
/// monomorphized generics, not trait objects), defaulting to the
/// production `Md5Digest`/`SystemClock` pair; tests substitute `FixedClock`
/// to pin down header timestamps.
pub struct Volume<D = Md5Digest, C = SystemClock> {
    inner: Arc<VolumeInner<D, C>>,
    corrupted: bool,
    flush: Mutex<Option<FlushHandle>>,
}

impl Volume<Md5Digest, SystemClock> {
    /// §4.3.2, §6.3: `Volume::open(options) -> (volume, corrupted_flag)`.
    pub fn open(options: VolumeOptions) -> Result<(Self, bool)> {
        Self::open_with(options, Md5Digest, SystemClock)
    }
}

impl<D, C> Volume<D, C>
where
    D: KeyDigest + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// As `open`, but with an explicit digest/clock collaborator — used by
    /// tests that need a `FixedClock` to pin down the header timestamp.
    pub fn open_with(options: VolumeOptions, digest: D, clock: C) -> Result<(Self, bool)> {
        if options.file_size == 0 || options.chunk_avg_size == 0 {
            return Err(CacheError::InvalidConfig { reason: "file_size and chunk_avg_size must be nonzero" });
        }
        let h = HEADER_RECORD_SIZE;
        if options.file_size <= 4 * h {
            return Err(CacheError::InvalidConfig {
                reason: "file_size too small to hold four metadata records",
            });
        }

        let desired_entries = (options.file_size - 4 * h) / (options.chunk_avg_size + 2 * DIR_ENTRY_SIZE);
        if desired_entries == 0 {
            return Err(CacheError::InvalidConfig {
                reason: "file_size too small for chunk_avg_size to index any entries",
            });
        }

        let seg = Segmentation::compute(desired_entries);
        let offsets = Offsets::compute(options.file_size, seg.total_entries);
        if offsets.data_offset >= options.file_size {
            return Err(CacheError::InvalidConfig { reason: "metadata regions do not fit within file_size" });
        }
        let actual_len = options.file.len()?;
        if actual_len < options.file_size {
            return Err(CacheError::InvalidConfig {
                reason: "backing file is shorter than the configured file_size",
            });
        }

        let (corrupted, header, dir) = match restore_meta(&*options.file, &offsets, seg) {
            Ok((header, dir)) => (false, header, dir),
            Err(e) => {
                log::warn!("volume metadata restore failed, falling back to empty metadata: {e}");
                (true, Header::fresh(&clock, offsets.data_offset), DirManager::init_empty_from_segmentation(seg))
            }
        };

        let inner = Arc::new(VolumeInner {
            file: options.file,
            offsets,
            dir,
            // §4.3.2 step 4: reset regardless of what restore_meta found —
            // a reopened volume always resumes writing at the start of the
            // data region under the single-writer convention.
            write_pos: Mutex::new(offsets.data_offset),
            header: Mutex::new(header),
            digest,
            clock,
            chunk_avg_size: options.chunk_avg_size,
        });

        let (stop_tx, stop_rx) = mpsc::channel();
        let flush_inner = Arc::clone(&inner);
        let interval = options.flush_interval;
        let join = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Err(e) = flush_inner.flush_meta() {
                        log::warn!("periodic metadata flush failed: {e}");
                    }
                }
            }
        });

        let volume = Self { inner, corrupted, flush: Mutex::new(Some(FlushHandle { stop_tx, join })) };
        Ok((volume, corrupted))
    }

    /// §4.3.5: insert or overwrite `key`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.set(key, value)
    }

    /// §4.3.6: look up `key`.
    pub fn get(&self, key: &[u8]) -> Result<(bool, Vec<u8>)> {
        self.inner.get(key)
    }

    /// §4.3.4: force an out-of-band metadata flush (the periodic task also
    /// calls this on its own schedule).
    pub fn flush(&self) -> Result<()> {
        self.inner.flush_meta()
    }

    /// §4.3.7: a snapshot of per-segment occupancy and header state.
    pub fn stats(&self) -> VolumeStats {
        self.inner.stats(self.corrupted)
    }

    /// Whether metadata restore fell back to empty state on open.
    pub fn corrupted(&self) -> bool {
        self.corrupted
    }

    /// §5, §6.3: stop the flush task and release the handle. Waits for the
    /// task to acknowledge (join) before returning.
    pub fn close(self) -> Result<()> {
        if let Some(handle) = self.flush.lock().unwrap().take() {
            let _ = handle.stop_tx.send(());
            handle.join.join().map_err(|_| {
                CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "flush thread panicked"))
            })?;
        }
        Ok(())
    }
}

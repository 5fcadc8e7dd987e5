//! ringvault-core: a single-file, fixed-capacity key/value cache engine
//! inspired by Apache Traffic Server's cache volume format — a bit-packed
//! directory index, dual A/B metadata regions and a circular data region.

pub mod chunk;
pub mod clock;
pub mod constants;
pub mod digest;
pub mod dir;
pub mod dir_manager;
pub mod error;
pub mod io;
pub mod volume;

pub use clock::{Clock, FixedClock, SystemClock};
pub use digest::{KeyDigest, Md5Digest};
pub use error::{CacheError, Result};
pub use io::RandomAccess;
pub use volume::{SegmentStat, Volume, VolumeOptions, VolumeStats};

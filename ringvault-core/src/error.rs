use thiserror::Error;

/// Error surface for the cache engine. Mirrors the error-kinds table: most
/// variants are surfaced verbatim to callers, `ChunkVerifyFailed` is folded
/// into a cache miss by `Volume::get`, and `VolFileCorrupted` is swallowed
/// during `Volume::open` in favor of falling back to empty metadata.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("data too large: {len} bytes (max {max})")]
    DataTooLarge { len: usize, max: usize },

    #[error("chunk verify failed: {reason}")]
    ChunkVerifyFailed { reason: &'static str },

    #[error("volume file corrupted: {reason}")]
    VolFileCorrupted { reason: String },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

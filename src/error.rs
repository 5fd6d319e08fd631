use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Sm3Error {
    #[error("input too large: {attempted_bytes} bytes exceeds the {max_bytes} byte limit of the length field")]
    InputTooLarge { attempted_bytes: u64, max_bytes: u64 },

    #[error("hasher used after it was finalized")]
    MisuseAfterFinalize,

    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// Rejections raised before any hashing starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("nonce range {start}..{end} is empty")]
    EmptyRange { start: u64, end: u64 },

    #[error("nonce field at offset {offset} ({width} bytes) does not fit in a {template_len} byte template")]
    NonceOutOfBounds {
        offset: usize,
        width: usize,
        template_len: usize,
    },

    #[error("midstate length {0} is not a whole number of blocks")]
    UnalignedMidstate(u64),

    #[error("chunk size must be non-zero")]
    ZeroChunkSize,

    #[error("could not build thread pool: {0}")]
    ThreadPool(String),
}

impl From<rayon::ThreadPoolBuildError> for ConfigError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        ConfigError::ThreadPool(err.to_string())
    }
}

mod codec;
mod engine;
mod error;
mod hash;
mod search;
mod sm3;

pub use codec::{
    bytes_to_words_be, from_hex, reverse_word_if_little_endian, to_hex, words_to_bytes_be,
    BLOCK_LEN, DIGEST_LEN,
};
pub use engine::{search, ComputeEngine, RayonEngine, SearchConfig, SequentialEngine};
pub use error::{ConfigError, Sm3Error};
pub use hash::Hasher;
pub use search::{
    digest_value, Boundary, Candidate, ComparisonMode, SearchOutcome, SearchProgress, SearchTask,
    NONCE_WIDTH,
};
pub use sm3::{compress, hash, padded_block_count, Digest, Sm3, MAX_INPUT_BYTES};

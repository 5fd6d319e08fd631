// Proof-of-work style search: sweep a nonce field embedded in a message
// template until the SM3 digest of the assembled message falls under a
// boundary.
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use num_bigint::BigUint;

use crate::sm3::{Digest, MAX_INPUT_BYTES};
use crate::{ConfigError, Sm3, Sm3Error, DIGEST_LEN};

/// Nonces are written into the template as 8 big-endian bytes.
pub const NONCE_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ComparisonMode {
    #[default]
    LessThan,
    LessOrEqual,
}

/// A 256-bit unsigned threshold. Values that don't fit in 256 bits admit every
/// digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    limit: Option<Digest>,
}

impl Boundary {
    pub fn new(value: &BigUint) -> Self {
        if value.bits() > (DIGEST_LEN * 8) as u64 {
            return Self { limit: None };
        }
        let bytes = value.to_bytes_be();
        let mut limit = [0u8; DIGEST_LEN];
        limit[DIGEST_LEN - bytes.len()..].copy_from_slice(&bytes);
        Self { limit: Some(limit) }
    }

    pub fn from_digest(digest: Digest) -> Self {
        Self {
            limit: Some(digest),
        }
    }

    pub fn admits(&self, digest: &Digest, comparison: ComparisonMode) -> bool {
        // Byte arrays compare lexicographically, which for equal-length
        // big-endian values is numeric order.
        match (&self.limit, comparison) {
            (None, _) => true,
            (Some(limit), ComparisonMode::LessThan) => digest < limit,
            (Some(limit), ComparisonMode::LessOrEqual) => digest <= limit,
        }
    }
}

pub fn digest_value(digest: &Digest) -> BigUint {
    BigUint::from_bytes_be(digest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub nonce: u64,
    pub digest: Digest,
    pub matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { nonce: u64, digest: Digest },
    Exhausted,
}

impl SearchOutcome {
    pub fn nonce(&self) -> Option<u64> {
        match self {
            SearchOutcome::Found { nonce, .. } => Some(*nonce),
            SearchOutcome::Exhausted => None,
        }
    }
}

impl From<Option<Candidate>> for SearchOutcome {
    fn from(candidate: Option<Candidate>) -> Self {
        match candidate {
            Some(Candidate { nonce, digest, .. }) => SearchOutcome::Found { nonce, digest },
            None => SearchOutcome::Exhausted,
        }
    }
}

/// Caller-owned count of candidates hashed, shareable between workers.
#[derive(Debug, Default)]
pub struct SearchProgress {
    hashes: AtomicU64,
}

impl SearchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    pub(crate) fn record(&self, hashes: u64) {
        self.hashes.fetch_add(hashes, Ordering::Relaxed);
    }
}

/// A message template with a nonce field, the boundary its digests are tested
/// against, and the hasher state after the bytes preceding the nonce.
#[derive(Debug, Clone)]
pub struct SearchTask {
    midstate: Sm3,
    suffix: Vec<u8>,
    nonce_offset: usize,
    boundary: Boundary,
    comparison: ComparisonMode,
}

impl SearchTask {
    pub fn new(
        template: &[u8],
        nonce_offset: usize,
        boundary: Boundary,
        comparison: ComparisonMode,
    ) -> Result<Self, Sm3Error> {
        let nonce_end = nonce_offset
            .checked_add(NONCE_WIDTH)
            .filter(|&end| end <= template.len())
            .ok_or(ConfigError::NonceOutOfBounds {
                offset: nonce_offset,
                width: NONCE_WIDTH,
                template_len: template.len(),
            })?;
        if template.len() as u64 > MAX_INPUT_BYTES {
            return Err(Sm3Error::InputTooLarge {
                attempted_bytes: template.len() as u64,
                max_bytes: MAX_INPUT_BYTES,
            });
        }

        let mut midstate = Sm3::new();
        midstate.update(&template[..nonce_offset])?;

        Ok(Self {
            midstate,
            suffix: template[nonce_end..].to_vec(),
            nonce_offset,
            boundary,
            comparison,
        })
    }

    pub fn nonce_offset(&self) -> usize {
        self.nonce_offset
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn comparison(&self) -> ComparisonMode {
        self.comparison
    }

    /// Hashes the template with `nonce` in place and tests it against the
    /// boundary. Independent of every other candidate.
    pub fn evaluate(&self, nonce: u64) -> Candidate {
        let mut hasher = self.midstate.clone();
        hasher.absorb(&nonce.to_be_bytes());
        hasher.absorb(&self.suffix);
        let digest = hasher.finish();
        Candidate {
            nonce,
            digest,
            matched: self.boundary.admits(&digest, self.comparison),
        }
    }

    /// Scans `nonces` in ascending order, stopping at the first match or when
    /// `cancel` is raised.
    pub fn scan(
        &self,
        nonces: Range<u64>,
        cancel: &AtomicBool,
        progress: &SearchProgress,
    ) -> Option<Candidate> {
        let mut hashes = 0;
        let mut found = None;
        for nonce in nonces {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let candidate = self.evaluate(nonce);
            hashes += 1;
            if candidate.matched {
                found = Some(candidate);
                break;
            }
        }
        progress.record(hashes);
        found
    }
}

pub(crate) fn validate_range(range: &Range<u64>) -> Result<(), ConfigError> {
    if range.start >= range.end {
        return Err(ConfigError::EmptyRange {
            start: range.start,
            end: range.end,
        });
    }
    Ok(())
}

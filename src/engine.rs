use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, trace};
use num_bigint::BigUint;
use rayon::prelude::*;

use crate::search::validate_range;
use crate::{
    Boundary, Candidate, ComparisonMode, ConfigError, SearchOutcome, SearchProgress, SearchTask,
    Sm3Error,
};

const DEFAULT_CHUNK_SIZE: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// Candidates handed to a worker at a time.
    pub chunk_size: u64,
    /// Size of a dedicated thread pool; `None` runs on rayon's global pool.
    pub threads: Option<usize>,
}

impl SearchConfig {
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            threads: None,
        }
    }
}

/// Somewhere to run a nonce search: any number of workers sharing a read-only
/// task and reporting into a caller-owned progress counter.
pub trait ComputeEngine {
    fn name(&self) -> &'static str;

    fn search(
        &self,
        task: &SearchTask,
        range: Range<u64>,
        progress: &SearchProgress,
    ) -> Result<SearchOutcome, Sm3Error>;
}

/// One worker walking the range in ascending order, so the first match is also
/// the lowest.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialEngine;

impl ComputeEngine for SequentialEngine {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn search(
        &self,
        task: &SearchTask,
        range: Range<u64>,
        progress: &SearchProgress,
    ) -> Result<SearchOutcome, Sm3Error> {
        validate_range(&range)?;
        debug!("{}: searching nonces {}..{}", self.name(), range.start, range.end);

        let outcome = SearchOutcome::from(task.scan(range, &AtomicBool::new(false), progress));
        log_outcome(self.name(), &outcome);
        Ok(outcome)
    }
}

/// Splits the range into `chunk_size` pieces scanned in parallel. The first
/// worker to find a match wins; it raises a flag the others check between
/// candidates, and no further chunks are handed out.
#[derive(Debug)]
pub struct RayonEngine {
    chunk_size: u64,
    pool: Option<rayon::ThreadPool>,
}

impl RayonEngine {
    pub fn new(config: &SearchConfig) -> Result<Self, Sm3Error> {
        if config.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize.into());
        }
        let pool = match config.threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(ConfigError::from)?,
            ),
            None => None,
        };
        Ok(Self {
            chunk_size: config.chunk_size,
            pool,
        })
    }

    /// Every matching candidate in `range`, lowest nonce first.
    pub fn find_all(
        &self,
        task: &SearchTask,
        range: Range<u64>,
        progress: &SearchProgress,
    ) -> Result<Vec<Candidate>, Sm3Error> {
        validate_range(&range)?;
        debug!("{}: collecting all matches in {}..{}", self.name(), range.start, range.end);

        let chunk_size = self.chunk_size;
        let mut matches: Vec<Candidate> = self.install(|| {
            (0..chunk_count(&range, chunk_size))
                .into_par_iter()
                .flat_map_iter(|index| {
                    let chunk = chunk_at(&range, chunk_size, index);
                    progress.record(chunk.end - chunk.start);
                    chunk
                        .map(|nonce| task.evaluate(nonce))
                        .filter(|candidate| candidate.matched)
                        .collect::<Vec<_>>()
                })
                .collect()
        });
        matches.sort_by_key(|candidate| candidate.nonce);
        Ok(matches)
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl Default for RayonEngine {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pool: None,
        }
    }
}

impl ComputeEngine for RayonEngine {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn search(
        &self,
        task: &SearchTask,
        range: Range<u64>,
        progress: &SearchProgress,
    ) -> Result<SearchOutcome, Sm3Error> {
        validate_range(&range)?;
        let chunk_size = self.chunk_size;
        let chunks = chunk_count(&range, chunk_size);
        debug!(
            "{}: searching nonces {}..{} in {} chunks of {}",
            self.name(),
            range.start,
            range.end,
            chunks,
            chunk_size
        );

        let found = AtomicBool::new(false);
        let winner = self.install(|| {
            (0..chunks).into_par_iter().find_map_any(|index| {
                let chunk = chunk_at(&range, chunk_size, index);
                trace!("{}: scanning {}..{}", self.name(), chunk.start, chunk.end);
                let candidate = task.scan(chunk, &found, progress)?;
                // Matches from workers that lose the race are dropped.
                found.store(true, Ordering::Relaxed);
                Some(candidate)
            })
        });

        let outcome = SearchOutcome::from(winner);
        log_outcome(self.name(), &outcome);
        Ok(outcome)
    }
}

/// Runs a search over `range` on rayon's global pool.
pub fn search(
    template: &[u8],
    nonce_offset: usize,
    range: Range<u64>,
    boundary: &BigUint,
    comparison: ComparisonMode,
) -> Result<SearchOutcome, Sm3Error> {
    let task = SearchTask::new(template, nonce_offset, Boundary::new(boundary), comparison)?;
    RayonEngine::default().search(&task, range, &SearchProgress::new())
}

fn chunk_count(range: &Range<u64>, chunk_size: u64) -> u64 {
    (range.end - range.start).div_ceil(chunk_size)
}

// The `index`th `chunk_size` slice of `range`; the last one may be short.
fn chunk_at(range: &Range<u64>, chunk_size: u64, index: u64) -> Range<u64> {
    let start = range.start + index * chunk_size;
    start..start.saturating_add(chunk_size).min(range.end)
}

fn log_outcome(engine: &str, outcome: &SearchOutcome) {
    match outcome {
        SearchOutcome::Found { nonce, digest } => {
            info!("{engine}: found nonce {nonce} ({})", crate::to_hex(digest))
        }
        SearchOutcome::Exhausted => debug!("{engine}: range exhausted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::digest_value;

    use num_traits::Zero;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use rstest::rstest;

    const NONCE_OFFSET: usize = 16;

    fn template() -> Vec<u8> {
        let mut template = b"prev:0123456789|nonce:".to_vec();
        template.truncate(NONCE_OFFSET);
        template.extend_from_slice(&[0u8; 8]);
        template.extend_from_slice(b"|data:We all live in a yellow submarine.");
        template
    }

    fn task_with(boundary: Boundary, comparison: ComparisonMode) -> SearchTask {
        SearchTask::new(&template(), NONCE_OFFSET, boundary, comparison).unwrap()
    }

    // A boundary that roughly one candidate in `one_in` satisfies.
    fn boundary_for_difficulty(one_in: u32) -> Boundary {
        let max = (BigUint::from(1u64) << 256) - 1u64;
        Boundary::new(&(max / one_in))
    }

    fn engines() -> Vec<Box<dyn ComputeEngine>> {
        vec![
            Box::new(SequentialEngine),
            Box::new(RayonEngine::new(&SearchConfig::default().with_chunk_size(7)).unwrap()),
            Box::new(
                RayonEngine::new(&SearchConfig::default().with_chunk_size(64).with_threads(4))
                    .unwrap(),
            ),
        ]
    }

    #[test]
    fn engines_find_constructed_nonce() {
        let probe = task_with(Boundary::new(&BigUint::zero()), ComparisonMode::LessThan);
        let target = probe.evaluate(1234).digest;
        let task = task_with(Boundary::from_digest(target), ComparisonMode::LessOrEqual);

        for engine in engines() {
            let progress = SearchProgress::new();
            let outcome = engine.search(&task, 1000..2000, &progress).unwrap();

            let SearchOutcome::Found { nonce, digest } = outcome else {
                panic!("{}: expected a match, got {outcome:?}", engine.name());
            };
            assert!((1000..2000).contains(&nonce), "{}", engine.name());
            assert_eq!(task.evaluate(nonce).digest, digest);
            assert!(digest_value(&digest) <= digest_value(&target), "{}", engine.name());
            assert!(progress.hashes() > 0);
        }
    }

    #[test]
    fn rayon_engine_stops_soon_after_a_match_in_huge_range() {
        let task = task_with(
            Boundary::new(&(BigUint::from(1u64) << 256)),
            ComparisonMode::LessThan,
        );
        let threads = 4;
        let chunk_size = 64;
        let engine = RayonEngine::new(
            &SearchConfig::default()
                .with_chunk_size(chunk_size)
                .with_threads(threads),
        )
        .unwrap();
        let progress = SearchProgress::new();

        let outcome = engine.search(&task, 0..u64::MAX, &progress).unwrap();

        assert!(matches!(outcome, SearchOutcome::Found { .. }));
        assert!(progress.hashes() >= 1);
        assert!(progress.hashes() <= threads as u64 * chunk_size);
    }

    #[test]
    fn search_api_rejects_empty_range() {
        let result = search(
            &template(),
            NONCE_OFFSET,
            7..7,
            &BigUint::zero(),
            ComparisonMode::LessThan,
        );

        assert_eq!(
            result,
            Err(Sm3Error::Configuration(ConfigError::EmptyRange { start: 7, end: 7 }))
        );
    }

    #[test]
    fn sequential_engine_returns_lowest_match() {
        let task = task_with(boundary_for_difficulty(16), ComparisonMode::LessThan);
        let all = RayonEngine::default()
            .find_all(&task, 0..500, &SearchProgress::new())
            .unwrap();

        let outcome = SequentialEngine
            .search(&task, 0..500, &SearchProgress::new())
            .unwrap();

        assert_eq!(outcome.nonce(), all.first().map(|c| c.nonce));
    }

    #[test]
    fn engines_report_exhausted_for_zero_boundary() {
        let task = task_with(Boundary::new(&BigUint::zero()), ComparisonMode::LessThan);

        for engine in engines() {
            let progress = SearchProgress::new();
            let outcome = engine.search(&task, 0..300, &progress).unwrap();

            assert_eq!(outcome, SearchOutcome::Exhausted, "{}", engine.name());
            assert_eq!(progress.hashes(), 300, "{}", engine.name());
        }
    }

    #[rstest]
    #[case(10..10)]
    #[case(11..10)]
    fn engines_reject_empty_ranges(#[case] range: Range<u64>) {
        let task = task_with(Boundary::new(&BigUint::zero()), ComparisonMode::LessThan);

        for engine in engines() {
            let progress = SearchProgress::new();
            let result = engine.search(&task, range.clone(), &progress);

            assert_eq!(
                result,
                Err(Sm3Error::Configuration(ConfigError::EmptyRange {
                    start: range.start,
                    end: range.end,
                }))
            );
            assert_eq!(progress.hashes(), 0);
        }
    }

    #[test]
    fn rayon_engine_rejects_zero_chunk_size() {
        let result = RayonEngine::new(&SearchConfig::default().with_chunk_size(0));

        assert!(matches!(
            result,
            Err(Sm3Error::Configuration(ConfigError::ZeroChunkSize))
        ));
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(8)]
    fn partitioned_searches_find_every_sequential_match(#[case] partitions: u64) {
        let task = task_with(boundary_for_difficulty(8), ComparisonMode::LessThan);
        let range = 0..400u64;
        let sequential: Vec<u64> = range
            .clone()
            .map(|nonce| task.evaluate(nonce))
            .filter(|candidate| candidate.matched)
            .map(|candidate| candidate.nonce)
            .collect();
        assert!(!sequential.is_empty());

        let engine = RayonEngine::new(&SearchConfig::default().with_chunk_size(5)).unwrap();
        let step = range.end / partitions;
        let mut aggregated = Vec::new();
        for i in 0..partitions {
            let start = i * step;
            let end = if i + 1 == partitions { range.end } else { start + step };
            aggregated.extend(
                engine
                    .find_all(&task, start..end, &SearchProgress::new())
                    .unwrap()
                    .into_iter()
                    .map(|candidate| candidate.nonce),
            );
        }

        assert_eq!(aggregated, sequential);
    }

    #[test]
    fn find_all_counts_every_candidate() {
        let task = task_with(boundary_for_difficulty(4), ComparisonMode::LessOrEqual);
        let progress = SearchProgress::new();

        let matches = RayonEngine::default()
            .find_all(&task, 50..250, &progress)
            .unwrap();

        assert_eq!(progress.hashes(), 200);
        assert!(matches.windows(2).all(|w| w[0].nonce < w[1].nonce));
        assert!(matches.iter().all(|c| c.matched));
    }

    #[test]
    fn search_api_finds_match_in_random_template() {
        let mut rng = StdRng::seed_from_u64(33);
        let mut template = vec![0u8; 100];
        rng.fill_bytes(&mut template);
        let task = SearchTask::new(
            &template,
            70,
            Boundary::new(&BigUint::zero()),
            ComparisonMode::LessThan,
        )
        .unwrap();
        let boundary = digest_value(&task.evaluate(77).digest);

        let outcome = search(&template, 70, 0..200, &boundary, ComparisonMode::LessOrEqual).unwrap();

        let nonce = outcome.nonce().unwrap();
        assert!(digest_value(&task.evaluate(nonce).digest) <= boundary);
    }

    #[test]
    fn search_api_rejects_bad_nonce_offset() {
        let result = search(b"short", 0, 0..10, &BigUint::zero(), ComparisonMode::LessThan);

        assert_eq!(
            result,
            Err(Sm3Error::Configuration(ConfigError::NonceOutOfBounds {
                offset: 0,
                width: 8,
                template_len: 5,
            }))
        );
    }

    #[rstest]
    #[case(10..33, 10, vec![10..20, 20..30, 30..33])]
    #[case(0..4, 4, vec![0..4])]
    #[case(u64::MAX - 3..u64::MAX, 10, vec![u64::MAX - 3..u64::MAX])]
    fn chunks_cover_range_without_overlap(
        #[case] range: Range<u64>,
        #[case] chunk_size: u64,
        #[case] expected: Vec<Range<u64>>,
    ) {
        let chunks: Vec<_> = (0..chunk_count(&range, chunk_size))
            .map(|index| chunk_at(&range, chunk_size, index))
            .collect();

        assert_eq!(chunks, expected);
    }
}

//! Sort pipelines.
//!
//! The sequential pass pulls lines from a reader, decodes them with
//! [`RecordParser`] and feeds an [`EventAccumulator`]. The parallel pass
//! splits the body into event-aligned shards, sorts each on the rayon pool
//! with its own random stream, and merges the spectra bin by bin.

use crate::reader::{MappedFileReader, TextLines};
use crate::shard::{event_shards, EventShard};
use crate::Result;
use log::{debug, info};
use rayon::prelude::*;
use specsort_core::{
    EventAccumulator, GaussianSampler, HistogramSink, NormalSampler, SortConfig, SortStatistics,
    SpectrumSet,
};
use specsort_g4::RecordParser;
use std::path::Path;

/// Default shard size for the parallel pass (16 MiB).
pub const DEFAULT_SHARD_BYTES: usize = 16 * 1024 * 1024;

fn drive<'a, L, S, H>(
    mut parser: RecordParser,
    mut accumulator: EventAccumulator<S>,
    lines: L,
    sink: &mut H,
) -> Result<SortStatistics>
where
    L: Iterator<Item = &'a [u8]>,
    S: GaussianSampler,
    H: HistogramSink + ?Sized,
{
    let expected = accumulator.mapper().channel_count();
    if let Some(channels) = sink.channel_count() {
        if channels != expected {
            return Err(specsort_core::Error::ShapeMismatch(format!(
                "sink holds {channels} channels, layout maps {expected}"
            ))
            .into());
        }
    }

    for raw in lines {
        accumulator.count_line();
        match parser.decode_bytes(raw) {
            Ok(decoded) => accumulator.dispatch(decoded, sink)?,
            Err(e) if e.is_recoverable() => {
                debug!("skipping {e}");
                accumulator.reject_line();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(accumulator.finish(sink)?)
}

/// Sorts a stream of text lines into `sink`.
///
/// The event still open at end of stream is closed. The sink is not flushed;
/// the caller does that once, after the run.
///
/// # Errors
/// Returns an error if the configuration is invalid, the sink's channel
/// count differs from the layout, or the random source fails. Malformed and out-of-range lines are counted, not returned.
pub fn sort_lines<'a, I, S, H>(
    lines: I,
    config: &SortConfig,
    sampler: S,
    sink: &mut H,
) -> Result<SortStatistics>
where
    I: IntoIterator<Item = &'a str>,
    S: GaussianSampler,
    H: HistogramSink + ?Sized,
{
    let accumulator = EventAccumulator::new(config, sampler)?;
    let parser = RecordParser::new(&config.input);
    drive(parser, accumulator, lines.into_iter().map(str::as_bytes), sink)
}

/// Sorts an in-memory input into `sink`.
///
/// # Errors
/// See [`sort_lines`].
pub fn sort_bytes<S, H>(
    data: &[u8],
    config: &SortConfig,
    sampler: S,
    sink: &mut H,
) -> Result<SortStatistics>
where
    S: GaussianSampler,
    H: HistogramSink + ?Sized,
{
    let accumulator = EventAccumulator::new(config, sampler)?;
    let parser = RecordParser::new(&config.input);
    drive(parser, accumulator, TextLines::new(data).raw(), sink)
}

/// Sorts a file into `sink` on the calling thread.
///
/// # Errors
/// Returns an error if the file cannot be opened, plus everything
/// [`sort_lines`] returns.
pub fn sort_file<P, S, H>(
    path: P,
    config: &SortConfig,
    sampler: S,
    sink: &mut H,
) -> Result<SortStatistics>
where
    P: AsRef<Path>,
    S: GaussianSampler,
    H: HistogramSink + ?Sized,
{
    let reader = MappedFileReader::open(path)?;
    info!(
        "sorting {} ({} bytes)",
        reader.path().display(),
        reader.len()
    );
    sort_bytes(reader.as_bytes(), config, sampler, sink)
}

/// Settings for the parallel pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParallelConfig {
    /// Target shard size in bytes.
    pub shard_bytes: usize,
    /// Worker threads; `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Base seed; shard `i` uses `seed + i`.
    pub seed: u64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            shard_bytes: DEFAULT_SHARD_BYTES,
            threads: None,
            seed: 0,
        }
    }
}

impl ParallelConfig {
    /// Creates the default parallel settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set target shard size in bytes.
    #[must_use]
    pub fn with_shard_bytes(mut self, bytes: usize) -> Self {
        self.shard_bytes = bytes;
        self
    }

    /// Set worker thread count.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set base seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Merged spectra and counters of a sort.
#[derive(Clone, Debug, PartialEq)]
pub struct SortOutcome {
    pub spectra: SpectrumSet,
    pub statistics: SortStatistics,
}

impl SortOutcome {
    /// Empty outcome with the configured shape.
    #[must_use]
    pub fn empty(config: &SortConfig) -> Self {
        Self {
            spectra: SpectrumSet::new(config.layout.channel_count, &config.spectrum),
            statistics: SortStatistics::default(),
        }
    }

    /// Adds another outcome bin by bin.
    ///
    /// # Errors
    /// Returns an error if the spectra shapes differ.
    pub fn merge(&mut self, other: &SortOutcome) -> Result<()> {
        self.spectra.merge(&other.spectra)?;
        self.statistics.merge(&other.statistics);
        Ok(())
    }
}

/// Sorts `data` in parallel with one seeded [`NormalSampler`] per shard.
///
/// With the same seed and shard size the result is reproducible regardless
/// of thread count.
///
/// # Errors
/// Returns an error if the configuration is invalid, the thread pool cannot
/// be built, or a shard fails fatally.
pub fn sort_parallel(
    data: &[u8],
    config: &SortConfig,
    parallel: &ParallelConfig,
) -> Result<SortOutcome> {
    let seed = parallel.seed;
    sort_parallel_with(data, config, parallel, |index| {
        NormalSampler::seeded(seed.wrapping_add(index as u64))
    })
}

/// Sorts `data` in parallel, building each shard's sampler with
/// `make_sampler(shard_index)`.
///
/// # Errors
/// See [`sort_parallel`].
pub fn sort_parallel_with<F, S>(
    data: &[u8],
    config: &SortConfig,
    parallel: &ParallelConfig,
    make_sampler: F,
) -> Result<SortOutcome>
where
    F: Fn(usize) -> S + Sync,
    S: GaussianSampler,
{
    config.validate()?;
    let sharded = event_shards(data, &config.input, parallel.shard_bytes);
    info!(
        "sorting {} bytes in {} shards",
        data.len(),
        sharded.shards.len()
    );

    let run = || sort_shards(data, config, &sharded.shards, &make_sampler);
    let mut outcome = match parallel.threads {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?
            .install(run)?,
        None => run()?,
    };

    let header = sharded.header_lines as u64;
    outcome.statistics.lines += header;
    outcome.statistics.skipped_lines += header;
    Ok(outcome)
}

fn sort_shards<F, S>(
    data: &[u8],
    config: &SortConfig,
    shards: &[EventShard],
    make_sampler: &F,
) -> Result<SortOutcome>
where
    F: Fn(usize) -> S + Sync,
    S: GaussianSampler,
{
    shards
        .par_iter()
        .enumerate()
        .map(|(index, shard)| sort_shard(data, config, shard, make_sampler(index)))
        .try_reduce(
            || SortOutcome::empty(config),
            |mut acc, next| {
                acc.merge(&next)?;
                Ok(acc)
            },
        )
}

fn sort_shard<S: GaussianSampler>(
    data: &[u8],
    config: &SortConfig,
    shard: &EventShard,
    sampler: S,
) -> Result<SortOutcome> {
    let mut spectra = SpectrumSet::new(config.layout.channel_count, &config.spectrum);
    let parser = RecordParser::resume(&config.input, shard.first_line);
    let accumulator = EventAccumulator::new(config, sampler)?;
    let statistics = drive(
        parser,
        accumulator,
        TextLines::new(shard.slice(data)).raw(),
        &mut spectra,
    )?;
    debug!(
        "shard at line {}: {} events, {} records",
        shard.first_line, statistics.events, statistics.records
    );
    Ok(SortOutcome {
        spectra,
        statistics,
    })
}

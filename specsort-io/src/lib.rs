//! specsort-io: Input reading, sort pipelines and spectrum output.
//!
//! This crate memory-maps simulation output via memmap2, drives the
//! sequential and sharded parallel sorts, and writes the resulting spectra.
//!

mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod pipeline;
mod reader;
pub mod scanner;
pub mod shard;
mod writer;

pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{read_spectra_hdf5, write_spectra_hdf5, SpectrumData, SpectrumWriteOptions};
pub use pipeline::{
    sort_bytes, sort_file, sort_lines, sort_parallel, sort_parallel_with, ParallelConfig,
    SortOutcome, DEFAULT_SHARD_BYTES,
};
pub use reader::{MappedFileReader, TextLines};
pub use scanner::{InputScanner, InputSummary};
pub use shard::{event_shards, EventShard, ShardedInput};
pub use writer::{write_spectra, OutputFormat, SpectrumFileSink, SpectrumWriter};

//! specsort-core: Core types for sorting gamma-array simulation output.
//!
//! This crate provides the channel mapping, the energy-resolution model,
//! per-crystal spectra and the event accumulator that turns a stream of
//! interaction records into filled spectra.
//!

pub mod accumulator;
pub mod channel;
pub mod config;
pub mod error;
pub mod record;
pub mod resolution;
pub mod spectrum;

pub use accumulator::{EventAccumulator, EventBuffer, SortStatistics};
pub use channel::{ChannelIndex, ChannelMapper, VolumeKind};
pub use config::{ChannelLayout, InputFormat, SortConfig, SpectrumConfig};
pub use error::{Error, Result};
pub use record::{Decoded, InteractionRecord};
pub use resolution::{EnergyResolutionModel, GaussianSampler, NormalSampler, SigmaModel};
pub use spectrum::{Histogram, HistogramSink, SpectrumKind, SpectrumSet};

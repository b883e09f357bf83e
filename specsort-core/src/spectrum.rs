//! Per-crystal energy spectra.
//!
//! Every crystal owns three 1D histograms over the same binning: the true
//! active-volume energy, the resolution-smeared ("real") energy, and the
//! shield energy.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelIndex;
use crate::config::SpectrumConfig;
use crate::{Error, Result};

/// The three spectra kept per crystal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectrumKind {
    /// True energy deposited in the crystal.
    Active,
    /// Active energy after the resolution model.
    Smeared,
    /// Energy deposited in the suppression shield.
    Shield,
}

impl SpectrumKind {
    /// All kinds in storage order.
    pub const ALL: [SpectrumKind; 3] = [Self::Active, Self::Smeared, Self::Shield];

    /// Position of this kind in [`Self::ALL`].
    #[inline]
    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Self::Active => 0,
            Self::Smeared => 1,
            Self::Shield => 2,
        }
    }

    /// Short label used in file layouts.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Smeared => "smeared",
            Self::Shield => "shield",
        }
    }

    /// Histogram name for a channel, e.g. `Crys3`, `Crys3 Real`, `Shield3`.
    #[must_use]
    pub fn histogram_name(self, channel: usize) -> String {
        match self {
            Self::Active => format!("Crys{channel}"),
            Self::Smeared => format!("Crys{channel} Real"),
            Self::Shield => format!("Shield{channel}"),
        }
    }

    /// Human-readable histogram title for a channel.
    #[must_use]
    pub fn histogram_title(self, channel: usize) -> String {
        match self {
            Self::Active => format!("Crystal {channel} Energy (keV)"),
            Self::Smeared => format!("Realistic Crystal {channel} Energy (keV)"),
            Self::Shield => format!("Shield {channel} Energy (keV)"),
        }
    }
}

/// Receives bin increments from the accumulator.
///
/// Storage is up to the implementor; the accumulator only ever asks for one
/// count to be added at a value, and the driver calls [`flush`] exactly once
/// after the input is exhausted.
///
/// [`flush`]: HistogramSink::flush
pub trait HistogramSink {
    /// Adds one count in the bin containing `value`. Values outside the
    /// domain are discarded.
    fn fill(&mut self, kind: SpectrumKind, channel: ChannelIndex, value: f64);

    /// Channels per kind this sink stores, if it has a fixed layout.
    ///
    /// Drivers use it to refuse a sink built for a different array before
    /// any fill happens.
    fn channel_count(&self) -> Option<usize> {
        None
    }

    /// Persists all histograms.
    ///
    /// # Errors
    /// Returns an error if the histograms cannot be stored.
    fn flush(&mut self) -> Result<()>;
}

impl<T: HistogramSink + ?Sized> HistogramSink for &mut T {
    fn fill(&mut self, kind: SpectrumKind, channel: ChannelIndex, value: f64) {
        (**self).fill(kind, channel, value);
    }

    fn channel_count(&self) -> Option<usize> {
        (**self).channel_count()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Fixed-binning 1D histogram over `[0, max)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    counts: Vec<u64>,
    max: f64,
    bin_width: f64,
    discarded: u64,
}

impl Histogram {
    /// Creates an empty histogram. `bins` and `max` must be positive.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(bins: usize, max: f64) -> Self {
        Self {
            counts: vec![0; bins],
            max,
            bin_width: max / bins as f64,
            discarded: 0,
        }
    }

    /// Number of bins.
    #[inline]
    #[must_use]
    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    /// Upper (exclusive) edge of the domain.
    #[inline]
    #[must_use]
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Width of one bin.
    #[inline]
    #[must_use]
    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Bin containing `value`, or `None` outside `[0, max)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn bin_of(&self, value: f64) -> Option<usize> {
        // NaN fails both comparisons.
        if !(value >= 0.0 && value < self.max) {
            return None;
        }
        let last = self.counts.len().checked_sub(1)?;
        let bin = (value / self.bin_width) as usize;
        // Rounding just below max can land on `bins`.
        Some(bin.min(last))
    }

    /// Lower edge of bin `index`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_low_edge(&self, index: usize) -> f64 {
        index as f64 * self.bin_width
    }

    /// Adds one count at `value`. Returns false if the value was discarded.
    pub fn fill(&mut self, value: f64) -> bool {
        if let Some(bin) = self.bin_of(value) {
            self.counts[bin] += 1;
            true
        } else {
            self.discarded += 1;
            false
        }
    }

    /// Count in bin `index`.
    #[must_use]
    pub fn count(&self, index: usize) -> u64 {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Count in the bin containing `value` (0 outside the domain).
    #[must_use]
    pub fn count_at(&self, value: f64) -> u64 {
        self.bin_of(value).map_or(0, |bin| self.counts[bin])
    }

    /// All bin counts.
    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total counts inside the domain.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Values that fell outside the domain.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Adds another histogram bin by bin.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the binning differs.
    #[allow(clippy::float_cmp)]
    pub fn merge(&mut self, other: &Histogram) -> Result<()> {
        if self.counts.len() != other.counts.len() || self.max != other.max {
            return Err(Error::ShapeMismatch(format!(
                "{} bins over [0, {}) vs {} bins over [0, {})",
                self.counts.len(),
                self.max,
                other.counts.len(),
                other.max
            )));
        }
        for (dst, src) in self.counts.iter_mut().zip(&other.counts) {
            *dst += src;
        }
        self.discarded += other.discarded;
        Ok(())
    }
}

/// In-memory spectra for every channel and kind.
///
/// Histograms are allocated up front, `channels` per kind, so a fill never
/// allocates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSet {
    channels: usize,
    histograms: Vec<Histogram>,
}

impl SpectrumSet {
    /// Allocates `3 x channels` empty histograms with the given binning.
    #[must_use]
    pub fn new(channels: usize, binning: &SpectrumConfig) -> Self {
        let histograms = (0..channels * SpectrumKind::ALL.len())
            .map(|_| Histogram::new(binning.bins, binning.max_energy_kev))
            .collect();
        Self {
            channels,
            histograms,
        }
    }

    /// Number of channels per kind.
    #[inline]
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    fn slot(&self, kind: SpectrumKind, channel: usize) -> usize {
        kind.ordinal() * self.channels + channel
    }

    /// Histogram for a kind and raw channel number.
    #[must_use]
    pub fn get(&self, kind: SpectrumKind, channel: usize) -> Option<&Histogram> {
        if channel >= self.channels {
            return None;
        }
        self.histograms.get(self.slot(kind, channel))
    }

    /// Iterates over `(kind, channel, histogram)` in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (SpectrumKind, usize, &Histogram)> + '_ {
        SpectrumKind::ALL.into_iter().flat_map(move |kind| {
            (0..self.channels).map(move |ch| (kind, ch, &self.histograms[self.slot(kind, ch)]))
        })
    }

    /// Total counts across every histogram.
    #[must_use]
    pub fn total_entries(&self) -> u64 {
        self.histograms.iter().map(Histogram::entries).sum()
    }

    /// Adds another set bin by bin. Merging is commutative and associative,
    /// so independently sorted shards can be reduced in any order.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if channel count or binning differ.
    pub fn merge(&mut self, other: &SpectrumSet) -> Result<()> {
        if self.channels != other.channels {
            return Err(Error::ShapeMismatch(format!(
                "{} channels vs {} channels",
                self.channels, other.channels
            )));
        }
        for (dst, src) in self.histograms.iter_mut().zip(&other.histograms) {
            dst.merge(src)?;
        }
        Ok(())
    }
}

impl HistogramSink for SpectrumSet {
    fn fill(&mut self, kind: SpectrumKind, channel: ChannelIndex, value: f64) {
        // An index from a larger layout must not spill into the next kind.
        if channel.get() >= self.channels {
            return;
        }
        let slot = self.slot(kind, channel.get());
        if let Some(histogram) = self.histograms.get_mut(slot) {
            histogram.fill(value);
        }
    }

    fn channel_count(&self) -> Option<usize> {
        Some(self.channels)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelMapper;
    use crate::config::ChannelLayout;
    use approx::assert_relative_eq;

    fn binning() -> SpectrumConfig {
        SpectrumConfig::default()
    }

    #[test]
    fn test_histogram_binning() {
        let h = Histogram::new(8192, 2048.0);
        assert_relative_eq!(h.bin_width(), 0.25);
        assert_eq!(h.bin_of(0.0), Some(0));
        assert_eq!(h.bin_of(0.24), Some(0));
        assert_eq!(h.bin_of(0.25), Some(1));
        assert_eq!(h.bin_of(1000.0), Some(4000));
        assert_eq!(h.bin_of(2047.999_999), Some(8191));
        assert_relative_eq!(h.bin_low_edge(4000), 1000.0);
    }

    #[test]
    fn test_histogram_domain() {
        let mut h = Histogram::new(10, 10.0);
        assert!(!h.fill(-0.1));
        assert!(!h.fill(10.0));
        assert!(!h.fill(f64::NAN));
        assert!(!h.fill(f64::INFINITY));
        assert!(h.fill(9.99));
        assert_eq!(h.entries(), 1);
        assert_eq!(h.discarded(), 4);
        assert_eq!(h.count(9), 1);
        assert_eq!(h.count(100), 0);
        assert_eq!(h.count_at(9.5), 1);
        assert_eq!(h.count_at(-1.0), 0);
    }

    #[test]
    fn test_histogram_merge() {
        let mut a = Histogram::new(4, 4.0);
        let mut b = Histogram::new(4, 4.0);
        a.fill(0.5);
        b.fill(0.5);
        b.fill(3.5);
        b.fill(7.0);
        a.merge(&b).unwrap();
        assert_eq!(a.counts(), &[2, 0, 0, 1]);
        assert_eq!(a.discarded(), 1);

        let c = Histogram::new(8, 4.0);
        assert!(matches!(a.merge(&c), Err(Error::ShapeMismatch(_))));
        let d = Histogram::new(4, 8.0);
        assert!(a.merge(&d).is_err());
    }

    #[test]
    fn test_spectrum_set_layout() {
        let set = SpectrumSet::new(64, &binning());
        assert_eq!(set.channels(), 64);
        assert_eq!(set.iter().count(), 3 * 64);
        assert!(set.get(SpectrumKind::Shield, 63).is_some());
        assert!(set.get(SpectrumKind::Shield, 64).is_none());
        assert_eq!(set.total_entries(), 0);
    }

    #[test]
    fn test_sink_fills_independent_histograms() {
        let mapper = ChannelMapper::new(&ChannelLayout::default());
        let mut set = SpectrumSet::new(64, &binning());
        let ch = mapper.channel_of(2, 3).unwrap();

        set.fill(SpectrumKind::Active, ch, 1000.0);
        set.fill(SpectrumKind::Smeared, ch, 1001.0);
        set.fill(SpectrumKind::Shield, ch, 300.0);
        set.fill(SpectrumKind::Shield, ch, 5000.0);

        let raw = ch.get();
        assert_eq!(set.get(SpectrumKind::Active, raw).unwrap().count_at(1000.0), 1);
        assert_eq!(set.get(SpectrumKind::Smeared, raw).unwrap().count_at(1001.0), 1);
        assert_eq!(set.get(SpectrumKind::Shield, raw).unwrap().entries(), 1);
        assert_eq!(set.get(SpectrumKind::Shield, raw).unwrap().discarded(), 1);
        assert_eq!(set.get(SpectrumKind::Active, raw + 1).unwrap().entries(), 0);
        assert_eq!(set.total_entries(), 3);
    }

    #[test]
    fn test_fill_beyond_channels_ignored() {
        let mapper = ChannelMapper::new(&ChannelLayout::default());
        let mut set = SpectrumSet::new(32, &binning());
        let ch = mapper.channel_of(11, 1).unwrap();
        assert_eq!(ch.get(), 40);

        set.fill(SpectrumKind::Active, ch, 500.0);
        set.fill(SpectrumKind::Smeared, ch, 500.0);
        assert_eq!(set.total_entries(), 0);
        assert_eq!(set.get(SpectrumKind::Smeared, 8).unwrap().count_at(500.0), 0);
        assert_eq!(set.get(SpectrumKind::Shield, 8).unwrap().count_at(500.0), 0);
        assert_eq!(set.channel_count(), Some(32));
    }

    #[test]
    fn test_spectrum_set_merge_commutes() {
        let mapper = ChannelMapper::new(&ChannelLayout::default());
        let ch0 = mapper.index(0).unwrap();
        let ch5 = mapper.index(5).unwrap();

        let mut a = SpectrumSet::new(64, &binning());
        let mut b = SpectrumSet::new(64, &binning());
        a.fill(SpectrumKind::Active, ch0, 10.0);
        b.fill(SpectrumKind::Active, ch0, 10.0);
        b.fill(SpectrumKind::Shield, ch5, 20.0);

        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.get(SpectrumKind::Active, 0).unwrap().count_at(10.0), 2);

        let other = SpectrumSet::new(32, &binning());
        assert!(ab.merge(&other).is_err());
    }

    #[test]
    fn test_histogram_names() {
        assert_eq!(SpectrumKind::Active.histogram_name(3), "Crys3");
        assert_eq!(SpectrumKind::Smeared.histogram_name(3), "Crys3 Real");
        assert_eq!(SpectrumKind::Shield.histogram_name(3), "Shield3");
        assert_eq!(
            SpectrumKind::Smeared.histogram_title(0),
            "Realistic Crystal 0 Energy (keV)"
        );
    }
}

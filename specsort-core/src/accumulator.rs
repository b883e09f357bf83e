//! Event accumulation.
//!
//! The accumulator sums deposits per crystal until a boundary closes the
//! event. Only then is the resolution model applied and are the three
//! per-crystal energies written to the sink, so an event spread over many
//! input lines is smeared on its total energy, the way a crystal integrates
//! charge over one readout window.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelIndex, ChannelMapper, VolumeKind};
use crate::config::SortConfig;
use crate::record::{Decoded, InteractionRecord};
use crate::resolution::{EnergyResolutionModel, GaussianSampler};
use crate::spectrum::{HistogramSink, SpectrumKind};
use crate::Result;

/// Counters for one sort run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortStatistics {
    /// Input lines read.
    pub lines: u64,
    /// Header and blank lines skipped.
    pub skipped_lines: u64,
    /// Records added to an event.
    pub records: u64,
    /// Events closed with at least one record.
    pub events: u64,
    /// Lines that could not be decoded.
    pub parse_errors: u64,
    /// Records whose (detector, segment) was outside the array.
    pub out_of_range: u64,
}

impl SortStatistics {
    /// Total records dropped for any reason.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.parse_errors + self.out_of_range
    }

    /// Adds the counters of another run (e.g. another shard).
    pub fn merge(&mut self, other: &SortStatistics) {
        self.lines += other.lines;
        self.skipped_lines += other.skipped_lines;
        self.records += other.records;
        self.events += other.events;
        self.parse_errors += other.parse_errors;
        self.out_of_range += other.out_of_range;
    }
}

/// Per-channel sums for the event in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBuffer {
    active: Vec<f64>,
    shield: Vec<f64>,
    smeared: Vec<f64>,
}

impl EventBuffer {
    fn new(channels: usize) -> Self {
        Self {
            active: vec![0.0; channels],
            shield: vec![0.0; channels],
            smeared: vec![0.0; channels],
        }
    }

    /// Summed active-volume energy per channel.
    #[must_use]
    pub fn active(&self) -> &[f64] {
        &self.active
    }

    /// Summed shield energy per channel.
    #[must_use]
    pub fn shield(&self) -> &[f64] {
        &self.shield
    }

    /// Smeared active energy per channel (only populated while closing).
    #[must_use]
    pub fn smeared(&self) -> &[f64] {
        &self.smeared
    }

    fn reset(&mut self) {
        self.active.fill(0.0);
        self.shield.fill(0.0);
        self.smeared.fill(0.0);
    }
}

/// Groups records into events and writes per-event spectra.
///
/// There is a single accumulating state: records are summed until a
/// boundary (or [`finish`](Self::finish)) closes the event, after which the
/// buffers are zeroed and accumulation continues.
#[derive(Debug)]
pub struct EventAccumulator<S> {
    mapper: ChannelMapper,
    resolution: EnergyResolutionModel<S>,
    min_count_threshold: f64,
    buffer: EventBuffer,
    pending: usize,
    stats: SortStatistics,
}

impl<S: GaussianSampler> EventAccumulator<S> {
    /// Creates an accumulator for a configuration and random source.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid.
    pub fn new(config: &SortConfig, sampler: S) -> Result<Self> {
        config.validate()?;
        let mapper = ChannelMapper::new(&config.layout);
        let buffer = EventBuffer::new(mapper.channel_count());
        Ok(Self {
            mapper,
            resolution: EnergyResolutionModel::new(config.resolution, sampler),
            min_count_threshold: config.spectrum.min_count_threshold,
            buffer,
            pending: 0,
            stats: SortStatistics::default(),
        })
    }

    /// Channel mapper in use.
    pub fn mapper(&self) -> &ChannelMapper {
        &self.mapper
    }

    /// Sums of the event in progress.
    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    /// Records added since the last close.
    pub fn pending_records(&self) -> usize {
        self.pending
    }

    /// Counters so far.
    pub fn statistics(&self) -> &SortStatistics {
        &self.stats
    }

    /// Adds a record's energy to its channel.
    ///
    /// # Errors
    /// Returns [`Error::OutOfRange`](crate::Error::OutOfRange) if the record
    /// does not map to a channel. The record is counted as rejected and the
    /// event is left untouched.
    pub fn add_record(&mut self, record: &InteractionRecord) -> Result<ChannelIndex> {
        let channel = match self.mapper.channel_of(record.detector, record.segment) {
            Ok(channel) => channel,
            Err(e) => {
                self.stats.out_of_range += 1;
                return Err(e);
            }
        };

        let i = channel.get();
        match self.mapper.classify(&record.collection) {
            VolumeKind::Active => self.buffer.active[i] += record.energy_kev,
            VolumeKind::Shield => self.buffer.shield[i] += record.energy_kev,
        }
        self.pending += 1;
        self.stats.records += 1;
        Ok(channel)
    }

    /// Closes the current event: smears each channel's active sum, fills
    /// every value above the threshold, then zeroes the buffers.
    ///
    /// # Errors
    /// Propagates [`Error::RandomSource`](crate::Error::RandomSource); the
    /// run cannot continue after one.
    pub fn close_event<H: HistogramSink + ?Sized>(&mut self, sink: &mut H) -> Result<()> {
        let threshold = self.min_count_threshold;

        for channel in self.mapper.channels() {
            let i = channel.get();
            let active = self.buffer.active[i];
            let shield = self.buffer.shield[i];
            let smeared = self.resolution.smear(active)?;
            self.buffer.smeared[i] = smeared;

            if active > threshold {
                sink.fill(SpectrumKind::Active, channel, active);
            }
            if shield > threshold {
                sink.fill(SpectrumKind::Shield, channel, shield);
            }
            if smeared > threshold {
                sink.fill(SpectrumKind::Smeared, channel, smeared);
            }
        }

        if self.pending > 0 {
            self.stats.events += 1;
        }
        self.buffer.reset();
        self.pending = 0;
        Ok(())
    }

    /// Feeds one decoded line.
    ///
    /// Out-of-range records are dropped and counted; they never end the
    /// event or the run.
    ///
    /// # Errors
    /// Propagates fatal errors from [`close_event`](Self::close_event).
    pub fn dispatch<H: HistogramSink + ?Sized>(
        &mut self,
        decoded: Decoded,
        sink: &mut H,
    ) -> Result<()> {
        match decoded {
            Decoded::Boundary => self.close_event(sink),
            Decoded::Record(record) => {
                if let Err(e) = self.add_record(&record) {
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    debug!("dropping record: {e}");
                }
                Ok(())
            }
            Decoded::Skip => {
                self.stats.skipped_lines += 1;
                Ok(())
            }
        }
    }

    /// Counts a line that failed to decode. The current event is unaffected.
    pub fn reject_line(&mut self) {
        self.stats.parse_errors += 1;
    }

    /// Counts a line read from the input.
    pub fn count_line(&mut self) {
        self.stats.lines += 1;
    }

    /// Ends the stream: closes the event in progress if it holds any record
    /// and returns the final counters.
    ///
    /// # Errors
    /// Propagates fatal errors from [`close_event`](Self::close_event).
    pub fn finish<H: HistogramSink + ?Sized>(mut self, sink: &mut H) -> Result<SortStatistics> {
        if self.pending > 0 {
            self.close_event(sink)?;
        }
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpectrumConfig;
    use crate::spectrum::SpectrumSet;
    use crate::Error;
    use approx::assert_relative_eq;

    const GE: &str = "CollectionGriffinForwardGe";
    const BGO: &str = "CollectionGriffinBGO";

    struct Offset(f64);

    impl GaussianSampler for Offset {
        fn sample(&mut self, mean: f64, _sigma: f64) -> Result<f64> {
            Ok(mean + self.0)
        }
    }

    struct Broken;

    impl GaussianSampler for Broken {
        fn sample(&mut self, _mean: f64, _sigma: f64) -> Result<f64> {
            Err(Error::RandomSource("exhausted".into()))
        }
    }

    fn setup(offset: f64) -> (EventAccumulator<Offset>, SpectrumSet) {
        let config = SortConfig::new();
        let acc = EventAccumulator::new(&config, Offset(offset)).unwrap();
        let set = SpectrumSet::new(config.layout.channel_count, &config.spectrum);
        (acc, set)
    }

    fn hit(det: i64, seg: i64, e: f64, collection: &str) -> InteractionRecord {
        InteractionRecord::new(det, seg, e, "phot", collection)
    }

    #[test]
    fn test_sums_within_event() {
        let (mut acc, _) = setup(0.0);
        acc.add_record(&hit(1, 1, 100.0, GE)).unwrap();
        acc.add_record(&hit(1, 1, 250.5, GE)).unwrap();
        acc.add_record(&hit(1, 1, 40.0, BGO)).unwrap();
        acc.add_record(&hit(2, 1, 10.0, "CollectionGriffinBackGe")).unwrap();

        assert_relative_eq!(acc.buffer().active()[0], 350.5);
        assert_relative_eq!(acc.buffer().shield()[0], 40.0);
        assert_relative_eq!(acc.buffer().active()[4], 10.0);
        assert_eq!(acc.pending_records(), 4);
    }

    #[test]
    fn test_record_order_within_event_irrelevant() {
        let records = [
            hit(1, 1, 0.25, GE),
            hit(4, 2, 661.75, "CollectionGriffinBackGe"),
            hit(1, 1, 0.5, GE),
            hit(1, 2, 75.0, BGO),
            hit(1, 1, 1173.25, GE),
            hit(4, 2, 0.375, BGO),
        ];
        let forward: Vec<&InteractionRecord> = records.iter().collect();
        let mut shuffled: Vec<&InteractionRecord> = records.iter().rev().collect();
        shuffled.swap(0, 3);

        let run = |order: &[&InteractionRecord]| {
            let (mut acc, mut set) = setup(0.0);
            for record in order {
                acc.add_record(record).unwrap();
            }
            let buffer = acc.buffer().clone();
            acc.close_event(&mut set).unwrap();
            (buffer, set)
        };

        let (buffer_a, set_a) = run(&forward);
        let (buffer_b, set_b) = run(&shuffled);
        assert_eq!(buffer_a, buffer_b);
        assert_eq!(set_a, set_b);
        assert_eq!(set_a.total_entries(), 6);
        assert_eq!(set_a.get(SpectrumKind::Active, 0).unwrap().count_at(1174.0), 1);
    }

    #[test]
    fn test_close_fills_and_resets() {
        let (mut acc, mut set) = setup(0.0);
        acc.add_record(&hit(1, 1, 600.0, GE)).unwrap();
        acc.add_record(&hit(1, 1, 400.0, GE)).unwrap();
        acc.add_record(&hit(1, 2, 75.0, BGO)).unwrap();
        acc.close_event(&mut set).unwrap();

        let active = set.get(SpectrumKind::Active, 0).unwrap();
        assert_eq!(active.entries(), 1);
        assert_eq!(active.count_at(1000.0), 1);
        assert_eq!(set.get(SpectrumKind::Smeared, 0).unwrap().count_at(1000.0), 1);
        assert_eq!(set.get(SpectrumKind::Shield, 0).unwrap().entries(), 0);
        assert_eq!(set.get(SpectrumKind::Shield, 1).unwrap().count_at(75.0), 1);
        // No active deposit in channel 1 means no smeared fill either.
        assert_eq!(set.get(SpectrumKind::Smeared, 1).unwrap().entries(), 0);
        assert_eq!(set.total_entries(), 3);

        assert!(acc.buffer().active().iter().all(|&e| e == 0.0));
        assert!(acc.buffer().shield().iter().all(|&e| e == 0.0));
        assert!(acc.buffer().smeared().iter().all(|&e| e == 0.0));
        assert_eq!(acc.pending_records(), 0);
        assert_eq!(acc.statistics().events, 1);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let config = SortConfig::new().with_spectrum(SpectrumConfig {
            min_count_threshold: 1.0,
            ..SpectrumConfig::default()
        });
        let mut acc = EventAccumulator::new(&config, Offset(0.0)).unwrap();
        let mut set = SpectrumSet::new(64, &config.spectrum);

        acc.add_record(&hit(1, 1, 1.0, GE)).unwrap();
        acc.add_record(&hit(1, 2, 1.0, BGO)).unwrap();
        acc.close_event(&mut set).unwrap();
        assert_eq!(set.total_entries(), 0);

        acc.add_record(&hit(1, 1, 1.25, GE)).unwrap();
        acc.add_record(&hit(1, 2, 1.25, BGO)).unwrap();
        acc.close_event(&mut set).unwrap();
        assert_eq!(set.get(SpectrumKind::Active, 0).unwrap().entries(), 1);
        assert_eq!(set.get(SpectrumKind::Smeared, 0).unwrap().entries(), 1);
        assert_eq!(set.get(SpectrumKind::Shield, 1).unwrap().entries(), 1);
    }

    #[test]
    fn test_smeared_below_threshold_not_filled() {
        // A downward fluctuation below zero must not reach the spectrum.
        let (mut acc, mut set) = setup(-50.0);
        acc.add_record(&hit(1, 1, 20.0, GE)).unwrap();
        acc.close_event(&mut set).unwrap();
        assert_eq!(set.get(SpectrumKind::Active, 0).unwrap().entries(), 1);
        assert_eq!(set.get(SpectrumKind::Smeared, 0).unwrap().entries(), 0);
    }

    #[test]
    fn test_smearing_uses_event_total() {
        let (mut acc, mut set) = setup(2.0);
        acc.add_record(&hit(3, 4, 300.0, GE)).unwrap();
        acc.add_record(&hit(3, 4, 700.0, GE)).unwrap();
        acc.close_event(&mut set).unwrap();

        let ch = acc.mapper().channel_of(3, 4).unwrap().get();
        let smeared = set.get(SpectrumKind::Smeared, ch).unwrap();
        assert_eq!(smeared.entries(), 1);
        assert_eq!(smeared.count_at(1002.0), 1);
    }

    #[test]
    fn test_out_of_range_dropped() {
        let (mut acc, mut set) = setup(0.0);
        acc.dispatch(Decoded::Record(hit(1, 1, 100.0, GE)), &mut set)
            .unwrap();
        acc.dispatch(Decoded::Record(hit(99, 1, 100.0, GE)), &mut set)
            .unwrap();
        acc.dispatch(Decoded::Record(hit(1, 1, 50.0, GE)), &mut set)
            .unwrap();
        assert_relative_eq!(acc.buffer().active()[0], 150.0);

        let stats = acc.finish(&mut set).unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.out_of_range, 1);
        assert_eq!(stats.events, 1);
        assert_eq!(set.get(SpectrumKind::Active, 0).unwrap().count_at(150.0), 1);
    }

    #[test]
    fn test_rejected_line_does_not_split_event() {
        let (mut acc, mut set) = setup(0.0);
        acc.dispatch(Decoded::Record(hit(1, 1, 100.0, GE)), &mut set)
            .unwrap();
        acc.reject_line();
        acc.dispatch(Decoded::Record(hit(1, 1, 200.0, GE)), &mut set)
            .unwrap();
        acc.dispatch(Decoded::Boundary, &mut set).unwrap();

        let active = set.get(SpectrumKind::Active, 0).unwrap();
        assert_eq!(active.entries(), 1);
        assert_eq!(active.count_at(300.0), 1);
        assert_eq!(acc.statistics().parse_errors, 1);
        assert_eq!(acc.statistics().rejected(), 1);
    }

    #[test]
    fn test_finish_closes_pending_event() {
        let (mut acc, mut set) = setup(0.0);
        acc.dispatch(Decoded::Boundary, &mut set).unwrap();
        acc.dispatch(Decoded::Record(hit(1, 1, 500.0, GE)), &mut set)
            .unwrap();
        let stats = acc.finish(&mut set).unwrap();
        assert_eq!(stats.events, 1);
        assert_eq!(set.get(SpectrumKind::Active, 0).unwrap().count_at(500.0), 1);
    }

    #[test]
    fn test_finish_without_records_fills_nothing() {
        let (mut acc, mut set) = setup(0.0);
        acc.dispatch(Decoded::Skip, &mut set).unwrap();
        acc.dispatch(Decoded::Boundary, &mut set).unwrap();
        let stats = acc.finish(&mut set).unwrap();
        assert_eq!(stats.events, 0);
        assert_eq!(stats.skipped_lines, 1);
        assert_eq!(set.total_entries(), 0);
    }

    #[test]
    fn test_random_source_failure_is_fatal() {
        let config = SortConfig::new();
        let mut acc = EventAccumulator::new(&config, Broken).unwrap();
        let mut set = SpectrumSet::new(64, &config.spectrum);
        acc.add_record(&hit(1, 1, 100.0, GE)).unwrap();
        let err = acc.dispatch(Decoded::Boundary, &mut set).unwrap_err();
        assert!(matches!(err, Error::RandomSource(_)));
    }

    #[test]
    fn test_random_source_unused_without_active_energy() {
        let config = SortConfig::new();
        let mut acc = EventAccumulator::new(&config, Broken).unwrap();
        let mut set = SpectrumSet::new(64, &config.spectrum);
        acc.add_record(&hit(1, 1, 100.0, BGO)).unwrap();
        acc.close_event(&mut set).unwrap();
        assert_eq!(set.get(SpectrumKind::Shield, 0).unwrap().entries(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SortConfig::new().with_boundary_prefix("");
        assert!(EventAccumulator::new(&config, Offset(0.0)).is_err());
    }

    #[test]
    fn test_statistics_merge() {
        let mut a = SortStatistics {
            lines: 10,
            records: 4,
            events: 2,
            parse_errors: 1,
            ..SortStatistics::default()
        };
        let b = SortStatistics {
            lines: 5,
            skipped_lines: 1,
            records: 2,
            events: 1,
            out_of_range: 2,
            ..SortStatistics::default()
        };
        a.merge(&b);
        assert_eq!(a.lines, 15);
        assert_eq!(a.records, 6);
        assert_eq!(a.events, 3);
        assert_eq!(a.rejected(), 3);
        assert_eq!(a.skipped_lines, 1);
    }
}

//! Channel mapping for segmented detector arrays.
//!
//! Each detector (clover) holds `segments_per_detector` crystals. GEANT4
//! reports a 1-based detector id and a 1-based segment id; the mapper turns
//! that pair into a flat, checked [`ChannelIndex`].

use std::collections::HashSet;

use crate::config::ChannelLayout;
use crate::{Error, Result};

/// Flat index of one crystal, guaranteed to lie in `[0, channel_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelIndex(usize);

impl ChannelIndex {
    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which volume of a crystal position a deposit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeKind {
    /// The germanium crystal itself.
    Active,
    /// The suppression shield surrounding it.
    Shield,
}

/// Maps (detector, segment) pairs to channels and classifies collection tags.
#[derive(Debug, Clone)]
pub struct ChannelMapper {
    channel_count: usize,
    segments_per_detector: usize,
    active_collections: HashSet<String>,
}

impl ChannelMapper {
    /// Creates a mapper from a validated layout.
    #[must_use]
    pub fn new(layout: &ChannelLayout) -> Self {
        Self {
            channel_count: layout.channel_count,
            segments_per_detector: layout.segments_per_detector,
            active_collections: layout.active_collections.iter().cloned().collect(),
        }
    }

    /// Total number of channels.
    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of segments (crystals) per detector.
    #[inline]
    #[must_use]
    pub fn segments_per_detector(&self) -> usize {
        self.segments_per_detector
    }

    /// Returns the channel for a 1-based detector and segment id.
    ///
    /// The index is `(detector - 1) * segments_per_detector + (segment - 1)`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfRange`] when either id is outside its range, so
    /// two distinct pairs can never share a channel.
    pub fn channel_of(&self, detector: i64, segment: i64) -> Result<ChannelIndex> {
        let out_of_range = || Error::OutOfRange {
            detector,
            segment,
            channel_count: self.channel_count,
        };

        let det = zero_based(detector).ok_or_else(out_of_range)?;
        let seg = zero_based(segment).ok_or_else(out_of_range)?;
        if seg >= self.segments_per_detector {
            return Err(out_of_range());
        }

        let index = det
            .checked_mul(self.segments_per_detector)
            .and_then(|base| base.checked_add(seg))
            .ok_or_else(out_of_range)?;
        if index >= self.channel_count {
            return Err(out_of_range());
        }
        Ok(ChannelIndex(index))
    }

    /// Classifies a collection tag. Only exact members of the active set are
    /// active; every other tag is shield.
    #[must_use]
    pub fn classify(&self, collection: &str) -> VolumeKind {
        if self.active_collections.contains(collection) {
            VolumeKind::Active
        } else {
            VolumeKind::Shield
        }
    }

    /// Iterates over every valid channel in ascending order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelIndex> {
        (0..self.channel_count).map(ChannelIndex)
    }

    /// Wraps a raw index after bounds checking it.
    #[must_use]
    pub fn index(&self, raw: usize) -> Option<ChannelIndex> {
        (raw < self.channel_count).then_some(ChannelIndex(raw))
    }
}

fn zero_based(id: i64) -> Option<usize> {
    id.checked_sub(1).and_then(|v| usize::try_from(v).ok())
}

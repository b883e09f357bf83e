//! Sort configuration.
//!
//! Loaded once at startup, validated once, then shared read-only by the
//! parser, the mapper, the resolution model and the spectra.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::resolution::SigmaModel;
use crate::{Error, Result};

/// Collection tags GEANT4 assigns to the HPGe crystals of the array.
pub const DEFAULT_ACTIVE_COLLECTIONS: [&str; 2] =
    ["CollectionGriffinForwardGe", "CollectionGriffinBackGe"];

/// Crystal layout of the detector array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLayout {
    /// Total number of crystals (detectors x segments).
    pub channel_count: usize,
    /// Crystals per detector (4 for a clover: blue, green, red, white).
    pub segments_per_detector: usize,
    /// Collection tags counted as active volume; anything else is shield.
    pub active_collections: Vec<String>,
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            channel_count: 64,
            segments_per_detector: 4,
            active_collections: DEFAULT_ACTIVE_COLLECTIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl ChannelLayout {
    /// Number of detectors implied by the layout.
    #[must_use]
    pub fn detector_count(&self) -> usize {
        if self.segments_per_detector == 0 {
            0
        } else {
            self.channel_count / self.segments_per_detector
        }
    }

    fn validate(&self) -> Result<()> {
        if self.channel_count == 0 {
            return Err(Error::Config("channel_count must be positive".into()));
        }
        if self.segments_per_detector == 0 {
            return Err(Error::Config("segments_per_detector must be positive".into()));
        }
        if !self.channel_count.is_multiple_of(self.segments_per_detector) {
            return Err(Error::Config(format!(
                "channel_count {} is not a multiple of segments_per_detector {}",
                self.channel_count, self.segments_per_detector
            )));
        }
        if self.active_collections.is_empty() {
            return Err(Error::Config(
                "at least one active collection tag is required".into(),
            ));
        }
        Ok(())
    }
}

/// Binning shared by every spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Number of equal-width bins.
    pub bins: usize,
    /// Upper edge of the domain in keV (exclusive).
    pub max_energy_kev: f64,
    /// Values must be strictly greater than this to be counted.
    pub min_count_threshold: f64,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            bins: 8192,
            max_energy_kev: 2048.0,
            min_count_threshold: 0.000_001,
        }
    }
}

impl SpectrumConfig {
    fn validate(&self) -> Result<()> {
        if self.bins == 0 {
            return Err(Error::Config("bins must be positive".into()));
        }
        if !self.max_energy_kev.is_finite() || self.max_energy_kev <= 0.0 {
            return Err(Error::Config(format!(
                "max_energy_kev must be positive and finite, got {}",
                self.max_energy_kev
            )));
        }
        if !self.min_count_threshold.is_finite() || self.min_count_threshold < 0.0 {
            return Err(Error::Config(format!(
                "min_count_threshold must be non-negative and finite, got {}",
                self.min_count_threshold
            )));
        }
        Ok(())
    }
}

/// Shape of the text input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputFormat {
    /// Lines at the start of the stream skipped regardless of content.
    pub header_lines: usize,
    /// Literal prefix of an event-boundary line.
    pub boundary_prefix: String,
}

impl Default for InputFormat {
    fn default() -> Self {
        Self {
            header_lines: 9,
            boundary_prefix: "Hits".to_string(),
        }
    }
}

/// Complete configuration for one sort run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    pub layout: ChannelLayout,
    pub resolution: SigmaModel,
    pub spectrum: SpectrumConfig,
    pub input: InputFormat,
}

impl SortConfig {
    /// Creates the reference configuration (64 crystals, 8192 bins over 0-2048 keV).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a JSON configuration string.
    ///
    /// # Errors
    /// Returns an error if the string is not valid JSON or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks every section. Called once before a run starts.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        self.spectrum.validate()?;
        self.resolution.validate(self.spectrum.max_energy_kev)?;
        if self.input.boundary_prefix.is_empty() {
            return Err(Error::Config("boundary_prefix must not be empty".into()));
        }
        Ok(())
    }

    /// Sets the channel layout.
    #[must_use]
    pub fn with_layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the sigma model.
    #[must_use]
    pub fn with_resolution(mut self, resolution: SigmaModel) -> Self {
        self.resolution = resolution;
        self
    }

    /// Sets the spectrum binning.
    #[must_use]
    pub fn with_spectrum(mut self, spectrum: SpectrumConfig) -> Self {
        self.spectrum = spectrum;
        self
    }

    /// Sets the number of header lines to skip.
    #[must_use]
    pub fn with_header_lines(mut self, lines: usize) -> Self {
        self.input.header_lines = lines;
        self
    }

    /// Sets the boundary-marker prefix.
    #[must_use]
    pub fn with_boundary_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.input.boundary_prefix = prefix.into();
        self
    }
}

//! Spectrum writers.

use crate::{Error, Result};
use log::info;
use serde::Serialize;
use specsort_core::{
    ChannelIndex, HistogramSink, SortConfig, SpectrumKind, SpectrumSet,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Magic bytes at the start of a binary spectrum file.
pub const BINARY_MAGIC: [u8; 4] = *b"SPSR";
/// Version of the binary layout.
pub const BINARY_VERSION: u32 = 1;

/// On-disk spectrum formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// One row per bin, one column per histogram.
    Csv,
    /// Little-endian header followed by raw `u64` counts.
    Binary,
    /// Named histograms as JSON.
    Json,
    /// One `[channels, bins]` dataset per kind (needs the `hdf5` feature).
    Hdf5,
}

impl OutputFormat {
    /// Picks a format from a file extension, if it is a known one.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "bin" | "dat" => Some(Self::Binary),
            "json" => Some(Self::Json),
            "h5" | "hdf5" => Some(Self::Hdf5),
            _ => None,
        }
    }
}

/// Writer for sorted spectra.
pub struct SpectrumWriter {
    writer: BufWriter<File>,
}

impl SpectrumWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes spectra as CSV.
    ///
    /// The first column is the low edge of each bin in keV, followed by one
    /// column per histogram (`Crys0` .. `Shield<N-1>`).
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_csv(&mut self, spectra: &SpectrumSet) -> Result<()> {
        write!(self.writer, "energy_kev")?;
        for (kind, channel, _) in spectra.iter() {
            write!(self.writer, ",{}", kind.histogram_name(channel))?;
        }
        writeln!(self.writer)?;

        let histograms: Vec<_> = spectra.iter().map(|(_, _, h)| h).collect();
        if let Some(first) = histograms.first() {
            for bin in 0..first.bins() {
                write!(self.writer, "{}", first.bin_low_edge(bin))?;
                for histogram in &histograms {
                    write!(self.writer, ",{}", histogram.count(bin))?;
                }
                writeln!(self.writer)?;
            }
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes spectra as binary data.
    ///
    /// Format: magic `SPSR`, u32 version, u32 channels, u32 bins, f64 max
    /// energy, then `3 x channels x bins` u64 counts in storage order
    /// (active, smeared, shield). All little-endian.
    ///
    /// # Errors
    /// Returns an error if writing fails or a dimension does not fit in u32.
    pub fn write_binary(&mut self, spectra: &SpectrumSet) -> Result<()> {
        let (bins, max) = spectra
            .iter()
            .next()
            .map_or((0, 0.0), |(_, _, h)| (h.bins(), h.max()));
        let to_u32 = |value: usize, name: &str| {
            u32::try_from(value)
                .map_err(|_| Error::InvalidFormat(format!("{name} {value} exceeds u32")))
        };

        self.writer.write_all(&BINARY_MAGIC)?;
        self.writer.write_all(&BINARY_VERSION.to_le_bytes())?;
        self.writer
            .write_all(&to_u32(spectra.channels(), "channel count")?.to_le_bytes())?;
        self.writer.write_all(&to_u32(bins, "bin count")?.to_le_bytes())?;
        self.writer.write_all(&max.to_le_bytes())?;
        for (_, _, histogram) in spectra.iter() {
            for count in histogram.counts() {
                self.writer.write_all(&count.to_le_bytes())?;
            }
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes spectra as JSON with each histogram's name and title.
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn write_json(&mut self, spectra: &SpectrumSet) -> Result<()> {
        let document = JsonSpectra::new(spectra);
        serde_json::to_writer(&mut self.writer, &document)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonSpectra<'a> {
    channels: usize,
    histograms: Vec<JsonHistogram<'a>>,
}

#[derive(Serialize)]
struct JsonHistogram<'a> {
    name: String,
    title: String,
    kind: SpectrumKind,
    channel: usize,
    bins: usize,
    max_energy_kev: f64,
    entries: u64,
    discarded: u64,
    counts: &'a [u64],
}

impl<'a> JsonSpectra<'a> {
    fn new(spectra: &'a SpectrumSet) -> Self {
        let histograms = spectra
            .iter()
            .map(|(kind, channel, h)| JsonHistogram {
                name: kind.histogram_name(channel),
                title: kind.histogram_title(channel),
                kind,
                channel,
                bins: h.bins(),
                max_energy_kev: h.max(),
                entries: h.entries(),
                discarded: h.discarded(),
                counts: h.counts(),
            })
            .collect();
        Self {
            channels: spectra.channels(),
            histograms,
        }
    }
}

/// Writes spectra to `path` in `format`.
///
/// # Errors
/// Returns an error if writing fails, or for [`OutputFormat::Hdf5`] when
/// built without the `hdf5` feature.
pub fn write_spectra<P: AsRef<Path>>(
    path: P,
    format: OutputFormat,
    spectra: &SpectrumSet,
) -> Result<()> {
    match format {
        OutputFormat::Csv => SpectrumWriter::create(path)?.write_csv(spectra),
        OutputFormat::Binary => SpectrumWriter::create(path)?.write_binary(spectra),
        OutputFormat::Json => SpectrumWriter::create(path)?.write_json(spectra),
        #[cfg(feature = "hdf5")]
        OutputFormat::Hdf5 => crate::hdf5::write_spectra_hdf5(path, spectra),
        #[cfg(not(feature = "hdf5"))]
        OutputFormat::Hdf5 => Err(Error::InvalidFormat(
            "HDF5 output requires the hdf5 feature".to_string(),
        )),
    }
}

/// Histogram sink that keeps spectra in memory and writes them on flush.
///
/// The file is written exactly once; flushing a second time is an error.
#[derive(Debug)]
pub struct SpectrumFileSink {
    spectra: SpectrumSet,
    path: PathBuf,
    format: OutputFormat,
    flushed: bool,
}

impl SpectrumFileSink {
    /// Creates a sink with empty spectra shaped by `config`.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P, format: OutputFormat, config: &SortConfig) -> Self {
        Self::with_spectra(
            path,
            format,
            SpectrumSet::new(config.layout.channel_count, &config.spectrum),
        )
    }

    /// Creates a sink around already-filled spectra.
    #[must_use]
    pub fn with_spectra<P: Into<PathBuf>>(
        path: P,
        format: OutputFormat,
        spectra: SpectrumSet,
    ) -> Self {
        Self {
            spectra,
            path: path.into(),
            format,
            flushed: false,
        }
    }

    /// Spectra filled so far.
    #[must_use]
    pub fn spectra(&self) -> &SpectrumSet {
        &self.spectra
    }

    /// Output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Output format.
    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Returns true once the spectra have been written.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Consumes the sink, returning its spectra.
    #[must_use]
    pub fn into_spectra(self) -> SpectrumSet {
        self.spectra
    }
}

impl HistogramSink for SpectrumFileSink {
    fn fill(&mut self, kind: SpectrumKind, channel: ChannelIndex, value: f64) {
        self.spectra.fill(kind, channel, value);
    }

    fn channel_count(&self) -> Option<usize> {
        Some(self.spectra.channels())
    }

    fn flush(&mut self) -> specsort_core::Result<()> {
        if self.flushed {
            return Err(specsort_core::Error::Sink(format!(
                "{} already written",
                self.path.display()
            )));
        }
        write_spectra(&self.path, self.format, &self.spectra)
            .map_err(|e| specsort_core::Error::Sink(format!("{}: {e}", self.path.display())))?;
        self.flushed = true;
        info!(
            "wrote {} histograms to {}",
            self.spectra.channels() * SpectrumKind::ALL.len(),
            self.path.display()
        );
        Ok(())
    }
}

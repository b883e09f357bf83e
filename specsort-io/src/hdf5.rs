//! HDF5 spectrum output (`NXdata`).
//!
//! Layout:
//!
//! ```text
//! /entry                 NXentry
//! /entry/spectra         NXdata, signal = "active"
//!     active   [channels, bins]  u64
//!     smeared  [channels, bins]  u64
//!     shield   [channels, bins]  u64
//!     energy   [bins + 1]        f64, keV bin edges
//! ```

use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{ArrayView1, ArrayView2};
use specsort_core::{SpectrumKind, SpectrumSet};
use std::path::Path;
use std::str::FromStr;

const SPECTRA_AXES: [&str; 2] = [".", "energy"];

/// Dataset options for spectrum output.
#[derive(Clone, Debug)]
pub struct SpectrumWriteOptions {
    pub compression: Option<u8>,
    pub shuffle: bool,
}

impl Default for SpectrumWriteOptions {
    fn default() -> Self {
        Self {
            compression: Some(1),
            shuffle: true,
        }
    }
}

/// Spectra read back from an HDF5 file.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumData {
    pub channels: usize,
    pub bins: usize,
    /// Bin edges in keV (`bins + 1` values).
    pub energy_kev: Vec<f64>,
    /// Row-major `[channels, bins]` counts per kind, in [`SpectrumKind::ALL`] order.
    pub counts: [Vec<u64>; 3],
}

impl SpectrumData {
    /// Counts of one channel and kind.
    #[must_use]
    pub fn channel(&self, kind: SpectrumKind, channel: usize) -> Option<&[u64]> {
        if channel >= self.channels {
            return None;
        }
        let start = channel * self.bins;
        self.counts[kind.ordinal()].get(start..start + self.bins)
    }
}

/// Writes spectra with default dataset options.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_spectra_hdf5<P: AsRef<Path>>(path: P, spectra: &SpectrumSet) -> Result<()> {
    write_spectra_hdf5_with(path, spectra, &SpectrumWriteOptions::default())
}

/// Writes spectra to an HDF5/NeXus file.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_spectra_hdf5_with<P: AsRef<Path>>(
    path: P,
    spectra: &SpectrumSet,
    options: &SpectrumWriteOptions,
) -> Result<()> {
    let channels = spectra.channels();
    let (bins, edges) = spectra.iter().next().map_or((0, Vec::new()), |(_, _, h)| {
        let edges = (0..=h.bins()).map(|i| h.bin_low_edge(i)).collect();
        (h.bins(), edges)
    });

    let file = File::create(path)?;
    set_attr_str_file(&file, "specsort_format_version", "0.1")?;

    let entry = file.create_group("entry")?;
    set_attr_str_group(&entry, "NX_class", "NXentry")?;

    let group = entry.create_group("spectra")?;
    set_attr_str_group(&group, "NX_class", "NXdata")?;
    set_attr_str_group(&group, "signal", SpectrumKind::Active.label())?;
    set_axes_attr(&group, &SPECTRA_AXES)?;

    for kind in SpectrumKind::ALL {
        let counts: Vec<u64> = spectra
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .flat_map(|(_, _, h)| h.counts().iter().copied())
            .collect();
        let view = ArrayView2::from_shape((channels, bins), counts.as_slice())
            .map_err(|e| Error::InvalidFormat(format!("{} shape mismatch: {e}", kind.label())))?;
        let chunk = (bins > 0).then_some([1, bins]);
        let dataset = create_fixed_dataset::<u64, _>(
            &group,
            kind.label(),
            (channels, bins),
            chunk,
            options.compression,
            options.shuffle,
        )?;
        set_dataset_units(&dataset, "count")?;
        dataset.write(view)?;
    }

    let energy = create_fixed_dataset::<f64, _>(
        &group,
        "energy",
        (edges.len(),),
        None,
        None,
        false,
    )?;
    set_dataset_units(&energy, "keV")?;
    energy.write(ArrayView1::from(edges.as_slice()))?;

    Ok(())
}

/// Reads spectra written by [`write_spectra_hdf5`].
///
/// # Errors
/// Returns an error if HDF5 I/O fails or datasets are missing or mis-shaped.
pub fn read_spectra_hdf5<P: AsRef<Path>>(path: P) -> Result<SpectrumData> {
    let file = File::open(path)?;
    let group = file.group("entry")?.group("spectra")?;

    let read_kind = |kind: SpectrumKind| -> Result<(Vec<usize>, Vec<u64>)> {
        let dataset = group.dataset(kind.label())?;
        Ok((dataset.shape(), dataset.read_raw::<u64>()?))
    };
    let (shape, active) = read_kind(SpectrumKind::Active)?;
    let [channels, bins] = shape[..] else {
        return Err(Error::InvalidFormat(
            "spectrum datasets must be 2-D (channel, energy)".to_string(),
        ));
    };
    let (smeared_shape, smeared) = read_kind(SpectrumKind::Smeared)?;
    let (shield_shape, shield) = read_kind(SpectrumKind::Shield)?;
    if smeared_shape != shape || shield_shape != shape {
        return Err(Error::InvalidFormat(
            "spectrum datasets differ in shape".to_string(),
        ));
    }

    let energy_kev = read_dataset_vec::<f64>(&group, "energy")?;
    Ok(SpectrumData {
        channels,
        bins,
        energy_kev,
        counts: [active, smeared, shield],
    })
}

fn create_fixed_dataset<T: H5Type, S>(
    group: &Group,
    name: &str,
    shape: S,
    chunk: Option<[usize; 2]>,
    compression: Option<u8>,
    shuffle: bool,
) -> Result<Dataset>
where
    S: Into<hdf5::Extents>,
{
    let mut builder = group.new_dataset::<T>().shape(shape);

    if let Some(chunk_shape) = chunk {
        builder = builder.chunk(chunk_shape);
    }

    if let Some(level) = compression {
        builder = builder.deflate(level);
    }

    if shuffle {
        builder = builder.shuffle();
    }

    Ok(builder.create(name)?)
}

fn set_axes_attr(group: &Group, axes: &[&str]) -> Result<()> {
    let values: Vec<VarLenUnicode> = axes
        .iter()
        .map(|axis| to_var_len_unicode(axis))
        .collect::<Result<Vec<_>>>()?;
    let attr = group
        .new_attr::<VarLenUnicode>()
        .shape((values.len(),))
        .create("axes")?;
    attr.write(ArrayView1::from(values.as_slice()))?;
    Ok(())
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

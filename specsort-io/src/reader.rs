//! Memory-mapped readers for simulation output.
//!

use crate::Result;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A memory-mapped file reader.
///
/// Uses memmap2 to access the file contents without reading the whole
/// file into a buffer. The mapping is released when the reader is dropped,
/// including when a sort aborts part-way.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the reader was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterates over the lines of the file.
    #[must_use]
    pub fn lines(&self) -> TextLines<'_> {
        TextLines::new(self.as_bytes())
    }
}

/// Iterator over `\n`-terminated lines of a byte buffer.
///
/// A trailing `\r` is stripped; a final newline does not produce an extra
/// empty line. Lines that are not valid UTF-8 are yielded as errors so the
/// caller can count and skip them.
#[derive(Debug, Clone)]
pub struct TextLines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TextLines<'a> {
    /// Creates a line iterator over `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Byte offset of the next line.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Returns the next raw line without UTF-8 validation.
    pub fn next_raw(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let (line, advance) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.pos += advance;
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }

    /// Converts into an iterator over raw lines.
    pub fn raw(mut self) -> impl Iterator<Item = &'a [u8]> {
        std::iter::from_fn(move || self.next_raw())
    }
}

impl<'a> Iterator for TextLines<'a> {
    type Item = std::result::Result<&'a str, std::str::Utf8Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_raw().map(std::str::from_utf8)
    }
}

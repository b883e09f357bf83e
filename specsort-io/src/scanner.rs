//! Input scanner.
//!
//! Classifies every line of an input without sorting it, for a quick look
//! at a simulation file before committing to a full run.

use crate::reader::TextLines;
use serde::{Deserialize, Serialize};
use specsort_core::{Decoded, InputFormat};
use specsort_g4::RecordParser;

/// Line counts of a scanned input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSummary {
    /// All lines, header included.
    pub lines: u64,
    /// Header lines skipped.
    pub header_lines: u64,
    /// Event-boundary lines.
    pub boundaries: u64,
    /// Lines that decode as records.
    pub records: u64,
    /// Blank lines after the header.
    pub blank_lines: u64,
    /// Lines that fail to decode.
    pub malformed: u64,
}

/// Scanner for simulation text input.
pub struct InputScanner;

impl InputScanner {
    /// Scans `data` with the given input format.
    ///
    /// A record is counted whether or not its detector and segment map to a
    /// channel; mapping is the sort's concern.
    #[must_use]
    pub fn scan(data: &[u8], format: &InputFormat) -> InputSummary {
        let mut parser = RecordParser::new(format);
        let mut summary = InputSummary::default();

        for raw in TextLines::new(data).raw() {
            summary.lines += 1;
            let in_header = parser.lines_seen() < format.header_lines;
            match parser.decode_bytes(raw) {
                Ok(Decoded::Skip) if in_header => summary.header_lines += 1,
                Ok(Decoded::Skip) => summary.blank_lines += 1,
                Ok(Decoded::Boundary) => summary.boundaries += 1,
                Ok(Decoded::Record(_)) => summary.records += 1,
                Err(_) => summary.malformed += 1,
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MappedFileReader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_scan_counts() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "run header\n\
             Hits: 0\n\
             1 1 100 0 0 0 0 phot CollectionGriffinForwardGe\n\
             \n\
             not a record\n\
             99 1 100 0 0 0 0 phot CollectionGriffinForwardGe\n\
             Hits: 1\n"
        )
        .unwrap();
        file.flush().unwrap();

        let reader = MappedFileReader::open(file.path()).unwrap();
        let format = InputFormat {
            header_lines: 1,
            ..InputFormat::default()
        };
        let summary = InputScanner::scan(reader.as_bytes(), &format);

        assert_eq!(summary.lines, 7);
        assert_eq!(summary.header_lines, 1);
        assert_eq!(summary.boundaries, 2);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.blank_lines, 1);
        assert_eq!(summary.malformed, 1);
    }

    #[test]
    fn test_scan_empty() {
        let summary = InputScanner::scan(b"", &InputFormat::default());
        assert_eq!(summary, InputSummary::default());
    }
}

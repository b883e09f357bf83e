//! Line parser for GEANT4 simulation output.

use crate::{Error, Result};
use specsort_core::{Decoded, InputFormat, InteractionRecord};

/// Whitespace-separated fields in a record line.
pub const FIELD_COUNT: usize = 9;

/// Parses one record line:
///
/// ```text
/// <detector> <segment> <energy keV> <time s> <x mm> <y mm> <z mm> <process> <collection>
/// ```
///
/// `line` is the 1-based line number used in error messages.
///
/// # Errors
/// Returns [`Error::Parse`] for a wrong field count, a field that does not
/// parse, or a non-finite number.
pub fn parse_record(text: &str, line: usize) -> Result<InteractionRecord> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(Error::Parse {
            line,
            reason: format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
        });
    }

    let int = |index: usize, name: &str| -> Result<i64> {
        fields[index].parse::<i64>().map_err(|e| Error::Parse {
            line,
            reason: format!("{name} '{}': {e}", fields[index]),
        })
    };
    let float = |index: usize, name: &str| -> Result<f64> {
        let value = fields[index].parse::<f64>().map_err(|e| Error::Parse {
            line,
            reason: format!("{name} '{}': {e}", fields[index]),
        })?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(Error::Parse {
                line,
                reason: format!("{name} is not finite: {}", fields[index]),
            })
        }
    };

    Ok(InteractionRecord {
        detector: int(0, "detector")?,
        segment: int(1, "segment")?,
        energy_kev: float(2, "energy")?,
        time_s: float(3, "time")?,
        position_mm: [float(4, "x")?, float(5, "y")?, float(6, "z")?],
        process: fields[7].to_string(),
        collection: fields[8].to_string(),
    })
}

/// Stateful line classifier.
///
/// The first `header_lines` lines are skipped whatever they contain. After
/// that a line starting with the boundary prefix ends an event, a blank line
/// is skipped, and anything else must be a record.
#[derive(Debug, Clone)]
pub struct RecordParser {
    header_lines: usize,
    boundary_prefix: String,
    line: usize,
}

impl RecordParser {
    /// Creates a parser for an input format.
    #[must_use]
    pub fn new(format: &InputFormat) -> Self {
        Self {
            header_lines: format.header_lines,
            boundary_prefix: format.boundary_prefix.clone(),
            line: 0,
        }
    }

    /// Creates a parser for input that starts past the header.
    ///
    /// `first_line` is the 1-based number of the next line, for messages.
    #[must_use]
    pub fn resume(format: &InputFormat, first_line: usize) -> Self {
        Self {
            header_lines: 0,
            boundary_prefix: format.boundary_prefix.clone(),
            line: first_line.saturating_sub(1),
        }
    }

    /// Number of lines decoded so far.
    #[must_use]
    pub fn lines_seen(&self) -> usize {
        self.line
    }

    /// Returns true if `text` is an event-boundary line.
    #[inline]
    #[must_use]
    pub fn is_boundary(&self, text: &str) -> bool {
        text.starts_with(&self.boundary_prefix)
    }

    /// Decodes the next line of the stream.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] for a malformed data line. The caller is
    /// expected to count and skip it.
    pub fn decode(&mut self, text: &str) -> Result<Decoded> {
        self.line += 1;
        if self.line <= self.header_lines {
            return Ok(Decoded::Skip);
        }
        self.classify(text)
    }

    /// Decodes the next line from raw bytes.
    ///
    /// Header lines are skipped and boundaries recognised on the raw bytes
    /// before any UTF-8 check, so neither a binary preamble nor stray bytes
    /// after the boundary prefix affect event grouping.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] for a malformed data line or one that is not
    /// valid UTF-8.
    pub fn decode_bytes(&mut self, raw: &[u8]) -> Result<Decoded> {
        self.line += 1;
        if self.line <= self.header_lines {
            return Ok(Decoded::Skip);
        }
        if raw.starts_with(self.boundary_prefix.as_bytes()) {
            return Ok(Decoded::Boundary);
        }
        let text = std::str::from_utf8(raw).map_err(|e| Error::Parse {
            line: self.line,
            reason: format!("invalid UTF-8: {e}"),
        })?;
        self.classify(text)
    }

    fn classify(&self, text: &str) -> Result<Decoded> {
        if self.is_boundary(text) {
            return Ok(Decoded::Boundary);
        }
        if text.trim().is_empty() {
            return Ok(Decoded::Skip);
        }
        parse_record(text, self.line).map(Decoded::Record)
    }
}

//! Event-aligned sharding of the input body.
//!
//! A shard is a byte range of the body that starts either right after the
//! header or on a boundary line, so no event is ever split between two
//! shards. Shards can then be sorted independently and their spectra
//! merged.

use crate::reader::TextLines;
use specsort_core::InputFormat;

/// A contiguous, event-aligned range of input lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventShard {
    /// Byte offset of the first line (inclusive).
    pub start_offset: usize,
    /// Byte offset past the last line (exclusive).
    pub end_offset: usize,
    /// 1-based line number of the first line.
    pub first_line: usize,
}

impl EventShard {
    /// Number of bytes in this shard.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.end_offset - self.start_offset
    }

    /// Shard contents within the full input.
    #[must_use]
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start_offset..self.end_offset]
    }
}

/// Result of splitting an input into shards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardedInput {
    /// Header lines actually present (fewer than configured for a short file).
    pub header_lines: usize,
    /// Byte offset where the body starts.
    pub body_offset: usize,
    /// Shards covering the body, in input order.
    pub shards: Vec<EventShard>,
}

/// Splits `data` into event-aligned shards of roughly `target_bytes`.
///
/// The header is consumed first. A new shard is started at the first
/// boundary line found once the current shard has reached `target_bytes`;
/// a single event larger than the target therefore stays whole. Shards are
/// contiguous and cover the body exactly.
#[must_use]
pub fn event_shards(data: &[u8], format: &InputFormat, target_bytes: usize) -> ShardedInput {
    let target = target_bytes.max(1);
    let prefix = format.boundary_prefix.as_bytes();
    let mut lines = TextLines::new(data);

    let mut header_lines = 0;
    while header_lines < format.header_lines && lines.next_raw().is_some() {
        header_lines += 1;
    }
    let body_offset = lines.offset();

    let mut shards = Vec::new();
    let mut start = body_offset;
    let mut first_line = header_lines + 1;
    let mut line_number = header_lines;

    loop {
        let offset = lines.offset();
        let Some(raw) = lines.next_raw() else { break };
        line_number += 1;

        if raw.starts_with(prefix) && offset > start && offset - start >= target {
            shards.push(EventShard {
                start_offset: start,
                end_offset: offset,
                first_line,
            });
            start = offset;
            first_line = line_number;
        }
    }

    if data.len() > start {
        shards.push(EventShard {
            start_offset: start,
            end_offset: data.len(),
            first_line,
        });
    }

    ShardedInput {
        header_lines,
        body_offset,
        shards,
    }
}

//! specsort-g4: Grammar of the GEANT4 gamma-array simulation output.
//!
//! The simulation writes a fixed-size preamble followed by one line per
//! energy deposit, with a `Hits: <n>` line ending each event:
//!
//! ```text
//! Hits: 1
//! 1 1 1173.228 1.2e-09 -12.5 40.25 118.0 phot CollectionGriffinForwardGe
//! 1 1 159.71 1.3e-09 -11.0 41.00 120.5 compt CollectionGriffinForwardGe
//! Hits: 2
//! ```
//!
//! # Key Components
//!
//! - [`RecordParser`] - Stateful line classifier (header, boundary, record)
//! - [`parse_record`] - Nine-field record decoder

mod error;
mod parser;

pub use error::{Error, Result};
pub use parser::{parse_record, RecordParser, FIELD_COUNT};

// Re-export core types for convenience
pub use specsort_core::{Decoded, InputFormat, InteractionRecord};

//! Interaction records and the decode result fed to the accumulator.

/// One energy deposit reported by the simulation.
///
/// Only the ids, the energy and the collection tag drive the sort; the
/// remaining fields are carried for filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRecord {
    /// 1-based detector (clover) id.
    pub detector: i64,
    /// 1-based segment id; a segment is one crystal of the detector.
    pub segment: i64,
    /// Deposited energy in keV.
    pub energy_kev: f64,
    /// Time of the interaction in seconds.
    pub time_s: f64,
    /// Interaction position in mm.
    pub position_mm: [f64; 3],
    /// GEANT4 process name (e.g. `compt`, `phot`).
    pub process: String,
    /// Sensitive-detector collection the hit belongs to.
    pub collection: String,
}

impl InteractionRecord {
    /// Creates a record with zeroed time and position.
    pub fn new(
        detector: i64,
        segment: i64,
        energy_kev: f64,
        process: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            segment,
            energy_kev,
            time_s: 0.0,
            position_mm: [0.0; 3],
            process: process.into(),
            collection: collection.into(),
        }
    }
}

/// Classification of one input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// End of the current event.
    Boundary,
    /// An energy deposit belonging to the current event.
    Record(InteractionRecord),
    /// Header or blank line; carries no data.
    Skip,
}

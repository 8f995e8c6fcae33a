use thiserror::Error;

/// Malformed configuration, detected before
/// any event is simulated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("rate map: {0}")]
    RateMap(String),
    #[error("migration matrix: {0}")]
    MigrationMatrix(String),
    #[error("population {population} out of range for {num_populations} populations")]
    PopulationOutOfRange {
        population: usize,
        num_populations: usize,
    },
    #[error("bad population configuration: {0}")]
    PopulationConfiguration(String),
    #[error("demographic events must be sorted by time: {previous} then {next}")]
    UnsortedDemographicEvents { previous: f64, next: f64 },
    #[error("bad demographic event at time {time}: {reason}")]
    DemographicEvent { time: f64, reason: String },
    #[error("bad samples: {0}")]
    Samples(String),
    #[error("bad simulation model: {0}")]
    Model(String),
    #[error("bad pedigree: {0}")]
    Pedigree(String),
    #[error("bad starting tables: {0}")]
    StartingTables(String),
    #[error("incompatible options: {0}")]
    Incompatible(String),
}

/// A request outside of the valid domain of a component.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("genetic position {mass} outside of [0, {total}]")]
    GeneticPosition { mass: f64, total: f64 },
    #[error("physical position {position} outside of [0, {sequence_length}]")]
    PhysicalPosition { position: f64, sequence_length: f64 },
    #[error("invalid slice [{start}, {end}) of a map of length {sequence_length}")]
    Slice {
        start: f64,
        end: f64,
        sequence_length: f64,
    },
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
    #[error("operation not valid in state {0:?}")]
    BadState(crate::SimulationState),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

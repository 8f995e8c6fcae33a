//! Simulation of the ancestral recombination graph of a
//! sample of genomes, backwards in time.
//!
//! A [`SimulationBuilder`] checks a setup and produces a
//! [`SimulationConfig`]. A [`Simulator`] runs it, writing
//! nodes, edges and migrations into [`GenealogyTables`].
//!
//! ```
//! use ancestry_sim::{RateMap, SimulationBuilder, SimulationState, Simulator};
//!
//! let config = SimulationBuilder::new()
//!     .num_samples(5)
//!     .reference_size(100.0)
//!     .recombination_map(RateMap::uniform(1000.0, 1e-4, false).unwrap())
//!     .build()
//!     .unwrap();
//! let mut sim = Simulator::new(config, 42);
//! assert_eq!(sim.run(f64::INFINITY).unwrap(), SimulationState::Completed);
//! let tables = sim.finalize().unwrap();
//! assert!(tables.num_edges() > 0);
//! ```

mod config;
mod demography;
mod error;
mod fenwick;
mod flags;
mod lineages;
mod model;
mod overlap;
mod pedigree;
mod population;
mod rate_map;
mod simulator;
mod special;
mod tables;

#[cfg(test)]
mod test_utils;

pub use config::{SimulationBuilder, SimulationConfig};
pub use demography::{DemographicEvent, PopulationConfiguration, Sample};
pub use error::{DomainError, SimulationError, ValidationError};
pub use flags::{NodeFlags, SimulationOptions};
pub use lineages::{Cut, LineageId, LineagePool, Segment, SegmentId};
pub use model::SimulationModel;
pub use overlap::OverlapCounts;
pub use pedigree::{Individual, Pedigree};
pub use population::{MigrationMatrix, Population, PopulationState, MIN_POPULATION_SIZE};
pub use rate_map::RateMap;
pub use simulator::{EventCounts, Simulator};
pub use tables::{Edge, EdgeTable, GenealogyTables, Migration, MigrationTable, NodeTable};

/// Index of a node in [`GenealogyTables`].
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct NodeId(usize);

impl nohash::IsEnabled for NodeId {}

impl NodeId {
    pub fn as_index(&self) -> usize {
        self.0
    }
}

impl From<NodeId> for usize {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// Where a [`Simulator`] is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    /// Set up, not yet run.
    Idle,
    /// Inside of a call to `run`, or a run that
    /// failed with an error.
    Running,
    /// Stopped at an end time with ancestry left
    /// to resolve.
    Paused,
    /// Every position has found its most recent
    /// common ancestor.
    Completed,
}

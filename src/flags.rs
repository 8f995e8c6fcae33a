// This module encapsulates the bitflags API
// so that we don't leak details that may
// affect semver later on.

use bitflags::bitflags;

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
    struct NodeBitFlags: u32 {
        const EMPTY = 0;
        const IS_SAMPLE = 1;
        const RECOMBINATION = 1 << 17;
        const COMMON_ANCESTOR = 1 << 18;
        const GENE_CONVERSION = 1 << 19;
        const CENSUS = 1 << 20;
        const UNFINISHED = 1 << 21;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    struct SimulationBitFlags: u32 {
        const EMPTY = 0;
        const RECORD_FULL_ARG = 1 << 1;
        const RECORD_MIGRATIONS = 1 << 2;
    }
}

/// Flags attached to each node of the output genealogy.
///
/// The sample bit matches the tskit convention (`1`);
/// event bits live in the upper half so they never
/// collide with it.
#[repr(transparent)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeFlags(NodeBitFlags);

impl NodeFlags {
    pub fn sample() -> Self {
        Self(NodeBitFlags::IS_SAMPLE)
    }

    pub fn recombination() -> Self {
        Self(NodeBitFlags::RECOMBINATION)
    }

    pub fn common_ancestor() -> Self {
        Self(NodeBitFlags::COMMON_ANCESTOR)
    }

    pub fn gene_conversion() -> Self {
        Self(NodeBitFlags::GENE_CONVERSION)
    }

    pub fn census() -> Self {
        Self(NodeBitFlags::CENSUS)
    }

    pub fn unfinished() -> Self {
        Self(NodeBitFlags::UNFINISHED)
    }

    pub fn is_sample(&self) -> bool {
        self.0.contains(NodeBitFlags::IS_SAMPLE)
    }

    pub fn is_recombination(&self) -> bool {
        self.0.contains(NodeBitFlags::RECOMBINATION)
    }

    pub fn is_common_ancestor(&self) -> bool {
        self.0.contains(NodeBitFlags::COMMON_ANCESTOR)
    }

    pub fn is_gene_conversion(&self) -> bool {
        self.0.contains(NodeBitFlags::GENE_CONVERSION)
    }

    pub fn is_census(&self) -> bool {
        self.0.contains(NodeBitFlags::CENSUS)
    }

    pub fn is_unfinished(&self) -> bool {
        self.0.contains(NodeBitFlags::UNFINISHED)
    }

    /// The raw bits, e.g. for export to tskit.
    pub fn bits(&self) -> u32 {
        self.0.bits()
    }
}

/// Recording options for a simulation.
#[repr(transparent)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct SimulationOptions(SimulationBitFlags);

impl SimulationOptions {
    pub fn with_full_arg(self) -> Self {
        Self(self.0 | SimulationBitFlags::RECORD_FULL_ARG)
    }

    pub fn with_migrations(self) -> Self {
        Self(self.0 | SimulationBitFlags::RECORD_MIGRATIONS)
    }

    pub fn record_full_arg(&self) -> bool {
        self.0.contains(SimulationBitFlags::RECORD_FULL_ARG)
    }

    pub fn record_migrations(&self) -> bool {
        self.0.contains(SimulationBitFlags::RECORD_MIGRATIONS)
    }
}

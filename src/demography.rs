use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::SimulationModel;

/// A sampled genome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub population: usize,
    pub time: f64,
}

impl Sample {
    pub fn new(population: usize, time: f64) -> Self {
        Self { population, time }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PopulationConfiguration {
    /// `None` means the reference size.
    #[serde(default)]
    pub initial_size: Option<f64>,
    #[serde(default)]
    pub growth_rate: f64,
    /// Number of contemporary samples to take from
    /// this population.
    #[serde(default)]
    pub sample_size: usize,
}

impl PopulationConfiguration {
    pub fn new(initial_size: Option<f64>, growth_rate: f64, sample_size: usize) -> Self {
        Self {
            initial_size,
            growth_rate,
            sample_size,
        }
    }
}

/// Something that happens at a fixed time.
///
/// Events are applied in time order, ties in the
/// order in which they were given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DemographicEvent {
    /// Start a new epoch for one population
    /// (or all, if `population` is `None`).
    PopulationParametersChange {
        time: f64,
        #[serde(default)]
        initial_size: Option<f64>,
        #[serde(default)]
        growth_rate: Option<f64>,
        #[serde(default)]
        population: Option<usize>,
    },
    /// Change one entry of the migration matrix, or
    /// all off-diagonal entries.
    MigrationRateChange {
        time: f64,
        rate: f64,
        #[serde(default)]
        matrix_index: Option<(usize, usize)>,
    },
    /// Move each lineage in `source` to `dest`
    /// with probability `proportion`.
    MassMigration {
        time: f64,
        source: usize,
        dest: usize,
        proportion: f64,
    },
    /// Each lineage in `population` takes part with
    /// probability `proportion` in a single merger.
    SimpleBottleneck {
        time: f64,
        population: usize,
        proportion: f64,
    },
    /// Compress `strength` units of coalescent time in
    /// `population` into an instant.
    InstantaneousBottleneck {
        time: f64,
        population: usize,
        strength: f64,
    },
    /// Record a node for every extant lineage.
    CensusEvent { time: f64 },
    ModelChange { time: f64, model: SimulationModel },
}

impl DemographicEvent {
    pub fn time(&self) -> f64 {
        match *self {
            DemographicEvent::PopulationParametersChange { time, .. } => time,
            DemographicEvent::MigrationRateChange { time, .. } => time,
            DemographicEvent::MassMigration { time, .. } => time,
            DemographicEvent::SimpleBottleneck { time, .. } => time,
            DemographicEvent::InstantaneousBottleneck { time, .. } => time,
            DemographicEvent::CensusEvent { time } => time,
            DemographicEvent::ModelChange { time, .. } => time,
        }
    }

    /// Checks that only need the event itself and the
    /// number of populations.
    pub fn validate(&self, num_populations: usize) -> Result<(), ValidationError> {
        let time = self.time();
        if !(time >= 0.0 && time.is_finite()) {
            return Err(ValidationError::DemographicEvent {
                time,
                reason: "time must be finite and non-negative".to_string(),
            });
        }
        let check_population = |population: usize| {
            if population >= num_populations {
                Err(ValidationError::PopulationOutOfRange {
                    population,
                    num_populations,
                })
            } else {
                Ok(())
            }
        };
        let check_proportion = |proportion: f64| {
            if !(0.0..=1.0).contains(&proportion) {
                Err(ValidationError::DemographicEvent {
                    time,
                    reason: format!("proportion {proportion} outside of [0, 1]"),
                })
            } else {
                Ok(())
            }
        };
        match *self {
            DemographicEvent::PopulationParametersChange {
                initial_size,
                growth_rate,
                population,
                ..
            } => {
                if initial_size.is_none() && growth_rate.is_none() {
                    return Err(ValidationError::DemographicEvent {
                        time,
                        reason: "one of initial_size or growth_rate is required".to_string(),
                    });
                }
                if let Some(p) = population {
                    check_population(p)?;
                }
            }
            DemographicEvent::MigrationRateChange { matrix_index, .. } => {
                if let Some((j, k)) = matrix_index {
                    check_population(j)?;
                    check_population(k)?;
                }
            }
            DemographicEvent::MassMigration {
                source,
                dest,
                proportion,
                ..
            } => {
                check_population(source)?;
                check_population(dest)?;
                if source == dest {
                    return Err(ValidationError::DemographicEvent {
                        time,
                        reason: format!("mass migration from {source} to itself"),
                    });
                }
                check_proportion(proportion)?;
            }
            DemographicEvent::SimpleBottleneck {
                population,
                proportion,
                ..
            } => {
                check_population(population)?;
                check_proportion(proportion)?;
            }
            DemographicEvent::InstantaneousBottleneck {
                population,
                strength,
                ..
            } => {
                check_population(population)?;
                if !(strength >= 0.0 && strength.is_finite()) {
                    return Err(ValidationError::DemographicEvent {
                        time,
                        reason: format!("bottleneck strength {strength} must be non-negative"),
                    });
                }
            }
            DemographicEvent::CensusEvent { .. } => (),
            DemographicEvent::ModelChange { .. } => (),
        }
        Ok(())
    }
}

/// Events must be sorted by time.
pub(crate) fn check_sorted(events: &[DemographicEvent]) -> Result<(), ValidationError> {
    for w in events.windows(2) {
        if w[1].time() < w[0].time() {
            return Err(ValidationError::UnsortedDemographicEvents {
                previous: w[0].time(),
                next: w[1].time(),
            });
        }
    }
    Ok(())
}

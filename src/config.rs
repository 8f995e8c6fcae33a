use crate::demography::{check_sorted, DemographicEvent, PopulationConfiguration, Sample};
use crate::error::ValidationError;
use crate::flags::SimulationOptions;
use crate::model::SimulationModel;
use crate::pedigree::Pedigree;
use crate::population::{MigrationMatrix, Population, PopulationState};
use crate::rate_map::RateMap;
use crate::tables::GenealogyTables;

/// A validated, immutable simulation setup.
///
/// Built with [`SimulationBuilder`].
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    samples: Vec<Sample>,
    recombination_map: RateMap,
    populations: PopulationState,
    demographic_events: Vec<DemographicEvent>,
    model: SimulationModel,
    pedigree: Option<Pedigree>,
    gene_conversion_rate: f64,
    gene_conversion_track_length: f64,
    start_time: f64,
    starting_tables: Option<GenealogyTables>,
    ploidy: usize,
    options: SimulationOptions,
    num_labels: usize,
}

impl SimulationConfig {
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn recombination_map(&self) -> &RateMap {
        &self.recombination_map
    }

    pub fn sequence_length(&self) -> f64 {
        self.recombination_map.sequence_length()
    }

    /// Population parameters at the start time.
    pub fn populations(&self) -> &PopulationState {
        &self.populations
    }

    pub fn num_populations(&self) -> usize {
        self.populations.num_populations()
    }

    pub fn demographic_events(&self) -> &[DemographicEvent] {
        &self.demographic_events
    }

    pub fn model(&self) -> SimulationModel {
        self.model
    }

    pub fn pedigree(&self) -> Option<&Pedigree> {
        self.pedigree.as_ref()
    }

    pub fn gene_conversion_rate(&self) -> f64 {
        self.gene_conversion_rate
    }

    pub fn gene_conversion_track_length(&self) -> f64 {
        self.gene_conversion_track_length
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn starting_tables(&self) -> Option<&GenealogyTables> {
        self.starting_tables.as_ref()
    }

    pub fn ploidy(&self) -> usize {
        self.ploidy
    }

    pub fn options(&self) -> SimulationOptions {
        self.options
    }

    /// 2 if any model is a sweep, else 1.
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }
}

/// Collects the parts of a simulation and checks
/// them against each other.
///
/// ```
/// use ancestry_sim::{RateMap, SimulationBuilder};
///
/// let config = SimulationBuilder::new()
///     .num_samples(10)
///     .reference_size(1000.0)
///     .recombination_map(RateMap::uniform(1e5, 1e-8, false).unwrap())
///     .build()
///     .unwrap();
/// assert_eq!(config.samples().len(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct SimulationBuilder {
    samples: Vec<Sample>,
    recombination_map: Option<RateMap>,
    population_configurations: Vec<PopulationConfiguration>,
    migration_matrix: Option<Vec<Vec<f64>>>,
    demographic_events: Vec<DemographicEvent>,
    model: SimulationModel,
    pedigree: Option<Pedigree>,
    gene_conversion_rate: f64,
    gene_conversion_track_length: f64,
    start_time: Option<f64>,
    starting_tables: Option<GenealogyTables>,
    ploidy: usize,
    reference_size: f64,
    options: SimulationOptions,
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self {
            samples: vec![],
            recombination_map: None,
            population_configurations: vec![],
            migration_matrix: None,
            demographic_events: vec![],
            model: SimulationModel::Hudson,
            pedigree: None,
            gene_conversion_rate: 0.0,
            gene_conversion_track_length: 1.0,
            start_time: None,
            starting_tables: None,
            ploidy: 2,
            reference_size: 1.0,
            options: SimulationOptions::default(),
        }
    }
}

fn validation<T>(msg: impl Into<String>, f: fn(String) -> ValidationError) -> Result<T, ValidationError> {
    Err(f(msg.into()))
}

impl SimulationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(mut self, samples: Vec<Sample>) -> Self {
        self.samples = samples;
        self
    }

    /// `n` contemporary samples from population 0.
    pub fn num_samples(mut self, n: usize) -> Self {
        self.samples = vec![Sample::new(0, 0.0); n];
        self
    }

    pub fn recombination_map(mut self, map: RateMap) -> Self {
        self.recombination_map = Some(map);
        self
    }

    pub fn population_configurations(mut self, configurations: Vec<PopulationConfiguration>) -> Self {
        self.population_configurations = configurations;
        self
    }

    pub fn migration_matrix(mut self, matrix: Vec<Vec<f64>>) -> Self {
        self.migration_matrix = Some(matrix);
        self
    }

    pub fn demographic_events(mut self, events: Vec<DemographicEvent>) -> Self {
        self.demographic_events = events;
        self
    }

    pub fn model(mut self, model: SimulationModel) -> Self {
        self.model = model;
        self
    }

    pub fn pedigree(mut self, pedigree: Pedigree) -> Self {
        self.pedigree = Some(pedigree);
        self
    }

    pub fn gene_conversion(mut self, rate: f64, track_length: f64) -> Self {
        self.gene_conversion_rate = rate;
        self.gene_conversion_track_length = track_length;
        self
    }

    pub fn start_time(mut self, time: f64) -> Self {
        self.start_time = Some(time);
        self
    }

    /// Continue the ancestry recorded in `tables`.
    pub fn starting_tables(mut self, tables: GenealogyTables) -> Self {
        self.starting_tables = Some(tables);
        self
    }

    pub fn ploidy(mut self, ploidy: usize) -> Self {
        self.ploidy = ploidy;
        self
    }

    /// The size of populations whose configuration
    /// does not give one.
    pub fn reference_size(mut self, size: f64) -> Self {
        self.reference_size = size;
        self
    }

    pub fn options(mut self, options: SimulationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<SimulationConfig, ValidationError> {
        let recombination_map = match self.recombination_map {
            Some(map) => map,
            None => RateMap::uniform(1.0, 0.0, false)?,
        };
        let sequence_length = recombination_map.sequence_length();

        if self.ploidy == 0 {
            return validation("ploidy must be at least 1", ValidationError::Incompatible);
        }
        if !(self.reference_size > 0.0 && self.reference_size.is_finite()) {
            return validation(
                format!("reference size {} must be positive", self.reference_size),
                ValidationError::PopulationConfiguration,
            );
        }

        let population_configurations = if self.population_configurations.is_empty() {
            vec![PopulationConfiguration::default()]
        } else {
            self.population_configurations
        };
        let num_populations = population_configurations.len();
        let populations = population_configurations
            .iter()
            .map(|c| Population::new(c.initial_size.unwrap_or(self.reference_size), c.growth_rate))
            .collect::<Vec<_>>();
        let migration_matrix = match self.migration_matrix {
            Some(rows) => MigrationMatrix::from_rows(rows)?,
            None => MigrationMatrix::new(num_populations),
        };
        let mut populations = PopulationState::new(populations, migration_matrix)?;

        let configured_samples = population_configurations
            .iter()
            .map(|c| c.sample_size)
            .sum::<usize>();
        let mut samples = self.samples;
        if configured_samples > 0 {
            if !samples.is_empty() {
                return validation(
                    "samples given both directly and through population configurations",
                    ValidationError::Incompatible,
                );
            }
            for (p, c) in population_configurations.iter().enumerate() {
                samples.extend(std::iter::repeat(Sample::new(p, 0.0)).take(c.sample_size));
            }
        }

        let mut model_list = vec![self.model];
        for e in &self.demographic_events {
            e.validate(num_populations)?;
            if let DemographicEvent::ModelChange { model, .. } = e {
                model_list.push(*model);
            }
        }
        check_sorted(&self.demographic_events)?;
        for m in &model_list {
            m.validate(sequence_length)?;
        }
        if model_list[1..]
            .iter()
            .any(|m| matches!(m, SimulationModel::WfPedigree))
        {
            return validation(
                "the pedigree model can only be the initial model",
                ValidationError::Model,
            );
        }
        let has_sweep = model_list.iter().any(|m| m.is_sweep());
        if has_sweep && num_populations > 1 {
            return validation(
                "sweeps require a single population",
                ValidationError::Incompatible,
            );
        }
        if self.gene_conversion_rate != 0.0
            && model_list.iter().any(|m| m.is_discrete_time())
        {
            return validation(
                "gene conversion is not supported by discrete-time models",
                ValidationError::Incompatible,
            );
        }
        if model_list.iter().any(|m| {
            matches!(
                m,
                SimulationModel::Beta { .. } | SimulationModel::Dirac { .. }
            )
        }) && self.ploidy > 2
        {
            return validation(
                "multiple merger models support ploidy 1 or 2",
                ValidationError::Incompatible,
            );
        }

        if !(self.gene_conversion_rate >= 0.0 && self.gene_conversion_rate.is_finite()) {
            return validation(
                format!("gene conversion rate {}", self.gene_conversion_rate),
                ValidationError::Incompatible,
            );
        }
        if self.gene_conversion_rate > 0.0 {
            let t = self.gene_conversion_track_length;
            let ok = if recombination_map.discrete() {
                t >= 1.0
            } else {
                t > 0.0
            };
            if !(ok && t.is_finite()) {
                return validation(
                    format!("gene conversion track length {t}"),
                    ValidationError::Incompatible,
                );
            }
        }

        let pedigree = match (self.model, self.pedigree) {
            (SimulationModel::WfPedigree, Some(p)) => {
                if p.num_sample_genomes() == 0 {
                    return validation("pedigree has no samples", ValidationError::Pedigree);
                }
                if samples.is_empty() {
                    samples = vec![Sample::new(0, 0.0); p.num_sample_genomes()];
                }
                if samples.len() != p.num_sample_genomes() {
                    return validation(
                        format!(
                            "{} samples but the pedigree has {} sample genomes",
                            samples.len(),
                            p.num_sample_genomes()
                        ),
                        ValidationError::Pedigree,
                    );
                }
                if self.ploidy != Pedigree::PLOIDY {
                    return validation("pedigrees must be diploid", ValidationError::Pedigree);
                }
                if samples.iter().any(|s| s.time != 0.0 || s.population != 0) {
                    return validation(
                        "pedigree samples must be at time 0 in population 0",
                        ValidationError::Pedigree,
                    );
                }
                if let Some(e) = self
                    .demographic_events
                    .iter()
                    .find(|e| e.time() < p.max_time())
                {
                    return Err(ValidationError::DemographicEvent {
                        time: e.time(),
                        reason: format!(
                            "events cannot happen within the pedigree (up to time {})",
                            p.max_time()
                        ),
                    });
                }
                Some(p)
            }
            (SimulationModel::WfPedigree, None) => {
                return validation("the pedigree model needs a pedigree", ValidationError::Pedigree)
            }
            (_, Some(_)) => {
                return validation(
                    "a pedigree requires the pedigree model",
                    ValidationError::Incompatible,
                )
            }
            (_, None) => None,
        };

        if let Some(tables) = &self.starting_tables {
            if !samples.is_empty() {
                return validation(
                    "samples cannot be given when starting from tables",
                    ValidationError::Incompatible,
                );
            }
            if tables.sequence_length() != sequence_length {
                return validation(
                    format!(
                        "tables have length {} but the map has length {sequence_length}",
                        tables.sequence_length()
                    ),
                    ValidationError::StartingTables,
                );
            }
            if let Some(p) = tables
                .nodes
                .population
                .iter()
                .find(|&&p| p >= num_populations)
            {
                return Err(ValidationError::PopulationOutOfRange {
                    population: *p,
                    num_populations,
                });
            }
            if tables.sample_nodes().next().is_none() {
                return validation("tables have no sample nodes", ValidationError::StartingTables);
            }
            if pedigree.is_some() {
                return validation(
                    "cannot start a pedigree simulation from tables",
                    ValidationError::Incompatible,
                );
            }
        } else if samples.len() < 2 {
            return validation("at least two samples are required", ValidationError::Samples);
        }
        for s in &samples {
            if s.population >= num_populations {
                return Err(ValidationError::PopulationOutOfRange {
                    population: s.population,
                    num_populations,
                });
            }
            if !(s.time >= 0.0 && s.time.is_finite()) {
                return validation(format!("sample time {}", s.time), ValidationError::Samples);
            }
        }

        let max_root_time = self
            .starting_tables
            .as_ref()
            .map(|t| t.nodes.time.iter().copied().fold(0.0, f64::max));
        let start_time = match (self.start_time, max_root_time) {
            (Some(t), Some(max)) if t < max => {
                return validation(
                    format!("start time {t} is before the oldest node ({max})"),
                    ValidationError::StartingTables,
                )
            }
            (Some(t), _) => t,
            (None, Some(max)) => max,
            (None, None) => 0.0,
        };
        if !(start_time >= 0.0 && start_time.is_finite()) {
            return validation(format!("start time {start_time}"), ValidationError::Incompatible);
        }
        if let Some(s) = samples.iter().find(|s| s.time < start_time) {
            return validation(
                format!("sample at time {} is before the start time {start_time}", s.time),
                ValidationError::Samples,
            );
        }

        // Apply the parameter changes to a scratch copy to
        // catch problems before a simulation starts.
        let mut scratch = populations.clone();
        for e in &self.demographic_events {
            match *e {
                DemographicEvent::PopulationParametersChange {
                    time,
                    initial_size,
                    growth_rate,
                    population,
                } => scratch.apply_parameter_change(time, initial_size, growth_rate, population)?,
                DemographicEvent::MigrationRateChange {
                    rate, matrix_index, ..
                } => scratch
                    .apply_migration_rate_change(rate, matrix_index)
                    .map_err(|err| ValidationError::DemographicEvent {
                        time: e.time(),
                        reason: err.to_string(),
                    })?,
                _ => (),
            }
        }
        // Start the first epoch at the start time.
        if start_time > 0.0 {
            for p in 0..num_populations {
                let pop = *populations.population(p);
                populations.apply_parameter_change(
                    start_time,
                    Some(pop.size_at(start_time)),
                    None,
                    Some(p),
                )?;
            }
        }

        Ok(SimulationConfig {
            samples,
            recombination_map,
            populations,
            demographic_events: self.demographic_events,
            model: self.model,
            pedigree,
            gene_conversion_rate: self.gene_conversion_rate,
            gene_conversion_track_length: self.gene_conversion_track_length,
            start_time,
            starting_tables: self.starting_tables,
            ploidy: self.ploidy,
            options: self.options,
            num_labels: if has_sweep { 2 } else { 1 },
        })
    }
}

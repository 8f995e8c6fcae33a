use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};

use crate::config::SimulationConfig;
use crate::demography::DemographicEvent;
use crate::error::SimulationError;
use crate::error::ValidationError;
use crate::flags::NodeFlags;
use crate::lineages::{LineageId, LineagePool};
use crate::model::SimulationModel;
use crate::overlap::OverlapCounts;
use crate::population::PopulationState;
use crate::tables::{GenealogyTables, Migration};
use crate::NodeId;
use crate::SimulationState;

mod demographic_events;
mod dtwf;
mod events;
mod initial_state;
mod merge;
mod multiple_merger;
mod pedigree_walk;
mod sweep;

#[cfg(test)]
mod test_scenarios;

/// Diagnostic event counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub common_ancestor: u64,
    /// Common ancestor events proposed under the SMC
    /// models and rejected.
    pub rejected_common_ancestor: u64,
    pub recombination: u64,
    /// Transmissions in discrete-time models with
    /// more than one crossover.
    pub multiple_recombination: u64,
    pub gene_conversion: u64,
    /// Gene conversion tracts that did not change
    /// any lineage.
    pub noneffective_gene_conversion: u64,
    /// `migration[j][k]`: moves from `j` to `k`,
    /// backwards in time.
    pub migration: Vec<Vec<u64>>,
}

impl EventCounts {
    fn new(num_populations: usize) -> Self {
        Self {
            migration: vec![vec![0; num_populations]; num_populations],
            ..Default::default()
        }
    }

    pub fn total_migration(&self) -> u64 {
        self.migration.iter().flatten().sum()
    }
}

// Why a model stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Coalescence,
    EndTime,
    ModelChange,
}

// A sample that enters the simulation at a later time.
#[derive(Debug, Clone, Copy)]
struct PendingSample {
    time: f64,
    population: usize,
    node: NodeId,
}

/// Runs a [`SimulationConfig`].
///
/// One simulator owns one random number stream;
/// replicates are produced with [`Simulator::reset`].
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: StdRng,
    state: SimulationState,
    time: f64,
    model: SimulationModel,
    populations: PopulationState,
    pool: LineagePool,
    overlap: OverlapCounts,
    tables: GenealogyTables,
    counts: EventCounts,
    breakpoints: Vec<f64>,
    next_event: usize,
    pending_samples: Vec<PendingSample>,
    next_sample: usize,
    sweep: Option<sweep::Trajectory>,
    beta_rates: multiple_merger::BetaRates,
    pedigree_done: bool,
}

impl Simulator {
    pub fn new(config: SimulationConfig, seed: u64) -> Self {
        let pool = LineagePool::new(
            config.num_populations(),
            config.num_labels(),
            config.recombination_map().clone(),
            config.gene_conversion_rate(),
        );
        let mut rv = Self {
            rng: StdRng::seed_from_u64(seed),
            state: SimulationState::Idle,
            time: config.start_time(),
            model: config.model(),
            populations: config.populations().clone(),
            pool,
            overlap: OverlapCounts::new(config.sequence_length(), 0),
            tables: GenealogyTables::new(config.sequence_length()),
            counts: EventCounts::new(config.num_populations()),
            breakpoints: vec![],
            next_event: 0,
            pending_samples: vec![],
            next_sample: 0,
            sweep: None,
            beta_rates: multiple_merger::BetaRates::default(),
            pedigree_done: false,
            config,
        };
        rv.initialize();
        rv
    }

    fn initialize(&mut self) {
        self.state = SimulationState::Idle;
        self.time = self.config.start_time();
        self.model = self.config.model();
        self.populations = self.config.populations().clone();
        self.pool.clear();
        self.counts = EventCounts::new(self.config.num_populations());
        self.breakpoints.clear();
        self.next_event = 0;
        self.pending_samples.clear();
        self.next_sample = 0;
        self.sweep = None;
        self.beta_rates = multiple_merger::BetaRates::default();
        self.pedigree_done = false;
        match self.config.starting_tables() {
            Some(tables) => {
                let tables = tables.clone();
                self.initialize_from_tables(tables);
            }
            None => self.initialize_from_samples(),
        }
    }

    /// Discard all ancestry and go back to the start, ready
    /// for a new replicate. The random number stream continues.
    pub fn reset(&mut self) {
        self.initialize();
    }

    /// As [`Simulator::reset`], restarting the random number
    /// stream from `seed`.
    pub fn reset_with_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.initialize();
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    /// Generations before the present.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn model(&self) -> SimulationModel {
        self.model
    }

    pub fn populations(&self) -> &PopulationState {
        &self.populations
    }

    pub fn counts(&self) -> &EventCounts {
        &self.counts
    }

    /// Sorted, distinct recombination and gene
    /// conversion breakpoints.
    pub fn breakpoints(&self) -> Vec<f64> {
        let mut rv = self.breakpoints.clone();
        rv.sort_by(|a, b| a.total_cmp(b));
        rv.dedup();
        rv
    }

    pub fn num_lineages(&self) -> usize {
        self.pool.num_lineages()
    }

    pub fn lineages(&self) -> &LineagePool {
        &self.pool
    }

    pub fn overlap_counts(&self) -> &OverlapCounts {
        &self.overlap
    }

    /// The tables as recorded so far, not finalized.
    pub fn tables(&self) -> &GenealogyTables {
        &self.tables
    }

    fn is_complete(&self) -> bool {
        self.pool.num_lineages() == 0 && self.next_sample == self.pending_samples.len()
    }

    /// Simulate until every position has found its most
    /// recent common ancestor or until `end_time`.
    ///
    /// # Errors
    ///
    /// * [`SimulationError::BadState`] if the simulation
    ///   completed (see [`Simulator::reset`]) or a previous
    ///   run failed.
    /// * [`ValidationError`] if `end_time` is before the
    ///   current time or within a pedigree.
    /// * [`SimulationError::InternalInvariant`] if no event
    ///   can happen although ancestry remains.
    pub fn run(&mut self, end_time: f64) -> Result<SimulationState, SimulationError> {
        if matches!(
            self.state,
            SimulationState::Completed | SimulationState::Running
        ) {
            return Err(SimulationError::BadState(self.state));
        }
        if !(end_time >= self.time) {
            return Err(ValidationError::Incompatible(format!(
                "end time {end_time} is before the current time {}",
                self.time
            ))
            .into());
        }
        if let (SimulationModel::WfPedigree, false, Some(pedigree)) =
            (self.model, self.pedigree_done, self.config.pedigree())
        {
            if end_time < pedigree.max_time() {
                return Err(ValidationError::Pedigree(format!(
                    "end time {end_time} is within the pedigree (up to time {})",
                    pedigree.max_time()
                ))
                .into());
            }
        }
        log::debug!(
            "running {} from time {} to {end_time}",
            self.model,
            self.time
        );
        self.state = SimulationState::Running;
        let exit = self.run_models(end_time)?;
        self.state = match exit {
            Exit::EndTime => SimulationState::Paused,
            _ => SimulationState::Completed,
        };
        log::debug!("stopped at time {} in state {:?}", self.time, self.state);
        Ok(self.state)
    }

    fn run_models(&mut self, end_time: f64) -> Result<Exit, SimulationError> {
        loop {
            if self.is_complete() {
                return Ok(Exit::Coalescence);
            }
            let exit = match self.model {
                SimulationModel::Dtwf => self.run_dtwf(end_time)?,
                SimulationModel::WfPedigree => self.run_pedigree()?,
                SimulationModel::Sweep { .. } => self.run_sweep(end_time)?,
                _ => self.run_continuous(end_time)?,
            };
            if exit != Exit::ModelChange {
                return Ok(exit);
            }
        }
    }

    /// A finalized copy of the tables.
    ///
    /// If the simulation stopped at an end time, every
    /// lineage with ancestry younger than that time gets
    /// an unfinished node at the end time.
    ///
    /// # Errors
    ///
    /// [`SimulationError::BadState`] unless the simulation
    /// is completed or paused.
    pub fn finalize(&self) -> Result<GenealogyTables, SimulationError> {
        match self.state {
            SimulationState::Completed | SimulationState::Paused => (),
            state => return Err(SimulationError::BadState(state)),
        }
        let mut tables = self.tables.clone();
        if self.state == SimulationState::Paused {
            for lineage in self.pool.all_lineages() {
                let mut unfinished = None;
                for seg in self.pool.segments_of(lineage) {
                    if tables.node_time(seg.node) < self.time {
                        let node = *unfinished.get_or_insert_with(|| {
                            tables.add_node(
                                NodeFlags::unfinished(),
                                self.time,
                                self.pool.population(lineage),
                            )
                        });
                        tables.add_edge(seg.left, seg.right, node, seg.node);
                    }
                }
            }
        }
        tables.finalize();
        Ok(tables)
    }

    fn exponential(&mut self, rate: f64) -> f64 {
        match Exp::new(rate) {
            Ok(d) if rate > 0.0 => d.sample(&mut self.rng),
            _ => f64::INFINITY,
        }
    }

    fn add_node(&mut self, flags: NodeFlags, population: usize) -> NodeId {
        self.tables.add_node(flags, self.time, population)
    }

    /// Move a lineage to `dest`, recording a migration
    /// for each of its segments if requested.
    fn move_lineage(&mut self, lineage: LineageId, dest: usize) {
        let source = self.pool.population(lineage);
        if self.config.options().record_migrations() {
            for seg in self.pool.segments_of(lineage) {
                self.tables.add_migration(Migration {
                    left: seg.left,
                    right: seg.right,
                    node: seg.node,
                    source,
                    dest,
                    time: self.time,
                });
            }
        }
        self.pool.migrate(lineage, dest);
    }

    /// Give every segment of `lineage` to `node`,
    /// recording an edge for each.
    fn store_arg_edges(&mut self, lineage: LineageId, node: NodeId) {
        let head = self.pool.head(lineage);
        for s in self.pool.chain(head).collect::<Vec<_>>() {
            let seg = self.pool.segment(s);
            self.tables.add_edge(seg.left, seg.right, node, seg.node);
            self.pool.set_node(s, node);
        }
    }

    fn next_scheduled_time(&self) -> f64 {
        let sample = self
            .pending_samples
            .get(self.next_sample)
            .map_or(f64::INFINITY, |s| s.time);
        let event = self
            .config
            .demographic_events()
            .get(self.next_event)
            .map_or(f64::INFINITY, |e| e.time());
        sample.min(event)
    }

    fn insert_samples_up_to(&mut self, time: f64) {
        let sequence_length = self.config.sequence_length();
        while let Some(&s) = self.pending_samples.get(self.next_sample) {
            if s.time > time {
                break;
            }
            self.pool
                .insert_segment(0.0, sequence_length, s.node, s.population, 0);
            self.next_sample += 1;
        }
    }

    /// Apply the demographic events up to `time`, stopping
    /// after a model change. Returns `true` if the model
    /// changed.
    fn apply_events_up_to(&mut self, time: f64) -> Result<bool, SimulationError> {
        while let Some(&event) = self.config.demographic_events().get(self.next_event) {
            if event.time() > time {
                break;
            }
            self.next_event += 1;
            if self.apply_demographic_event(event)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Advance to the next scheduled time and apply
    /// everything due then, samples first.
    fn apply_scheduled(&mut self) -> Result<bool, SimulationError> {
        let t = self.next_scheduled_time();
        self.time = self.time.max(t);
        self.insert_samples_up_to(t);
        self.apply_events_up_to(t)
    }

    fn change_model(&mut self, model: SimulationModel) {
        log::debug!("model change from {} to {model} at time {}", self.model, self.time);
        if self.model.is_sweep() {
            self.end_sweep();
        }
        self.model = model;
        self.beta_rates = multiple_merger::BetaRates::default();
    }

    fn apply_demographic_event(&mut self, event: DemographicEvent) -> Result<bool, SimulationError> {
        log::debug!("applying {event:?} at time {}", self.time);
        match event {
            DemographicEvent::PopulationParametersChange {
                time,
                initial_size,
                growth_rate,
                population,
            } => {
                self.populations
                    .apply_parameter_change(time, initial_size, growth_rate, population)?;
            }
            DemographicEvent::MigrationRateChange {
                rate, matrix_index, ..
            } => self
                .populations
                .apply_migration_rate_change(rate, matrix_index)?,
            DemographicEvent::MassMigration {
                source,
                dest,
                proportion,
                ..
            } => self.mass_migration(source, dest, proportion),
            DemographicEvent::SimpleBottleneck {
                population,
                proportion,
                ..
            } => self.simple_bottleneck(population, proportion)?,
            DemographicEvent::InstantaneousBottleneck {
                population,
                strength,
                ..
            } => self.instantaneous_bottleneck(population, strength)?,
            DemographicEvent::CensusEvent { .. } => self.census(),
            DemographicEvent::ModelChange { model, .. } => {
                self.change_model(model);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn run_continuous(&mut self, end_time: f64) -> Result<Exit, SimulationError> {
        while !self.is_complete() {
            let (wait, event) = self.next_event_waiting_time();
            let t_next = self.time + wait;
            let scheduled = self.next_scheduled_time();
            if scheduled < t_next && scheduled < end_time {
                if self.apply_scheduled()? {
                    return Ok(Exit::ModelChange);
                }
                continue;
            }
            if t_next >= end_time {
                if t_next.is_infinite() && end_time.is_infinite() {
                    return Err(SimulationError::InternalInvariant(format!(
                        "infinite waiting time at time {} with {} lineages",
                        self.time,
                        self.pool.num_lineages()
                    )));
                }
                self.time = end_time;
                return Ok(Exit::EndTime);
            }
            self.time = t_next;
            match event {
                Some(e) => self.apply_event(e)?,
                None => {
                    return Err(SimulationError::InternalInvariant(
                        "finite waiting time without an event".to_string(),
                    ))
                }
            }
        }
        Ok(Exit::Coalescence)
    }
}

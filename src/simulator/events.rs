use rand_distr::{Distribution, Exp, Geometric};

use super::Simulator;
use crate::error::SimulationError;
use crate::flags::NodeFlags;
use crate::lineages::LineageId;
use crate::model::SimulationModel;

// Draws of a breakpoint may land exactly on a segment
// boundary; such draws are repeated.
const MAX_BREAKPOINT_ATTEMPTS: usize = 100;

/// The event that won the race of waiting times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Event {
    Recombination,
    GeneConversion,
    CommonAncestor { population: usize, label: usize },
    Migration { source: usize, dest: usize, label: usize },
}

impl Simulator {
    /// Draw a waiting time for every possible event and
    /// return the shortest, with its event.
    ///
    /// Only rates greater than zero are drawn, always in the
    /// same order, so that a seed determines the outcome.
    pub(super) fn next_event_waiting_time(&mut self) -> (f64, Option<Event>) {
        let mut best = (f64::INFINITY, None);
        let mut consider = |wait: f64, event: Event| {
            if wait < best.0 {
                best = (wait, Some(event));
            }
        };

        let rate = self.pool.total_recombination_mass();
        if rate > 0.0 {
            consider(self.exponential(rate), Event::Recombination);
        }
        let rate = self.pool.total_gene_conversion_mass();
        if rate > 0.0 {
            consider(self.exponential(rate), Event::GeneConversion);
        }
        let num_populations = self.pool.num_populations();
        let num_labels = self.pool.num_labels();
        for population in 0..num_populations {
            for label in 0..num_labels {
                let wait = self.common_ancestor_waiting_time(population, label);
                consider(wait, Event::CommonAncestor { population, label });
            }
        }
        for source in 0..num_populations {
            for dest in 0..num_populations {
                if source == dest {
                    continue;
                }
                let m = self.populations.migration_matrix().rate(source, dest);
                for label in 0..num_labels {
                    let rate = self.pool.num_lineages_in(source, label) as f64 * m;
                    if rate > 0.0 {
                        let wait = self.exponential(rate);
                        consider(wait, Event::Migration { source, dest, label });
                    }
                }
            }
        }
        best
    }

    fn common_ancestor_waiting_time(&mut self, population: usize, label: usize) -> f64 {
        let n = self.pool.num_lineages_in(population, label);
        if n < 2 {
            return f64::INFINITY;
        }
        match self.model {
            SimulationModel::Beta { .. } => self.beta_waiting_time(population, n),
            SimulationModel::Dirac { c, .. } => self.dirac_waiting_time(population, n, c),
            _ => {
                let pairs = (n * (n - 1) / 2) as f64;
                let u = self.exponential(pairs);
                let ploidy = self.config.ploidy() as f64;
                self.populations
                    .population(population)
                    .waiting_time(self.time, ploidy, u)
            }
        }
    }

    pub(super) fn apply_event(&mut self, event: Event) -> Result<(), SimulationError> {
        match event {
            Event::Recombination => self.recombination_event().map(|_| ()),
            Event::GeneConversion => self.gene_conversion_event(),
            Event::CommonAncestor { population, label } => {
                self.common_ancestor_event(population, label)
            }
            Event::Migration {
                source,
                dest,
                label,
            } => {
                if let Some(lineage) = self.pool.choose(source, label, &mut self.rng) {
                    self.move_lineage(lineage, dest);
                    self.counts.migration[source][dest] += 1;
                }
                Ok(())
            }
        }
    }

    /// Record a node for each side of a break.
    fn record_break(&mut self, flags: NodeFlags, lineages: [LineageId; 2]) {
        for lineage in lineages {
            let node = self.add_node(flags, self.pool.population(lineage));
            self.store_arg_edges(lineage, node);
        }
    }

    /// Split a lineage at a breakpoint drawn along all
    /// ancestral material, returning the left and right parts.
    pub(super) fn recombination_event(&mut self) -> Result<(LineageId, LineageId), SimulationError> {
        for _ in 0..MAX_BREAKPOINT_ATTEMPTS {
            let Some((segment, remaining)) = self.pool.choose_recombination_segment(&mut self.rng)
            else {
                break;
            };
            if let Some(k) = self.pool.recombination_breakpoint(segment, remaining) {
                let left = self.pool.lineage_of(segment);
                let right = self.pool.split_at_segment(segment, k);
                self.breakpoints.push(k);
                self.counts.recombination += 1;
                if self.config.options().record_full_arg() {
                    self.record_break(NodeFlags::recombination(), [left, right]);
                }
                return Ok((left, right));
            }
        }
        Err(SimulationError::InternalInvariant(format!(
            "no valid recombination breakpoint at time {}",
            self.time
        )))
    }

    fn gene_conversion_tract_length(&mut self) -> Result<f64, SimulationError> {
        let mean = self.config.gene_conversion_track_length();
        if self.config.recombination_map().discrete() {
            let d = Geometric::new(1.0 / mean)
                .map_err(|e| SimulationError::InternalInvariant(e.to_string()))?;
            Ok(1.0 + d.sample(&mut self.rng) as f64)
        } else {
            let d = Exp::new(1.0 / mean)
                .map_err(|e| SimulationError::InternalInvariant(e.to_string()))?;
            Ok(d.sample(&mut self.rng))
        }
    }

    /// Copy a tract of a lineage onto a new lineage.
    ///
    /// The tract may cover no material (or all of it), in
    /// which case it is counted as non-effective and
    /// nothing changes.
    pub(super) fn gene_conversion_event(&mut self) -> Result<(), SimulationError> {
        let Some((segment, remaining)) = self.pool.choose_gene_conversion_segment(&mut self.rng)
        else {
            return Ok(());
        };
        let lineage = self.pool.lineage_of(segment);
        let start = self.pool.gene_conversion_start(segment, remaining);
        let end = start + self.gene_conversion_tract_length()?;
        match self.pool.gene_convert(lineage, start, end) {
            None => self.counts.noneffective_gene_conversion += 1,
            Some((outside, inside)) => {
                self.counts.gene_conversion += 1;
                let sequence_length = self.config.sequence_length();
                self.breakpoints
                    .extend([start, end].into_iter().filter(|&x| x > 0.0 && x < sequence_length));
                if self.config.options().record_full_arg() {
                    self.record_break(NodeFlags::gene_conversion(), [outside, inside]);
                }
            }
        }
        Ok(())
    }

    fn common_ancestor_event(&mut self, population: usize, label: usize) -> Result<(), SimulationError> {
        match self.model {
            SimulationModel::Beta { .. } => self.beta_common_ancestor_event(population, label),
            SimulationModel::Dirac { .. } => self.dirac_common_ancestor_event(population, label),
            model => {
                let Some((a, b)) = self.pool.choose_pair(population, label, &mut self.rng) else {
                    return Ok(());
                };
                let (a_left, a_right) = self.pool.span(a);
                let (b_left, b_right) = self.pool.span(b);
                let overlaps = a_left < b_right && b_left < a_right;
                let touches = a_right == b_left || b_right == a_left;
                let accepted = match model {
                    SimulationModel::Smc => overlaps,
                    SimulationModel::SmcPrime => overlaps || touches,
                    _ => true,
                };
                if accepted {
                    self.merge_lineages(&[a, b], population, label)?;
                    self.counts.common_ancestor += 1;
                } else {
                    self.counts.rejected_common_ancestor += 1;
                }
                Ok(())
            }
        }
    }
}

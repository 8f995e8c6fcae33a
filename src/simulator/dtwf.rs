use nohash::BuildNoHashHasher;
use rand::Rng;
use rand_distr::{Distribution, Exp1};
use std::collections::HashMap;

use super::{Exit, Simulator};
use crate::error::SimulationError;
use crate::lineages::{Cut, LineageId};

impl Simulator {
    /// Discrete-time Wright-Fisher, one generation per step.
    ///
    /// Samples and demographic events due before the next
    /// generation are applied first, at their own times. A
    /// generation is migration, then every lineage picks a
    /// parent and is transmitted through its two genome copies.
    pub(super) fn run_dtwf(&mut self, end_time: f64) -> Result<Exit, SimulationError> {
        let mut generation = self.time;
        while !self.is_complete() {
            let next = generation + 1.0;
            let scheduled = self.next_scheduled_time();
            let idle = self.pool.num_lineages() == 0;
            if (scheduled < next || idle) && scheduled < end_time {
                if self.apply_scheduled()? {
                    return Ok(Exit::ModelChange);
                }
                if idle {
                    // Nothing happened while there were no lineages.
                    generation = self.time;
                }
                continue;
            }
            if idle || next > end_time {
                self.time = end_time;
                return Ok(Exit::EndTime);
            }
            self.time = next;
            generation = next;
            self.dtwf_migration();
            self.dtwf_generation()?;
        }
        Ok(Exit::Coalescence)
    }

    fn dtwf_migration(&mut self) {
        let num_populations = self.pool.num_populations();
        if num_populations < 2 {
            return;
        }
        let mut cumulative = Vec::with_capacity(num_populations);
        for source in 0..num_populations {
            cumulative.clear();
            let mut total = 0.0;
            for (dest, &rate) in self.populations.migration_matrix().row(source).iter().enumerate() {
                if dest != source {
                    total += rate;
                }
                cumulative.push(total);
            }
            if total <= 0.0 {
                continue;
            }
            if total > 1.0 {
                log::warn!(
                    "migration probabilities out of population {source} sum to {total}; normalizing"
                );
            }
            let scale = total.max(1.0);
            for label in 0..self.pool.num_labels() {
                // Lineages arriving in this generation do not
                // move again.
                let lineages = self.pool.lineages_in(source, label).to_vec();
                for lineage in lineages {
                    let u = self.rng.gen::<f64>() * scale;
                    if let Some(dest) = cumulative.iter().position(|&c| u < c) {
                        if dest != source {
                            self.move_lineage(lineage, dest);
                            self.counts.migration[source][dest] += 1;
                        }
                    }
                }
            }
        }
    }

    fn dtwf_generation(&mut self) -> Result<(), SimulationError> {
        for population in 0..self.pool.num_populations() {
            let size = self.populations.size_at(population, self.time);
            let num_parents = (size.round() as usize).max(1);
            for label in 0..self.pool.num_labels() {
                let lineages = self.pool.lineages_in(population, label).to_vec();
                if lineages.is_empty() {
                    continue;
                }
                let mut families: HashMap<usize, Vec<LineageId>, BuildNoHashHasher<usize>> =
                    HashMap::default();
                for lineage in lineages {
                    let parent = self.rng.gen_range(0..num_parents);
                    families.entry(parent).or_default().push(lineage);
                }
                let mut parents = families.keys().copied().collect::<Vec<_>>();
                parents.sort_unstable();
                for parent in parents {
                    let Some(children) = families.remove(&parent) else {
                        continue;
                    };
                    let mut copies: [Vec<LineageId>; 2] = Default::default();
                    for child in children {
                        for (copy, piece) in self.dtwf_recombine(child).into_iter().enumerate() {
                            if let Some(piece) = piece {
                                copies[copy].push(piece);
                            }
                        }
                    }
                    for copy in copies.iter().filter(|c| c.len() > 1) {
                        self.merge_lineages(copy, population, label)?;
                        self.counts.common_ancestor += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Transmit `lineage` from a diploid parent: crossovers
    /// are placed along the genome and material alternates
    /// between the parent's two genome copies.
    ///
    /// Returns the material inherited from each copy.
    /// Haploids inherit everything from the first copy.
    pub(super) fn dtwf_recombine(&mut self, lineage: LineageId) -> [Option<LineageId>; 2] {
        let mut pieces: [Option<LineageId>; 2] = [None, None];
        if self.config.ploidy() == 1 {
            pieces[0] = Some(lineage);
            return pieces;
        }
        let mut copy = usize::from(self.rng.gen_bool(0.5));
        let total = self.pool.recombination_map().total_mass();
        let discrete = self.pool.recombination_map().discrete();
        let mut mass = self
            .pool
            .recombination_map()
            .position_to_mass(self.pool.span(lineage).0);
        let mut current = lineage;
        let mut breaks = 0;
        loop {
            let e: f64 = Exp1.sample(&mut self.rng);
            mass += e;
            if !(mass < total) {
                break;
            }
            let mut k = self.pool.recombination_map().mass_to_position_unchecked(mass);
            if discrete {
                k = k.floor();
            }
            match self.pool.cut(current, k) {
                Cut::Left(_) => break,
                Cut::Right(_) => copy = 1 - copy,
                Cut::Split(left, right) => {
                    self.transmit(&mut pieces, copy, left);
                    copy = 1 - copy;
                    current = right;
                    breaks += 1;
                    self.breakpoints.push(k);
                }
            }
        }
        self.transmit(&mut pieces, copy, current);
        self.counts.recombination += breaks;
        if breaks > 1 {
            self.counts.multiple_recombination += 1;
        }
        pieces
    }

    fn transmit(&mut self, pieces: &mut [Option<LineageId>; 2], copy: usize, lineage: LineageId) {
        match pieces[copy] {
            Some(previous) => self.pool.join(previous, lineage),
            None => pieces[copy] = Some(lineage),
        }
    }
}

#[cfg(test)]
mod test_dtwf {
    use super::*;
    use crate::config::SimulationBuilder;
    use crate::model::SimulationModel;
    use crate::rate_map::RateMap;

    fn simulator(rate: f64) -> Simulator {
        let config = SimulationBuilder::new()
            .num_samples(4)
            .reference_size(10.0)
            .model(SimulationModel::Dtwf)
            .recombination_map(RateMap::uniform(100.0, rate, false).unwrap())
            .build()
            .unwrap();
        Simulator::new(config, 2024)
    }

    #[test]
    fn test_transmission_keeps_material() {
        let mut sim = simulator(0.05);
        let lineage = sim.pool.lineages_in(0, 0)[0];
        let pieces = sim.dtwf_recombine(lineage);
        let mut total = 0.0;
        for piece in pieces.iter().flatten() {
            for seg in sim.pool.segments_of(*piece) {
                total += seg.right - seg.left;
            }
        }
        assert!((total - 100.0).abs() < 1e-9);
        sim.pool.check_integrity();
        let breaks = sim.counts.recombination;
        assert_eq!(sim.counts.multiple_recombination > 0, breaks > 1);
        assert_eq!(pieces.iter().flatten().count() == 2, breaks > 0);
    }

    #[test]
    fn test_no_recombination_single_copy() {
        let mut sim = simulator(0.0);
        let lineage = sim.pool.lineages_in(0, 0)[0];
        let pieces = sim.dtwf_recombine(lineage);
        assert_eq!(pieces.iter().flatten().count(), 1);
        assert_eq!(sim.counts.recombination, 0);
    }

    #[test]
    fn test_generations_are_integers() {
        let mut sim = simulator(0.01);
        if sim.run(5.5).unwrap() == crate::SimulationState::Paused {
            assert_eq!(sim.time(), 5.5);
        }
        let tables = sim.finalize().unwrap();
        for i in 0..tables.num_nodes() {
            let t = tables.node_time(crate::NodeId(i));
            if !tables.node_flags(crate::NodeId(i)).is_unfinished() {
                assert_eq!(t, t.floor());
            }
        }
    }
}

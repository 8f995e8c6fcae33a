use nohash::BuildNoHashHasher;
use std::collections::HashMap;

use super::{Exit, Simulator};
use crate::error::SimulationError;
use crate::lineages::LineageId;
use crate::model::SimulationModel;
use crate::pedigree::Pedigree;

// Lineages waiting in each genome copy of an individual.
type CopyQueues = HashMap<usize, [Vec<LineageId>; Pedigree::PLOIDY], BuildNoHashHasher<usize>>;

impl Simulator {
    /// Transmit the sample genomes up through the pedigree.
    ///
    /// Individuals are visited from youngest to oldest. The
    /// lineages in each genome copy of an individual merge,
    /// and the result is transmitted to the parent that
    /// contributed that copy. Lineages reaching an individual
    /// without that parent leave the pedigree and stay in
    /// the pool for the model that follows.
    pub(super) fn run_pedigree(&mut self) -> Result<Exit, SimulationError> {
        let Some(pedigree) = self.config.pedigree().cloned() else {
            return Err(SimulationError::InternalInvariant(
                "pedigree model without a pedigree".to_string(),
            ));
        };
        let samples = pedigree.sample_indices();
        let mut queues = CopyQueues::default();
        for lineage in self.pool.lineages_in(0, 0).to_vec() {
            // Sample genome j is node j.
            let j = self.pool.segment(self.pool.head(lineage)).node.as_index();
            let Some(&individual) = samples.get(j / Pedigree::PLOIDY) else {
                return Err(SimulationError::InternalInvariant(format!(
                    "sample genome {j} has no individual in the pedigree"
                )));
            };
            queues.entry(individual).or_default()[j % Pedigree::PLOIDY].push(lineage);
        }

        for index in pedigree.time_order() {
            let Some(copies) = queues.remove(&index) else {
                continue;
            };
            let individual = pedigree.individuals()[index];
            self.time = self.time.max(individual.time);
            for (copy, lineages) in copies.iter().enumerate() {
                let lineage = match lineages.len() {
                    0 => None,
                    1 => Some(lineages[0]),
                    _ => {
                        self.counts.common_ancestor += 1;
                        self.merge_lineages(lineages, 0, 0)?
                    }
                };
                let (Some(lineage), Some(parent)) = (lineage, individual.parents[copy]) else {
                    continue;
                };
                let pieces = self.dtwf_recombine(lineage);
                let parent_copies = queues.entry(parent).or_default();
                for (parent_copy, piece) in pieces.into_iter().enumerate() {
                    if let Some(piece) = piece {
                        parent_copies[parent_copy].push(piece);
                    }
                }
            }
        }

        self.pedigree_done = true;
        self.time = self.time.max(pedigree.max_time());
        log::info!(
            "pedigree complete at time {} with {} lineages; continuing with the standard coalescent",
            self.time,
            self.pool.num_lineages()
        );
        self.change_model(SimulationModel::Hudson);
        Ok(Exit::ModelChange)
    }
}

#[cfg(test)]
mod test_pedigree_walk {
    use super::*;
    use crate::config::SimulationBuilder;
    use crate::pedigree::Individual;
    use crate::rate_map::RateMap;

    //     2   3      time 1
    //      \ / \
    //       0   1    time 0
    //
    // Both samples get their copy 1 from 3; 0 gets
    // copy 0 from 2, 1 has no parent for copy 0.
    fn pedigree() -> Pedigree {
        Pedigree::new(vec![
            Individual {
                parents: [Some(2), Some(3)],
                time: 0.0,
                is_sample: true,
            },
            Individual {
                parents: [None, Some(3)],
                time: 0.0,
                is_sample: true,
            },
            Individual {
                parents: [None, None],
                time: 1.0,
                is_sample: false,
            },
            Individual {
                parents: [None, None],
                time: 1.0,
                is_sample: false,
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_walk_then_fall_back() {
        let config = SimulationBuilder::new()
            .model(SimulationModel::WfPedigree)
            .pedigree(pedigree())
            .recombination_map(RateMap::uniform(100.0, 0.0, false).unwrap())
            .build()
            .unwrap();
        let mut sim = Simulator::new(config, 7);
        assert_eq!(sim.num_lineages(), 4);
        let exit = sim.run_pedigree().unwrap();
        assert_eq!(exit, Exit::ModelChange);
        assert_eq!(sim.model(), SimulationModel::Hudson);
        assert_eq!(sim.time(), 1.0);
        // The two genomes sent to individual 3 merge if they
        // land in the same genome copy.
        assert!(sim.counts.common_ancestor <= 1);
        assert_eq!(sim.num_lineages() as u64, 4 - sim.counts.common_ancestor);
        assert!(sim.pedigree_done);
        sim.pool.check_integrity();
    }

    #[test]
    fn test_end_time_within_pedigree() {
        let config = SimulationBuilder::new()
            .model(SimulationModel::WfPedigree)
            .pedigree(pedigree())
            .build()
            .unwrap();
        let mut sim = Simulator::new(config, 7);
        assert!(matches!(
            sim.run(0.5),
            Err(SimulationError::Validation(_))
        ));
    }
}

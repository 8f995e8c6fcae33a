use nohash::BuildNoHashHasher;
use rand::Rng;
use std::collections::HashMap;

use super::Simulator;
use crate::error::SimulationError;
use crate::flags::NodeFlags;
use crate::lineages::LineageId;
use crate::NodeId;

impl Simulator {
    /// Move each lineage of `source` to `dest` with
    /// probability `proportion`.
    pub(super) fn mass_migration(&mut self, source: usize, dest: usize, proportion: f64) {
        for label in 0..self.pool.num_labels() {
            let lineages = self.pool.lineages_in(source, label).to_vec();
            for lineage in lineages {
                if self.rng.gen_bool(proportion) {
                    self.move_lineage(lineage, dest);
                }
            }
        }
    }

    /// Each lineage of `population` takes part with
    /// probability `proportion`; all participants merge
    /// into one ancestor.
    pub(super) fn simple_bottleneck(
        &mut self,
        population: usize,
        proportion: f64,
    ) -> Result<(), SimulationError> {
        for label in 0..self.pool.num_labels() {
            let lineages = self.pool.lineages_in(population, label).to_vec();
            let selected = lineages
                .into_iter()
                .filter(|_| self.rng.gen_bool(proportion))
                .collect::<Vec<_>>();
            if selected.len() > 1 {
                self.merge_lineages(&selected, population, label)?;
                self.counts.common_ancestor += 1;
            }
        }
        Ok(())
    }

    /// Run a pure coalescent among the lineages of `population`
    /// for `strength` units of coalescent time, then merge the
    /// lineages of each resulting tree at the current time.
    pub(super) fn instantaneous_bottleneck(
        &mut self,
        population: usize,
        strength: f64,
    ) -> Result<(), SimulationError> {
        for label in 0..self.pool.num_labels() {
            let lineages = self.pool.lineages_in(population, label).to_vec();
            let n = lineages.len();
            if n < 2 {
                continue;
            }
            // Leaves are 0..n; internal forest nodes follow.
            let mut parent: Vec<Option<usize>> = vec![None; n];
            let mut roots = (0..n).collect::<Vec<_>>();
            let mut t = 0.0;
            while roots.len() > 1 {
                let k = roots.len();
                t += self.exponential((k * (k - 1) / 2) as f64);
                if t > strength {
                    break;
                }
                let i = self.rng.gen_range(0..k);
                let mut j = self.rng.gen_range(0..k - 1);
                if j >= i {
                    j += 1;
                }
                let node = parent.len();
                parent.push(None);
                parent[roots[i]] = Some(node);
                parent[roots[j]] = Some(node);
                roots.swap_remove(i.max(j));
                roots.swap_remove(i.min(j));
                roots.push(node);
            }
            let mut trees: HashMap<usize, Vec<LineageId>, BuildNoHashHasher<usize>> =
                HashMap::default();
            for (leaf, &lineage) in lineages.iter().enumerate() {
                let mut root = leaf;
                while let Some(p) = parent[root] {
                    root = p;
                }
                trees.entry(root).or_default().push(lineage);
            }
            let mut keys = trees.keys().copied().collect::<Vec<_>>();
            keys.sort_unstable();
            for key in keys {
                if let Some(group) = trees.get(&key).filter(|g| g.len() > 1) {
                    self.merge_lineages(group, population, label)?;
                    self.counts.common_ancestor += 1;
                }
            }
        }
        Ok(())
    }

    /// Give every lineage a census node at the current time,
    /// ancestral to all of its material from before now.
    pub(super) fn census(&mut self) {
        for lineage in self.pool.all_lineages() {
            let mut census: Option<NodeId> = None;
            let head = self.pool.head(lineage);
            for s in self.pool.chain(head).collect::<Vec<_>>() {
                let seg = self.pool.segment(s);
                if self.tables.node_time(seg.node) >= self.time {
                    continue;
                }
                let node = match census {
                    Some(node) => node,
                    None => {
                        let node = self.add_node(NodeFlags::census(), self.pool.population(lineage));
                        census = Some(node);
                        node
                    }
                };
                self.tables.add_edge(seg.left, seg.right, node, seg.node);
                self.pool.set_node(s, node);
            }
        }
    }
}

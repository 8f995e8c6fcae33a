use std::collections::BTreeMap;

use super::{PendingSample, Simulator};
use crate::flags::NodeFlags;
use crate::overlap::OverlapCounts;
use crate::tables::GenealogyTables;
use crate::NodeId;

impl Simulator {
    /// One lineage per sample carrying the whole genome.
    /// Samples from before the start time wait until the
    /// clock reaches them.
    pub(super) fn initialize_from_samples(&mut self) {
        let sequence_length = self.config.sequence_length();
        let start_time = self.config.start_time();
        self.tables = GenealogyTables::new(sequence_length);
        let samples = self.config.samples().to_vec();
        for sample in &samples {
            let node = self
                .tables
                .add_node(NodeFlags::sample(), sample.time, sample.population);
            if sample.time <= start_time {
                self.pool
                    .insert_segment(0.0, sequence_length, node, sample.population, 0);
            } else {
                self.pending_samples.push(PendingSample {
                    time: sample.time,
                    population: sample.population,
                    node,
                });
            }
        }
        self.pending_samples
            .sort_by(|a, b| a.time.total_cmp(&b.time));
        self.overlap = OverlapCounts::new(sequence_length, samples.len());
    }

    /// Resume from existing tables: every root of every
    /// tree that has not yet coalesced becomes ancestral
    /// material of a lineage.
    pub(super) fn initialize_from_tables(&mut self, mut tables: GenealogyTables) {
        tables.flush_edges();
        let sequence_length = tables.sequence_length();
        let mut material: BTreeMap<NodeId, Vec<(f64, f64)>> = BTreeMap::new();
        let mut counts = vec![];
        for (left, right, roots) in tables.marginal_roots() {
            if roots.len() < 2 {
                continue;
            }
            counts.push((left, right, roots.len()));
            for root in roots {
                let intervals = material.entry(root).or_default();
                match intervals.last_mut() {
                    Some(last) if last.1 == left => last.1 = right,
                    _ => intervals.push((left, right)),
                }
            }
        }
        for (node, intervals) in material {
            let mut prev = None;
            let mut head = None;
            for (left, right) in intervals {
                let s = self.pool.alloc_segment(left, right, node);
                self.pool.link(prev, s);
                head.get_or_insert(s);
                prev = Some(s);
            }
            if let Some(head) = head {
                self.pool.insert(head, tables.node_population(node), 0);
            }
        }
        self.overlap = OverlapCounts::from_intervals(sequence_length, &counts);
        self.tables = tables;
    }
}

use std::collections::BinaryHeap;

use super::Simulator;
use crate::error::SimulationError;
use crate::flags::NodeFlags;
use crate::lineages::{LineageId, SegmentId};
use crate::NodeId;

//BOILER PLATE ALERT
// Min-heap order on (left, segment).
#[derive(Debug, Copy, Clone)]
struct QueuedSegment {
    left: f64,
    segment: SegmentId,
}

impl PartialEq for QueuedSegment {
    fn eq(&self, other: &Self) -> bool {
        self.left == other.left && self.segment == other.segment
    }
}

impl Eq for QueuedSegment {}

impl PartialOrd for QueuedSegment {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedSegment {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .left
            .total_cmp(&self.left)
            .then(other.segment.cmp(&self.segment))
    }
}

// The chain being assembled for the ancestor.
#[derive(Default)]
struct Output {
    head: Option<SegmentId>,
    tail: Option<SegmentId>,
}

impl Simulator {
    fn append_segment(&mut self, output: &mut Output, segment: SegmentId) {
        if let Some(tail) = output.tail {
            let t = self.pool.segment(tail);
            let s = self.pool.segment(segment);
            if t.right == s.left && t.node == s.node {
                self.pool.set_right(tail, s.right);
                self.pool.free_segment(segment);
                return;
            }
            self.pool.link(Some(tail), segment);
        } else {
            self.pool.link(None, segment);
            output.head = Some(segment);
        }
        output.tail = Some(segment);
    }

    fn queue_segment(&mut self, heap: &mut BinaryHeap<QueuedSegment>, segment: SegmentId) {
        heap.push(QueuedSegment {
            left: self.pool.segment(segment).left,
            segment,
        });
    }

    /// Merge the ancestral material of `lineages` into
    /// one ancestor in `population` with `label`.
    ///
    /// Wherever two or more inputs overlap, a common
    /// ancestor node is created (once) and edges are
    /// recorded. Intervals in which this merge leaves a
    /// single lineage have found their most recent common
    /// ancestor and are dropped.
    ///
    /// Returns `None` if no material remains.
    ///
    /// # Errors
    ///
    /// [`SimulationError::InternalInvariant`] if more
    /// lineages merge over an interval than carry it.
    ///
    /// # Complexity
    ///
    /// `O(S log S)` for `S` input segments.
    pub(super) fn merge_lineages(
        &mut self,
        lineages: &[LineageId],
        population: usize,
        label: usize,
    ) -> Result<Option<LineageId>, SimulationError> {
        let full_arg = self.config.options().record_full_arg();
        let heads = lineages
            .iter()
            .map(|&l| self.pool.remove(l))
            .collect::<Vec<_>>();
        let mut ancestor: Option<NodeId> = None;
        if full_arg {
            let v = self.add_node(NodeFlags::common_ancestor(), population);
            for &head in &heads {
                for s in self.pool.chain(head).collect::<Vec<_>>() {
                    let seg = self.pool.segment(s);
                    self.tables.add_edge(seg.left, seg.right, v, seg.node);
                    self.pool.set_node(s, v);
                }
            }
            ancestor = Some(v);
        }

        let mut heap = BinaryHeap::new();
        for head in heads {
            self.queue_segment(&mut heap, head);
        }
        let mut output = Output::default();
        let mut overlapping = vec![];
        while let Some(top) = heap.pop() {
            overlapping.clear();
            overlapping.push(top.segment);
            while let Some(next) = heap.peek() {
                if next.left != top.left {
                    break;
                }
                overlapping.push(next.segment);
                heap.pop();
            }
            // Segments are detached as they are processed;
            // their successors wait in the heap.
            for &s in &overlapping {
                if let Some(next) = self.pool.unlink_next(s) {
                    self.queue_segment(&mut heap, next);
                }
            }
            let next_left = heap.peek().map_or(f64::INFINITY, |q| q.left);
            let left = top.left;

            if overlapping.len() == 1 {
                let s = overlapping[0];
                let seg = self.pool.segment(s);
                if next_left < seg.right {
                    let alpha = self.pool.alloc_segment(seg.left, next_left, seg.node);
                    self.pool.set_left(s, next_left);
                    self.queue_segment(&mut heap, s);
                    self.append_segment(&mut output, alpha);
                } else {
                    self.append_segment(&mut output, s);
                }
                continue;
            }

            let v = match ancestor {
                Some(v) => v,
                None => {
                    let v = self.add_node(NodeFlags::common_ancestor(), population);
                    ancestor = Some(v);
                    v
                }
            };
            let r_max = overlapping
                .iter()
                .map(|&s| self.pool.segment(s).right)
                .fold(next_left, f64::min);
            self.overlap.split_at(left);
            self.overlap.split_at(r_max);
            let right = self.overlap.next_boundary(left);
            let count = self.overlap.count_at(left);
            let merged = overlapping.len();
            let Some(remaining) = count.checked_sub(merged) else {
                return Err(SimulationError::InternalInvariant(format!(
                    "{merged} lineages merge over [{left}, {right}) carried by {count}"
                )));
            };
            if remaining == 0 {
                // Every lineage carrying this interval merged here.
                self.overlap.set(left, 0);
            } else {
                self.overlap.set(left, remaining + 1);
                let alpha = self.pool.alloc_segment(left, right, v);
                self.append_segment(&mut output, alpha);
            }
            for &s in &overlapping {
                let seg = self.pool.segment(s);
                if !full_arg {
                    self.tables.add_edge(left, right, v, seg.node);
                }
                if seg.right == right {
                    self.pool.free_segment(s);
                } else {
                    self.pool.set_left(s, right);
                    self.queue_segment(&mut heap, s);
                }
            }
        }
        Ok(output
            .head
            .map(|head| self.pool.insert(head, population, label)))
    }
}

#[cfg(test)]
mod test_merge {
    use super::*;
    use crate::config::SimulationBuilder;
    use crate::lineages::Cut;
    use crate::rate_map::RateMap;

    fn simulator(num_samples: usize, full_arg: bool) -> Simulator {
        let mut options = crate::SimulationOptions::default();
        if full_arg {
            options = options.with_full_arg();
        }
        let config = SimulationBuilder::new()
            .num_samples(num_samples)
            .recombination_map(RateMap::uniform(100.0, 0.0, false).unwrap())
            .options(options)
            .build()
            .unwrap();
        let mut sim = Simulator::new(config, 1);
        sim.time = 1.0;
        sim
    }

    // Sample 0 is cut at 40, sample 1 at 60,
    // sample 2 stays whole:
    //
    //  0: [0, 40) [40, 100)
    //  1: [0, 60) [60, 100)
    //  2: [0, 100)
    //
    // Merging the two left pieces overlaps on [0, 40)
    // and carries [40, 60) of sample 1 through.
    #[test]
    fn test_partial_overlap() {
        let mut sim = simulator(3, false);
        let lineages = sim.pool.lineages_in(0, 0).to_vec();
        let Cut::Split(a, _) = sim.pool.cut(lineages[0], 40.0) else {
            panic!("expected a split")
        };
        let Cut::Split(b, _) = sim.pool.cut(lineages[1], 60.0) else {
            panic!("expected a split")
        };
        let merged = sim.merge_lineages(&[a, b], 0, 0).unwrap().unwrap();
        let segs = sim.pool.segments_of(merged);
        assert_eq!(segs.len(), 2);
        assert_eq!((segs[0].left, segs[0].right), (0.0, 40.0));
        assert_eq!(sim.tables.node_time(segs[0].node), 1.0);
        assert_eq!((segs[1].left, segs[1].right), (40.0, 60.0));
        assert_eq!(segs[1].node, NodeId(1));
        sim.tables.flush_edges();
        assert_eq!(sim.tables.num_edges(), 2);
        assert_eq!(sim.overlap.count_at(0.0), 2);
        assert_eq!(sim.overlap.count_at(50.0), 3);
        assert_eq!(sim.pool.num_lineages(), 4);
        sim.pool.check_integrity();
    }

    #[test]
    fn test_complete_coalescence_drops_material() {
        let mut sim = simulator(2, false);
        let lineages = sim.pool.lineages_in(0, 0).to_vec();
        assert!(sim.merge_lineages(&lineages, 0, 0).unwrap().is_none());
        assert!(sim.overlap.all_coalesced());
        assert_eq!(sim.overlap.count_at(0.0), 0);
        assert_eq!(sim.pool.num_segments(), 0);
        assert_eq!(sim.tables.num_nodes(), 3);
    }

    #[test]
    fn test_more_mergers_than_carriers_is_an_error() {
        let mut sim = simulator(2, false);
        sim.overlap.set(0.0, 1);
        let lineages = sim.pool.lineages_in(0, 0).to_vec();
        assert!(matches!(
            sim.merge_lineages(&lineages, 0, 0),
            Err(SimulationError::InternalInvariant(_))
        ));
    }

    #[test]
    fn test_three_way_merge_creates_one_node() {
        let mut sim = simulator(4, false);
        let lineages = sim.pool.lineages_in(0, 0)[..3].to_vec();
        let merged = sim.merge_lineages(&lineages, 0, 0).unwrap().unwrap();
        assert_eq!(sim.tables.num_nodes(), 5);
        assert_eq!(sim.overlap.count_at(0.0), 2);
        assert_eq!(sim.pool.segments_of(merged).len(), 1);
        sim.tables.flush_edges();
        assert_eq!(sim.tables.num_edges(), 3);
    }

    #[test]
    fn test_full_arg_records_disjoint_material() {
        let mut sim = simulator(2, true);
        let lineages = sim.pool.lineages_in(0, 0).to_vec();
        let Cut::Split(a, _) = sim.pool.cut(lineages[0], 30.0) else {
            panic!("expected a split")
        };
        let Cut::Split(_, b) = sim.pool.cut(lineages[1], 70.0) else {
            panic!("expected a split")
        };
        // [0, 30) and [70, 100) do not overlap
        let merged = sim.merge_lineages(&[a, b], 0, 0).unwrap().unwrap();
        let segs = sim.pool.segments_of(merged);
        assert_eq!(segs.len(), 2);
        assert!(segs.iter().all(|s| s.node == NodeId(2)));
        sim.tables.flush_edges();
        assert_eq!(sim.tables.num_edges(), 2);
        sim.pool.check_integrity();
    }
}

use crate::config::SimulationConfig;
use crate::tables::GenealogyTables;
use crate::{SimulationState, Simulator};

#[must_use]
pub(crate) fn run_to_completion(config: SimulationConfig, seed: u64) -> (Simulator, GenealogyTables) {
    let mut sim = Simulator::new(config, seed);
    assert_eq!(sim.run(f64::INFINITY).unwrap(), SimulationState::Completed);
    let tables = sim.finalize().unwrap();
    (sim, tables)
}

/// Every marginal tree has exactly one root.
pub(crate) fn assert_fully_coalesced(tables: &GenealogyTables) {
    for (left, right, roots) in tables.marginal_roots() {
        assert_eq!(roots.len(), 1, "[{left}, {right}) has roots {roots:?}");
    }
}

/// Every edge points back in time and no child has two
/// parents over the same position.
pub(crate) fn assert_edges_consistent(tables: &GenealogyTables) {
    let mut by_child = tables
        .edges
        .iter()
        .inspect(|e| {
            assert!(e.left < e.right);
            assert!(tables.node_time(e.parent) > tables.node_time(e.child));
        })
        .collect::<Vec<_>>();
    by_child.sort_by(|a, b| a.child.cmp(&b.child).then(a.left.total_cmp(&b.left)));
    for w in by_child.windows(2) {
        if w[0].child == w[1].child {
            assert!(w[0].right <= w[1].left, "{:?} overlaps {:?}", w[0], w[1]);
        }
    }
}

/// Load the tables into tskit and build a tree sequence.
pub(crate) fn to_tree_sequence(tables: &GenealogyTables) -> tskit::TreeSequence {
    let mut tskit_tables = tskit::TableCollection::new(tables.sequence_length()).unwrap();
    for i in 0..tables.num_nodes() {
        let node = crate::NodeId(i);
        let flags = if tables.node_flags(node).is_sample() {
            tskit::TSK_NODE_IS_SAMPLE
        } else {
            0
        };
        tskit_tables
            .add_node(flags, tables.node_time(node), tskit::TSK_NULL, tskit::TSK_NULL)
            .unwrap();
    }
    for e in tables.edges.iter() {
        tskit_tables
            .add_edge(e.left, e.right, e.parent.as_index() as i32, e.child.as_index() as i32)
            .unwrap();
    }
    tskit_tables.full_sort(tskit::TableSortOptions::NONE).unwrap();
    tskit_tables
        .tree_sequence(tskit::TreeSequenceFlags::BUILD_INDEXES)
        .unwrap()
}

use crate::flags::NodeFlags;
use crate::NodeId;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeTable {
    pub flags: Vec<NodeFlags>,
    pub time: Vec<f64>,
    pub population: Vec<usize>,
}

impl NodeTable {
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.flags.len(), self.time.len());
        debug_assert_eq!(self.flags.len(), self.population.len());
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, flags: NodeFlags, time: f64, population: usize) {
        self.flags.push(flags);
        self.time.push(time);
        self.population.push(population);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub left: f64,
    pub right: f64,
    pub parent: NodeId,
    pub child: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeTable {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub parent: Vec<NodeId>,
    pub child: Vec<NodeId>,
}

impl EdgeTable {
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.left.len(), self.right.len());
        debug_assert_eq!(self.left.len(), self.parent.len());
        debug_assert_eq!(self.left.len(), self.child.len());
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, edge: Edge) {
        self.left.push(edge.left);
        self.right.push(edge.right);
        self.parent.push(edge.parent);
        self.child.push(edge.child);
    }

    fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
        self.parent.clear();
        self.child.clear();
    }

    pub fn get(&self, row: usize) -> Edge {
        Edge {
            left: self.left[row],
            right: self.right[row],
            parent: self.parent[row],
            child: self.child[row],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Edge> + '_ {
        (0..self.len()).map(|row| self.get(row))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Migration {
    pub left: f64,
    pub right: f64,
    pub node: NodeId,
    pub source: usize,
    pub dest: usize,
    pub time: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationTable {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub node: Vec<NodeId>,
    pub source: Vec<usize>,
    pub dest: Vec<usize>,
    pub time: Vec<f64>,
}

impl MigrationTable {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, m: Migration) {
        self.left.push(m.left);
        self.right.push(m.right);
        self.node.push(m.node);
        self.source.push(m.source);
        self.dest.push(m.dest);
        self.time.push(m.time);
    }

    pub fn get(&self, row: usize) -> Migration {
        Migration {
            left: self.left[row],
            right: self.right[row],
            node: self.node[row],
            source: self.source[row],
            dest: self.dest[row],
            time: self.time[row],
        }
    }
}

/// The append-only output of a simulation.
///
/// Edges are buffered per parent: all edges of one
/// parent are recorded before the next parent gets any,
/// so the buffer is squashed and flushed whenever
/// the parent changes.
#[derive(Debug, Clone, PartialEq)]
pub struct GenealogyTables {
    sequence_length: f64,
    pub nodes: NodeTable,
    pub edges: EdgeTable,
    pub migrations: MigrationTable,
    edge_buffer: Vec<Edge>,
}

fn squash(edges: &mut Vec<Edge>) {
    let mut rv: Vec<Edge> = Vec::with_capacity(edges.len());
    for &e in edges.iter() {
        match rv.last_mut() {
            Some(last) if last.parent == e.parent && last.child == e.child && last.right == e.left => {
                last.right = e.right
            }
            _ => rv.push(e),
        }
    }
    *edges = rv;
}

impl GenealogyTables {
    pub fn new(sequence_length: f64) -> Self {
        Self {
            sequence_length,
            nodes: NodeTable::default(),
            edges: EdgeTable::default(),
            migrations: MigrationTable::default(),
            edge_buffer: vec![],
        }
    }

    pub fn sequence_length(&self) -> f64 {
        self.sequence_length
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of flushed edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn node_time(&self, node: NodeId) -> f64 {
        self.nodes.time[node.as_index()]
    }

    pub fn node_flags(&self, node: NodeId) -> NodeFlags {
        self.nodes.flags[node.as_index()]
    }

    pub fn node_population(&self, node: NodeId) -> usize {
        self.nodes.population[node.as_index()]
    }

    pub fn add_node(&mut self, flags: NodeFlags, time: f64, population: usize) -> NodeId {
        self.nodes.push(flags, time, population);
        NodeId(self.nodes.len() - 1)
    }

    pub fn add_edge(&mut self, left: f64, right: f64, parent: NodeId, child: NodeId) {
        debug_assert!(left < right);
        debug_assert!(self.node_time(parent) > self.node_time(child));
        if let Some(last) = self.edge_buffer.last() {
            if last.parent != parent {
                self.flush_edges();
            }
        }
        self.edge_buffer.push(Edge {
            left,
            right,
            parent,
            child,
        });
    }

    pub fn add_migration(&mut self, migration: Migration) {
        self.migrations.push(migration);
    }

    pub fn flush_edges(&mut self) {
        if self.edge_buffer.is_empty() {
            return;
        }
        self.edge_buffer
            .sort_by(|a, b| a.child.cmp(&b.child).then(a.left.total_cmp(&b.left)));
        squash(&mut self.edge_buffer);
        for &e in &self.edge_buffer {
            self.edges.push(e);
        }
        self.edge_buffer.clear();
    }

    /// Flush, sort edges by (parent time, parent, child, left)
    /// and merge rows for the same parent/child pair that
    /// abut each other.
    ///
    /// Applying this more than once has no further effect.
    pub fn finalize(&mut self) {
        self.flush_edges();
        let mut edges = self.edges.iter().collect::<Vec<_>>();
        let time = &self.nodes.time;
        edges.sort_by(|a, b| {
            time[a.parent.as_index()]
                .total_cmp(&time[b.parent.as_index()])
                .then(a.parent.cmp(&b.parent))
                .then(a.child.cmp(&b.child))
                .then(a.left.total_cmp(&b.left))
        });
        squash(&mut edges);
        self.edges.clear();
        for e in edges {
            self.edges.push(e);
        }
    }

    pub fn sample_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .flags
            .iter()
            .enumerate()
            .filter_map(|(i, f)| if f.is_sample() { Some(NodeId(i)) } else { None })
    }

    /// The roots reached from the sample nodes along
    /// each marginal tree, as `(left, right, roots)`.
    ///
    /// Only flushed edges are considered.
    ///
    /// # Complexity
    ///
    /// `O(E log E + T * S * D)` for `E` edges, `T` trees,
    /// `S` samples and tree depth `D`.
    pub fn marginal_roots(&self) -> Vec<(f64, f64, Vec<NodeId>)> {
        let time = &self.nodes.time;
        let edges = self.edges.iter().collect::<Vec<_>>();
        let mut insertion = (0..edges.len()).collect::<Vec<_>>();
        insertion.sort_by(|&a, &b| {
            edges[a]
                .left
                .total_cmp(&edges[b].left)
                .then(time[edges[a].parent.as_index()].total_cmp(&time[edges[b].parent.as_index()]))
        });
        let mut removal = (0..edges.len()).collect::<Vec<_>>();
        removal.sort_by(|&a, &b| {
            edges[a]
                .right
                .total_cmp(&edges[b].right)
                .then(time[edges[b].parent.as_index()].total_cmp(&time[edges[a].parent.as_index()]))
        });
        let samples = self.sample_nodes().collect::<Vec<_>>();
        let mut parent: Vec<Option<NodeId>> = vec![None; self.num_nodes()];
        let mut rv = vec![];
        let (mut j, mut k) = (0, 0);
        let mut left = 0.0;
        while left < self.sequence_length {
            while k < removal.len() && edges[removal[k]].right == left {
                parent[edges[removal[k]].child.as_index()] = None;
                k += 1;
            }
            while j < insertion.len() && edges[insertion[j]].left == left {
                let e = edges[insertion[j]];
                parent[e.child.as_index()] = Some(e.parent);
                j += 1;
            }
            let mut right = self.sequence_length;
            if j < insertion.len() {
                right = right.min(edges[insertion[j]].left);
            }
            if k < removal.len() {
                right = right.min(edges[removal[k]].right);
            }
            let mut roots = samples
                .iter()
                .map(|&s| {
                    let mut u = s;
                    while let Some(p) = parent[u.as_index()] {
                        u = p;
                    }
                    u
                })
                .collect::<Vec<_>>();
            roots.sort_unstable();
            roots.dedup();
            rv.push((left, right, roots));
            left = right;
        }
        rv
    }
}


#[cfg(test)]
mod proptest_tables {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_squash_is_idempotent(cuts in proptest::collection::vec(1u32..99, 0..10)) {
            let mut tables = GenealogyTables::new(100.0);
            let a = tables.add_node(NodeFlags::sample(), 0.0, 0);
            let p = tables.add_node(NodeFlags::common_ancestor(), 1.0, 0);
            let mut breakpoints = cuts.iter().map(|&c| c as f64).collect::<Vec<_>>();
            breakpoints.push(0.0);
            breakpoints.push(100.0);
            breakpoints.sort_by(|x, y| x.total_cmp(y));
            breakpoints.dedup();
            for w in breakpoints.windows(2).rev() {
                tables.add_edge(w[0], w[1], p, a);
            }
            tables.finalize();
            prop_assert_eq!(tables.num_edges(), 1);
            let once = tables.clone();
            tables.finalize();
            prop_assert_eq!(once, tables);
        }
    }
}

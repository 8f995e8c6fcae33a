use rand::Rng;

use crate::fenwick::Fenwick;
use crate::rate_map::RateMap;
use crate::NodeId;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, PartialOrd, Ord, Eq)]
pub struct SegmentId(usize);

impl SegmentId {
    #[inline(always)]
    fn sentinel() -> Self {
        Self(usize::MAX)
    }

    #[inline(always)]
    fn is_sentinel(&self) -> bool {
        self.0 == usize::MAX
    }

    #[inline(always)]
    fn into_option(self) -> Option<Self> {
        if self.is_sentinel() {
            None
        } else {
            Some(self)
        }
    }

    pub fn as_index(&self) -> usize {
        self.0
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, PartialOrd, Ord, Eq)]
pub struct LineageId(usize);

impl nohash::IsEnabled for LineageId {}

impl LineageId {
    pub fn as_index(&self) -> usize {
        self.0
    }
}

/// A half-open interval `[left, right)` of ancestral
/// material, inherited from `node`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub left: f64,
    pub right: f64,
    pub node: NodeId,
}

// Doubly-linked lists of segments in one arena.
// Freed slots are recycled.
#[derive(Debug, Clone, Default)]
struct SegmentList {
    data: Vec<Segment>,
    next: Vec<SegmentId>,
    prev: Vec<SegmentId>,
    lineage: Vec<LineageId>,
    free_list: Vec<usize>,
}

impl SegmentList {
    fn new_index(&mut self, datum: Segment) -> SegmentId {
        if let Some(index) = self.free_list.pop() {
            self.data[index] = datum;
            self.next[index] = SegmentId::sentinel();
            self.prev[index] = SegmentId::sentinel();
            SegmentId(index)
        } else {
            self.data.push(datum);
            self.next.push(SegmentId::sentinel());
            self.prev.push(SegmentId::sentinel());
            self.lineage.push(LineageId(usize::MAX));
            SegmentId(self.data.len() - 1)
        }
    }

    fn free(&mut self, at: SegmentId) {
        self.next[at.0] = SegmentId::sentinel();
        self.prev[at.0] = SegmentId::sentinel();
        self.lineage[at.0] = LineageId(usize::MAX);
        self.free_list.push(at.0);
    }

    fn num_used(&self) -> usize {
        self.data.len() - self.free_list.len()
    }
}

#[derive(Clone, Copy, Debug)]
struct Lineage {
    head: SegmentId,
    tail: SegmentId,
    population: usize,
    label: usize,
    // Position in the membership list of (population, label)
    slot: usize,
}

/// The ancestral material of all extant lineages.
///
/// Lineages are grouped by population and label so that
/// event participants can be chosen uniformly in `O(1)`.
/// Every segment carries a recombination mass and a gene
/// conversion mass, held in Fenwick trees indexed by
/// [`SegmentId`], so that breakpoints can be drawn in
/// `O(log n)`.
#[derive(Debug, Clone)]
pub struct LineagePool {
    segments: SegmentList,
    lineages: Vec<Lineage>,
    free_lineages: Vec<usize>,
    members: Vec<Vec<Vec<LineageId>>>,
    recombination_map: RateMap,
    gene_conversion_rate: f64,
    recombination_mass: Fenwick,
    gene_conversion_mass: Fenwick,
}

/// The outcome of cutting a lineage at a position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cut {
    /// All material is left of the position.
    Left(LineageId),
    /// All material is at or right of the position.
    Right(LineageId),
    /// The lineage kept the left part; the right
    /// part moved to a new lineage.
    Split(LineageId, LineageId),
}

impl LineagePool {
    pub fn new(
        num_populations: usize,
        num_labels: usize,
        recombination_map: RateMap,
        gene_conversion_rate: f64,
    ) -> Self {
        Self {
            segments: SegmentList::default(),
            lineages: vec![],
            free_lineages: vec![],
            members: vec![vec![vec![]; num_labels]; num_populations],
            recombination_map,
            gene_conversion_rate,
            recombination_mass: Fenwick::with_capacity(1024),
            gene_conversion_mass: Fenwick::with_capacity(1024),
        }
    }

    pub fn num_populations(&self) -> usize {
        self.members.len()
    }

    pub fn num_labels(&self) -> usize {
        self.members.first().map_or(0, |m| m.len())
    }

    pub fn recombination_map(&self) -> &RateMap {
        &self.recombination_map
    }

    pub fn gene_conversion_rate(&self) -> f64 {
        self.gene_conversion_rate
    }

    /// Drop all lineages and segments.
    pub fn clear(&mut self) {
        let num_populations = self.num_populations();
        let num_labels = self.num_labels();
        self.segments = SegmentList::default();
        self.lineages.clear();
        self.free_lineages.clear();
        self.members = vec![vec![vec![]; num_labels]; num_populations];
        self.recombination_mass = Fenwick::with_capacity(1024);
        self.gene_conversion_mass = Fenwick::with_capacity(1024);
    }

    pub fn num_segments(&self) -> usize {
        self.segments.num_used()
    }

    pub fn num_lineages(&self) -> usize {
        self.members.iter().flatten().map(|m| m.len()).sum()
    }

    pub fn num_lineages_in(&self, population: usize, label: usize) -> usize {
        self.members[population][label].len()
    }

    /// Number of lineages in `population`, over all labels.
    pub fn population_size(&self, population: usize) -> usize {
        self.members[population].iter().map(|m| m.len()).sum()
    }

    pub fn lineages_in(&self, population: usize, label: usize) -> &[LineageId] {
        &self.members[population][label]
    }

    /// All extant lineages, ordered by population,
    /// label, then membership slot.
    pub fn all_lineages(&self) -> Vec<LineageId> {
        self.members.iter().flatten().flatten().copied().collect()
    }

    pub fn population(&self, lineage: LineageId) -> usize {
        self.lineages[lineage.0].population
    }

    pub fn label(&self, lineage: LineageId) -> usize {
        self.lineages[lineage.0].label
    }

    pub fn head(&self, lineage: LineageId) -> SegmentId {
        self.lineages[lineage.0].head
    }

    pub fn tail(&self, lineage: LineageId) -> SegmentId {
        self.lineages[lineage.0].tail
    }

    pub fn segment(&self, at: SegmentId) -> Segment {
        self.segments.data[at.0]
    }

    pub fn next(&self, at: SegmentId) -> Option<SegmentId> {
        self.segments.next[at.0].into_option()
    }

    pub fn prev(&self, at: SegmentId) -> Option<SegmentId> {
        self.segments.prev[at.0].into_option()
    }

    pub fn lineage_of(&self, at: SegmentId) -> LineageId {
        self.segments.lineage[at.0]
    }

    /// The segments of a chain, starting from `head`.
    pub fn chain(&self, head: SegmentId) -> impl Iterator<Item = SegmentId> + '_ {
        std::iter::successors(head.into_option(), move |&s| self.next(s))
    }

    /// The material of `lineage`, left to right.
    pub fn segments_of(&self, lineage: LineageId) -> Vec<Segment> {
        self.chain(self.head(lineage))
            .map(|s| self.segment(s))
            .collect()
    }

    /// `[head.left, tail.right)`
    pub fn span(&self, lineage: LineageId) -> (f64, f64) {
        (
            self.segment(self.head(lineage)).left,
            self.segment(self.tail(lineage)).right,
        )
    }

    pub fn set_node(&mut self, at: SegmentId, node: NodeId) {
        self.segments.data[at.0].node = node;
    }

    pub fn total_recombination_mass(&self) -> f64 {
        self.recombination_mass.total()
    }

    pub fn total_gene_conversion_mass(&self) -> f64 {
        self.gene_conversion_mass.total()
    }

    // The lowest position at which a breakpoint may fall in
    // segment `at`. A break at the head's left end splits
    // nothing; one at the right end of the predecessor does.
    fn left_bound(&self, at: SegmentId) -> f64 {
        match self.prev(at) {
            Some(p) => self.segment(p).right,
            None if self.recombination_map.discrete() => self.segment(at).left + 1.0,
            None => self.segment(at).left,
        }
    }

    /// Recompute the masses of `at` from its extent
    /// and its predecessor.
    pub fn set_mass(&mut self, at: SegmentId) {
        if at.0 >= self.recombination_mass.len() {
            let size = (2 * self.recombination_mass.len()).max(at.0 + 1);
            self.recombination_mass.expand(size);
            self.gene_conversion_mass.expand(size);
        }
        let right = self.segment(at).right;
        let left = self.left_bound(at).min(right);
        let mass = self.recombination_map.position_to_mass(right)
            - self.recombination_map.position_to_mass(left);
        self.recombination_mass.set_value(at.0, mass.max(0.0));
        let mass = self.gene_conversion_rate * (right - left);
        self.gene_conversion_mass.set_value(at.0, mass.max(0.0));
    }

    fn clear_mass(&mut self, at: SegmentId) {
        if at.0 < self.recombination_mass.len() {
            self.recombination_mass.set_value(at.0, 0.0);
            self.gene_conversion_mass.set_value(at.0, 0.0);
        }
    }

    /// Allocate a segment that is not yet part of any chain.
    pub fn alloc_segment(&mut self, left: f64, right: f64, node: NodeId) -> SegmentId {
        debug_assert!(left < right);
        self.segments.new_index(Segment { left, right, node })
    }

    pub fn free_segment(&mut self, at: SegmentId) {
        self.clear_mass(at);
        self.segments.free(at);
    }

    /// Shrink a detached segment from the left.
    pub fn set_left(&mut self, at: SegmentId, left: f64) {
        debug_assert!(left < self.segment(at).right);
        self.segments.data[at.0].left = left;
    }

    /// Grow or shrink a segment on the right and
    /// update its masses.
    pub fn set_right(&mut self, at: SegmentId, right: f64) {
        debug_assert!(self.segment(at).left < right);
        self.segments.data[at.0].right = right;
        self.set_mass(at);
        if let Some(next) = self.next(at) {
            self.set_mass(next);
        }
    }

    /// Link `second` after `first` (either may be
    /// the sentinel) and update the mass of `second`.
    pub fn link(&mut self, first: Option<SegmentId>, second: SegmentId) {
        if let Some(f) = first {
            self.segments.next[f.0] = second;
            self.segments.prev[second.0] = f;
        } else {
            self.segments.prev[second.0] = SegmentId::sentinel();
        }
        self.set_mass(second);
    }

    /// Detach a segment from its successor, returning
    /// the successor.
    pub fn unlink_next(&mut self, at: SegmentId) -> Option<SegmentId> {
        let next = self.next(at);
        if let Some(n) = next {
            self.segments.prev[n.0] = SegmentId::sentinel();
        }
        self.segments.next[at.0] = SegmentId::sentinel();
        next
    }

    fn add_member(&mut self, lineage: LineageId) {
        let l = self.lineages[lineage.0];
        let members = &mut self.members[l.population][l.label];
        members.push(lineage);
        self.lineages[lineage.0].slot = members.len() - 1;
    }

    fn remove_member(&mut self, lineage: LineageId) {
        let l = self.lineages[lineage.0];
        let members = &mut self.members[l.population][l.label];
        debug_assert_eq!(members[l.slot], lineage);
        members.swap_remove(l.slot);
        if let Some(&moved) = members.get(l.slot) {
            self.lineages[moved.0].slot = l.slot;
        }
    }

    /// Turn the chain starting at `head` into a lineage.
    ///
    /// # Panics
    ///
    /// If `population` or `label` are out of range.
    pub fn insert(&mut self, head: SegmentId, population: usize, label: usize) -> LineageId {
        let lineage = match self.free_lineages.pop() {
            Some(i) => LineageId(i),
            None => {
                self.lineages.push(Lineage {
                    head,
                    tail: head,
                    population,
                    label,
                    slot: 0,
                });
                LineageId(self.lineages.len() - 1)
            }
        };
        let mut tail = head;
        for s in self.chain(head).collect::<Vec<_>>() {
            self.segments.lineage[s.0] = lineage;
            tail = s;
        }
        self.lineages[lineage.0] = Lineage {
            head,
            tail,
            population,
            label,
            slot: 0,
        };
        self.add_member(lineage);
        lineage
    }

    /// Insert a lineage carrying `[left, right)` of `node`.
    pub fn insert_segment(
        &mut self,
        left: f64,
        right: f64,
        node: NodeId,
        population: usize,
        label: usize,
    ) -> LineageId {
        let s = self.alloc_segment(left, right, node);
        self.link(None, s);
        self.insert(s, population, label)
    }

    /// Remove a lineage, handing back its chain.
    /// The segments stay allocated.
    pub fn remove(&mut self, lineage: LineageId) -> SegmentId {
        self.remove_member(lineage);
        self.free_lineages.push(lineage.0);
        self.lineages[lineage.0].head
    }

    /// Remove a lineage and free its material.
    pub fn discard(&mut self, lineage: LineageId) {
        let head = self.remove(lineage);
        for s in self.chain(head).collect::<Vec<_>>() {
            self.free_segment(s);
        }
    }

    pub fn migrate(&mut self, lineage: LineageId, population: usize) {
        self.remove_member(lineage);
        self.lineages[lineage.0].population = population;
        self.add_member(lineage);
    }

    pub fn relabel(&mut self, lineage: LineageId, label: usize) {
        self.remove_member(lineage);
        self.lineages[lineage.0].label = label;
        self.add_member(lineage);
    }

    pub fn choose<R: Rng>(&self, population: usize, label: usize, rng: &mut R) -> Option<LineageId> {
        let members = &self.members[population][label];
        if members.is_empty() {
            None
        } else {
            Some(members[rng.gen_range(0..members.len())])
        }
    }

    /// Choose two distinct lineages uniformly.
    pub fn choose_pair<R: Rng>(
        &self,
        population: usize,
        label: usize,
        rng: &mut R,
    ) -> Option<(LineageId, LineageId)> {
        let members = &self.members[population][label];
        let n = members.len();
        if n < 2 {
            return None;
        }
        let i = rng.gen_range(0..n);
        let mut j = rng.gen_range(0..n - 1);
        if j >= i {
            j += 1;
        }
        Some((members[i], members[j]))
    }

    /// Choose a segment with probability proportional to its
    /// recombination mass, returning it with the mass
    /// remaining past its left bound.
    pub fn choose_recombination_segment<R: Rng>(&self, rng: &mut R) -> Option<(SegmentId, f64)> {
        let total = self.recombination_mass.total();
        if total <= 0.0 {
            return None;
        }
        let u = rng.gen::<f64>() * total;
        self.recombination_mass
            .find(u)
            .map(|(i, remaining)| (SegmentId(i), remaining))
    }

    /// As [`LineagePool::choose_recombination_segment`]
    /// for gene conversion.
    pub fn choose_gene_conversion_segment<R: Rng>(&self, rng: &mut R) -> Option<(SegmentId, f64)> {
        let total = self.gene_conversion_mass.total();
        if total <= 0.0 {
            return None;
        }
        let u = rng.gen::<f64>() * total;
        self.gene_conversion_mass
            .find(u)
            .map(|(i, remaining)| (SegmentId(i), remaining))
    }

    /// The breakpoint `remaining` units of recombination
    /// mass past the left bound of `at`, or `None` if it
    /// does not split the lineage.
    pub fn recombination_breakpoint(&self, at: SegmentId, remaining: f64) -> Option<f64> {
        let map = &self.recombination_map;
        let mass = map.position_to_mass(self.left_bound(at)) + remaining;
        let mut k = map.mass_to_position_unchecked(mass);
        if map.discrete() {
            k = k.floor();
        }
        self.is_valid_breakpoint(at, k).then_some(k)
    }

    /// The gene conversion tract start `remaining` units of
    /// mass past the left bound of `at`.
    pub fn gene_conversion_start(&self, at: SegmentId, remaining: f64) -> f64 {
        let mut start = self.left_bound(at) + remaining / self.gene_conversion_rate;
        if self.recombination_map.discrete() {
            start = start.floor();
        }
        start.min(self.segment(at).right)
    }

    fn is_valid_breakpoint(&self, at: SegmentId, k: f64) -> bool {
        let seg = self.segment(at);
        let lower = match self.prev(at) {
            Some(p) => self.segment(p).right,
            None => seg.left,
        };
        match self.prev(at) {
            Some(_) => k >= lower && k < seg.right,
            None => k > lower && k < seg.right,
        }
    }

    /// Split `lineage` at `k`, with `k` inside segment `at`
    /// or in the gap before it. The left part stays with
    /// `lineage`; the right part becomes a new lineage in the
    /// same population and label.
    ///
    /// # Panics
    ///
    /// In debug builds, if `k` does not split the lineage.
    pub fn split_at_segment(&mut self, at: SegmentId, k: f64) -> LineageId {
        let lineage = self.lineage_of(at);
        let l = self.lineages[lineage.0];
        let seg = self.segment(at);
        let (left_tail, right_head) = if seg.left < k {
            debug_assert!(k < seg.right);
            let alpha = self.alloc_segment(k, seg.right, seg.node);
            if let Some(n) = self.unlink_next(at) {
                self.link(Some(alpha), n);
            }
            self.segments.data[at.0].right = k;
            self.set_mass(at);
            (at, alpha)
        } else {
            let prev = self.prev(at);
            debug_assert!(prev.is_some());
            let x = prev.unwrap_or(at);
            self.unlink_next(x);
            (x, at)
        };
        self.link(None, right_head);
        self.lineages[lineage.0].tail = left_tail;
        self.insert(right_head, l.population, l.label)
    }

    /// Cut `lineage` at position `k`.
    pub fn cut(&mut self, lineage: LineageId, k: f64) -> Cut {
        let (left, right) = self.span(lineage);
        if right <= k {
            return Cut::Left(lineage);
        }
        if left >= k {
            return Cut::Right(lineage);
        }
        let mut at = self.head(lineage);
        while self.segment(at).right <= k {
            match self.next(at) {
                Some(n) => at = n,
                None => return Cut::Left(lineage),
            }
        }
        let right = self.split_at_segment(at, k);
        Cut::Split(lineage, right)
    }

    /// Append the material of `second` to `first`,
    /// removing `second`.
    ///
    /// # Panics
    ///
    /// In debug builds, if `second` does not lie
    /// entirely right of `first`.
    pub fn join(&mut self, first: LineageId, second: LineageId) {
        debug_assert!(self.span(first).1 <= self.span(second).0);
        let tail = self.tail(first);
        let head = self.remove(second);
        let seg = self.segment(tail);
        let h = self.segment(head);
        if seg.right == h.left && seg.node == h.node {
            let next = self.unlink_next(head);
            self.free_segment(head);
            self.segments.data[tail.0].right = h.right;
            self.set_mass(tail);
            if let Some(n) = next {
                self.link(Some(tail), n);
            }
        } else {
            self.link(Some(tail), head);
        }
        let mut last = tail;
        for s in self.chain(tail).collect::<Vec<_>>() {
            self.segments.lineage[s.0] = first;
            last = s;
        }
        self.lineages[first.0].tail = last;
    }

    /// Remove `[start, end)` from `lineage`.
    ///
    /// Returns `(outside, inside)`, the lineages carrying the
    /// material outside and inside of the tract, or `None` if
    /// the tract leaves the lineage unchanged (it covers no
    /// material, or all of it).
    pub fn gene_convert(
        &mut self,
        lineage: LineageId,
        start: f64,
        end: f64,
    ) -> Option<(LineageId, LineageId)> {
        let (a, rest) = match self.cut(lineage, start) {
            Cut::Left(_) => return None,
            Cut::Right(r) => (None, r),
            Cut::Split(a, r) => (Some(a), r),
        };
        let (inside, c) = match self.cut(rest, end) {
            Cut::Left(b) => (b, None),
            Cut::Split(b, c) => (b, Some(c)),
            Cut::Right(c) => {
                // nothing inside the tract
                if let Some(a) = a {
                    self.join(a, c);
                }
                return None;
            }
        };
        let outside = match (a, c) {
            (Some(a), Some(c)) => {
                self.join(a, c);
                a
            }
            (Some(a), None) => a,
            (None, Some(c)) => c,
            (None, None) => return None,
        };
        Some((outside, inside))
    }

    /// Check internal consistency.
    ///
    /// # Panics
    ///
    /// If any invariant is broken.
    #[cfg(test)]
    pub fn check_integrity(&self) {
        let mut num_segments = 0;
        for (p, labels) in self.members.iter().enumerate() {
            for (label, members) in labels.iter().enumerate() {
                for (slot, &lineage) in members.iter().enumerate() {
                    let l = self.lineages[lineage.0];
                    assert_eq!(l.population, p);
                    assert_eq!(l.label, label);
                    assert_eq!(l.slot, slot);
                    assert!(self.prev(l.head).is_none());
                    let mut last: Option<SegmentId> = None;
                    for s in self.chain(l.head) {
                        num_segments += 1;
                        let seg = self.segment(s);
                        assert!(seg.left < seg.right);
                        assert_eq!(self.lineage_of(s), lineage);
                        assert_eq!(self.prev(s), last);
                        if let Some(x) = last {
                            assert!(self.segment(x).right <= seg.left);
                        }
                        let expected = {
                            let right = seg.right;
                            let left = self.left_bound(s).min(right);
                            self.recombination_map.position_to_mass(right)
                                - self.recombination_map.position_to_mass(left)
                        };
                        assert!((self.recombination_mass.get_value(s.0) - expected).abs() < 1e-9);
                        last = Some(s);
                    }
                    assert_eq!(last, Some(l.tail));
                }
            }
        }
        assert_eq!(num_segments, self.num_segments());
    }
}

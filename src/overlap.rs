use std::collections::BTreeMap;
use std::ops::Bound;

// Positions are finite, so total_cmp gives
// the usual ordering.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Key(f64);

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// For each position along the genome, the number of
/// extant lineages (plus samples yet to be inserted)
/// that carry ancestral material there.
///
/// The count of `[x_j, x_{j+1})` is stored at key `x_j`.
/// An interval whose count has dropped to zero has found
/// its most recent common ancestor.
#[derive(Debug, Clone)]
pub struct OverlapCounts {
    counts: BTreeMap<Key, usize>,
    sequence_length: f64,
}

impl OverlapCounts {
    pub fn new(sequence_length: f64, count: usize) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert(Key(0.0), count);
        counts.insert(Key(sequence_length), 0);
        Self {
            counts,
            sequence_length,
        }
    }

    /// Counts from a list of `(left, right, count)`
    /// intervals; the rest of the genome gets zero.
    pub fn from_intervals(sequence_length: f64, intervals: &[(f64, f64, usize)]) -> Self {
        let mut rv = Self::new(sequence_length, 0);
        for &(left, right, count) in intervals {
            rv.split_at(left);
            rv.split_at(right);
            let keys = rv
                .counts
                .range(Key(left)..Key(right))
                .map(|(k, _)| *k)
                .collect::<Vec<_>>();
            for k in keys {
                rv.counts.insert(k, count);
            }
        }
        rv
    }

    pub fn sequence_length(&self) -> f64 {
        self.sequence_length
    }

    pub fn count_at(&self, x: f64) -> usize {
        self.counts
            .range(..=Key(x))
            .next_back()
            .map_or(0, |(_, &c)| c)
    }

    /// Ensure that `x` is an interval boundary.
    pub fn split_at(&mut self, x: f64) {
        if !self.counts.contains_key(&Key(x)) {
            let c = self.count_at(x);
            self.counts.insert(Key(x), c);
        }
    }

    /// The first boundary strictly to the right of `x`.
    pub fn next_boundary(&self, x: f64) -> f64 {
        self.counts
            .range((Bound::Excluded(Key(x)), Bound::Unbounded))
            .next()
            .map_or(self.sequence_length, |(k, _)| k.0)
    }

    pub fn num_intervals(&self) -> usize {
        self.counts.len() - 1
    }

    /// Set the count of the interval starting at boundary `x`.
    ///
    /// Neighbouring intervals with equal counts are joined,
    /// so `x` may no longer be a boundary afterwards.
    ///
    /// # Panics
    ///
    /// If `x` is not a boundary.
    pub fn set(&mut self, x: f64, count: usize) {
        match self.counts.get_mut(&Key(x)) {
            Some(c) => *c = count,
            None => panic!("{x} is not an overlap boundary"),
        }
        let next = self
            .counts
            .range((Bound::Excluded(Key(x)), Bound::Unbounded))
            .next()
            .map(|(&k, &c)| (k, c));
        if let Some((k, c)) = next {
            // The end of the genome stays a boundary.
            if c == count && k.0 < self.sequence_length {
                self.counts.remove(&k);
            }
        }
        if self.counts.range(..Key(x)).next_back().map(|(_, &c)| c) == Some(count) {
            self.counts.remove(&Key(x));
        }
    }

    /// `true` if every position has found its
    /// most recent common ancestor.
    pub fn all_coalesced(&self) -> bool {
        self.counts.values().all(|&c| c <= 1)
    }

    /// Iterate over `(left, right, count)`.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64, usize)> + '_ {
        self.counts
            .iter()
            .zip(self.counts.keys().skip(1))
            .map(|((left, &count), right)| (left.0, right.0, count))
    }
}

#[cfg(test)]
mod test_overlap_counts {
    use super::*;

    #[test]
    fn test_new() {
        let o = OverlapCounts::new(10.0, 4);
        assert_eq!(o.count_at(0.0), 4);
        assert_eq!(o.count_at(9.99), 4);
        assert_eq!(o.count_at(10.0), 0);
        assert_eq!(o.next_boundary(0.0), 10.0);
    }

    #[test]
    fn test_split_and_set() {
        let mut o = OverlapCounts::new(10.0, 4);
        o.split_at(3.0);
        o.split_at(3.0);
        assert_eq!(o.next_boundary(0.0), 3.0);
        o.set(3.0, 1);
        assert_eq!(o.count_at(2.0), 4);
        assert_eq!(o.count_at(5.0), 1);
        assert_eq!(o.iter().collect::<Vec<_>>(), vec![(0.0, 3.0, 4), (3.0, 10.0, 1)]);
        assert!(!o.all_coalesced());
        o.set(0.0, 0);
        assert!(o.all_coalesced());
    }

    //  4    2    4        4    2            4
    // [0, 3)[3, 6)[6, 10) -> [0, 3)[3, 10) -> [0, 10)
    #[test]
    fn test_equal_neighbours_join() {
        let mut o = OverlapCounts::new(10.0, 4);
        o.split_at(3.0);
        o.split_at(6.0);
        assert_eq!(o.num_intervals(), 3);
        o.set(3.0, 2);
        assert_eq!(o.num_intervals(), 3);
        o.set(6.0, 2);
        assert_eq!(o.iter().collect::<Vec<_>>(), vec![(0.0, 3.0, 4), (3.0, 10.0, 2)]);
        o.set(3.0, 4);
        assert_eq!(o.iter().collect::<Vec<_>>(), vec![(0.0, 10.0, 4)]);
        o.set(0.0, 0);
        assert_eq!(o.iter().collect::<Vec<_>>(), vec![(0.0, 10.0, 0)]);
        assert_eq!(o.next_boundary(0.0), 10.0);
        assert!(o.all_coalesced());
    }

    #[test]
    fn test_from_intervals() {
        let o = OverlapCounts::from_intervals(10.0, &[(2.0, 4.0, 3), (6.0, 10.0, 2)]);
        assert_eq!(o.count_at(1.0), 0);
        assert_eq!(o.count_at(2.0), 3);
        assert_eq!(o.count_at(5.0), 0);
        assert_eq!(o.count_at(7.0), 2);
    }
}

// Updates between two rebuilds, at least.
const MIN_REBUILD_INTERVAL: usize = 4096;

/// A Fenwick (binary indexed) tree over non-negative values,
/// supporting cumulative-sum search.
///
/// Used to sample segments with probability proportional
/// to their recombination (or gene conversion) mass.
///
/// Partial sums are rebuilt from the values every so often,
/// which keeps rounding error bounded; the total of a tree
/// with no positive value is exactly zero.
#[derive(Debug, Clone, Default)]
pub struct Fenwick {
    // 1-based
    tree: Vec<f64>,
    values: Vec<f64>,
    log_size: usize,
    num_positive: usize,
    updates: usize,
}

impl Fenwick {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut rv = Self::default();
        rv.expand(capacity.max(1));
        rv
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Grow to hold at least `size` values.
    ///
    /// # Complexity
    ///
    /// `O(size)`: the tree is rebuilt.
    pub fn expand(&mut self, size: usize) {
        if size <= self.values.len() {
            return;
        }
        self.values.resize(size, 0.0);
        self.rebuild();
    }

    /// Recompute all partial sums from the stored values.
    /// This also clears accumulated rounding error.
    pub fn rebuild(&mut self) {
        let n = self.values.len();
        self.tree.clear();
        self.tree.resize(n + 1, 0.0);
        for i in 1..=n {
            self.tree[i] += self.values[i - 1];
            let parent = i + (i & i.wrapping_neg());
            if parent <= n {
                self.tree[parent] += self.tree[i];
            }
        }
        self.log_size = if n == 0 {
            0
        } else {
            1 << (usize::BITS - 1 - n.leading_zeros())
        };
        self.num_positive = self.values.iter().filter(|&&v| v > 0.0).count();
        self.updates = 0;
    }

    pub fn get_value(&self, index: usize) -> f64 {
        self.values[index]
    }

    /// # Panics
    ///
    /// If `index` is out of range.
    ///
    /// # Complexity
    ///
    /// `O(log size)` amortized.
    pub fn set_value(&mut self, index: usize, value: f64) {
        debug_assert!(value >= 0.0);
        let old = self.values[index];
        let delta = value - old;
        if delta == 0.0 {
            return;
        }
        self.values[index] = value;
        match (old > 0.0, value > 0.0) {
            (false, true) => self.num_positive += 1,
            (true, false) => self.num_positive -= 1,
            _ => (),
        }
        let n = self.values.len();
        self.updates += 1;
        if self.updates >= n.max(MIN_REBUILD_INTERVAL) {
            self.rebuild();
            return;
        }
        let mut i = index + 1;
        while i <= n {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Sum of values `[0, index]`.
    pub fn cumulative_sum(&self, index: usize) -> f64 {
        let mut i = index + 1;
        let mut sum = 0.0;
        while i > 0 {
            sum += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        sum
    }

    pub fn total(&self) -> f64 {
        if self.num_positive == 0 {
            0.0
        } else {
            self.cumulative_sum(self.values.len() - 1).max(0.0)
        }
    }

    /// Find the smallest index whose cumulative sum is
    /// at least `value`, returning it together with
    /// the amount of `value` remaining within that index,
    /// i.e. `value - cumulative_sum(index - 1)`.
    ///
    /// Returns `None` if every value is zero.
    pub fn find(&self, value: f64) -> Option<(usize, f64)> {
        let n = self.values.len();
        let mut position = 0;
        let mut remaining = value;
        let mut step = self.log_size;
        while step > 0 {
            let next = position + step;
            if next <= n && self.tree[next] < remaining {
                position = next;
                remaining -= self.tree[next];
            }
            step >>= 1;
        }
        // Rounding can leave us on or past a zero-valued entry.
        let mut index = position.min(n.saturating_sub(1));
        if self.values.get(index).map_or(true, |&v| v == 0.0) {
            index = (index..n)
                .find(|&i| self.values[i] > 0.0)
                .or_else(|| (0..index).rev().find(|&i| self.values[i] > 0.0))?;
            remaining = self.values[index];
        }
        Some((index, remaining.clamp(0.0, self.values[index])))
    }
}

#[cfg(test)]
mod test_fenwick {
    use super::*;

    #[test]
    fn test_sums() {
        let mut f = Fenwick::with_capacity(10);
        for i in 0..10 {
            f.set_value(i, i as f64);
        }
        assert_eq!(f.total(), 45.0);
        assert_eq!(f.cumulative_sum(3), 6.0);
        f.set_value(3, 0.0);
        assert_eq!(f.total(), 42.0);
        assert_eq!(f.get_value(3), 0.0);
    }

    #[test]
    fn test_find() {
        let mut f = Fenwick::with_capacity(5);
        f.set_value(1, 2.0);
        f.set_value(3, 1.0);
        assert_eq!(f.find(0.5), Some((1, 0.5)));
        assert_eq!(f.find(2.0), Some((1, 2.0)));
        assert_eq!(f.find(2.5), Some((3, 0.5)));
    }

    // Values that do not add up exactly leave rounding
    // error in the partial sums once they are removed.
    #[test]
    fn test_drained_tree_is_empty() {
        let mut f = Fenwick::with_capacity(8);
        for i in 0..8 {
            f.set_value(i, 0.1 * (i + 1) as f64 / 3.0);
        }
        for i in (0..8).rev() {
            f.set_value(i, 0.0);
        }
        assert_eq!(f.total(), 0.0);
        assert!(f.find(1e-18).is_none());
        f.set_value(5, 1.0);
        assert!((f.total() - 1.0).abs() < 1e-12);
        let (index, remaining) = f.find(0.5).unwrap();
        assert_eq!(index, 5);
        assert!((remaining - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rebuild_bounds_rounding_error() {
        let mut f = Fenwick::with_capacity(4);
        for k in 0..3 * MIN_REBUILD_INTERVAL {
            f.set_value(k % 4, 0.1 + (k % 7) as f64 * 0.3);
        }
        let expected: f64 = (0..4).map(|i| f.get_value(i)).sum();
        assert!((f.total() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_find_empty() {
        let f = Fenwick::with_capacity(5);
        assert!(f.find(1.0).is_none());
    }

    #[test]
    fn test_expand_keeps_values() {
        let mut f = Fenwick::with_capacity(2);
        f.set_value(0, 1.0);
        f.set_value(1, 2.0);
        f.expand(100);
        assert_eq!(f.len(), 100);
        f.set_value(99, 4.0);
        assert_eq!(f.total(), 7.0);
        assert_eq!(f.find(6.0), Some((99, 3.0)));
    }
}

#[cfg(test)]
mod proptest_fenwick {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_find_matches_linear_scan(values in proptest::collection::vec(0u32..5, 1..200), u in 0.0f64..1.0) {
            let mut f = Fenwick::with_capacity(values.len());
            for (i, &v) in values.iter().enumerate() {
                f.set_value(i, v as f64);
            }
            let total: u32 = values.iter().sum();
            prop_assume!(total > 0);
            // stay away from exact boundaries
            let target = ((u * total as f64).floor() + 0.5).min(total as f64 - 0.25);
            let mut cumulative = 0.0;
            let mut expected = 0;
            for (i, &v) in values.iter().enumerate() {
                cumulative += v as f64;
                if cumulative >= target {
                    expected = i;
                    break;
                }
            }
            let (index, _) = f.find(target).unwrap();
            prop_assert_eq!(index, expected);
        }
    }
}

use nohash::BuildNoHashHasher;
use std::collections::HashMap;

use crate::error::ValidationError;

/// A diploid individual of a pedigree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Individual {
    /// Indexes of the two parents, if they are
    /// part of the pedigree.
    pub parents: [Option<usize>; 2],
    /// Generations before the present.
    pub time: f64,
    pub is_sample: bool,
}

/// A fixed genealogy of individuals through which
/// sample genomes are transmitted.
///
/// Each sample individual carries two sample genomes.
/// Sample genome `j` belongs to the `j / 2`-th sample
/// individual (in index order) and is its `j % 2`-th ploid.
#[derive(Debug, Clone, PartialEq)]
pub struct Pedigree {
    individuals: Vec<Individual>,
}

impl Pedigree {
    pub const PLOIDY: usize = 2;

    /// # Errors
    ///
    /// If a parent index is out of range or a parent
    /// is not strictly older than its child.
    pub fn new(individuals: Vec<Individual>) -> Result<Self, ValidationError> {
        if individuals.is_empty() {
            return Err(ValidationError::Pedigree("no individuals".to_string()));
        }
        for (i, ind) in individuals.iter().enumerate() {
            if !(ind.time >= 0.0 && ind.time.is_finite()) {
                return Err(ValidationError::Pedigree(format!(
                    "individual {i} has time {}",
                    ind.time
                )));
            }
            for p in ind.parents.iter().flatten() {
                match individuals.get(*p) {
                    None => {
                        return Err(ValidationError::Pedigree(format!(
                            "individual {i} has parent {p}, but there are only {} individuals",
                            individuals.len()
                        )))
                    }
                    Some(parent) if parent.time <= ind.time => {
                        return Err(ValidationError::Pedigree(format!(
                            "individual {i} (time {}) is not younger than its parent {p} (time {})",
                            ind.time, parent.time
                        )))
                    }
                    _ => (),
                }
            }
        }
        Ok(Self { individuals })
    }

    /// Build from positive individual ids and parent ids,
    /// where a parent id of 0 means "not in the pedigree".
    /// Times are assigned with [`Pedigree::assign_times`] if
    /// not given. Individuals that are nobody's parent are
    /// the samples.
    pub fn from_ids(
        ids: &[u64],
        parent_ids: &[[u64; 2]],
        times: Option<&[f64]>,
    ) -> Result<Self, ValidationError> {
        if ids.len() != parent_ids.len() || times.map_or(false, |t| t.len() != ids.len()) {
            return Err(ValidationError::Pedigree(
                "ids, parents and times must have the same length".to_string(),
            ));
        }
        let mut index: HashMap<u64, usize, BuildNoHashHasher<u64>> = HashMap::default();
        for (i, &id) in ids.iter().enumerate() {
            if id == 0 {
                return Err(ValidationError::Pedigree(
                    "individual id 0 is reserved for missing parents".to_string(),
                ));
            }
            if index.insert(id, i).is_some() {
                return Err(ValidationError::Pedigree(format!("duplicate id {id}")));
            }
        }
        let mut parents = Vec::with_capacity(ids.len());
        for pids in parent_ids {
            let mut p = [None, None];
            for (slot, &pid) in p.iter_mut().zip(pids.iter()) {
                if pid != 0 {
                    *slot = Some(*index.get(&pid).ok_or_else(|| {
                        ValidationError::Pedigree(format!("unknown parent id {pid}"))
                    })?);
                }
            }
            parents.push(p);
        }
        let times = match times {
            Some(t) => t.to_vec(),
            None => Self::assign_times(&parents),
        };
        let probands = Self::probands_of(&parents);
        let individuals = parents
            .into_iter()
            .zip(times)
            .enumerate()
            .map(|(i, (parents, time))| Individual {
                parents,
                time,
                is_sample: probands.binary_search(&i).is_ok(),
            })
            .collect();
        Self::new(individuals)
    }

    /// Give each individual a time one generation older
    /// than its oldest child; individuals without children
    /// are at time zero.
    pub fn assign_times(parents: &[[Option<usize>; 2]]) -> Vec<f64> {
        let mut time = vec![0.0; parents.len()];
        let mut climbers = Self::probands_of(parents);
        let mut t = 0.0;
        // NOTE: a cyclic pedigree never terminates here;
        // the depth is bounded by the number of individuals.
        let mut depth = 0;
        while !climbers.is_empty() && depth <= parents.len() {
            let mut next = vec![];
            for &c in &climbers {
                if time[c] < t {
                    time[c] = t;
                }
                next.extend(parents[c].iter().flatten());
            }
            next.sort_unstable();
            next.dedup();
            climbers = next;
            t += 1.0;
            depth += 1;
        }
        time
    }

    fn probands_of(parents: &[[Option<usize>; 2]]) -> Vec<usize> {
        let mut is_parent = vec![false; parents.len()];
        for p in parents.iter().flatten().flatten() {
            if let Some(x) = is_parent.get_mut(*p) {
                *x = true;
            }
        }
        (0..parents.len()).filter(|&i| !is_parent[i]).collect()
    }

    pub fn num_individuals(&self) -> usize {
        self.individuals.len()
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    /// Individuals that are not the parent of anybody.
    pub fn proband_indices(&self) -> Vec<usize> {
        let parents = self
            .individuals
            .iter()
            .map(|i| i.parents)
            .collect::<Vec<_>>();
        Self::probands_of(&parents)
    }

    pub fn sample_indices(&self) -> Vec<usize> {
        (0..self.individuals.len())
            .filter(|&i| self.individuals[i].is_sample)
            .collect()
    }

    /// Mark the given individuals as the samples; every
    /// other individual is unmarked.
    pub fn set_samples(&mut self, samples: &[usize]) -> Result<(), ValidationError> {
        for &s in samples {
            if s >= self.individuals.len() {
                return Err(ValidationError::Pedigree(format!("no individual {s}")));
            }
        }
        for (i, ind) in self.individuals.iter_mut().enumerate() {
            ind.is_sample = samples.contains(&i);
        }
        Ok(())
    }

    pub fn num_sample_genomes(&self) -> usize {
        Self::PLOIDY * self.individuals.iter().filter(|i| i.is_sample).count()
    }

    /// Time of the oldest individual.
    pub fn max_time(&self) -> f64 {
        self.individuals
            .iter()
            .map(|i| i.time)
            .fold(0.0, f64::max)
    }

    /// Individual indexes ordered by time, ties by index.
    pub(crate) fn time_order(&self) -> Vec<usize> {
        let mut order = (0..self.individuals.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| {
            self.individuals[a]
                .time
                .total_cmp(&self.individuals[b].time)
                .then(a.cmp(&b))
        });
        order
    }
}

use crate::error::ValidationError;

/// Population sizes never drop below this value.
pub const MIN_POPULATION_SIZE: f64 = 1e-10;

/// The demographic parameters of one population
/// during one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Population {
    pub initial_size: f64,
    pub growth_rate: f64,
    /// Time at which the current epoch started.
    pub start_time: f64,
}

impl Population {
    pub fn new(initial_size: f64, growth_rate: f64) -> Self {
        Self {
            initial_size,
            growth_rate,
            start_time: 0.0,
        }
    }

    /// `initial_size * exp(-growth_rate * (time - start_time))`,
    /// clamped to [`MIN_POPULATION_SIZE`].
    pub fn size_at(&self, time: f64) -> f64 {
        let dt = time - self.start_time;
        let size = if self.growth_rate == 0.0 || dt == 0.0 {
            self.initial_size
        } else {
            self.initial_size * (-self.growth_rate * dt).exp()
        };
        if !(size >= MIN_POPULATION_SIZE) {
            log::warn!(
                "population size {size} at time {time} clamped to {MIN_POPULATION_SIZE}"
            );
            MIN_POPULATION_SIZE
        } else {
            size
        }
    }

    /// Waiting time (in generations) until the next common
    /// ancestor event among lineages in this population,
    /// starting from `time`.
    ///
    /// `u` is an exponential draw whose rate is the number of
    /// pairs (or the model-specific equivalent) and `timescale`
    /// is the number of generations per unit of coalescent time
    /// at size `N`, divided by `N`.
    /// Returns infinity if no event can happen under the
    /// current growth rate.
    pub fn waiting_time(&self, time: f64, timescale: f64, u: f64) -> f64 {
        let size = self.size_at(time);
        if self.growth_rate == 0.0 {
            timescale * size * u
        } else {
            let z = 1.0 + self.growth_rate * timescale * size * u;
            if z > 0.0 {
                z.ln() / self.growth_rate
            } else {
                f64::INFINITY
            }
        }
    }
}

/// `rate(j, k)` is the per-generation rate at which a lineage
/// in population `j` moves to population `k`, backwards in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationMatrix {
    num_populations: usize,
    rates: Vec<f64>,
}

impl MigrationMatrix {
    pub fn new(num_populations: usize) -> Self {
        Self {
            num_populations,
            rates: vec![0.0; num_populations * num_populations],
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ValidationError> {
        let n = rows.len();
        let mut rv = Self::new(n);
        for (j, row) in rows.into_iter().enumerate() {
            if row.len() != n {
                return Err(ValidationError::MigrationMatrix(format!(
                    "row {j} has {} entries, expected {n}",
                    row.len()
                )));
            }
            for (k, rate) in row.into_iter().enumerate() {
                if j == k {
                    if rate != 0.0 {
                        return Err(ValidationError::MigrationMatrix(format!(
                            "diagonal entry {j} must be zero"
                        )));
                    }
                } else {
                    rv.set_rate(j, k, rate)?;
                }
            }
        }
        Ok(rv)
    }

    pub fn num_populations(&self) -> usize {
        self.num_populations
    }

    pub fn rate(&self, source: usize, dest: usize) -> f64 {
        self.rates[source * self.num_populations + dest]
    }

    pub fn row(&self, source: usize) -> &[f64] {
        let n = self.num_populations;
        &self.rates[source * n..(source + 1) * n]
    }

    /// Total rate at which a lineage leaves `source`.
    pub fn out_rate(&self, source: usize) -> f64 {
        self.row(source).iter().sum()
    }

    pub fn set_rate(&mut self, source: usize, dest: usize, rate: f64) -> Result<(), ValidationError> {
        let n = self.num_populations;
        if source >= n || dest >= n {
            return Err(ValidationError::PopulationOutOfRange {
                population: source.max(dest),
                num_populations: n,
            });
        }
        if source == dest {
            return Err(ValidationError::MigrationMatrix(format!(
                "cannot set diagonal entry {source}"
            )));
        }
        if !(rate >= 0.0 && rate.is_finite()) {
            return Err(ValidationError::MigrationMatrix(format!(
                "rate {rate} must be finite and non-negative"
            )));
        }
        self.rates[source * n + dest] = rate;
        Ok(())
    }

    /// Set every off-diagonal entry to `rate`.
    pub fn set_all(&mut self, rate: f64) -> Result<(), ValidationError> {
        for j in 0..self.num_populations {
            for k in 0..self.num_populations {
                if j != k {
                    self.set_rate(j, k, rate)?;
                }
            }
        }
        Ok(())
    }
}

/// Parameters of every population together with the
/// migration matrix, as of the current epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationState {
    populations: Vec<Population>,
    migration_matrix: MigrationMatrix,
}

impl PopulationState {
    pub fn new(
        populations: Vec<Population>,
        migration_matrix: MigrationMatrix,
    ) -> Result<Self, ValidationError> {
        if populations.is_empty() {
            return Err(ValidationError::PopulationConfiguration(
                "at least one population is required".to_string(),
            ));
        }
        if migration_matrix.num_populations() != populations.len() {
            return Err(ValidationError::MigrationMatrix(format!(
                "matrix is {0}x{0} but there are {1} populations",
                migration_matrix.num_populations(),
                populations.len()
            )));
        }
        for (i, p) in populations.iter().enumerate() {
            if !(p.initial_size > 0.0 && p.initial_size.is_finite()) {
                return Err(ValidationError::PopulationConfiguration(format!(
                    "population {i} has size {}",
                    p.initial_size
                )));
            }
            if !p.growth_rate.is_finite() {
                return Err(ValidationError::PopulationConfiguration(format!(
                    "population {i} has growth rate {}",
                    p.growth_rate
                )));
            }
        }
        Ok(Self {
            populations,
            migration_matrix,
        })
    }

    pub fn num_populations(&self) -> usize {
        self.populations.len()
    }

    pub fn population(&self, population: usize) -> &Population {
        &self.populations[population]
    }

    pub fn migration_matrix(&self) -> &MigrationMatrix {
        &self.migration_matrix
    }

    pub fn size_at(&self, population: usize, time: f64) -> f64 {
        self.populations[population].size_at(time)
    }

    fn check_population(&self, population: usize) -> Result<(), ValidationError> {
        if population >= self.num_populations() {
            Err(ValidationError::PopulationOutOfRange {
                population,
                num_populations: self.num_populations(),
            })
        } else {
            Ok(())
        }
    }

    /// Start a new epoch at `time` for `population`, or for
    /// all populations if `None`.
    ///
    /// A missing `initial_size` continues the current
    /// trajectory, a missing `growth_rate` keeps the current one.
    pub fn apply_parameter_change(
        &mut self,
        time: f64,
        initial_size: Option<f64>,
        growth_rate: Option<f64>,
        population: Option<usize>,
    ) -> Result<(), ValidationError> {
        if let Some(size) = initial_size {
            if !(size > 0.0 && size.is_finite()) {
                return Err(ValidationError::DemographicEvent {
                    time,
                    reason: format!("population size {size} must be positive"),
                });
            }
        }
        if let Some(rate) = growth_rate {
            if !rate.is_finite() {
                return Err(ValidationError::DemographicEvent {
                    time,
                    reason: format!("growth rate {rate} must be finite"),
                });
            }
        }
        let targets = match population {
            Some(p) => {
                self.check_population(p)?;
                p..p + 1
            }
            None => 0..self.num_populations(),
        };
        for p in targets {
            let current = self.populations[p];
            self.populations[p] = Population {
                initial_size: initial_size.unwrap_or_else(|| current.size_at(time)),
                growth_rate: growth_rate.unwrap_or(current.growth_rate),
                start_time: time,
            };
        }
        Ok(())
    }

    /// Set one entry of the migration matrix, or every
    /// off-diagonal entry if `matrix_index` is `None`.
    pub fn apply_migration_rate_change(
        &mut self,
        rate: f64,
        matrix_index: Option<(usize, usize)>,
    ) -> Result<(), ValidationError> {
        match matrix_index {
            Some((source, dest)) => self.migration_matrix.set_rate(source, dest, rate),
            None => self.migration_matrix.set_all(rate),
        }
    }
}

#[cfg(test)]
mod test_population_state {
    use super::*;

    fn two_populations() -> PopulationState {
        PopulationState::new(
            vec![Population::new(100.0, 0.0), Population::new(50.0, 0.01)],
            MigrationMatrix::new(2),
        )
        .unwrap()
    }

    #[test]
    fn test_size_at_epoch_start_is_exact() {
        let mut state = two_populations();
        assert_eq!(state.size_at(1, 0.0), 50.0);
        state
            .apply_parameter_change(13.7, Some(21.3), Some(-0.3), Some(1))
            .unwrap();
        assert_eq!(state.size_at(1, 13.7), 21.3);
        assert_eq!(state.size_at(0, 13.7), 100.0);
    }

    #[test]
    fn test_growth() {
        let state = two_populations();
        let expected = 50.0 * (-0.01f64 * 10.0).exp();
        assert!((state.size_at(1, 10.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_size_continues_trajectory() {
        let mut state = two_populations();
        let before = state.size_at(1, 5.0);
        state.apply_parameter_change(5.0, None, Some(0.0), None).unwrap();
        assert_eq!(state.size_at(1, 5.0), before);
        assert_eq!(state.size_at(1, 500.0), before);
        assert_eq!(state.population(1).start_time, 5.0);
    }

    #[test]
    fn test_size_is_clamped() {
        let p = Population::new(1.0, 100.0);
        assert_eq!(p.size_at(1e6), MIN_POPULATION_SIZE);
    }

    #[test]
    fn test_bad_population_index() {
        let mut state = two_populations();
        assert!(matches!(
            state.apply_parameter_change(1.0, Some(1.0), None, Some(2)),
            Err(ValidationError::PopulationOutOfRange { .. })
        ));
    }

    #[test]
    fn test_migration_rate_changes_keep_zero_diagonal() {
        let mut state = two_populations();
        state.apply_migration_rate_change(0.5, None).unwrap();
        assert_eq!(state.migration_matrix().rate(0, 1), 0.5);
        assert_eq!(state.migration_matrix().rate(1, 0), 0.5);
        assert_eq!(state.migration_matrix().rate(0, 0), 0.0);
        state.apply_migration_rate_change(0.1, Some((1, 0))).unwrap();
        assert_eq!(state.migration_matrix().rate(1, 0), 0.1);
        assert!(state.apply_migration_rate_change(0.1, Some((1, 1))).is_err());
        assert!(state.apply_migration_rate_change(-0.1, Some((0, 1))).is_err());
        assert_eq!(state.migration_matrix().rate(1, 1), 0.0);
        assert_eq!(state.migration_matrix().out_rate(1), 0.1);
    }

    #[test]
    fn test_matrix_from_rows() {
        assert!(MigrationMatrix::from_rows(vec![vec![0.0, 1.0], vec![2.0, 0.0]]).is_ok());
        assert!(MigrationMatrix::from_rows(vec![vec![1.0, 1.0], vec![2.0, 0.0]]).is_err());
        assert!(MigrationMatrix::from_rows(vec![vec![0.0], vec![2.0, 0.0]]).is_err());
        assert!(MigrationMatrix::from_rows(vec![vec![0.0, -1.0], vec![2.0, 0.0]]).is_err());
    }

    #[test]
    fn test_mismatched_matrix() {
        assert!(PopulationState::new(vec![Population::new(1.0, 0.0)], MigrationMatrix::new(2)).is_err());
        assert!(PopulationState::new(vec![Population::new(0.0, 0.0)], MigrationMatrix::new(1)).is_err());
    }

    #[test]
    fn test_waiting_time() {
        let p = Population::new(10.0, 0.0);
        assert_eq!(p.waiting_time(0.0, 2.0, 0.5), 10.0);
        // With growth, the waiting time is shorter looking back
        // into a shrinking population.
        let g = Population::new(10.0, 0.1);
        let w = g.waiting_time(0.0, 2.0, 0.5);
        assert!(w > 0.0 && w < 10.0);
        // A population growing backwards in time may never coalesce.
        let d = Population::new(10.0, -0.1);
        assert!(d.waiting_time(0.0, 2.0, 1.0).is_infinite());
    }
}

use nohash::BuildNoHashHasher;
use rand::Rng;
use rand_distr::{Binomial, Distribution};
use std::collections::HashMap;

use super::Simulator;
use crate::error::SimulationError;
use crate::lineages::LineageId;
use crate::model::SimulationModel;
use crate::special::{ln_binomial, ln_incomplete_beta};

/// Cumulative Beta-coalescent event rates, by the
/// number of lineages.
///
/// Entry `k - 2` of the rates for `n` lineages is the
/// total rate of events in which between 2 and `k`
/// lineages take part.
#[derive(Debug, Clone, Default)]
pub(super) struct BetaRates {
    cumulative: HashMap<usize, Vec<f64>, BuildNoHashHasher<usize>>,
}

impl BetaRates {
    fn get(&mut self, n: usize, alpha: f64, truncation_point: f64, num_groups: usize) -> &[f64] {
        self.cumulative.entry(n).or_insert_with(|| {
            let ln_norm = ln_incomplete_beta(truncation_point, 2.0 - alpha, alpha);
            let mut total = 0.0;
            (2..=n)
                .map(|k| {
                    let ln_rate = ln_binomial(n, k)
                        + ln_incomplete_beta(truncation_point, k as f64 - alpha, (n - k) as f64 + alpha)
                        - ln_norm;
                    total += num_groups as f64 * ln_rate.exp();
                    total
                })
                .collect()
        })
    }
}

impl Simulator {
    // Participants of a multiple merger are spread over
    // the genome copies of the parent individuals.
    fn num_merger_groups(&self) -> usize {
        match self.config.ploidy() {
            1 => 1,
            p => 2 * p,
        }
    }

    /// Generations per unit of Beta-coalescent time.
    ///
    /// Uses the population size at the current time; growth
    /// during the waiting time is not integrated.
    fn beta_timescale(&self, population: usize, alpha: f64, truncation_point: f64) -> f64 {
        let size = self.populations.size_at(population, self.time);
        let m = if self.config.ploidy() == 1 {
            1.0 + 1.0 / (2f64.powf(alpha - 1.0) * (alpha - 1.0))
        } else {
            2.0 + 2f64.powf(alpha) / (3f64.powf(alpha - 1.0) * (alpha - 1.0))
        };
        let norm = ln_incomplete_beta(truncation_point, 2.0 - alpha, alpha).exp();
        m.powf(alpha) * size.powf(alpha - 1.0) / (alpha * norm)
    }

    pub(super) fn beta_waiting_time(&mut self, population: usize, n: usize) -> f64 {
        let SimulationModel::Beta {
            alpha,
            truncation_point,
        } = self.model
        else {
            return f64::INFINITY;
        };
        let groups = self.num_merger_groups();
        let rate = self
            .beta_rates
            .get(n, alpha, truncation_point, groups)
            .last()
            .copied()
            .unwrap_or(0.0);
        let u = self.exponential(rate);
        u * self.beta_timescale(population, alpha, truncation_point)
    }

    /// Binary mergers at rate `n(n-1)/2` plus multiple
    /// mergers at rate `c`, per `ploidy * N^2` generations.
    pub(super) fn dirac_waiting_time(&mut self, population: usize, n: usize, c: f64) -> f64 {
        let rate = (n * (n - 1) / 2) as f64 + c;
        let u = self.exponential(rate);
        let size = self.populations.size_at(population, self.time);
        u * self.config.ploidy() as f64 * size * size
    }

    pub(super) fn beta_common_ancestor_event(
        &mut self,
        population: usize,
        label: usize,
    ) -> Result<(), SimulationError> {
        let SimulationModel::Beta {
            alpha,
            truncation_point,
        } = self.model
        else {
            return Ok(());
        };
        let n = self.pool.num_lineages_in(population, label);
        if n < 2 {
            return Ok(());
        }
        let groups = self.num_merger_groups();
        let rates = self.beta_rates.get(n, alpha, truncation_point, groups);
        let total = rates.last().copied().unwrap_or(0.0);
        let u = self.rng.gen::<f64>() * total;
        let k = 2 + rates.partition_point(|&c| c <= u).min(rates.len() - 1);
        self.multiple_merger(population, label, k)?;
        Ok(())
    }

    pub(super) fn dirac_common_ancestor_event(
        &mut self,
        population: usize,
        label: usize,
    ) -> Result<(), SimulationError> {
        let SimulationModel::Dirac { psi, c } = self.model else {
            return Ok(());
        };
        let n = self.pool.num_lineages_in(population, label);
        if n < 2 {
            return Ok(());
        }
        let pairs = (n * (n - 1) / 2) as f64;
        if self.rng.gen::<f64>() * (pairs + c) < pairs {
            if let Some((a, b)) = self.pool.choose_pair(population, label, &mut self.rng) {
                self.merge_lineages(&[a, b], population, label)?;
                self.counts.common_ancestor += 1;
            }
            return Ok(());
        }
        let participants = Binomial::new(n as u64, psi)
            .map_err(|e| SimulationError::InternalInvariant(e.to_string()))?
            .sample(&mut self.rng) as usize;
        if participants >= 2 {
            self.multiple_merger(population, label, participants)?;
        }
        Ok(())
    }

    /// Choose `k` lineages, spread them uniformly over the
    /// merger groups, and merge every group with two or
    /// more members.
    fn multiple_merger(
        &mut self,
        population: usize,
        label: usize,
        k: usize,
    ) -> Result<(), SimulationError> {
        let members = self.pool.lineages_in(population, label);
        let chosen = rand::seq::index::sample(&mut self.rng, members.len(), k)
            .iter()
            .map(|i| members[i])
            .collect::<Vec<_>>();
        let mut groups: Vec<Vec<LineageId>> = vec![vec![]; self.num_merger_groups()];
        for lineage in chosen {
            let g = self.rng.gen_range(0..groups.len());
            groups[g].push(lineage);
        }
        for group in groups.iter().filter(|g| g.len() > 1) {
            self.merge_lineages(group, population, label)?;
            self.counts.common_ancestor += 1;
        }
        Ok(())
    }
}

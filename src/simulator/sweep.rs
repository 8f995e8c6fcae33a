use rand::Rng;

use super::{Exit, Simulator};
use crate::error::SimulationError;
use crate::model::SimulationModel;

// Trajectories longer than this are not followed.
const MAX_TRAJECTORY_STEPS: usize = 1_000_000;

/// Frequencies of the selected allele, backwards in time
/// from the end of the sweep, one per step.
#[derive(Debug, Clone)]
pub(super) struct Trajectory {
    frequencies: Vec<f64>,
    step: usize,
    generations_per_step: f64,
}

/// Logistic trajectory from `end_frequency` back to
/// `start_frequency`, in steps of `dt` coalescent time units.
fn logistic_trajectory(start_frequency: f64, end_frequency: f64, alpha: f64, dt: f64) -> Vec<f64> {
    let growth = (alpha * dt).exp();
    let mut x = end_frequency;
    let mut rv = vec![x];
    while x > start_frequency && rv.len() < MAX_TRAJECTORY_STEPS {
        x = 1.0 / (1.0 + growth * (1.0 - x) / x);
        rv.push(x);
    }
    rv
}

impl Simulator {
    fn start_sweep(&mut self, start_frequency: f64, end_frequency: f64, alpha: f64, dt: f64) {
        let frequencies = logistic_trajectory(start_frequency, end_frequency, alpha, dt);
        let size = self.populations.size_at(0, self.time);
        let generations_per_step = dt * self.config.ploidy() as f64 * size;
        log::debug!(
            "sweep trajectory of {} steps, {generations_per_step} generations each",
            frequencies.len()
        );
        let x = frequencies[0];
        for lineage in self.pool.lineages_in(0, 0).to_vec() {
            if self.rng.gen_bool(x) {
                self.pool.relabel(lineage, 1);
            }
        }
        self.sweep = Some(Trajectory {
            frequencies,
            step: 0,
            generations_per_step,
        });
    }

    /// Put every lineage back in the neutral background.
    pub(super) fn end_sweep(&mut self) {
        for population in 0..self.pool.num_populations() {
            for label in 1..self.pool.num_labels() {
                for lineage in self.pool.lineages_in(population, label).to_vec() {
                    self.pool.relabel(lineage, 0);
                }
            }
        }
        self.sweep = None;
    }

    /// Coalescence and recombination in a structured
    /// population, with lineages linked to the selected
    /// allele in label 1 and the rest in label 0.
    ///
    /// Each step of the trajectory allows at most one event.
    pub(super) fn run_sweep(&mut self, end_time: f64) -> Result<Exit, SimulationError> {
        let SimulationModel::Sweep {
            position,
            start_frequency,
            end_frequency,
            alpha,
            dt,
        } = self.model
        else {
            return Err(SimulationError::InternalInvariant(format!(
                "sweep step under model {}",
                self.model
            )));
        };
        if self.sweep.is_none() {
            self.start_sweep(start_frequency, end_frequency, alpha, dt);
        }
        while !self.is_complete() {
            let Some((x, generations)) = self
                .sweep
                .as_ref()
                .and_then(|s| s.frequencies.get(s.step).map(|&x| (x, s.generations_per_step)))
            else {
                log::info!(
                    "sweep complete at time {}; continuing with the standard coalescent",
                    self.time
                );
                self.change_model(SimulationModel::Hudson);
                return Ok(Exit::ModelChange);
            };
            let t_next = self.time + generations;
            let scheduled = self.next_scheduled_time();
            if scheduled < t_next && scheduled < end_time {
                if self.apply_scheduled()? {
                    return Ok(Exit::ModelChange);
                }
                continue;
            }
            if t_next >= end_time {
                self.time = end_time;
                return Ok(Exit::EndTime);
            }
            self.time = t_next;
            if let Some(s) = self.sweep.as_mut() {
                s.step += 1;
            }
            self.sweep_step(x, dt, position)?;
        }
        Ok(Exit::Coalescence)
    }

    fn sweep_step(&mut self, x: f64, dt: f64, position: f64) -> Result<(), SimulationError> {
        let pairs = |n: usize| (n * n.saturating_sub(1) / 2) as f64;
        let coalescence = [
            pairs(self.pool.num_lineages_in(0, 0)) / (1.0 - x),
            pairs(self.pool.num_lineages_in(0, 1)) / x,
        ];
        let size = self.populations.size_at(0, self.time);
        let recombination =
            self.pool.total_recombination_mass() * self.config.ploidy() as f64 * size;
        let total = coalescence[0] + coalescence[1] + recombination;
        if !(total > 0.0) || self.rng.gen::<f64>() >= 1.0 - (-total * dt).exp() {
            return Ok(());
        }
        let mut u = self.rng.gen::<f64>() * total;
        for (label, rate) in coalescence.into_iter().enumerate() {
            if u < rate {
                if let Some((a, b)) = self.pool.choose_pair(0, label, &mut self.rng) {
                    self.merge_lineages(&[a, b], 0, label)?;
                    self.counts.common_ancestor += 1;
                }
                return Ok(());
            }
            u -= rate;
        }
        let (left, right) = self.recombination_event()?;
        let breakpoint = self.pool.span(right).0;
        // The part not carrying the selected site may
        // recombine into the other background.
        let unlinked = if position < breakpoint { right } else { left };
        let label = self.pool.label(unlinked);
        let escape = if label == 1 { 1.0 - x } else { x };
        if self.rng.gen_bool(escape.clamp(0.0, 1.0)) {
            self.pool.relabel(unlinked, 1 - label);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_sweep {
    use super::*;

    #[test]
    fn test_trajectory_decreases() {
        let t = logistic_trajectory(0.01, 0.99, 100.0, 0.01);
        assert_eq!(t[0], 0.99);
        assert!(t.windows(2).all(|w| w[1] < w[0]));
        assert!(*t.last().unwrap() <= 0.01);
        assert!(t[t.len() - 2] > 0.01);
    }
}

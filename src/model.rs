use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The process that generates ancestry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SimulationModel {
    /// The standard coalescent with recombination.
    #[default]
    #[serde(alias = "standard")]
    Hudson,
    /// Sequentially Markov coalescent: only lineages
    /// whose ancestral material overlaps may coalesce.
    Smc,
    /// As `Smc`, but lineages that abut may also coalesce.
    SmcPrime,
    /// Discrete-time Wright-Fisher.
    Dtwf,
    /// Wright-Fisher through a fixed pedigree.
    #[serde(rename = "wf_ped")]
    WfPedigree,
    Beta {
        alpha: f64,
        truncation_point: f64,
    },
    Dirac {
        psi: f64,
        c: f64,
    },
    /// A selective sweep at `position` following a
    /// deterministic logistic trajectory with scaled
    /// selection coefficient `alpha`, stepped by `dt`
    /// units of coalescent time.
    Sweep {
        position: f64,
        start_frequency: f64,
        end_frequency: f64,
        alpha: f64,
        dt: f64,
    },
}

impl SimulationModel {
    pub fn name(&self) -> &'static str {
        match self {
            SimulationModel::Hudson => "hudson",
            SimulationModel::Smc => "smc",
            SimulationModel::SmcPrime => "smc_prime",
            SimulationModel::Dtwf => "dtwf",
            SimulationModel::WfPedigree => "wf_ped",
            SimulationModel::Beta { .. } => "beta",
            SimulationModel::Dirac { .. } => "dirac",
            SimulationModel::Sweep { .. } => "sweep",
        }
    }

    pub fn is_discrete_time(&self) -> bool {
        matches!(self, SimulationModel::Dtwf | SimulationModel::WfPedigree)
    }

    pub fn is_sweep(&self) -> bool {
        matches!(self, SimulationModel::Sweep { .. })
    }

    /// Check model parameters against a sequence
    /// of length `sequence_length`.
    pub fn validate(&self, sequence_length: f64) -> Result<(), ValidationError> {
        let bad = |msg: String| Err(ValidationError::Model(msg));
        match *self {
            SimulationModel::Beta {
                alpha,
                truncation_point,
            } => {
                if !(alpha > 1.0 && alpha < 2.0) {
                    return bad(format!("beta: alpha must be in (1, 2), got {alpha}"));
                }
                if !(truncation_point > 0.0 && truncation_point <= 1.0) {
                    return bad(format!(
                        "beta: truncation point must be in (0, 1], got {truncation_point}"
                    ));
                }
            }
            SimulationModel::Dirac { psi, c } => {
                if !(psi > 0.0 && psi <= 1.0) {
                    return bad(format!("dirac: psi must be in (0, 1], got {psi}"));
                }
                if !(c >= 0.0 && c.is_finite()) {
                    return bad(format!("dirac: c must be non-negative, got {c}"));
                }
            }
            SimulationModel::Sweep {
                position,
                start_frequency,
                end_frequency,
                alpha,
                dt,
            } => {
                if !(position >= 0.0 && position < sequence_length) {
                    return bad(format!(
                        "sweep: position {position} outside of [0, {sequence_length})"
                    ));
                }
                if !(start_frequency > 0.0
                    && start_frequency < end_frequency
                    && end_frequency < 1.0)
                {
                    return bad(format!(
                        "sweep: need 0 < start ({start_frequency}) < end ({end_frequency}) < 1"
                    ));
                }
                if !(alpha > 0.0 && alpha.is_finite()) {
                    return bad(format!("sweep: alpha must be positive, got {alpha}"));
                }
                if !(dt > 0.0 && dt.is_finite()) {
                    return bad(format!("sweep: dt must be positive, got {dt}"));
                }
            }
            _ => (),
        }
        Ok(())
    }
}

impl std::fmt::Display for SimulationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SimulationModel {
    type Err = ValidationError;

    /// Parse the name of a model that takes no parameters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hudson" | "standard" => Ok(SimulationModel::Hudson),
            "smc" => Ok(SimulationModel::Smc),
            "smc_prime" => Ok(SimulationModel::SmcPrime),
            "dtwf" => Ok(SimulationModel::Dtwf),
            "wf_ped" => Ok(SimulationModel::WfPedigree),
            name @ ("beta" | "dirac" | "sweep") => Err(ValidationError::Model(format!(
                "model '{name}' requires parameters"
            ))),
            name => Err(ValidationError::Model(format!(
                "unknown model '{name}', choose from hudson, smc, smc_prime, dtwf, wf_ped"
            ))),
        }
    }
}

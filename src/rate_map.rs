use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use crate::error::DomainError;
use crate::error::SimulationError;
use crate::error::ValidationError;

/// A piecewise-constant rate along a chromosome.
///
/// The rate over `[positions[j], positions[j + 1])` is `rates[j]`.
/// The final rate is carried for symmetry with the positions
/// and is never used.
///
/// The "mass" of an interval is the integral of the rate over it,
/// i.e., the genetic distance in Morgans for a recombination map.
#[derive(Debug, Clone, PartialEq)]
pub struct RateMap {
    position: Vec<f64>,
    rate: Vec<f64>,
    // cumulative[j] is the mass of [0, position[j])
    cumulative: Vec<f64>,
    discrete: bool,
    map_start: f64,
}

impl RateMap {
    pub fn new(positions: Vec<f64>, rates: Vec<f64>, discrete: bool) -> Result<Self, ValidationError> {
        if positions.len() != rates.len() {
            return Err(ValidationError::RateMap(format!(
                "{} positions but {} rates",
                positions.len(),
                rates.len()
            )));
        }
        if positions.len() < 2 {
            return Err(ValidationError::RateMap(
                "at least two positions are required".to_string(),
            ));
        }
        if positions[0] != 0.0 {
            return Err(ValidationError::RateMap(format!(
                "first position must be 0, got {}",
                positions[0]
            )));
        }
        if !positions.iter().all(|p| p.is_finite()) {
            return Err(ValidationError::RateMap(
                "positions must be finite".to_string(),
            ));
        }
        if let Some(w) = positions.windows(2).find(|w| w[1] <= w[0]) {
            return Err(ValidationError::RateMap(format!(
                "positions must be strictly increasing: {} then {}",
                w[0], w[1]
            )));
        }
        if let Some(r) = rates.iter().find(|r| !r.is_finite() || **r < 0.0) {
            return Err(ValidationError::RateMap(format!(
                "rates must be finite and non-negative, got {r}"
            )));
        }
        let mut cumulative = Vec::with_capacity(positions.len());
        cumulative.push(0.0);
        for j in 1..positions.len() {
            let mass = cumulative[j - 1] + rates[j - 1] * (positions[j] - positions[j - 1]);
            cumulative.push(mass);
        }
        Ok(Self {
            position: positions,
            rate: rates,
            cumulative,
            discrete,
            map_start: 0.0,
        })
    }

    pub fn uniform(sequence_length: f64, rate: f64, discrete: bool) -> Result<Self, ValidationError> {
        Self::new(vec![0.0, sequence_length], vec![rate, 0.0], discrete)
    }

    /// Record that the region before `map_start` was
    /// padded in and carries no information.
    /// Only [`RateMap::mean_rate`] looks at this value.
    pub fn with_map_start(self, map_start: f64) -> Self {
        Self { map_start, ..self }
    }

    /// Parse a HapMap-formatted recombination map.
    ///
    /// One header line is skipped. Column 2 is the position
    /// (bases) and column 3 the rate in cM/Mb. Files whose
    /// name ends in `.gz` are decompressed on the fly.
    pub fn read_hapmap<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let reader: Box<dyn BufRead> = if path.extension().map_or(false, |e| e == "gz") {
            Box::new(BufReader::new(flate2::read::GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut positions = vec![];
        let mut rates = vec![];
        let mut map_start = 0.0;
        for (j, line) in reader.lines().skip(1).enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let columns = line.split_whitespace().collect::<Vec<_>>();
            if columns.len() < 3 {
                return Err(ValidationError::RateMap(format!(
                    "line {}: expected at least 3 columns",
                    j + 2
                ))
                .into());
            }
            let parse = |s: &str| {
                s.parse::<f64>().map_err(|_| {
                    ValidationError::RateMap(format!("line {}: cannot parse {s}", j + 2))
                })
            };
            let position = parse(columns[1])?;
            let rate = parse(columns[2])?;
            if positions.is_empty() {
                map_start = position;
                if position != 0.0 {
                    positions.push(0.0);
                    rates.push(0.0);
                }
            }
            positions.push(position);
            // cM/Mb -> per base
            rates.push(rate * 1e-8);
        }
        match rates.last() {
            Some(&r) if r == 0.0 => (),
            Some(_) => {
                return Err(ValidationError::RateMap(
                    "the last rate in a recombination map must be zero".to_string(),
                )
                .into())
            }
            None => {
                return Err(ValidationError::RateMap("empty recombination map".to_string()).into())
            }
        }
        Ok(Self::new(positions, rates, false)?.with_map_start(map_start))
    }

    pub fn sequence_length(&self) -> f64 {
        self.position[self.position.len() - 1]
    }

    pub fn total_mass(&self) -> f64 {
        self.cumulative[self.cumulative.len() - 1]
    }

    pub fn positions(&self) -> &[f64] {
        &self.position
    }

    pub fn rates(&self) -> &[f64] {
        &self.rate
    }

    pub fn discrete(&self) -> bool {
        self.discrete
    }

    pub fn map_start(&self) -> f64 {
        self.map_start
    }

    pub fn num_intervals(&self) -> usize {
        self.position.len() - 1
    }

    // Index j such that position[j] <= x < position[j + 1]
    fn interval_index(&self, x: f64) -> usize {
        let j = self.position.partition_point(|&p| p <= x);
        j.saturating_sub(1).min(self.num_intervals() - 1)
    }

    /// The rate in effect at `x`.
    pub fn rate_at(&self, x: f64) -> f64 {
        if x < 0.0 || x >= self.sequence_length() {
            return 0.0;
        }
        self.rate[self.interval_index(x)]
    }

    /// Mass of `[0, x)`. Positions outside of the
    /// map are clamped to its ends.
    ///
    /// # Complexity
    ///
    /// `O(log k)` for `k` breakpoints.
    pub fn position_to_mass(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        if x >= self.sequence_length() {
            return self.total_mass();
        }
        let j = self.interval_index(x);
        self.cumulative[j] + (x - self.position[j]) * self.rate[j]
    }

    /// Inverse of [`RateMap::position_to_mass`].
    ///
    /// Where the rate is zero the inverse is not unique
    /// and the leftmost position is returned.
    pub fn mass_to_position(&self, mass: f64) -> Result<f64, DomainError> {
        let total = self.total_mass();
        if !(0.0..=total).contains(&mass) {
            return Err(DomainError::GeneticPosition { mass, total });
        }
        Ok(self.mass_to_position_unchecked(mass))
    }

    // NOTE: callers guarantee 0 <= mass <= total
    pub(crate) fn mass_to_position_unchecked(&self, mass: f64) -> f64 {
        if mass <= 0.0 {
            return 0.0;
        }
        let j = self.cumulative.partition_point(|&c| c < mass);
        if j == 0 {
            return 0.0;
        }
        if j >= self.cumulative.len() {
            return self.sequence_length();
        }
        let j = j - 1;
        debug_assert!(self.rate[j] > 0.0);
        let x = self.position[j] + (mass - self.cumulative[j]) / self.rate[j];
        x.min(self.position[j + 1])
    }

    /// Length-weighted mean rate.
    ///
    /// If the map was padded on the left (see [`RateMap::read_hapmap`]),
    /// the padding does not contribute to the mean.
    pub fn mean_rate(&self) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for j in 0..self.num_intervals() {
            if j == 0 && self.map_start != 0.0 {
                continue;
            }
            let w = self.position[j + 1] - self.position[j];
            weighted += w * self.rate[j];
            total_weight += w;
        }
        if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        }
    }

    /// The map restricted to `[start, end)`.
    ///
    /// With `trim`, coordinates are shifted so that the new map
    /// starts at zero and has length `end - start`. Otherwise the
    /// flanks are kept as zero-rate regions and the sequence length
    /// is unchanged.
    pub fn slice(&self, start: f64, end: f64, trim: bool) -> Result<Self, DomainError> {
        let sequence_length = self.sequence_length();
        let bad_slice = || DomainError::Slice {
            start,
            end,
            sequence_length,
        };
        if !(start >= 0.0 && end <= sequence_length && start < end) {
            return Err(bad_slice());
        }
        let n = self.position.len();
        let mut i = 0;
        if start != 0.0 {
            i = self.position.partition_point(|&p| p < start);
            if start < self.position[i] {
                i -= 1;
            }
        }
        let mut j = n;
        if end != sequence_length {
            j = i + self.position[i..].partition_point(|&p| p <= end);
        }
        let mut positions = self.position[i..j].to_vec();
        let mut rates = self.rate[i..j].to_vec();
        positions[0] = start;
        if end > positions[positions.len() - 1] {
            positions.push(end);
            rates.push(0.0);
        } else {
            let last = rates.len() - 1;
            rates[last] = 0.0;
        }
        if trim {
            positions.iter_mut().for_each(|p| *p -= start);
        } else {
            if positions[0] != 0.0 {
                if rates[0] == 0.0 {
                    positions[0] = 0.0;
                } else {
                    positions.insert(0, 0.0);
                    rates.insert(0, 0.0);
                }
            }
            if positions[positions.len() - 1] != sequence_length {
                positions.push(sequence_length);
                rates.push(0.0);
            }
        }
        Self::new(positions, rates, self.discrete).map_err(|_| bad_slice())
    }
}

use serde::{Deserialize, Serialize};

use crate::NtemError;

/// The model's native sampling grid: `low..=high` every `step` years.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct YearGrid {
    pub low: i32,
    pub high: i32,
    pub step: i32,
}

impl Default for YearGrid {
    fn default() -> Self {
        Self {
            low: 2011,
            high: 2061,
            step: 5,
        }
    }
}

impl YearGrid {
    pub fn validate(&self) -> Result<(), NtemError> {
        if self.step <= 0 {
            return Err(NtemError::config(format!(
                "year grid step MUST be > 0 (got {})",
                self.step
            )));
        }
        if self.high - self.low < self.step {
            return Err(NtemError::config(format!(
                "year grid MUST contain at least two native years (low={}, high={}, step={})",
                self.low, self.high, self.step
            )));
        }
        if (self.high - self.low) % self.step != 0 {
            return Err(NtemError::config(format!(
                "year grid high {} is not reachable from low {} in steps of {}",
                self.high, self.low, self.step
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_native(&self, year: i32) -> bool {
        year >= self.low && year <= self.high && (year - self.low) % self.step == 0
    }

    #[must_use]
    pub fn native_years(&self) -> Vec<i32> {
        (self.low..=self.high)
            .step_by(usize::try_from(self.step).unwrap_or(1))
            .collect()
    }

    /// Native years bracketing `year`, or `None` when `year` is itself native.
    ///
    /// Years outside the grid extrapolate from the two nearest native years.
    #[must_use]
    pub fn brackets(&self, year: i32) -> Option<(i32, i32)> {
        if self.is_native(year) {
            return None;
        }
        if year < self.low {
            return Some((self.low, self.low + self.step));
        }
        if year > self.high {
            return Some((self.high - self.step, self.high));
        }
        let lower = self.low + (year - self.low).div_euclid(self.step) * self.step;
        Some((lower, lower + self.step))
    }
}

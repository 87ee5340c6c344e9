//! Empirical cumulative distribution function
//!
//! Summarizes a finite sample as a right-continuous step function over the
//! sorted distinct sample values.
//!
//! # Examples
//!
//! ```
//! use lazydot_core::EmpiricalDistribution;
//!
//! let ecdf = EmpiricalDistribution::new(&[3.0, 1.0, 2.0, 2.0]).unwrap();
//! assert_eq!(ecdf.x(), &[1.0, 2.0, 3.0]);
//! assert_eq!(ecdf.y(), &[0.25, 0.75, 1.0]);
//! assert_eq!(ecdf.eval(2.5), 0.75);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StatsError;

/// Step-function summary of a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalDistribution {
    /// Sorted distinct sample values
    x: Vec<f64>,
    /// Fraction of the sample less than or equal to the matching `x`
    y: Vec<f64>,
    sample_len: usize,
}

impl EmpiricalDistribution {
    /// Build the distribution of `sample`
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`] for an empty sample or a NaN value.
    ///
    /// # Complexity
    ///
    /// O(n log n) where n is the sample length (requires sorting)
    pub fn new(sample: &[f64]) -> Result<Self, StatsError> {
        if sample.is_empty() {
            return Err(StatsError::EmptySample);
        }
        if let Some(position) = sample.iter().position(|v| v.is_nan()) {
            return Err(StatsError::NanValue { position });
        }

        let mut sorted = sample.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mut x: Vec<f64> = Vec::new();
        let mut y: Vec<f64> = Vec::new();

        for (i, &value) in sorted.iter().enumerate() {
            let fraction = (i + 1) as f64 / n;
            match x.last() {
                Some(&last) if last == value => {
                    if let Some(top) = y.last_mut() {
                        *top = fraction;
                    }
                }
                _ => {
                    x.push(value);
                    y.push(fraction);
                }
            }
        }

        Ok(Self {
            x,
            y,
            sample_len: sample.len(),
        })
    }

    /// Sorted distinct values
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Cumulative fractions, one per distinct value
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Always false; an empty distribution cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Length of the summarized sample
    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    /// Fraction of the sample less than or equal to `value`
    pub fn eval(&self, value: f64) -> f64 {
        let steps = self.x.partition_point(|&v| v <= value);
        if steps == 0 {
            0.0
        } else {
            self.y[steps - 1]
        }
    }

    /// `(value, fraction)` pairs in ascending order
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }
}

//! Year-indexed time series.
//!
//! All per-microsegment quantities are flat `YearSeries` columns over one
//! shared analysis horizon, validated for alignment at ingestion. Pointwise
//! arithmetic assumes aligned operands; alignment failures inside the engine
//! indicate an ingestion bug and panic rather than limp along.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A contiguous run of yearly values starting at `first_year`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearSeries {
    first_year: u32,
    values: Vec<f64>,
}

impl YearSeries {
    /// Creates a series from a first year and raw values.
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty.
    pub fn new(first_year: u32, values: Vec<f64>) -> Self {
        assert!(!values.is_empty(), "year series must cover at least one year");
        Self { first_year, values }
    }

    /// Series of `value` repeated over `[first_year, last_year]`.
    pub fn fill(first_year: u32, last_year: u32, value: f64) -> Self {
        assert!(last_year >= first_year, "last_year must be >= first_year");
        let n = (last_year - first_year + 1) as usize;
        Self::new(first_year, vec![value; n])
    }

    /// All-zero series over `[first_year, last_year]`.
    pub fn zeros(first_year: u32, last_year: u32) -> Self {
        Self::fill(first_year, last_year, 0.0)
    }

    /// Builds a series from `(year, value)` pairs.
    ///
    /// Pairs may arrive unsorted; the resulting range must be contiguous
    /// (every year between the minimum and maximum present exactly once).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SeriesMismatch`] for empty input, gaps, or
    /// duplicate years.
    pub fn from_pairs(pairs: &[(u32, f64)]) -> Result<Self, EngineError> {
        if pairs.is_empty() {
            return Err(EngineError::SeriesMismatch("no year entries".to_string()));
        }
        let mut sorted: Vec<(u32, f64)> = pairs.to_vec();
        sorted.sort_by_key(|&(y, _)| y);
        let first = sorted[0].0;
        let mut values = Vec::with_capacity(sorted.len());
        for (i, &(year, value)) in sorted.iter().enumerate() {
            let expected = first + i as u32;
            if year != expected {
                return Err(EngineError::SeriesMismatch(format!(
                    "expected year {expected}, found {year}"
                )));
            }
            values.push(value);
        }
        Ok(Self::new(first, values))
    }

    pub fn first_year(&self) -> u32 {
        self.first_year
    }

    pub fn last_year(&self) -> u32 {
        self.first_year + (self.values.len() as u32 - 1)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value for `year`, if within the covered range.
    pub fn get(&self, year: u32) -> Option<f64> {
        if year < self.first_year {
            return None;
        }
        self.values.get((year - self.first_year) as usize).copied()
    }

    /// Mutable value for `year`, if within the covered range.
    pub fn get_mut(&mut self, year: u32) -> Option<&mut f64> {
        if year < self.first_year {
            return None;
        }
        self.values.get_mut((year - self.first_year) as usize)
    }

    /// Iterates `(year, value)` in ascending year order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, &v)| (self.first_year + i as u32, v))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Checks that `other` covers the same horizon.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SeriesMismatch`] when ranges differ; `what`
    /// names the offending series in the message.
    pub fn check_aligned(&self, other: &YearSeries, what: &str) -> Result<(), EngineError> {
        if self.first_year != other.first_year || self.values.len() != other.values.len() {
            return Err(EngineError::SeriesMismatch(format!(
                "{what}: [{}..{}] vs [{}..{}]",
                self.first_year,
                self.last_year(),
                other.first_year,
                other.last_year()
            )));
        }
        Ok(())
    }

    fn assert_aligned(&self, other: &YearSeries) {
        assert_eq!(self.first_year, other.first_year, "series start years differ");
        assert_eq!(self.values.len(), other.values.len(), "series lengths differ");
    }

    /// Adds `other` pointwise.
    pub fn add_assign(&mut self, other: &YearSeries) {
        self.assert_aligned(other);
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += b;
        }
    }

    /// Multiplies every value by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.values {
            *v *= factor;
        }
    }

    /// Returns a copy scaled by `factor`.
    pub fn scaled(&self, factor: f64) -> YearSeries {
        let mut out = self.clone();
        out.scale(factor);
        out
    }

    /// Multiplies pointwise by `other`.
    pub fn mul_assign(&mut self, other: &YearSeries) {
        self.assert_aligned(other);
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a *= b;
        }
    }

    /// Running cumulative sum (value for year *t* = sum over years <= *t*).
    pub fn cumulative(&self) -> YearSeries {
        let mut acc = 0.0;
        let values = self
            .values
            .iter()
            .map(|&v| {
                acc += v;
                acc
            })
            .collect();
        YearSeries::new(self.first_year, values)
    }

    /// Sum of all values.
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    /// True when every value of `self` is >= the matching value of `other`,
    /// within `tol`.
    pub fn dominates(&self, other: &YearSeries, tol: f64) -> bool {
        self.assert_aligned(other);
        self.values
            .iter()
            .zip(&other.values)
            .all(|(a, b)| *a + tol >= *b)
    }
}

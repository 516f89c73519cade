//! Linear interpolation over sorted 1D samples.
//!
//! The interpolator validates its knots once so it can be evaluated millions
//! of times (once per image pixel) without re-checking the input.

use thiserror::Error;

/// Errors that can occur when building an interpolator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("Input vectors must have at least {0} points")]
    InsufficientData(usize),
    #[error("Input vectors must have the same length ({0} vs {1})")]
    MismatchedLengths(usize, usize),
    #[error("X values must be strictly increasing")]
    UnsortedData,
    #[error("Grid shape ({rows}, {cols}) does not match knots ({y_knots}, {x_knots})")]
    GridMismatch {
        rows: usize,
        cols: usize,
        y_knots: usize,
        x_knots: usize,
    },
}

pub(crate) fn validate_knots(xs: &[f64], ys: &[f64], min_points: usize) -> Result<(), InterpError> {
    if xs.len() != ys.len() {
        return Err(InterpError::MismatchedLengths(xs.len(), ys.len()));
    }
    if xs.len() < min_points {
        return Err(InterpError::InsufficientData(min_points));
    }
    if xs.windows(2).any(|w| w[1] <= w[0]) {
        return Err(InterpError::UnsortedData);
    }
    Ok(())
}

/// Piecewise-linear interpolator that holds the end values outside its range.
#[derive(Debug, Clone)]
pub struct LinearInterpolator {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearInterpolator {
    /// Build an interpolator from strictly increasing `xs` and matching `ys`.
    ///
    /// A single knot is accepted and yields a constant function.
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, InterpError> {
        validate_knots(&xs, &ys, 1)?;
        Ok(Self { xs, ys })
    }

    /// Evaluate at `x`, returning the first/last sample value beyond the ends.
    pub fn eval_clamped(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1];
        }

        // First knot strictly greater than x; guaranteed in 1..n here
        let upper = self.xs.partition_point(|&k| k <= x);
        let lower = upper - 1;
        let t = (x - self.xs[lower]) / (self.xs[upper] - self.xs[lower]);
        self.ys[lower] + t * (self.ys[upper] - self.ys[lower])
    }
}

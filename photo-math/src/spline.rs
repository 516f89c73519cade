//! Natural cubic splines and separable bicubic upsampling.
//!
//! The background stage estimates a sky level per coarse tile and needs a
//! smooth full-resolution surface through those levels. Upsampling is done
//! as a tensor product: every grid row is splined along x, then every output
//! column is splined along y.

use ndarray::{Array2, ArrayView2};

use crate::interp::{validate_knots, InterpError};

/// Cubic spline interpolation for smooth curve fitting
///
/// Implements natural cubic spline interpolation (second derivatives are
/// zero at the endpoints). Each segment has the form
///
/// S(x) = a + b(x-xi) + c(x-xi)² + d(x-xi)³
///
/// Two knots degenerate to a straight line.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    coeffs: Vec<[f64; 4]>, // a, b, c, d coefficients for each segment
}

impl CubicSpline {
    /// Create a new cubic spline from input points
    ///
    /// # Arguments
    /// * `x` - X coordinates (strictly increasing)
    /// * `y` - Y coordinates corresponding to x values
    ///
    /// # Errors
    /// - If x and y vectors have different lengths
    /// - If fewer than 2 points are provided
    /// - If x values are not strictly increasing
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, InterpError> {
        validate_knots(&x, &y, 2)?;

        let n = x.len();
        let mut spline = CubicSpline {
            x,
            y,
            coeffs: vec![[0.0; 4]; n - 1],
        };
        spline.compute_coefficients();
        Ok(spline)
    }

    /// Solve the tridiagonal system for the natural spline (Thomas algorithm).
    fn compute_coefficients(&mut self) {
        let n = self.x.len();
        let mut h = vec![0.0; n - 1];
        let mut alpha = vec![0.0; n - 1];

        for i in 0..n - 1 {
            h[i] = self.x[i + 1] - self.x[i];
        }

        for i in 1..n - 1 {
            alpha[i] = (3.0 / h[i]) * (self.y[i + 1] - self.y[i])
                - (3.0 / h[i - 1]) * (self.y[i] - self.y[i - 1]);
        }

        let mut l = vec![1.0; n];
        let mut mu = vec![0.0; n];
        let mut z = vec![0.0; n];

        for i in 1..n - 1 {
            l[i] = 2.0 * (self.x[i + 1] - self.x[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / l[i];
            z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
        }

        let mut c = vec![0.0; n];
        let mut b = vec![0.0; n - 1];
        let mut d = vec![0.0; n - 1];

        // Back substitution
        for j in (0..n - 1).rev() {
            c[j] = z[j] - mu[j] * c[j + 1];
            b[j] = (self.y[j + 1] - self.y[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
            d[j] = (c[j + 1] - c[j]) / (3.0 * h[j]);
        }

        for i in 0..n - 1 {
            self.coeffs[i] = [self.y[i], b[i], c[i], d[i]];
        }
    }

    /// Evaluate the spline at `x`.
    ///
    /// Outside the knot range the boundary value is returned (no extrapolation).
    pub fn evaluate(&self, x: f64) -> f64 {
        let last = self.x.len() - 1;
        if x <= self.x[0] {
            return self.y[0];
        }
        if x >= self.x[last] {
            return self.y[last];
        }

        let segment = self.x.partition_point(|&k| k <= x) - 1;
        let dx = x - self.x[segment];
        let [a, b, c, d] = self.coeffs[segment];
        a + b * dx + c * dx * dx + d * dx * dx * dx
    }
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
///
/// A single value yields `[start]`.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Spline one knot series onto integer sample positions `0..len`.
///
/// A single knot has no slope information and is held constant.
fn spline_onto_samples(knots: &[f64], values: &[f64], len: usize) -> Result<Vec<f64>, InterpError> {
    if knots.len() == 1 {
        return Ok(vec![values[0]; len]);
    }
    let spline = CubicSpline::new(knots.to_vec(), values.to_vec())?;
    Ok((0..len).map(|i| spline.evaluate(i as f64)).collect())
}

/// Upsample a coarse grid to `(rows, cols)` pixels with separable cubic splines.
///
/// # Arguments
/// * `grid` - Coarse values with shape `(y_knots.len(), x_knots.len())`
/// * `y_knots` - Row position of each grid row in output pixel units
/// * `x_knots` - Column position of each grid column in output pixel units
/// * `shape` - Output `(rows, cols)`
///
/// # Returns
/// The interpolated surface evaluated at every integer pixel position.
pub fn upsample_bicubic(
    grid: &ArrayView2<f64>,
    y_knots: &[f64],
    x_knots: &[f64],
    shape: (usize, usize),
) -> Result<Array2<f64>, InterpError> {
    let (ny, nx) = grid.dim();
    if ny != y_knots.len() || nx != x_knots.len() || ny == 0 || nx == 0 {
        return Err(InterpError::GridMismatch {
            rows: ny,
            cols: nx,
            y_knots: y_knots.len(),
            x_knots: x_knots.len(),
        });
    }
    let (rows, cols) = shape;

    // Pass 1: along x for every coarse row
    let mut along_x = Array2::<f64>::zeros((ny, cols));
    for (r, grid_row) in grid.outer_iter().enumerate() {
        let values: Vec<f64> = grid_row.to_vec();
        let sampled = spline_onto_samples(x_knots, &values, cols)?;
        for (c, v) in sampled.into_iter().enumerate() {
            along_x[[r, c]] = v;
        }
    }

    // Pass 2: along y for every output column
    let mut surface = Array2::<f64>::zeros((rows, cols));
    for c in 0..cols {
        let column: Vec<f64> = along_x.column(c).to_vec();
        let sampled = spline_onto_samples(y_knots, &column, rows)?;
        for (r, v) in sampled.into_iter().enumerate() {
            surface[[r, c]] = v;
        }
    }

    Ok(surface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_linear_interpolation() {
        let spline = CubicSpline::new(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap();
        assert_relative_eq!(spline.evaluate(0.5), 0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_cubic_spline_passes_through_knots() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = vec![0.0, 1.0, 4.0, 9.0];
        let spline = CubicSpline::new(x, y).unwrap();

        assert_relative_eq!(spline.evaluate(1.0), 1.0, epsilon = 1e-10);
        assert_relative_eq!(spline.evaluate(2.0), 4.0, epsilon = 1e-10);
        assert_eq!(spline.evaluate(-1.0), 0.0);
        assert_eq!(spline.evaluate(4.0), 9.0);
    }

    #[test]
    fn test_mismatched_lengths() {
        let err = CubicSpline::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]).unwrap_err();
        assert_eq!(err, InterpError::MismatchedLengths(3, 2));
    }

    #[test]
    fn test_unsorted_x() {
        let err = CubicSpline::new(vec![0.0, 2.0, 1.0], vec![0.0, 4.0, 1.0]).unwrap_err();
        assert_eq!(err, InterpError::UnsortedData);
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 128.0, 3), vec![0.0, 64.0, 128.0]);
        assert_eq!(linspace(0.0, 128.0, 1), vec![0.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_upsample_constant_grid() {
        let grid = Array2::from_elem((3, 4), 7.0);
        let surface = upsample_bicubic(
            &grid.view(),
            &linspace(0.0, 30.0, 3),
            &linspace(0.0, 40.0, 4),
            (30, 40),
        )
        .unwrap();
        assert_eq!(surface.dim(), (30, 40));
        for &v in surface.iter() {
            assert_relative_eq!(v, 7.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_upsample_two_by_two_is_bilinear() {
        let grid = array![[0.0, 10.0], [20.0, 30.0]];
        let surface = upsample_bicubic(&grid.view(), &[0.0, 10.0], &[0.0, 10.0], (11, 11)).unwrap();
        assert_relative_eq!(surface[[0, 0]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(surface[[0, 5]], 5.0, epsilon = 1e-12);
        assert_relative_eq!(surface[[5, 0]], 10.0, epsilon = 1e-12);
        assert_relative_eq!(surface[[5, 5]], 15.0, epsilon = 1e-12);
        assert_relative_eq!(surface[[10, 10]], 30.0, epsilon = 1e-12);
    }

    #[test]
    fn test_upsample_single_row_grid() {
        let grid = array![[1.0, 3.0]];
        let surface = upsample_bicubic(&grid.view(), &[0.0], &[0.0, 4.0], (3, 5)).unwrap();
        for r in 0..3 {
            assert_relative_eq!(surface[[r, 2]], 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_upsample_shape_mismatch() {
        let grid = Array2::<f64>::zeros((2, 2));
        let err = upsample_bicubic(&grid.view(), &[0.0], &[0.0, 1.0], (4, 4)).unwrap_err();
        assert!(matches!(err, InterpError::GridMismatch { .. }));
    }
}

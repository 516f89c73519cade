//! Global flux threshold for candidate source pixels.

use ndarray::ArrayView2;
use photo_math::{histogram_mode, median_absolute_deviation};

/// Threshold separating candidate source pixels from sky.
///
/// The sky level is the center of the most populated of `bins` equal-width
/// histogram bins; the threshold sits `mad_factor` median absolute deviations
/// above it. `None` when the image has no finite pixel.
pub fn flux_threshold(image: &ArrayView2<f64>, bins: usize, mad_factor: f64) -> Option<f64> {
    let flat: Vec<f64> = image.iter().copied().collect();
    let sky = histogram_mode(&flat, bins)?;
    let mad = median_absolute_deviation(&flat).ok()?;
    Some(sky + mad_factor * mad)
}

/// `(row, col)` of every pixel strictly above `threshold`, row-major.
pub fn pixels_above(image: &ArrayView2<f64>, threshold: f64) -> Vec<(usize, usize)> {
    image
        .indexed_iter()
        .filter(|(_, &v)| v > threshold)
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_constant_image_selects_nothing() {
        let image = Array2::from_elem((32, 32), 5.0);
        let threshold = flux_threshold(&image.view(), 100, 0.8).unwrap();
        assert_eq!(threshold, 5.0);
        assert!(pixels_above(&image.view(), threshold).is_empty());
    }

    #[test]
    fn test_threshold_from_mode_and_mad() {
        // 0..=9 once each plus eight extra zeros: mode bin is the first,
        // median 0.5, MAD 0.5
        let mut values = vec![0.0; 8];
        values.extend((0..10).map(f64::from));
        let image = Array2::from_shape_vec((3, 6), values).unwrap();
        let threshold = flux_threshold(&image.view(), 10, 0.8).unwrap();
        assert!((threshold - (0.45 + 0.8 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_pixels_above_is_row_major_and_strict() {
        let image = array![[0.0, 3.0, 1.0], [3.0, 2.0, 5.0]];
        assert_eq!(pixels_above(&image.view(), 2.0), vec![(0, 1), (1, 0), (1, 2)]);
    }

    #[test]
    fn test_all_nan() {
        let image = Array2::from_elem((4, 4), f64::NAN);
        assert_eq!(flux_threshold(&image.view(), 100, 0.8), None);
    }
}

//! Sky background from square tiles.

use ndarray::{s, Array2, ArrayView2};
use photo_math::{linspace, median, median_filter_3x3, robust_mode, upsample_bicubic, ModeParams};
use rayon::prelude::*;

use super::BackgroundError;

/// Half-open `(start, end)` spans of `n_tiles` tiles over `len` pixels.
///
/// The last tile absorbs any remainder.
fn tile_spans(len: usize, tile_size: usize) -> Vec<(usize, usize)> {
    let n_tiles = (len / tile_size).max(1);
    (0..n_tiles)
        .map(|i| {
            let start = i * tile_size;
            let end = if i + 1 == n_tiles { len } else { start + tile_size };
            (start, end)
        })
        .collect()
}

/// Robust mode of every tile, as a `(tile rows, tile cols)` grid.
///
/// A tile without finite pixels takes the median of the whole image (or 0
/// when the whole image has none).
pub fn tile_modes(image: &ArrayView2<f64>, tile_size: usize, params: &ModeParams) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let row_spans = tile_spans(rows, tile_size);
    let col_spans = tile_spans(cols, tile_size);
    let (ny, nx) = (row_spans.len(), col_spans.len());

    let modes: Vec<Option<f64>> = (0..ny * nx)
        .into_par_iter()
        .map(|k| {
            let (r0, r1) = row_spans[k / nx];
            let (c0, c1) = col_spans[k % nx];
            let tile: Vec<f64> = image.slice(s![r0..r1, c0..c1]).iter().copied().collect();
            robust_mode(&tile, params)
        })
        .collect();

    let fallback = if modes.iter().any(Option::is_none) {
        let all: Vec<f64> = image.iter().copied().collect();
        let level = median(&all).unwrap_or(0.0);
        log::debug!("degenerate background tile, falling back to image median {level:.3}");
        level
    } else {
        0.0
    };

    Array2::from_shape_fn((ny, nx), |(i, j)| modes[i * nx + j].unwrap_or(fallback))
}

/// Smooth full-resolution sky surface through the tile modes.
///
/// Modes are median filtered (3×3) and upsampled with bicubic splines whose
/// knots span `[0, rows]` × `[0, cols]` evenly.
pub fn estimate_square_background(
    image: &ArrayView2<f64>,
    tile_size: usize,
    params: &ModeParams,
) -> Result<Array2<f64>, BackgroundError> {
    if tile_size == 0 {
        return Err(BackgroundError::InvalidParameter("tile size must be > 0".into()));
    }
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Ok(Array2::zeros((rows, cols)));
    }

    let modes = tile_modes(image, tile_size, params);
    let smoothed = median_filter_3x3(&modes.view());
    let (ny, nx) = smoothed.dim();

    let y_knots = linspace(0.0, rows as f64, ny);
    let x_knots = linspace(0.0, cols as f64, nx);
    Ok(upsample_bicubic(
        &smoothed.view(),
        &y_knots,
        &x_knots,
        (rows, cols),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_tile_spans_fold_remainder() {
        assert_eq!(tile_spans(130, 64), vec![(0, 64), (64, 130)]);
        assert_eq!(tile_spans(128, 64), vec![(0, 64), (64, 128)]);
        assert_eq!(tile_spans(40, 64), vec![(0, 40)]);
    }

    #[test]
    fn test_zero_tile_size_is_rejected() {
        let image = Array2::from_elem((64, 64), 1.0);
        let err = estimate_square_background(&image.view(), 0, &ModeParams::default());
        assert!(matches!(err, Err(BackgroundError::InvalidParameter(_))));
    }

    #[test]
    fn test_flat_image_gives_flat_background() {
        let image = Array2::from_elem((128, 192), 250.0);
        let bg = estimate_square_background(&image.view(), 64, &ModeParams::default()).unwrap();
        assert_eq!(bg.dim(), (128, 192));
        for &v in bg.iter() {
            assert_abs_diff_eq!(v, 250.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_tile_mode_ignores_bright_star() {
        let mut image = Array2::from_elem((64, 64), 100.0);
        for r in 0..64 {
            for c in 0..64 {
                image[[r, c]] += ((r * 7 + c * 13) % 5) as f64 * 0.5;
            }
        }
        for r in 30..34 {
            for c in 30..34 {
                image[[r, c]] = 50_000.0;
            }
        }
        let modes = tile_modes(&image.view(), 64, &ModeParams::default());
        assert_eq!(modes.dim(), (1, 1));
        assert!((modes[[0, 0]] - 101.0).abs() < 1.5);
    }

    #[test]
    fn test_nan_tile_uses_image_median() {
        let mut image = Array2::from_elem((64, 128), 10.0);
        image.slice_mut(s![.., 0..64]).fill(f64::NAN);
        let modes = tile_modes(&image.view(), 64, &ModeParams::default());
        assert_eq!(modes[[0, 0]], 10.0);
        assert_eq!(modes[[0, 1]], 10.0);
    }

    #[test]
    fn test_gradient_is_followed() {
        let image = Array2::from_shape_fn((256, 256), |(_, c)| 100.0 + c as f64 * 0.1);
        let bg = estimate_square_background(&image.view(), 64, &ModeParams::default()).unwrap();
        // Interior columns track the ramp within a couple of counts
        for c in [64usize, 128, 192] {
            assert!((bg[[128, c]] - image[[128, c]]).abs() < 3.5, "col {c}: {}", bg[[128, c]]);
        }
    }

    #[test]
    fn test_deterministic() {
        let image = Array2::from_shape_fn((100, 150), |(r, c)| ((r * 31 + c * 17) % 23) as f64);
        let a = estimate_square_background(&image.view(), 32, &ModeParams::default()).unwrap();
        let b = estimate_square_background(&image.view(), 32, &ModeParams::default()).unwrap();
        assert_eq!(a, b);
    }
}

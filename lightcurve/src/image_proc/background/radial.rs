//! Radially symmetric corner glow around the optical axis.
//!
//! Scattered light makes the sky brighten with distance from the optical
//! center, which sits at one corner of each CCD. The glow is modeled as a
//! 1D profile: robust mode in concentric rings, linearly interpolated back to
//! every pixel.

use ndarray::{Array2, ArrayView2};
use photo_math::{median, robust_mode, LinearInterpolator, ModeParams};
use rayon::prelude::*;

use super::BackgroundError;

/// Distance of every pixel from `origin` (`(row, col)`).
fn distance_map(shape: (usize, usize), origin: (usize, usize)) -> Array2<f64> {
    let (oy, ox) = (origin.0 as f64, origin.1 as f64);
    Array2::from_shape_fn(shape, |(r, c)| {
        let dy = r as f64 - oy;
        let dx = c as f64 - ox;
        (dx * dx + dy * dy).sqrt()
    })
}

/// Inner radius of every ring that is sampled.
///
/// Rings step by `ring_width` from `start_radius` up to (but excluding) the
/// first start at or beyond `max_distance + ring_width`; the final step is
/// dropped, so the outermost ring is the one containing `max_distance`.
fn ring_starts(start_radius: f64, max_distance: f64, ring_width: f64) -> Vec<f64> {
    let stop = max_distance + ring_width;
    let count = ((stop - start_radius) / ring_width).ceil();
    if !(count > 1.0) {
        return Vec::new();
    }
    (0..count as usize - 1)
        .map(|k| start_radius + k as f64 * ring_width)
        .collect()
}

/// Corner-glow surface for a frame whose optical center is at `origin`.
///
/// When no ring holds any finite pixel (for example because the frame ends
/// before `start_radius`), the surface is the image median everywhere.
/// Pixels inside the first ring or beyond the last take that ring's level.
pub fn estimate_radial_background(
    image: &ArrayView2<f64>,
    origin: (usize, usize),
    start_radius: f64,
    ring_width: f64,
    params: &ModeParams,
) -> Result<Array2<f64>, BackgroundError> {
    if !(ring_width.is_finite() && ring_width > 0.0) {
        return Err(BackgroundError::InvalidParameter(format!(
            "ring width must be finite and > 0, got {ring_width}"
        )));
    }
    if !(start_radius.is_finite() && start_radius >= 0.0) {
        return Err(BackgroundError::InvalidParameter(format!(
            "start radius must be finite and >= 0, got {start_radius}"
        )));
    }
    let shape = image.dim();
    if shape.0 == 0 || shape.1 == 0 {
        return Ok(Array2::zeros(shape));
    }

    let dist = distance_map(shape, origin);
    let max_distance = dist.iter().copied().fold(0.0, f64::max);
    let starts = ring_starts(start_radius, max_distance, ring_width);

    let mut rings: Vec<Vec<f64>> = vec![Vec::new(); starts.len()];
    if !starts.is_empty() {
        for (&d, &v) in dist.iter().zip(image.iter()) {
            if d < start_radius {
                continue;
            }
            let k = ((d - start_radius) / ring_width).floor() as usize;
            if let Some(ring) = rings.get_mut(k) {
                ring.push(v);
            }
        }
    }

    let profile: Vec<Option<f64>> = rings
        .par_iter()
        .map(|ring| robust_mode(ring, params))
        .collect();

    let (centers, levels): (Vec<f64>, Vec<f64>) = starts
        .iter()
        .zip(&profile)
        .filter_map(|(&start, level)| level.map(|l| (start + ring_width / 2.0, l)))
        .unzip();

    if centers.is_empty() {
        let all: Vec<f64> = image.iter().copied().collect();
        let level = median(&all).unwrap_or(0.0);
        log::debug!(
            "no populated glow ring beyond {start_radius} px, using image median {level:.3}"
        );
        return Ok(Array2::from_elem(shape, level));
    }

    let interp = LinearInterpolator::new(centers, levels)?;
    Ok(dist.mapv(|d| interp.eval_clamped(d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_ring_starts_drop_last() {
        // arange(0, 30 + 10, 10) = [0, 10, 20, 30], last dropped
        assert_eq!(ring_starts(0.0, 30.0, 10.0), vec![0.0, 10.0, 20.0]);
        assert_eq!(ring_starts(5.0, 31.0, 10.0), vec![5.0, 15.0, 25.0]);
        assert!(ring_starts(2400.0, 180.0, 15.0).is_empty());
    }

    #[test]
    fn test_degenerate_ring_parameters_are_rejected() {
        let image = Array2::from_elem((40, 40), 5.0);
        let params = ModeParams::default();
        for (start, width) in [(0.0, 0.0), (0.0, -4.0), (0.0, f64::NAN), (-1.0, 10.0)] {
            let result = estimate_radial_background(&image.view(), (0, 0), start, width, &params);
            assert!(
                matches!(result, Err(BackgroundError::InvalidParameter(_))),
                "start {start} width {width}"
            );
        }
    }

    #[test]
    fn test_small_frame_falls_back_to_median() {
        let image = Array2::from_shape_fn((50, 60), |(r, _)| if r < 30 { 7.0 } else { 9.0 });
        let params = ModeParams::default();
        let bg =
            estimate_radial_background(&image.view(), (49, 59), 2400.0, 15.0, &params).unwrap();
        assert!(bg.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_recovers_radial_ramp() {
        let origin = (0, 0);
        let image = Array2::from_shape_fn((200, 200), |(r, c)| {
            let d = ((r * r + c * c) as f64).sqrt();
            100.0 + 0.2 * d
        });
        let params = ModeParams::default();
        let bg = estimate_radial_background(&image.view(), origin, 0.0, 10.0, &params).unwrap();

        // Away from the innermost and outermost rings the profile is linear
        for &(r, c) in &[(50usize, 50usize), (100, 20), (0, 150), (120, 120)] {
            assert_abs_diff_eq!(bg[[r, c]], image[[r, c]], epsilon = 0.5);
        }
    }

    #[test]
    fn test_inside_start_radius_takes_first_ring() {
        let image = Array2::from_elem((100, 100), 42.0);
        let params = ModeParams::default();
        let bg = estimate_radial_background(&image.view(), (99, 99), 60.0, 15.0, &params).unwrap();
        assert_eq!(bg[[99, 99]], 42.0);
        assert_eq!(bg[[0, 0]], 42.0);
    }

    #[test]
    fn test_origin_corner_matters() {
        let image = Array2::from_shape_fn((120, 120), |(r, c)| {
            let dr = 119.0 - r as f64;
            let dc = c as f64;
            50.0 + (dr * dr + dc * dc).sqrt()
        });
        let params = ModeParams::default();
        let matched =
            estimate_radial_background(&image.view(), (119, 0), 0.0, 5.0, &params).unwrap();
        let mismatched =
            estimate_radial_background(&image.view(), (0, 119), 0.0, 5.0, &params).unwrap();

        let err = |bg: &Array2<f64>| {
            bg.iter()
                .zip(image.iter())
                .map(|(a, b)| (a - b).abs())
                .sum::<f64>()
                / image.len() as f64
        };
        assert!(err(&matched) < 2.0);
        assert!(err(&mismatched) > 5.0);
    }
}

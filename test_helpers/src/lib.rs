//! Test helpers for the lightcurve workspace
//!
//! Synthetic frames, point sources and observation headers shared by the
//! unit and integration tests, plus a scratch directory for test artifacts.
//! Nothing here depends on the pipeline crates, so fixtures can be used from
//! their inline test modules.

use once_cell::sync::Lazy;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Scratch directory for test artifacts, `<workspace>/test_output`.
static OUTPUT_DIR: Lazy<PathBuf> = Lazy::new(|| {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../test_output");
    std::fs::create_dir_all(&dir).expect("Failed to create output directory");
    dir
});

/// Path of `path` inside the test artifact directory.
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    OUTPUT_DIR.join(path)
}

/// Frame of constant `level` with seeded Gaussian noise of `sigma`.
pub fn noisy_frame(shape: (usize, usize), level: f64, sigma: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(level, sigma).expect("sigma must be finite and non-negative");
    Array2::from_shape_fn(shape, |_| normal.sample(&mut rng))
}

/// Circular Gaussian profile value at `(row, col)`.
fn gaussian(row: f64, col: f64, center: (f64, f64), peak: f64, sigma: f64) -> f64 {
    let dr = row - center.0;
    let dc = col - center.1;
    peak * (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp()
}

/// Add a circular Gaussian point source centered at `(row, col)`.
pub fn add_gaussian_source(image: &mut Array2<f64>, row: f64, col: f64, peak: f64, sigma: f64) {
    for ((r, c), v) in image.indexed_iter_mut() {
        *v += gaussian(r as f64, c as f64, (row, col), peak, sigma);
    }
}

/// Flux a source added by [`add_gaussian_source`] contributes to the pixels
/// where its own profile exceeds `floor`.
pub fn gaussian_flux_above(
    shape: (usize, usize),
    row: f64,
    col: f64,
    peak: f64,
    sigma: f64,
    floor: f64,
) -> f64 {
    let mut total = 0.0;
    for r in 0..shape.0 {
        for c in 0..shape.1 {
            let g = gaussian(r as f64, c as f64, (row, col), peak, sigma);
            if g > floor {
                total += g;
            }
        }
    }
    total
}

/// Observation header for an undistorted tangent-plane frame.
///
/// `center` is the (ra, dec) at the middle of the `(rows, cols)` frame and
/// `scale_deg` the pixel scale; keys follow the FITS names the pipeline reads.
pub fn tangent_plane_header(
    camera: u8,
    ccd: u8,
    date_obs: &str,
    shape: (usize, usize),
    center: (f64, f64),
    scale_deg: f64,
) -> BTreeMap<String, Value> {
    let (rows, cols) = shape;
    let value = json!({
        "CAMERA": camera,
        "CCD": ccd,
        "DATE-OBS": date_obs,
        "NAXIS1": cols,
        "NAXIS2": rows,
        "CRPIX1": cols as f64 / 2.0 + 0.5,
        "CRPIX2": rows as f64 / 2.0 + 0.5,
        "CRVAL1": center.0,
        "CRVAL2": center.1,
        "CD1_1": -scale_deg,
        "CD1_2": 0.0,
        "CD2_1": 0.0,
        "CD2_2": scale_deg,
    });
    serde_json::from_value(value).expect("header literal is an object")
}

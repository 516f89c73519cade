//! Aperture photometry on background-corrected frames.
//!
//! Apertures are stored as sky positions, so on every frame each member pixel
//! is projected back through that frame's transform and rounded to the
//! nearest pixel center. Two sums are taken per aperture:
//!
//! - **in-aperture flux**: the projected pixels, duplicates counted once per
//!   member
//! - **mask flux**: the bounding box of those pixels padded by a margin and
//!   clamped to the frame, minus the in-aperture flux

use chrono::{DateTime, Utc};
use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PhotometryConfig;
use crate::model::{Aperture, FluxSample};
use crate::wcs::{CoordinateTransform, WcsError};

/// What to do with projected pixels that land outside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfBoundsPolicy {
    /// Move them onto the nearest edge pixel.
    Clamp,
    /// Leave them out of both sums.
    SkipPixels,
    /// Emit no sample for the aperture.
    #[default]
    FailSample,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhotometryError {
    #[error("aperture {label} could not be projected: {source}")]
    Projection {
        label: String,
        #[source]
        source: WcsError,
    },
    #[error("aperture {label} has {outside} of {total} pixels outside the {rows}x{cols} frame")]
    OutOfBounds {
        label: String,
        outside: usize,
        total: usize,
        rows: usize,
        cols: usize,
    },
    #[error("aperture {label} has no pixel inside the frame")]
    NoPixelsInFrame { label: String },
}

/// An aperture inside the frame footprint that produced no sample.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedAperture {
    pub label: String,
    pub reason: PhotometryError,
}

/// Result of measuring one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxExtraction {
    /// One sample per measured aperture, ordered by label.
    pub samples: Vec<FluxSample>,
    pub rejected: Vec<RejectedAperture>,
}

/// Nearest pixel `(row, col)` of every member of `aperture`, possibly outside
/// the frame.
fn project_pixels(
    aperture: &Aperture,
    transform: &dyn CoordinateTransform,
) -> Result<Vec<(i64, i64)>, WcsError> {
    aperture
        .pixels
        .iter()
        .map(|&sky| {
            let p = transform.world_to_pixel(sky)?;
            Ok((p.y.round() as i64, p.x.round() as i64))
        })
        .collect()
}

fn resolve_pixels(
    label: &str,
    projected: &[(i64, i64)],
    shape: (usize, usize),
    policy: OutOfBoundsPolicy,
) -> Result<Vec<(usize, usize)>, PhotometryError> {
    let (rows, cols) = shape;
    let inside =
        |&(r, c): &(i64, i64)| r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols;

    let outside = projected.iter().filter(|p| !inside(*p)).count();
    if outside == 0 || policy == OutOfBoundsPolicy::Clamp {
        let max_r = rows.saturating_sub(1) as i64;
        let max_c = cols.saturating_sub(1) as i64;
        return Ok(projected
            .iter()
            .map(|&(r, c)| (r.clamp(0, max_r) as usize, c.clamp(0, max_c) as usize))
            .collect());
    }

    match policy {
        OutOfBoundsPolicy::SkipPixels => {
            let kept: Vec<(usize, usize)> = projected
                .iter()
                .filter(|p| inside(*p))
                .map(|&(r, c)| (r as usize, c as usize))
                .collect();
            if kept.is_empty() {
                return Err(PhotometryError::NoPixelsInFrame {
                    label: label.to_string(),
                });
            }
            log::warn!(
                "aperture {label}: skipping {outside} of {} pixels outside the frame",
                projected.len()
            );
            Ok(kept)
        }
        _ => Err(PhotometryError::OutOfBounds {
            label: label.to_string(),
            outside,
            total: projected.len(),
            rows,
            cols,
        }),
    }
}

/// Sum `pixels` and the surrounding padded box.
///
/// Returns `(in_aperture_flux, mask_flux)`. The box spans the pixels' row and
/// column extent widened by `margin` on each side and clamped to the image.
/// `pixels` must be non-empty and inside the image.
pub fn aperture_flux(
    image: &ArrayView2<f64>,
    pixels: &[(usize, usize)],
    margin: usize,
) -> (f64, f64) {
    let (rows, cols) = image.dim();
    let in_aperture: f64 = pixels.iter().map(|&p| image[p]).sum();

    let (mut r0, mut r1, mut c0, mut c1) = (usize::MAX, 0, usize::MAX, 0);
    for &(r, c) in pixels {
        r0 = r0.min(r);
        r1 = r1.max(r);
        c0 = c0.min(c);
        c1 = c1.max(c);
    }
    if r0 > r1 {
        return (in_aperture, 0.0);
    }
    let r0 = r0.saturating_sub(margin);
    let c0 = c0.saturating_sub(margin);
    let r1 = (r1 + margin).min(rows - 1);
    let c1 = (c1 + margin).min(cols - 1);

    let box_sum: f64 = image.slice(ndarray::s![r0..=r1, c0..=c1]).sum();
    (in_aperture, box_sum - in_aperture)
}

/// Measures catalogued apertures on corrected frames.
#[derive(Debug, Clone, Default)]
pub struct FluxExtractor {
    config: PhotometryConfig,
}

impl FluxExtractor {
    pub fn new(config: PhotometryConfig) -> Self {
        Self { config }
    }

    fn measure(
        &self,
        image: &ArrayView2<f64>,
        transform: &dyn CoordinateTransform,
        observed_at: DateTime<Utc>,
        aperture: &Aperture,
    ) -> Result<FluxSample, PhotometryError> {
        let label = aperture.label.as_str();
        let projected =
            project_pixels(aperture, transform).map_err(|source| PhotometryError::Projection {
                label: label.to_string(),
                source,
            })?;
        let pixels = resolve_pixels(label, &projected, image.dim(), self.config.out_of_bounds)?;
        let (in_aperture_flux, mask_flux) = aperture_flux(image, &pixels, self.config.mask_margin);

        Ok(FluxSample {
            aperture_label: aperture.label.clone(),
            observed_at,
            in_aperture_flux,
            mask_flux,
        })
    }

    /// Measure every aperture whose centroid lies inside the frame footprint.
    ///
    /// Apertures outside the footprint are ignored; those inside that cannot
    /// be measured are returned in [`FluxExtraction::rejected`].
    pub fn extract(
        &self,
        image: &ArrayView2<f64>,
        transform: &dyn CoordinateTransform,
        observed_at: DateTime<Utc>,
        apertures: &[Aperture],
    ) -> FluxExtraction {
        let footprint = transform.footprint();
        let visible: Vec<&Aperture> = apertures
            .iter()
            .filter(|a| footprint.contains(&a.centroid))
            .collect();

        let results: Vec<Result<FluxSample, PhotometryError>> = visible
            .par_iter()
            .map(|aperture| self.measure(image, transform, observed_at, aperture))
            .collect();

        let mut extraction = FluxExtraction::default();
        for (aperture, result) in visible.iter().zip(results) {
            match result {
                Ok(sample) => extraction.samples.push(sample),
                Err(reason) => {
                    log::warn!("no sample for aperture {}: {reason}", aperture.label);
                    extraction.rejected.push(RejectedAperture {
                        label: aperture.label.clone(),
                        reason,
                    });
                }
            }
        }
        extraction
            .samples
            .sort_by(|a, b| a.aperture_label.cmp(&b.aperture_label));

        log::debug!(
            "{} of {} apertures in footprint, {} measured",
            visible.len(),
            apertures.len(),
            extraction.samples.len()
        );
        extraction
    }
}

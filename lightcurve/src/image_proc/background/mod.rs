//! Sky background and corner-glow removal.
//!
//! The background of a raw frame is modeled as the sum of two surfaces:
//!
//! - a **square** surface: robust mode per square tile, median filtered and
//!   spline-upsampled, following the smooth sky gradient
//! - a **radial** surface: robust mode per concentric ring around the optical
//!   center corner, following scattered-light glow
//!
//! Each surface biases the other, so they are refined alternately for a
//! fixed number of rounds: the radial model is re-estimated from the frame
//! minus the current square model, then the square model from the frame minus
//! the new radial model. The result is deterministic for identical input.

mod radial;
mod square;

pub use radial::estimate_radial_background;
pub use square::{estimate_square_background, tile_modes};

use ndarray::{s, Array2, ArrayView2};
use photo_math::InterpError;
use thiserror::Error;

use crate::config::{BackgroundConfig, OverscanConfig};
use crate::metadata::CcdPosition;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackgroundError {
    #[error("frame of {rows}x{cols} is too small for the configured overscan")]
    TooSmallForOverscan { rows: usize, cols: usize },
    #[error("background interpolation failed: {0}")]
    Interpolation(#[from] InterpError),
    #[error("invalid background parameter: {0}")]
    InvalidParameter(String),
}

/// Final square and radial surfaces of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundModel {
    pub square: Array2<f64>,
    pub radial: Array2<f64>,
}

impl BackgroundModel {
    pub fn total(&self) -> Array2<f64> {
        &self.square + &self.radial
    }
}

/// Removes sky background and corner glow from raw frames.
#[derive(Debug, Clone, Default)]
pub struct BackgroundEstimator {
    config: BackgroundConfig,
}

impl BackgroundEstimator {
    pub fn new(config: BackgroundConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    fn square(&self, image: &ArrayView2<f64>) -> Result<Array2<f64>, BackgroundError> {
        estimate_square_background(image, self.config.tile_size, &self.config.mode_params())
    }

    fn radial(
        &self,
        image: &ArrayView2<f64>,
        origin: (usize, usize),
    ) -> Result<Array2<f64>, BackgroundError> {
        estimate_radial_background(
            image,
            origin,
            self.config.start_radius,
            self.config.ring_width,
            &self.config.mode_params(),
        )
    }

    /// Estimate both background surfaces of an overscan-free frame.
    pub fn estimate(
        &self,
        image: &ArrayView2<f64>,
        position: CcdPosition,
    ) -> Result<BackgroundModel, BackgroundError> {
        let (rows, cols) = image.dim();
        let origin = position.optical_center(rows, cols);

        let mut square = self.square(image)?;
        let mut radial = self.radial(image, origin)?;

        for round in 0..self.config.iterations {
            let without_square = image - &square;
            radial = self.radial(&without_square.view(), origin)?;
            let without_radial = image - &radial;
            square = self.square(&without_radial.view())?;
            log::trace!("background refinement round {} of {}", round + 1, self.config.iterations);
        }

        Ok(BackgroundModel { square, radial })
    }

    /// Subtract the estimated background from an overscan-free frame.
    pub fn correct(
        &self,
        image: &ArrayView2<f64>,
        position: CcdPosition,
    ) -> Result<Array2<f64>, BackgroundError> {
        let model = self.estimate(image, position)?;
        Ok(image - &model.total())
    }

    /// Correct a full detector frame.
    ///
    /// The overscan rows/columns are cut away before estimation and padded
    /// back with zeros afterwards, so the result keeps the detector geometry
    /// the frame's coordinate transform refers to.
    pub fn correct_frame(
        &self,
        raw: &ArrayView2<f64>,
        position: CcdPosition,
        overscan: &OverscanConfig,
    ) -> Result<Array2<f64>, BackgroundError> {
        let science = science_region(raw.view(), overscan)?;
        let corrected = self.correct(&science, position)?;
        Ok(restore_overscan(&corrected.view(), raw.dim(), overscan))
    }
}

/// View of the frame without its overscan rows/columns.
pub fn science_region<'a>(
    raw: ArrayView2<'a, f64>,
    overscan: &OverscanConfig,
) -> Result<ArrayView2<'a, f64>, BackgroundError> {
    let (rows, cols) = raw.dim();
    let keep_rows = rows.checked_sub(overscan.trailing_rows).filter(|&r| r > 0);
    let keep_cols = cols
        .checked_sub(overscan.leading_cols + overscan.trailing_cols)
        .filter(|&c| c > 0);

    match (keep_rows, keep_cols) {
        (Some(r), Some(c)) => Ok(raw.slice_move(s![
            0..r,
            overscan.leading_cols..overscan.leading_cols + c
        ])),
        _ => Err(BackgroundError::TooSmallForOverscan { rows, cols }),
    }
}

/// Zero-pad a science region back to the full detector shape.
pub fn restore_overscan(
    science: &ArrayView2<f64>,
    full_shape: (usize, usize),
    overscan: &OverscanConfig,
) -> Array2<f64> {
    let (rows, cols) = science.dim();
    let mut full = Array2::zeros(full_shape);
    full.slice_mut(s![
        0..rows,
        overscan.leading_cols..overscan.leading_cols + cols
    ])
    .assign(science);
    full
}

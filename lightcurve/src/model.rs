//! Core records that flow between the pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::SensorId;

/// Minimum member pixels of a stored aperture.
pub const MIN_APERTURE_PIXELS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("aperture {label} has {count} pixels, need at least {MIN_APERTURE_PIXELS}")]
    TooFewPixels { label: String, count: usize },
}

/// Equatorial sky position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    pub ra: f64,
    pub dec: f64,
}

impl SkyCoord {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }
}

/// Zero-based pixel position; `x` is the column, `y` the row.
///
/// Pixel centers sit at integer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelCoord {
    pub x: f64,
    pub y: f64,
}

impl PixelCoord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Pixel center of array element `[row, col]`.
    pub fn from_index(row: usize, col: usize) -> Self {
        Self {
            x: col as f64,
            y: row as f64,
        }
    }
}

/// A detected source footprint, fixed in sky coordinates.
///
/// Created once per camera/CCD from the reference frame and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    pub label: String,
    pub sensor: SensorId,
    pub centroid: SkyCoord,
    pub pixels: Vec<SkyCoord>,
}

impl Aperture {
    pub fn new(
        label: impl Into<String>,
        sensor: SensorId,
        centroid: SkyCoord,
        pixels: Vec<SkyCoord>,
    ) -> Result<Self, ModelError> {
        let label = label.into();
        if pixels.len() < MIN_APERTURE_PIXELS {
            return Err(ModelError::TooFewPixels {
                label,
                count: pixels.len(),
            });
        }
        Ok(Self {
            label,
            sensor,
            centroid,
            pixels,
        })
    }
}

/// One brightness measurement of one aperture on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxSample {
    pub aperture_label: String,
    pub observed_at: DateTime<Utc>,
    /// Sum of the aperture's own pixels.
    pub in_aperture_flux: f64,
    /// Sum of the padded bounding box minus the aperture itself.
    pub mask_flux: f64,
}

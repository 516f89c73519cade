//! Image processing stages of the photometry pipeline.
//!
//! # Module Organization
//!
//! - **background**: square-tile sky model plus radial corner-glow model,
//!   refined alternately and subtracted from the raw frame
//! - **detection**: global threshold, density clustering of bright pixels and
//!   distance-transform watershed splitting of blended blobs
//! - **aperture_photometry**: per-aperture flux and surrounding mask flux on
//!   corrected frames

pub mod aperture_photometry;
pub mod background;
pub mod detection;

pub use aperture_photometry::{
    FluxExtraction, FluxExtractor, OutOfBoundsPolicy, PhotometryError, RejectedAperture,
};
pub use background::{BackgroundError, BackgroundEstimator, BackgroundModel};
pub use detection::{ApertureDetector, DetectionError};

//! photo-math - Numeric kernels for wide-field photometry
//!
//! This crate provides the numeric building blocks used by the background,
//! detection and photometry stages of the `lightcurve` pipeline:
//!
//! - **Statistics** - NaN-aware median, MAD, sigma clipping and the
//!   skew-corrected mode estimator used for sky levels
//! - **Interpolation** - Clamped 1D linear interpolation and natural cubic
//!   splines, including separable bicubic upsampling of coarse grids
//! - **Morphology** - 3×3 median filtering and the exact Euclidean distance
//!   transform used to split blended sources
//!
//! # Example
//!
//! ```text
//! use photo_math::{robust_mode, ModeParams};
//!
//! let sky = vec![100.0, 101.0, 99.5, 100.2, 5000.0];
//! let level = robust_mode(&sky, &ModeParams::default());
//! ```

pub mod filter;
pub mod interp;
pub mod spline;
pub mod stats;

// Re-export commonly used types
pub use filter::{distance_transform_edt, median_filter_3x3};
pub use interp::{InterpError, LinearInterpolator};
pub use spline::{linspace, upsample_bicubic, CubicSpline};
pub use stats::{
    histogram_mode, mean, median, median_absolute_deviation, robust_mode, sigma_clip, std_dev,
    ModeParams, StatsError,
};

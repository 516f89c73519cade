//! Pixel <-> sky coordinate transforms.
//!
//! Frames carry a gnomonic (TAN) world coordinate system with a CD matrix and
//! optional SIP polynomial distortion. The pipeline only depends on the
//! [`CoordinateTransform`] trait, so tests can substitute simpler mappings.

mod polygon;
mod sip;

pub use polygon::SkyPolygon;
pub use sip::{SipPolynomial, SipTerm, SipWcs, WcsCoefficients};

use thiserror::Error;

use crate::model::{PixelCoord, SkyCoord};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WcsError {
    #[error("singular CD matrix: determinant={determinant:.6e}")]
    SingularMatrix { determinant: f64 },
    #[error("sky position ({ra:.6}, {dec:.6}) is on or behind the tangent plane")]
    BehindTangentPlane { ra: f64, dec: f64 },
    #[error(
        "inverse distortion did not converge after {iterations} iterations (residual {residual:.3e} px)"
    )]
    NoConvergence { iterations: usize, residual: f64 },
}

/// Mapping between a frame's pixel grid and the sky.
pub trait CoordinateTransform: Send + Sync {
    fn pixel_to_world(&self, pixel: PixelCoord) -> SkyCoord;

    fn world_to_pixel(&self, sky: SkyCoord) -> Result<PixelCoord, WcsError>;

    /// Sky positions of the four corner pixel centers, in ring order.
    fn footprint(&self) -> SkyPolygon;
}

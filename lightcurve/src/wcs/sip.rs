//! Gnomonic projection with SIP polynomial distortion.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use super::{CoordinateTransform, SkyPolygon, WcsError};
use crate::model::{PixelCoord, SkyCoord};

const DETERMINANT_EPSILON: f64 = 1e-30;
const MAX_NEWTON_ITERATIONS: usize = 20;
const NEWTON_TOLERANCE_PX: f64 = 1e-10;

/// One `coeff * u^p * v^q` term of a SIP polynomial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SipTerm {
    pub p: usize,
    pub q: usize,
    pub coeff: f64,
}

/// Distortion polynomial in intermediate pixel coordinates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SipPolynomial {
    pub order: usize,
    pub terms: Vec<SipTerm>,
}

impl SipPolynomial {
    pub fn eval(&self, u: f64, v: f64) -> f64 {
        self.terms
            .iter()
            .map(|t| t.coeff * u.powi(t.p as i32) * v.powi(t.q as i32))
            .sum()
    }

    /// Partial derivatives `(d/du, d/dv)`.
    fn gradient(&self, u: f64, v: f64) -> (f64, f64) {
        let mut du = 0.0;
        let mut dv = 0.0;
        for t in &self.terms {
            if t.p > 0 {
                du += t.coeff * t.p as f64 * u.powi(t.p as i32 - 1) * v.powi(t.q as i32);
            }
            if t.q > 0 {
                dv += t.coeff * t.q as f64 * u.powi(t.p as i32) * v.powi(t.q as i32 - 1);
            }
        }
        (du, dv)
    }
}

fn eval_opt(poly: &Option<SipPolynomial>, u: f64, v: f64) -> f64 {
    poly.as_ref().map_or(0.0, |p| p.eval(u, v))
}

fn gradient_opt(poly: &Option<SipPolynomial>, u: f64, v: f64) -> (f64, f64) {
    poly.as_ref().map_or((0.0, 0.0), |p| p.gradient(u, v))
}

/// Raw world coordinate system coefficients of one frame.
///
/// `crpix` is 1-based as in FITS headers; `crval` and `cd` are in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WcsCoefficients {
    pub crpix: [f64; 2],
    pub crval: [f64; 2],
    pub cd: [[f64; 2]; 2],
    pub a: Option<SipPolynomial>,
    pub b: Option<SipPolynomial>,
    pub ap: Option<SipPolynomial>,
    pub bp: Option<SipPolynomial>,
}

impl WcsCoefficients {
    /// Undistorted tangent plane centered on `center` at 1-based `crpix`,
    /// `scale_deg` degrees per pixel, RA increasing toward lower x.
    pub fn tangent_plane(center: SkyCoord, crpix: [f64; 2], scale_deg: f64) -> Self {
        Self {
            crpix,
            crval: [center.ra, center.dec],
            cd: [[-scale_deg, 0.0], [0.0, scale_deg]],
            a: None,
            b: None,
            ap: None,
            bp: None,
        }
    }
}

/// Gnomonic projection of `(ra, dec)` onto the tangent plane at the reference
/// point, all in radians. `None` on or behind the plane.
fn tan_project(ra: f64, dec: f64, ra0: f64, dec0: f64) -> Option<(f64, f64)> {
    let da = ra - ra0;
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_dec0, cos_dec0) = dec0.sin_cos();
    let cos_da = da.cos();

    let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da;
    if denom <= 1e-12 {
        return None;
    }
    let xi = cos_dec * da.sin() / denom;
    let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da) / denom;
    Some((xi, eta))
}

/// Inverse gnomonic projection, radians in and out.
fn inverse_tan_project(xi: f64, eta: f64, ra0: f64, dec0: f64) -> (f64, f64) {
    let (sin_dec0, cos_dec0) = dec0.sin_cos();
    let rho_sq = xi * xi + eta * eta;
    if rho_sq < 1e-30 {
        return (ra0, dec0);
    }
    let rho = rho_sq.sqrt();
    let (sin_c, cos_c) = rho.atan().sin_cos();

    let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).asin();
    let ra = ra0 + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
    (ra, dec)
}

/// TAN-SIP transform bound to one frame's shape.
#[derive(Debug, Clone)]
pub struct SipWcs {
    coeffs: WcsCoefficients,
    cd: Matrix2<f64>,
    cd_inv: Matrix2<f64>,
    shape: (usize, usize),
}

impl SipWcs {
    /// Build the transform for a `(rows, cols)` frame.
    pub fn new(coeffs: WcsCoefficients, shape: (usize, usize)) -> Result<Self, WcsError> {
        let cd = Matrix2::new(
            coeffs.cd[0][0],
            coeffs.cd[0][1],
            coeffs.cd[1][0],
            coeffs.cd[1][1],
        );
        let determinant = cd.determinant();
        if determinant.abs() < DETERMINANT_EPSILON {
            return Err(WcsError::SingularMatrix { determinant });
        }
        let cd_inv = cd
            .try_inverse()
            .ok_or(WcsError::SingularMatrix { determinant })?;

        Ok(Self {
            coeffs,
            cd,
            cd_inv,
            shape,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn crval_radians(&self) -> (f64, f64) {
        (
            self.coeffs.crval[0].to_radians(),
            self.coeffs.crval[1].to_radians(),
        )
    }

    /// Solve `u + A(u, v) = target_u`, `v + B(u, v) = target_v`.
    fn undistort(&self, target: Vector2<f64>) -> Result<Vector2<f64>, WcsError> {
        let c = &self.coeffs;
        if c.a.is_none() && c.b.is_none() {
            return Ok(target);
        }

        // Inverse polynomial gives a close starting point when present
        let mut uv = Vector2::new(
            target.x + eval_opt(&c.ap, target.x, target.y),
            target.y + eval_opt(&c.bp, target.x, target.y),
        );

        let mut residual = f64::INFINITY;
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let f = Vector2::new(
                uv.x + eval_opt(&c.a, uv.x, uv.y) - target.x,
                uv.y + eval_opt(&c.b, uv.x, uv.y) - target.y,
            );
            residual = f.norm();
            if residual < NEWTON_TOLERANCE_PX {
                return Ok(uv);
            }

            let (a_u, a_v) = gradient_opt(&c.a, uv.x, uv.y);
            let (b_u, b_v) = gradient_opt(&c.b, uv.x, uv.y);
            let jacobian = Matrix2::new(1.0 + a_u, a_v, b_u, 1.0 + b_v);
            let Some(j_inv) = jacobian.try_inverse() else {
                break;
            };
            uv -= j_inv * f;
        }

        Err(WcsError::NoConvergence {
            iterations: MAX_NEWTON_ITERATIONS,
            residual,
        })
    }
}

impl CoordinateTransform for SipWcs {
    fn pixel_to_world(&self, pixel: PixelCoord) -> SkyCoord {
        let c = &self.coeffs;
        let u = pixel.x + 1.0 - c.crpix[0];
        let v = pixel.y + 1.0 - c.crpix[1];
        let distorted = Vector2::new(u + eval_opt(&c.a, u, v), v + eval_opt(&c.b, u, v));

        let plane = self.cd * distorted;
        let (ra0, dec0) = self.crval_radians();
        let (ra, dec) = inverse_tan_project(plane.x.to_radians(), plane.y.to_radians(), ra0, dec0);

        SkyCoord::new(ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    fn world_to_pixel(&self, sky: SkyCoord) -> Result<PixelCoord, WcsError> {
        let (ra0, dec0) = self.crval_radians();
        let (xi, eta) = tan_project(sky.ra.to_radians(), sky.dec.to_radians(), ra0, dec0)
            .ok_or(WcsError::BehindTangentPlane {
                ra: sky.ra,
                dec: sky.dec,
            })?;

        let target = self.cd_inv * Vector2::new(xi.to_degrees(), eta.to_degrees());
        let uv = self.undistort(target)?;

        Ok(PixelCoord::new(
            uv.x + self.coeffs.crpix[0] - 1.0,
            uv.y + self.coeffs.crpix[1] - 1.0,
        ))
    }

    fn footprint(&self) -> SkyPolygon {
        let (rows, cols) = self.shape;
        let last_x = cols.saturating_sub(1) as f64;
        let last_y = rows.saturating_sub(1) as f64;
        let corners = [
            PixelCoord::new(0.0, 0.0),
            PixelCoord::new(0.0, last_y),
            PixelCoord::new(last_x, last_y),
            PixelCoord::new(last_x, 0.0),
        ];
        SkyPolygon::new(corners.iter().map(|&p| self.pixel_to_world(p)).collect())
    }
}

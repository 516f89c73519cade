use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::model::SkyCoord;

/// Points sampled strictly inside every edge when bounding the polygon.
const EDGE_SAMPLES: usize = 8;

/// Wrap `ra` into `(reference - 180, reference + 180]`.
fn unwrap_ra(ra: f64, reference: f64) -> f64 {
    let mut delta = (ra - reference).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    reference + delta
}

fn unit_vector(coord: &SkyCoord) -> Vector3<f64> {
    let (ra, dec) = (coord.ra.to_radians(), coord.dec.to_radians());
    Vector3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin())
}

fn sky_coord(unit: &Vector3<f64>) -> SkyCoord {
    SkyCoord::new(
        unit.y.atan2(unit.x).to_degrees().rem_euclid(360.0),
        unit.z.clamp(-1.0, 1.0).asin().to_degrees(),
    )
}

fn grow(
    bounds: Option<(f64, f64, f64, f64)>,
    ra: f64,
    dec: f64,
) -> Option<(f64, f64, f64, f64)> {
    Some(match bounds {
        None => (ra, ra, dec, dec),
        Some((r0, r1, d0, d1)) => (r0.min(ra), r1.max(ra), d0.min(dec), d1.max(dec)),
    })
}

/// Gnomonic projection about `center`; great circles map to straight lines.
struct TangentPlane {
    center: Vector3<f64>,
    east: Vector3<f64>,
    north: Vector3<f64>,
}

impl TangentPlane {
    fn new(center: Vector3<f64>) -> Self {
        let axis = if center.z.abs() < 0.9 {
            Vector3::z()
        } else {
            Vector3::x()
        };
        let east = axis.cross(&center).normalize();
        let north = center.cross(&east);
        Self {
            center,
            east,
            north,
        }
    }

    /// `None` for points on the far hemisphere.
    fn project(&self, point: &Vector3<f64>) -> Option<(f64, f64)> {
        let depth = point.dot(&self.center);
        if depth <= 0.0 {
            return None;
        }
        Some((point.dot(&self.east) / depth, point.dot(&self.north) / depth))
    }
}

/// Closed polygon on the sky whose edges are great-circle arcs.
///
/// Containment is tested on the tangent plane at the vertex centroid, so it
/// holds near the poles and across RA = 0. A polygon reaching the hemisphere
/// opposite that centroid contains nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyPolygon {
    vertices: Vec<SkyCoord>,
}

impl SkyPolygon {
    pub fn new(vertices: Vec<SkyCoord>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[SkyCoord] {
        &self.vertices
    }

    fn reference_ra(&self) -> f64 {
        self.vertices.first().map_or(0.0, |v| v.ra)
    }

    /// `(ra_min, ra_max, dec_min, dec_max)`, RA unwrapped around the first
    /// vertex so `ra_min` may be negative or `ra_max` exceed 360.
    ///
    /// Edges are sampled so arcs bulging poleward are covered. A polygon
    /// around a pole spans the full RA range up to that pole.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let reference = self.reference_ra();
        let mut bounds = None;
        for v in &self.vertices {
            bounds = grow(bounds, unwrap_ra(v.ra, reference), v.dec);
        }

        let n = self.vertices.len();
        for i in 0..n {
            let a = unit_vector(&self.vertices[i]);
            let b = unit_vector(&self.vertices[(i + 1) % n]);
            for k in 1..EDGE_SAMPLES {
                let t = k as f64 / EDGE_SAMPLES as f64;
                if let Some(unit) = (a * (1.0 - t) + b * t).try_normalize(1e-12) {
                    let coord = sky_coord(&unit);
                    bounds = grow(bounds, unwrap_ra(coord.ra, reference), coord.dec);
                }
            }
        }

        let (mut r0, mut r1, mut d0, mut d1) = bounds?;
        for pole in [90.0, -90.0] {
            if self.contains(&SkyCoord::new(reference, pole)) {
                (r0, r1) = (reference - 180.0, reference + 180.0);
                d0 = d0.min(pole);
                d1 = d1.max(pole);
            }
        }
        Some((r0, r1, d0, d1))
    }

    fn tangent_plane(&self) -> Option<TangentPlane> {
        if self.vertices.len() < 3 {
            return None;
        }
        let sum = self
            .vertices
            .iter()
            .fold(Vector3::zeros(), |acc, v| acc + unit_vector(v));
        sum.try_normalize(1e-12).map(TangentPlane::new)
    }

    /// Even-odd ray casting test on the tangent plane.
    pub fn contains(&self, point: &SkyCoord) -> bool {
        let Some(plane) = self.tangent_plane() else {
            return false;
        };
        let Some((px, py)) = plane.project(&unit_vector(point)) else {
            return false;
        };
        let projected: Option<Vec<(f64, f64)>> = self
            .vertices
            .iter()
            .map(|v| plane.project(&unit_vector(v)))
            .collect();
        let Some(corners) = projected else {
            return false;
        };

        let mut inside = false;
        let mut j = corners.len() - 1;
        for i in 0..corners.len() {
            let (xi, yi) = corners[i];
            let (xj, yj) = corners[j];
            if (yi > py) != (yj > py) {
                let x_cross = xi + (py - yi) * (xj - xi) / (yj - yi);
                if px < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

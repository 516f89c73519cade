//! Typed per-observation metadata.
//!
//! Observation headers arrive as loosely typed key/value maps. They are
//! validated once, here, into [`ImageMetadata`]; everything downstream works
//! with typed fields only.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::wcs::{SipPolynomial, SipTerm, WcsCoefficients};

/// Highest SIP order accepted in a header.
pub const MAX_SIP_ORDER: u64 = 9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("header of {image_id} is missing required key {key}")]
    Missing { image_id: String, key: String },
    #[error("header key {key} of {image_id} is invalid: {reason}")]
    Invalid {
        image_id: String,
        key: String,
        reason: String,
    },
    #[error("invalid CCD {0}; must be 1, 2, 3 or 4")]
    InvalidCcd(u8),
}

/// Camera and CCD a frame was taken with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SensorId {
    pub camera: u8,
    pub ccd: u8,
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "camera {} ccd {}", self.camera, self.ccd)
    }
}

/// Where a CCD sits in its camera's focal plane.
///
/// The optical axis, and with it the corner glow, is at the CCD corner that
/// faces the other three CCDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcdPosition {
    LeftTop,
    RightTop,
    LeftBottom,
    RightBottom,
}

impl CcdPosition {
    pub fn from_ccd(ccd: u8) -> Result<Self, MetadataError> {
        match ccd {
            1 => Ok(CcdPosition::LeftTop),
            2 => Ok(CcdPosition::RightTop),
            3 => Ok(CcdPosition::LeftBottom),
            4 => Ok(CcdPosition::RightBottom),
            other => Err(MetadataError::InvalidCcd(other)),
        }
    }

    /// `(row, col)` of the optical-center corner in a `(rows, cols)` frame.
    pub fn optical_center(&self, rows: usize, cols: usize) -> (usize, usize) {
        let last_row = rows.saturating_sub(1);
        let last_col = cols.saturating_sub(1);
        match self {
            CcdPosition::LeftTop => (last_row, last_col),
            CcdPosition::RightTop => (last_row, 0),
            CcdPosition::LeftBottom => (0, last_col),
            CcdPosition::RightBottom => (0, 0),
        }
    }
}

/// Validated metadata of one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub image_id: String,
    pub sensor: SensorId,
    pub observed_at: DateTime<Utc>,
    /// `(rows, cols)` from `NAXIS2`/`NAXIS1` when the header carries them.
    pub shape: Option<(usize, usize)>,
    pub wcs: WcsCoefficients,
}

struct HeaderReader<'a> {
    image_id: &'a str,
    header: &'a BTreeMap<String, Value>,
}

impl<'a> HeaderReader<'a> {
    fn missing(&self, key: &str) -> MetadataError {
        MetadataError::Missing {
            image_id: self.image_id.to_string(),
            key: key.to_string(),
        }
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> MetadataError {
        MetadataError::Invalid {
            image_id: self.image_id.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    fn optional_f64(&self, key: &str) -> Result<Option<f64>, MetadataError> {
        match self.header.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| self.invalid(key, format!("expected a finite number, got {value}"))),
        }
    }

    fn f64(&self, key: &str) -> Result<f64, MetadataError> {
        self.optional_f64(key)?.ok_or_else(|| self.missing(key))
    }

    fn optional_uint(&self, key: &str) -> Result<Option<u64>, MetadataError> {
        match self.header.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| {
                    self.invalid(key, format!("expected an unsigned integer, got {value}"))
                }),
        }
    }

    fn small_uint(&self, key: &str) -> Result<u8, MetadataError> {
        let raw = self.optional_uint(key)?.ok_or_else(|| self.missing(key))?;
        u8::try_from(raw).map_err(|_| self.invalid(key, format!("{raw} is out of range")))
    }

    fn timestamp(&self, key: &str) -> Result<DateTime<Utc>, MetadataError> {
        let value = self.header.get(key).ok_or_else(|| self.missing(key))?;
        let text = value
            .as_str()
            .ok_or_else(|| self.invalid(key, format!("expected a timestamp string, got {value}")))?;
        parse_observation_time(text)
            .ok_or_else(|| self.invalid(key, format!("cannot parse {text:?}")))
    }

    /// SIP polynomial `{prefix}_p_q` for every `p + q <= {prefix}_ORDER`.
    fn sip(&self, prefix: &str) -> Result<Option<SipPolynomial>, MetadataError> {
        let order_key = format!("{prefix}_ORDER");
        let Some(order) = self.optional_uint(&order_key)? else {
            return Ok(None);
        };
        if order > MAX_SIP_ORDER {
            return Err(self.invalid(
                &order_key,
                format!("order {order} exceeds the maximum of {MAX_SIP_ORDER}"),
            ));
        }
        let order = order as usize;

        let mut terms = Vec::new();
        for p in 0..=order {
            for q in 0..=(order - p) {
                if let Some(coeff) = self.optional_f64(&format!("{prefix}_{p}_{q}"))? {
                    if coeff != 0.0 {
                        terms.push(SipTerm { p, q, coeff });
                    }
                }
            }
        }
        Ok(Some(SipPolynomial { order, terms }))
    }
}

/// Parse `DATE-OBS`: RFC 3339 with offset, or a bare ISO timestamp taken as UTC.
pub fn parse_observation_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(text) {
        return Some(with_offset.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl ImageMetadata {
    /// Validate a raw header map into typed metadata.
    ///
    /// Required keys: `CAMERA`, `CCD`, `DATE-OBS`, `CRPIX1/2`, `CRVAL1/2` and
    /// `CD1_1`..`CD2_2`. SIP terms (`A`, `B`, `AP`, `BP`) are read when their
    /// `*_ORDER` key is present; `NAXIS1/2` give the frame shape.
    ///
    /// The CCD number is range-checked later by [`ImageMetadata::ccd_position`]
    /// so a bad CCD fails only the unit that needs it.
    pub fn from_header(
        image_id: &str,
        header: &BTreeMap<String, Value>,
    ) -> Result<Self, MetadataError> {
        let reader = HeaderReader { image_id, header };

        let sensor = SensorId {
            camera: reader.small_uint("CAMERA")?,
            ccd: reader.small_uint("CCD")?,
        };
        let observed_at = reader.timestamp("DATE-OBS")?;

        let shape = match (
            reader.optional_uint("NAXIS2")?,
            reader.optional_uint("NAXIS1")?,
        ) {
            (Some(rows), Some(cols)) => Some((rows as usize, cols as usize)),
            _ => None,
        };

        let wcs = WcsCoefficients {
            crpix: [reader.f64("CRPIX1")?, reader.f64("CRPIX2")?],
            crval: [reader.f64("CRVAL1")?, reader.f64("CRVAL2")?],
            cd: [
                [reader.f64("CD1_1")?, reader.f64("CD1_2")?],
                [reader.f64("CD2_1")?, reader.f64("CD2_2")?],
            ],
            a: reader.sip("A")?,
            b: reader.sip("B")?,
            ap: reader.sip("AP")?,
            bp: reader.sip("BP")?,
        };

        Ok(Self {
            image_id: image_id.to_string(),
            sensor,
            observed_at,
            shape,
            wcs,
        })
    }

    pub fn ccd_position(&self) -> Result<CcdPosition, MetadataError> {
        CcdPosition::from_ccd(self.sensor.ccd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header() -> BTreeMap<String, Value> {
        let value = json!({
            "CAMERA": 1,
            "CCD": 3,
            "DATE-OBS": "2018-07-25T19:30:42.331",
            "NAXIS1": 2136,
            "NAXIS2": 2078,
            "CRPIX1": 1045.0,
            "CRPIX2": 1001.0,
            "CRVAL1": 324.5,
            "CRVAL2": -33.1,
            "CD1_1": -0.0058,
            "CD1_2": 0.0003,
            "CD2_1": -0.0002,
            "CD2_2": -0.0058,
            "A_ORDER": 2,
            "A_0_2": 1.5e-6,
            "A_1_1": -2.0e-7,
            "A_2_0": 0.0,
        });
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_header_parses_typed_fields() {
        let meta = ImageMetadata::from_header("tess2018206", &header()).unwrap();
        assert_eq!(meta.sensor, SensorId { camera: 1, ccd: 3 });
        assert_eq!(meta.shape, Some((2078, 2136)));
        assert_eq!(meta.wcs.crpix, [1045.0, 1001.0]);
        assert_eq!(meta.observed_at.to_rfc3339(), "2018-07-25T19:30:42.331+00:00");

        let a = meta.wcs.a.unwrap();
        assert_eq!(a.order, 2);
        // Zero coefficients are dropped
        assert_eq!(a.terms.len(), 2);
        assert!(meta.wcs.b.is_none());
    }

    #[test]
    fn test_from_header_missing_key() {
        let mut h = header();
        h.remove("CD2_2");
        let err = ImageMetadata::from_header("img", &h).unwrap_err();
        assert_eq!(
            err,
            MetadataError::Missing {
                image_id: "img".to_string(),
                key: "CD2_2".to_string()
            }
        );
    }

    #[test]
    fn test_from_header_wrong_type() {
        let mut h = header();
        h.insert("CRVAL1".to_string(), json!("324.5"));
        let err = ImageMetadata::from_header("img", &h).unwrap_err();
        assert!(matches!(err, MetadataError::Invalid { ref key, .. } if key == "CRVAL1"));
    }

    #[test]
    fn test_sip_order_is_capped() {
        let mut h = header();
        h.insert("A_ORDER".to_string(), json!(4000));
        let err = ImageMetadata::from_header("img", &h).unwrap_err();
        assert!(matches!(err, MetadataError::Invalid { ref key, .. } if key == "A_ORDER"));

        h.insert("A_ORDER".to_string(), json!(MAX_SIP_ORDER));
        let meta = ImageMetadata::from_header("img", &h).unwrap();
        assert_eq!(meta.wcs.a.unwrap().order, MAX_SIP_ORDER as usize);
    }

    #[test]
    fn test_invalid_ccd_fails_at_position_lookup() {
        let mut h = header();
        h.insert("CCD".to_string(), json!(7));
        let meta = ImageMetadata::from_header("img", &h).unwrap();
        assert_eq!(meta.ccd_position(), Err(MetadataError::InvalidCcd(7)));
    }

    #[test]
    fn test_date_obs_with_offset() {
        let t = parse_observation_time("2019-01-01T00:00:00Z").unwrap();
        assert_eq!(t.to_rfc3339(), "2019-01-01T00:00:00+00:00");
        assert!(parse_observation_time("yesterday").is_none());
    }

    #[test]
    fn test_optical_center_per_ccd() {
        let (rows, cols) = (100, 200);
        assert_eq!(CcdPosition::from_ccd(1).unwrap().optical_center(rows, cols), (99, 199));
        assert_eq!(CcdPosition::from_ccd(2).unwrap().optical_center(rows, cols), (99, 0));
        assert_eq!(CcdPosition::from_ccd(3).unwrap().optical_center(rows, cols), (0, 199));
        assert_eq!(CcdPosition::from_ccd(4).unwrap().optical_center(rows, cols), (0, 0));
        assert_eq!(CcdPosition::from_ccd(0), Err(MetadataError::InvalidCcd(0)));
    }
}

//! Pipeline tuning, loaded from JSON.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! { "background": { "start_radius": 1800.0 }, "photometry": { "out_of_bounds": "clamp" } }
//! ```

use std::path::{Path, PathBuf};

use photo_math::ModeParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image_proc::aperture_photometry::OutOfBoundsPolicy;
use crate::model::MIN_APERTURE_PIXELS;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Sky background model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Edge length of the square tiles, in pixels.
    pub tile_size: usize,
    /// Radius at which the first glow ring starts, in pixels.
    pub start_radius: f64,
    /// Width of each glow ring, in pixels.
    pub ring_width: f64,
    /// Square/radial refinement rounds.
    pub iterations: usize,
    pub clip_sigma: f64,
    pub max_std_ratio: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            tile_size: 64,
            start_radius: 2400.0,
            ring_width: 15.0,
            iterations: 3,
            clip_sigma: 3.0,
            max_std_ratio: 0.3,
        }
    }
}

impl BackgroundConfig {
    pub fn mode_params(&self) -> ModeParams {
        ModeParams {
            clip_sigma: self.clip_sigma,
            max_std_ratio: self.max_std_ratio,
        }
    }
}

/// Source clustering and blob splitting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub histogram_bins: usize,
    /// Threshold is `histogram mode + mad_factor * MAD`.
    pub mad_factor: f64,
    /// Neighborhood radius of the density clustering, in pixels.
    pub eps: f64,
    /// Neighbors (the point included) that make a core point.
    pub min_samples: usize,
    /// Blobs smaller than this are never split.
    pub min_split_pixels: usize,
    /// Sub-clusters smaller than this are dropped.
    pub min_cluster_pixels: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            histogram_bins: 100,
            mad_factor: 0.8,
            eps: 1.5,
            min_samples: 4,
            min_split_pixels: 8,
            min_cluster_pixels: MIN_APERTURE_PIXELS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotometryConfig {
    /// Padding around an aperture's bounding box for the mask flux.
    pub mask_margin: usize,
    pub out_of_bounds: OutOfBoundsPolicy,
}

impl Default for PhotometryConfig {
    fn default() -> Self {
        Self {
            mask_margin: 5,
            out_of_bounds: OutOfBoundsPolicy::FailSample,
        }
    }
}

/// Sensor rows/columns that carry no sky signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverscanConfig {
    pub trailing_rows: usize,
    pub leading_cols: usize,
    pub trailing_cols: usize,
}

impl Default for OverscanConfig {
    fn default() -> Self {
        Self {
            trailing_rows: 30,
            leading_cols: 44,
            trailing_cols: 44,
        }
    }
}

impl OverscanConfig {
    /// No overscan at all; frames are used as stored.
    pub fn none() -> Self {
        Self {
            trailing_rows: 0,
            leading_cols: 0,
            trailing_cols: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub background: BackgroundConfig,
    pub detection: DetectionConfig,
    pub photometry: PhotometryConfig,
    pub overscan: OverscanConfig,
}

impl PipelineConfig {
    /// Load and validate a JSON config file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bg = &self.background;
        if bg.tile_size == 0 {
            return Err(ConfigError::Invalid("background.tile_size must be > 0".into()));
        }
        if !(bg.ring_width > 0.0) {
            return Err(ConfigError::Invalid("background.ring_width must be > 0".into()));
        }
        if !(bg.start_radius >= 0.0) {
            return Err(ConfigError::Invalid(
                "background.start_radius must be >= 0".into(),
            ));
        }
        if !(bg.clip_sigma > 0.0) {
            return Err(ConfigError::Invalid("background.clip_sigma must be > 0".into()));
        }

        let det = &self.detection;
        if det.histogram_bins == 0 {
            return Err(ConfigError::Invalid(
                "detection.histogram_bins must be > 0".into(),
            ));
        }
        if !(det.eps >= 1.0) {
            return Err(ConfigError::Invalid(
                "detection.eps must be >= 1 to reach any neighbor".into(),
            ));
        }
        if det.min_samples == 0 {
            return Err(ConfigError::Invalid("detection.min_samples must be > 0".into()));
        }
        if det.min_cluster_pixels < MIN_APERTURE_PIXELS {
            return Err(ConfigError::Invalid(format!(
                "detection.min_cluster_pixels must be >= {MIN_APERTURE_PIXELS}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.background.tile_size, 64);
        assert_eq!(config.background.ring_width, 15.0);
        assert_eq!(config.detection.min_samples, 4);
        assert_eq!(config.photometry.out_of_bounds, OutOfBoundsPolicy::FailSample);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"background": {{"start_radius": 1800.0}}, "photometry": {{"out_of_bounds": "clamp"}}}}"#
        )
        .unwrap();

        let config = PipelineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.background.start_radius, 1800.0);
        assert_eq!(config.background.tile_size, 64);
        assert_eq!(config.photometry.out_of_bounds, OutOfBoundsPolicy::Clamp);
        assert_eq!(config.overscan, OverscanConfig::default());
    }

    #[test]
    fn test_zero_tile_rejected() {
        let mut config = PipelineConfig::default();
        config.background.tile_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_json_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = PipelineConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load_from_file(Path::new("/nonexistent/lightcurve.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

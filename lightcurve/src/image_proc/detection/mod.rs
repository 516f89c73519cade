//! Source aperture detection on background-corrected frames.
//!
//! # Module Organization
//!
//! - **threshold**: global flux threshold from the histogram mode and MAD
//! - **dbscan**: density clustering of above-threshold pixels
//! - **watershed**: distance-transform splitting of blended clusters
//!
//! [`ApertureDetector`] chains the three and projects every surviving region
//! to sky coordinates through the frame's [`CoordinateTransform`].

pub mod dbscan;
pub mod threshold;
pub mod watershed;

pub use dbscan::dbscan_grid;
pub use threshold::{flux_threshold, pixels_above};
pub use watershed::split_blob;

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::DetectionConfig;
use crate::metadata::SensorId;
use crate::model::{Aperture, ModelError, PixelCoord};
use crate::wcs::CoordinateTransform;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("invalid aperture: {0}")]
    Model(#[from] ModelError),
}

/// Split one density cluster and keep the pieces large enough to measure.
///
/// Each returned region lists its pixels in row-major order.
fn split_cluster(pixels: &[(usize, usize)], config: &DetectionConfig) -> Vec<Vec<(usize, usize)>> {
    let Some(&(first_row, first_col)) = pixels.first() else {
        return Vec::new();
    };
    let (mut r0, mut r1, mut c0, mut c1) = (first_row, first_row, first_col, first_col);
    for &(r, c) in pixels {
        r0 = r0.min(r);
        r1 = r1.max(r);
        c0 = c0.min(c);
        c1 = c1.max(c);
    }

    let mut mask = Array2::from_elem((r1 - r0 + 1, c1 - c0 + 1), false);
    for &(r, c) in pixels {
        mask[[r - r0, c - c0]] = true;
    }

    let labels = split_blob(&mask.view(), config.min_split_pixels);
    let n_regions = labels.iter().copied().max().unwrap_or(0);
    let mut regions = vec![Vec::new(); n_regions];
    for ((r, c), &label) in labels.indexed_iter() {
        if label > 0 {
            regions[label - 1].push((r + r0, c + c0));
        }
    }

    regions.retain(|region| region.len() >= config.min_cluster_pixels);
    regions
}

fn pixel_centroid(pixels: &[(usize, usize)]) -> PixelCoord {
    let n = pixels.len() as f64;
    let (sum_r, sum_c) = pixels
        .iter()
        .fold((0.0, 0.0), |(sr, sc), &(r, c)| (sr + r as f64, sc + c as f64));
    PixelCoord::new(sum_c / n, sum_r / n)
}

/// Finds source apertures on a reference frame.
#[derive(Debug, Clone, Default)]
pub struct ApertureDetector {
    config: DetectionConfig,
}

impl ApertureDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Pixel regions of every detected source, in a deterministic order.
    ///
    /// Density clusters are numbered by their first pixel in row-major order;
    /// split pieces follow their parent in watershed label order.
    pub fn find_regions(&self, image: &ArrayView2<f64>) -> Vec<Vec<(usize, usize)>> {
        let Some(threshold) =
            flux_threshold(image, self.config.histogram_bins, self.config.mad_factor)
        else {
            log::debug!("frame has no finite pixel, nothing to detect");
            return Vec::new();
        };

        let points = pixels_above(image, threshold);
        if points.is_empty() {
            log::debug!("no pixel above threshold {threshold:.3}");
            return Vec::new();
        }

        let labels = dbscan_grid(
            &points,
            image.dim(),
            self.config.eps,
            self.config.min_samples,
        );
        let n_clusters = labels.iter().flatten().map(|&l| l + 1).max().unwrap_or(0);
        let mut clusters: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n_clusters];
        for (&point, label) in points.iter().zip(&labels) {
            if let Some(l) = label {
                clusters[*l].push(point);
            }
        }

        let regions: Vec<Vec<(usize, usize)>> = clusters
            .par_iter()
            .map(|cluster| split_cluster(cluster, &self.config))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        log::debug!(
            "threshold {threshold:.3}: {} candidate pixels, {n_clusters} clusters, {} regions",
            points.len(),
            regions.len()
        );
        regions
    }

    /// Detect apertures on `image` and fix them in sky coordinates.
    ///
    /// Labels are `{image_id}_{index}` with `index` counting regions in
    /// [`ApertureDetector::find_regions`] order. An image with no source
    /// yields an empty list.
    pub fn detect(
        &self,
        image: &ArrayView2<f64>,
        transform: &dyn CoordinateTransform,
        image_id: &str,
        sensor: SensorId,
    ) -> Result<Vec<Aperture>, DetectionError> {
        let regions = self.find_regions(image);

        let apertures = regions
            .par_iter()
            .enumerate()
            .map(|(index, region)| {
                let centroid = transform.pixel_to_world(pixel_centroid(region));
                let pixels = region
                    .iter()
                    .map(|&(r, c)| transform.pixel_to_world(PixelCoord::from_index(r, c)))
                    .collect();
                Aperture::new(format!("{image_id}_{index}"), sensor, centroid, pixels)
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("{image_id}: detected {} apertures", apertures.len());
        Ok(apertures)
    }
}

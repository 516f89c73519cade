//! Stage runners over batches of observations.
//!
//! Every stage processes its units (one observation each, or one camera/CCD
//! for detection) in parallel and returns one [`UnitReport`] per unit. A
//! failing unit never stops the batch; only a failure to list the batch
//! itself is returned as an error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{ConfigError, PipelineConfig};
use crate::image_proc::aperture_photometry::FluxExtractor;
use crate::image_proc::background::{BackgroundError, BackgroundEstimator};
use crate::image_proc::detection::{ApertureDetector, DetectionError};
use crate::metadata::{ImageMetadata, MetadataError, SensorId};
use crate::store::{ApertureStore, BlobStore, FluxStore, MetadataStore, StoreError};
use crate::wcs::{CoordinateTransform, SipWcs, WcsError};

/// Why one unit of a stage failed.
#[derive(Error, Debug)]
pub enum UnitError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Background(#[from] BackgroundError),
    #[error(transparent)]
    Wcs(#[from] WcsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Correct,
    Apertures,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Correct => "correct",
            Stage::Apertures => "apertures",
            Stage::Extract => "extract",
        };
        f.write_str(name)
    }
}

/// What a successful unit produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Corrected,
    Detected { apertures: usize },
    Extracted { samples: usize, rejected: usize },
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Corrected => write!(f, "corrected"),
            UnitOutcome::Detected { apertures } => write!(f, "{apertures} apertures"),
            UnitOutcome::Extracted { samples, rejected } => {
                write!(f, "{samples} samples, {rejected} rejected apertures")
            }
        }
    }
}

#[derive(Debug)]
pub struct UnitReport {
    pub stage: Stage,
    pub image_id: String,
    pub result: Result<UnitOutcome, UnitError>,
}

impl UnitReport {
    fn new(stage: Stage, image_id: &str, result: Result<UnitOutcome, UnitError>) -> Self {
        match &result {
            Ok(outcome) => log::info!("{stage} {image_id}: {outcome}"),
            Err(e) => log::error!("{stage} {image_id} failed: {e}"),
        }
        Self {
            stage,
            image_id: image_id.to_string(),
            result,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Unit counts of one or more stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// `"<stage> <image_id>: <error>"` per failed unit.
    pub failures: Vec<String>,
}

impl BatchSummary {
    pub fn from_reports(reports: &[UnitReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            match &report.result {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary
                        .failures
                        .push(format!("{} {}: {e}", report.stage, report.image_id));
                }
            }
        }
        summary
    }

    pub fn merge(&mut self, other: BatchSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }
}

/// Drives the three stages against a set of stores.
pub struct Pipeline<'a> {
    blobs: &'a dyn BlobStore,
    metadata: &'a dyn MetadataStore,
    apertures: &'a dyn ApertureStore,
    fluxes: &'a dyn FluxStore,
    background: BackgroundEstimator,
    detector: ApertureDetector,
    extractor: FluxExtractor,
    config: PipelineConfig,
}

impl<'a> Pipeline<'a> {
    /// Pipeline over one store implementing every boundary trait.
    pub fn new<S>(config: PipelineConfig, store: &'a S) -> Result<Self, ConfigError>
    where
        S: BlobStore + MetadataStore + ApertureStore + FluxStore,
    {
        Self::with_stores(config, store, store, store, store)
    }

    pub fn with_stores(
        config: PipelineConfig,
        blobs: &'a dyn BlobStore,
        metadata: &'a dyn MetadataStore,
        apertures: &'a dyn ApertureStore,
        fluxes: &'a dyn FluxStore,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            blobs,
            metadata,
            apertures,
            fluxes,
            background: BackgroundEstimator::new(config.background.clone()),
            detector: ApertureDetector::new(config.detection.clone()),
            extractor: FluxExtractor::new(config.photometry.clone()),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Transform of a frame, bound to the shape of the array actually stored.
    fn transform(&self, meta: &ImageMetadata, image: &Array2<f64>) -> Result<SipWcs, WcsError> {
        if let Some(shape) = meta.shape.filter(|&s| s != image.dim()) {
            log::warn!(
                "{}: header shape {shape:?} differs from stored array {:?}",
                meta.image_id,
                image.dim()
            );
        }
        SipWcs::new(meta.wcs.clone(), image.dim())
    }

    fn correct_unit(&self, image_id: &str) -> Result<UnitOutcome, UnitError> {
        let meta = self.metadata.metadata(image_id)?;
        let position = meta.ccd_position()?;
        let raw = self.blobs.get_raw(image_id)?;
        let corrected =
            self.background
                .correct_frame(&raw.view(), position, &self.config.overscan)?;
        self.blobs.put_corrected(image_id, &corrected.view())?;
        Ok(UnitOutcome::Corrected)
    }

    fn detect_unit(&self, meta: &ImageMetadata) -> Result<UnitOutcome, UnitError> {
        let image = self.blobs.get_corrected(&meta.image_id)?;
        let transform = self.transform(meta, &image)?;
        let apertures =
            self.detector
                .detect(&image.view(), &transform, &meta.image_id, meta.sensor)?;
        let count = apertures.len();
        self.apertures.insert_apertures(apertures)?;
        Ok(UnitOutcome::Detected { apertures: count })
    }

    fn extract_unit(&self, image_id: &str) -> Result<UnitOutcome, UnitError> {
        let meta = self.metadata.metadata(image_id)?;
        let image = self.blobs.get_corrected(image_id)?;
        let transform = self.transform(&meta, &image)?;

        let candidates = self.apertures.apertures_within(&transform.footprint())?;
        let extraction =
            self.extractor
                .extract(&image.view(), &transform, meta.observed_at, &candidates);
        self.fluxes.append_samples(&extraction.samples)?;

        Ok(UnitOutcome::Extracted {
            samples: extraction.samples.len(),
            rejected: extraction.rejected.len(),
        })
    }

    /// Background-correct every observation taken at or after `since`.
    pub fn correct_images(&self, since: DateTime<Utc>) -> Result<Vec<UnitReport>, StoreError> {
        let observations = self.metadata.observations_since(since)?;
        log::info!("correcting {} observations", observations.len());
        Ok(observations
            .par_iter()
            .map(|o| UnitReport::new(Stage::Correct, &o.image_id, self.correct_unit(&o.image_id)))
            .collect())
    }

    /// Reference candidates of every camera/CCD seen since `since` that has
    /// no apertures yet, oldest first.
    ///
    /// Candidates come from the whole observation history, so a batch that
    /// starts after a sensor's first frame still picks that frame. Unreadable
    /// metadata is reported as failed only for observations in the batch.
    fn reference_candidates(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(Vec<Vec<ImageMetadata>>, Vec<UnitReport>), StoreError> {
        let history = self.metadata.observations_since(DateTime::<Utc>::MIN_UTC)?;
        let mut by_sensor: BTreeMap<SensorId, Vec<ImageMetadata>> = BTreeMap::new();
        let mut active: BTreeSet<SensorId> = BTreeSet::new();
        let mut failures = Vec::new();

        for obs in &history {
            match self.metadata.metadata(&obs.image_id) {
                Ok(meta) => {
                    if obs.observed_at >= since {
                        active.insert(meta.sensor);
                    }
                    by_sensor.entry(meta.sensor).or_default().push(meta);
                }
                Err(e) if obs.observed_at >= since => {
                    failures.push(UnitReport::new(Stage::Apertures, &obs.image_id, Err(e.into())));
                }
                Err(e) => log::debug!("{}: {e}", obs.image_id),
            }
        }

        let mut candidates = Vec::new();
        for (sensor, frames) in by_sensor {
            if !active.contains(&sensor) {
                continue;
            }
            if self.apertures.has_apertures_for(sensor)? {
                log::debug!("{sensor} already has apertures");
                continue;
            }
            candidates.push(frames);
        }
        Ok((candidates, failures))
    }

    /// Detect on the oldest usable frame of one sensor.
    ///
    /// Frames that fail are skipped in favour of the next one. Only when none
    /// works is the failure of the oldest frame reported.
    fn detect_sensor(&self, frames: &[ImageMetadata]) -> Option<UnitReport> {
        let mut first_error: Option<(&str, UnitError)> = None;
        for meta in frames {
            match self.detect_unit(meta) {
                Ok(outcome) => {
                    log::info!("reference for {}: {}", meta.sensor, meta.image_id);
                    return Some(UnitReport::new(Stage::Apertures, &meta.image_id, Ok(outcome)));
                }
                Err(e) => {
                    log::warn!(
                        "{}: {} unusable as reference ({e}), trying the next frame",
                        meta.sensor,
                        meta.image_id
                    );
                    first_error.get_or_insert((meta.image_id.as_str(), e));
                }
            }
        }
        let (image_id, e) = first_error?;
        log::warn!("no usable reference frame for {}", frames[0].sensor);
        Some(UnitReport::new(Stage::Apertures, image_id, Err(e)))
    }

    /// Detect apertures on the reference frame of every new camera/CCD.
    pub fn detect_apertures(&self, since: DateTime<Utc>) -> Result<Vec<UnitReport>, StoreError> {
        let (candidates, mut reports) = self.reference_candidates(since)?;
        let detected: Vec<UnitReport> = candidates
            .par_iter()
            .filter_map(|frames| self.detect_sensor(frames))
            .collect();
        reports.extend(detected);
        Ok(reports)
    }

    /// Measure every catalogued aperture on every observation since `since`.
    pub fn extract_light_curves(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<UnitReport>, StoreError> {
        let observations = self.metadata.observations_since(since)?;
        log::info!("extracting fluxes from {} observations", observations.len());
        Ok(observations
            .par_iter()
            .map(|o| UnitReport::new(Stage::Extract, &o.image_id, self.extract_unit(&o.image_id)))
            .collect())
    }

    /// Correct, detect and extract, in that order.
    pub fn run_all(&self, since: DateTime<Utc>) -> Result<BatchSummary, StoreError> {
        let mut summary = BatchSummary::from_reports(&self.correct_images(since)?);
        summary.merge(BatchSummary::from_reports(&self.detect_apertures(since)?));
        summary.merge(BatchSummary::from_reports(&self.extract_light_curves(since)?));
        log::info!(
            "batch finished: {} units succeeded, {} failed",
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }
}

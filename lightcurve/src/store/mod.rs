//! Storage boundary of the pipeline.
//!
//! Stages never touch files or databases directly; they go through the four
//! traits below. Two adapters are provided:
//!
//! - [`MemoryStore`]: lock-guarded maps, used by tests and small batches
//! - [`DirStore`]: a plain directory tree, used by the command line tool
//!
//! Apertures are write-once and flux samples append-only, so every adapter
//! can serve concurrent readers while one unit writes.

pub mod codec;
mod fs;
mod memory;

pub use codec::{decode_array, encode_array, CodecError};
pub use fs::DirStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

use crate::metadata::{ImageMetadata, MetadataError, SensorId};
use crate::model::{Aperture, FluxSample};
use crate::wcs::SkyPolygon;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt array blob {id}: {source}")]
    Codec {
        id: String,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("no {kind} stored for {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("aperture label {0} already exists")]
    DuplicateLabel(String),
    #[error("flux sample references unknown aperture {0}")]
    UnknownLabel(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// An observation as listed by [`MetadataStore::observations_since`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObservationRef {
    pub observed_at: DateTime<Utc>,
    pub image_id: String,
}

/// Raw and corrected pixel arrays by image id.
pub trait BlobStore: Send + Sync {
    fn get_raw(&self, image_id: &str) -> Result<Array2<f64>, StoreError>;

    fn put_raw(&self, image_id: &str, image: &ArrayView2<f64>) -> Result<(), StoreError>;

    fn get_corrected(&self, image_id: &str) -> Result<Array2<f64>, StoreError>;

    fn put_corrected(&self, image_id: &str, image: &ArrayView2<f64>) -> Result<(), StoreError>;
}

/// Per-observation metadata.
pub trait MetadataStore: Send + Sync {
    fn metadata(&self, image_id: &str) -> Result<ImageMetadata, StoreError>;

    /// Observations taken at or after `since`, oldest first; ties by id.
    fn observations_since(&self, since: DateTime<Utc>) -> Result<Vec<ObservationRef>, StoreError>;
}

/// The aperture catalog.
pub trait ApertureStore: Send + Sync {
    /// Insert a batch; nothing is written if any label already exists.
    fn insert_apertures(&self, apertures: Vec<Aperture>) -> Result<(), StoreError>;

    /// Apertures whose centroid lies inside `footprint`, ordered by label.
    fn apertures_within(&self, footprint: &SkyPolygon) -> Result<Vec<Aperture>, StoreError>;

    fn aperture(&self, label: &str) -> Result<Option<Aperture>, StoreError>;

    fn has_apertures_for(&self, sensor: SensorId) -> Result<bool, StoreError>;
}

/// Append-only flux time series.
pub trait FluxStore: Send + Sync {
    fn append_samples(&self, samples: &[FluxSample]) -> Result<(), StoreError>;

    /// Every sample of `label`, ordered by observation time.
    fn light_curve(&self, label: &str) -> Result<Vec<FluxSample>, StoreError>;
}

/// Reject a batch containing a label that exists already or twice.
fn check_new_labels<'a>(
    apertures: &'a [Aperture],
    exists: impl Fn(&str) -> bool,
) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::<&'a str>::new();
    for aperture in apertures {
        let label = aperture.label.as_str();
        if exists(label) || !seen.insert(label) {
            return Err(StoreError::DuplicateLabel(label.to_string()));
        }
    }
    Ok(())
}

/// Sort samples of one light curve by time, keeping arrival order on ties.
fn sort_by_time(samples: &mut [FluxSample]) {
    samples.sort_by_key(|s| s.observed_at);
}

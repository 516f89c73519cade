//! lightcurve - Background removal, aperture detection and flux extraction
//!
//! Turns a stream of wide-field full-frame images into per-source brightness
//! time series in three stages:
//!
//! - **Background** - removes the smooth sky gradient and the radially
//!   symmetric corner glow of each raw frame ([`image_proc::background`])
//! - **Apertures** - clusters bright pixels of one reference frame per
//!   camera/CCD, splits blended blobs and fixes each source's footprint in sky
//!   coordinates ([`image_proc::detection`])
//! - **Photometry** - integrates every catalogued aperture on every later
//!   frame whose footprint contains it ([`image_proc::aperture_photometry`])
//!
//! Storage is reached only through the traits in [`store`]; [`pipeline`]
//! drives the stages over a batch of observations.

pub mod config;
pub mod image_proc;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod wcs;

pub use config::{
    BackgroundConfig, ConfigError, DetectionConfig, OverscanConfig, PhotometryConfig,
    PipelineConfig,
};
pub use image_proc::aperture_photometry::{
    FluxExtraction, FluxExtractor, OutOfBoundsPolicy, PhotometryError, RejectedAperture,
};
pub use image_proc::background::{BackgroundError, BackgroundEstimator, BackgroundModel};
pub use image_proc::detection::{ApertureDetector, DetectionError};
pub use metadata::{CcdPosition, ImageMetadata, MetadataError, SensorId};
pub use model::{Aperture, FluxSample, ModelError, PixelCoord, SkyCoord};
pub use pipeline::{BatchSummary, Pipeline, Stage, UnitError, UnitOutcome, UnitReport};
pub use store::{
    ApertureStore, BlobStore, DirStore, FluxStore, MemoryStore, MetadataStore, ObservationRef,
    StoreError,
};
pub use wcs::{CoordinateTransform, SipWcs, SkyPolygon, WcsCoefficients, WcsError};

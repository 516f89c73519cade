use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};

use super::{
    check_new_labels, sort_by_time, ApertureStore, BlobStore, FluxStore, MetadataStore,
    ObservationRef, StoreError,
};
use crate::metadata::{ImageMetadata, SensorId};
use crate::model::{Aperture, FluxSample, SkyCoord};
use crate::wcs::SkyPolygon;

/// Edge of a centroid index cell, in degrees.
const CELL_DEG: f64 = 1.0;

type Cell = (i64, i64);

fn cell_of(sky: &SkyCoord) -> Cell {
    let ra_cells = (360.0 / CELL_DEG) as i64;
    (
        ((sky.ra / CELL_DEG).floor() as i64).rem_euclid(ra_cells),
        (sky.dec / CELL_DEG).floor() as i64,
    )
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read().map_err(|_| StoreError::Poisoned)
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write().map_err(|_| StoreError::Poisoned)
}

#[derive(Default)]
struct Catalog {
    by_label: BTreeMap<String, Aperture>,
    by_cell: HashMap<Cell, Vec<String>>,
}

impl Catalog {
    fn candidates(&self, footprint: &SkyPolygon) -> Vec<&Aperture> {
        let Some((ra_min, ra_max, dec_min, dec_max)) = footprint.bounds() else {
            return Vec::new();
        };
        let ra_cells = (360.0 / CELL_DEG) as i64;
        let ra_lo = (ra_min / CELL_DEG).floor() as i64;
        // A footprint wider than the whole sky still only visits each column once
        let ra_hi = ((ra_max / CELL_DEG).floor() as i64).min(ra_lo + ra_cells - 1);
        let dec_lo = (dec_min / CELL_DEG).floor() as i64;
        let dec_hi = (dec_max / CELL_DEG).floor() as i64;

        let mut found = Vec::new();
        for ra in ra_lo..=ra_hi {
            for dec in dec_lo..=dec_hi {
                if let Some(labels) = self.by_cell.get(&(ra.rem_euclid(ra_cells), dec)) {
                    found.extend(labels.iter().filter_map(|l| self.by_label.get(l)));
                }
            }
        }
        found
    }
}

/// Everything in memory behind `RwLock`s.
///
/// Flux samples are only accepted for labels present in the catalog.
#[derive(Default)]
pub struct MemoryStore {
    raw: RwLock<HashMap<String, Array2<f64>>>,
    corrected: RwLock<HashMap<String, Array2<f64>>>,
    metadata: RwLock<HashMap<String, ImageMetadata>>,
    catalog: RwLock<Catalog>,
    fluxes: RwLock<HashMap<String, Vec<FluxSample>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_metadata(&self, metadata: ImageMetadata) -> Result<(), StoreError> {
        write(&self.metadata)?.insert(metadata.image_id.clone(), metadata);
        Ok(())
    }

    /// Number of catalogued apertures.
    pub fn aperture_count(&self) -> Result<usize, StoreError> {
        Ok(read(&self.catalog)?.by_label.len())
    }
}

fn get_blob(
    map: &RwLock<HashMap<String, Array2<f64>>>,
    kind: &'static str,
    image_id: &str,
) -> Result<Array2<f64>, StoreError> {
    read(map)?
        .get(image_id)
        .cloned()
        .ok_or_else(|| StoreError::NotFound {
            kind,
            id: image_id.to_string(),
        })
}

impl BlobStore for MemoryStore {
    fn get_raw(&self, image_id: &str) -> Result<Array2<f64>, StoreError> {
        get_blob(&self.raw, "raw image", image_id)
    }

    fn put_raw(&self, image_id: &str, image: &ArrayView2<f64>) -> Result<(), StoreError> {
        write(&self.raw)?.insert(image_id.to_string(), image.to_owned());
        Ok(())
    }

    fn get_corrected(&self, image_id: &str) -> Result<Array2<f64>, StoreError> {
        get_blob(&self.corrected, "corrected image", image_id)
    }

    fn put_corrected(&self, image_id: &str, image: &ArrayView2<f64>) -> Result<(), StoreError> {
        write(&self.corrected)?.insert(image_id.to_string(), image.to_owned());
        Ok(())
    }
}

impl MetadataStore for MemoryStore {
    fn metadata(&self, image_id: &str) -> Result<ImageMetadata, StoreError> {
        read(&self.metadata)?
            .get(image_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "metadata",
                id: image_id.to_string(),
            })
    }

    fn observations_since(&self, since: DateTime<Utc>) -> Result<Vec<ObservationRef>, StoreError> {
        let mut refs: Vec<ObservationRef> = read(&self.metadata)?
            .values()
            .filter(|m| m.observed_at >= since)
            .map(|m| ObservationRef {
                observed_at: m.observed_at,
                image_id: m.image_id.clone(),
            })
            .collect();
        refs.sort();
        Ok(refs)
    }
}

impl ApertureStore for MemoryStore {
    fn insert_apertures(&self, apertures: Vec<Aperture>) -> Result<(), StoreError> {
        let mut catalog = write(&self.catalog)?;
        check_new_labels(&apertures, |label| catalog.by_label.contains_key(label))?;

        for aperture in apertures {
            catalog
                .by_cell
                .entry(cell_of(&aperture.centroid))
                .or_default()
                .push(aperture.label.clone());
            catalog.by_label.insert(aperture.label.clone(), aperture);
        }
        Ok(())
    }

    fn apertures_within(&self, footprint: &SkyPolygon) -> Result<Vec<Aperture>, StoreError> {
        let catalog = read(&self.catalog)?;
        let mut inside: Vec<Aperture> = catalog
            .candidates(footprint)
            .into_iter()
            .filter(|a| footprint.contains(&a.centroid))
            .cloned()
            .collect();
        inside.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(inside)
    }

    fn aperture(&self, label: &str) -> Result<Option<Aperture>, StoreError> {
        Ok(read(&self.catalog)?.by_label.get(label).cloned())
    }

    fn has_apertures_for(&self, sensor: SensorId) -> Result<bool, StoreError> {
        Ok(read(&self.catalog)?
            .by_label
            .values()
            .any(|a| a.sensor == sensor))
    }
}

impl FluxStore for MemoryStore {
    fn append_samples(&self, samples: &[FluxSample]) -> Result<(), StoreError> {
        {
            let catalog = read(&self.catalog)?;
            if let Some(unknown) = samples
                .iter()
                .find(|s| !catalog.by_label.contains_key(&s.aperture_label))
            {
                return Err(StoreError::UnknownLabel(unknown.aperture_label.clone()));
            }
        }

        let mut fluxes = write(&self.fluxes)?;
        for sample in samples {
            fluxes
                .entry(sample.aperture_label.clone())
                .or_default()
                .push(sample.clone());
        }
        Ok(())
    }

    fn light_curve(&self, label: &str) -> Result<Vec<FluxSample>, StoreError> {
        let mut curve = read(&self.fluxes)?
            .get(label)
            .cloned()
            .unwrap_or_default();
        sort_by_time(&mut curve);
        Ok(curve)
    }
}

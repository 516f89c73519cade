//! Directory-backed store.
//!
//! ```text
//! <root>/
//!   raw/<image_id>.bin          raw frames (array codec)
//!   corrected/<image_id>.bin    corrected frames (array codec)
//!   metadata/<image_id>.json    observation header, key -> value
//!   apertures.json              aperture catalog
//!   fluxes.jsonl                flux samples, one JSON object per line
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use serde_json::Value;

use super::codec::{decode_array, encode_array};
use super::{
    check_new_labels, sort_by_time, ApertureStore, BlobStore, FluxStore, MetadataStore,
    ObservationRef, StoreError,
};
use crate::metadata::{parse_observation_time, ImageMetadata, SensorId};
use crate::model::{Aperture, FluxSample};
use crate::wcs::SkyPolygon;

const RAW_DIR: &str = "raw";
const CORRECTED_DIR: &str = "corrected";
const METADATA_DIR: &str = "metadata";
const APERTURES_FILE: &str = "apertures.json";
const FLUXES_FILE: &str = "fluxes.jsonl";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_error(path: &Path) -> impl FnOnce(serde_json::Error) -> StoreError + '_ {
    move |source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    }
}

/// Pipeline store rooted at a directory.
pub struct DirStore {
    root: PathBuf,
    catalog_lock: Mutex<()>,
    flux_lock: Mutex<()>,
}

impl DirStore {
    /// Open `root`, creating the directory layout when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [RAW_DIR, CORRECTED_DIR, METADATA_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(io_error(&path))?;
        }
        log::debug!("opened store at {}", root.display());
        Ok(Self {
            root,
            catalog_lock: Mutex::new(()),
            flux_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, dir: &str, image_id: &str, ext: &str) -> Result<PathBuf, StoreError> {
        let valid = !image_id.is_empty()
            && !image_id.starts_with('.')
            && !image_id.contains(['/', '\\']);
        if !valid {
            return Err(StoreError::NotFound {
                kind: "valid image id",
                id: image_id.to_string(),
            });
        }
        Ok(self.root.join(dir).join(format!("{image_id}.{ext}")))
    }

    fn read_blob(
        &self,
        dir: &str,
        kind: &'static str,
        image_id: &str,
    ) -> Result<Array2<f64>, StoreError> {
        let path = self.entry_path(dir, image_id, "bin")?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    kind,
                    id: image_id.to_string(),
                })
            }
            Err(e) => return Err(io_error(&path)(e)),
        };
        decode_array(&bytes).map_err(|source| StoreError::Codec {
            id: image_id.to_string(),
            source,
        })
    }

    fn write_blob(
        &self,
        dir: &str,
        image_id: &str,
        image: &ArrayView2<f64>,
    ) -> Result<(), StoreError> {
        let path = self.entry_path(dir, image_id, "bin")?;
        write_atomic(&path, &encode_array(image))
    }

    /// Validate and store an observation header.
    pub fn put_header(
        &self,
        image_id: &str,
        header: &BTreeMap<String, Value>,
    ) -> Result<ImageMetadata, StoreError> {
        let metadata = ImageMetadata::from_header(image_id, header)?;
        let path = self.entry_path(METADATA_DIR, image_id, "json")?;
        let text = serde_json::to_vec_pretty(header).map_err(json_error(&path))?;
        write_atomic(&path, &text)?;
        Ok(metadata)
    }

    fn read_header(&self, path: &Path) -> Result<BTreeMap<String, Value>, StoreError> {
        let text = fs::read(path).map_err(io_error(path))?;
        serde_json::from_slice(&text).map_err(json_error(path))
    }

    fn load_catalog(&self) -> Result<Vec<Aperture>, StoreError> {
        let path = self.root.join(APERTURES_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(json_error(&path)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }
}

/// Write through a sibling temporary file so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))
}

impl BlobStore for DirStore {
    fn get_raw(&self, image_id: &str) -> Result<Array2<f64>, StoreError> {
        self.read_blob(RAW_DIR, "raw image", image_id)
    }

    fn put_raw(&self, image_id: &str, image: &ArrayView2<f64>) -> Result<(), StoreError> {
        self.write_blob(RAW_DIR, image_id, image)
    }

    fn get_corrected(&self, image_id: &str) -> Result<Array2<f64>, StoreError> {
        self.read_blob(CORRECTED_DIR, "corrected image", image_id)
    }

    fn put_corrected(&self, image_id: &str, image: &ArrayView2<f64>) -> Result<(), StoreError> {
        self.write_blob(CORRECTED_DIR, image_id, image)
    }
}

impl MetadataStore for DirStore {
    fn metadata(&self, image_id: &str) -> Result<ImageMetadata, StoreError> {
        let path = self.entry_path(METADATA_DIR, image_id, "json")?;
        if !path.exists() {
            return Err(StoreError::NotFound {
                kind: "metadata",
                id: image_id.to_string(),
            });
        }
        let header = self.read_header(&path)?;
        Ok(ImageMetadata::from_header(image_id, &header)?)
    }

    /// Unreadable headers, or headers without a parseable `DATE-OBS`, cannot
    /// be ordered and are skipped with a warning.
    fn observations_since(&self, since: DateTime<Utc>) -> Result<Vec<ObservationRef>, StoreError> {
        let dir = self.root.join(METADATA_DIR);
        let mut refs = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
            let path = entry.map_err(io_error(&dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(image_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let header = match self.read_header(&path) {
                Ok(header) => header,
                Err(e) => {
                    log::warn!("skipping {image_id}: {e}");
                    continue;
                }
            };
            let observed_at = header
                .get("DATE-OBS")
                .and_then(Value::as_str)
                .and_then(parse_observation_time);
            match observed_at {
                Some(t) if t >= since => refs.push(ObservationRef {
                    observed_at: t,
                    image_id: image_id.to_string(),
                }),
                Some(_) => {}
                None => log::warn!("skipping {image_id}: no readable DATE-OBS"),
            }
        }
        refs.sort();
        Ok(refs)
    }
}

impl ApertureStore for DirStore {
    fn insert_apertures(&self, apertures: Vec<Aperture>) -> Result<(), StoreError> {
        let _guard = self.catalog_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut catalog = self.load_catalog()?;
        let existing: HashSet<&str> = catalog.iter().map(|a| a.label.as_str()).collect();
        check_new_labels(&apertures, |label| existing.contains(label))?;

        catalog.extend(apertures);
        let path = self.root.join(APERTURES_FILE);
        let bytes = serde_json::to_vec(&catalog).map_err(json_error(&path))?;
        write_atomic(&path, &bytes)
    }

    fn apertures_within(&self, footprint: &SkyPolygon) -> Result<Vec<Aperture>, StoreError> {
        let mut inside: Vec<Aperture> = self
            .load_catalog()?
            .into_iter()
            .filter(|a| footprint.contains(&a.centroid))
            .collect();
        inside.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(inside)
    }

    fn aperture(&self, label: &str) -> Result<Option<Aperture>, StoreError> {
        Ok(self.load_catalog()?.into_iter().find(|a| a.label == label))
    }

    fn has_apertures_for(&self, sensor: SensorId) -> Result<bool, StoreError> {
        Ok(self.load_catalog()?.iter().any(|a| a.sensor == sensor))
    }
}

impl FluxStore for DirStore {
    fn append_samples(&self, samples: &[FluxSample]) -> Result<(), StoreError> {
        let catalog = self.load_catalog()?;
        let known: HashSet<&str> = catalog.iter().map(|a| a.label.as_str()).collect();
        if let Some(unknown) = samples
            .iter()
            .find(|s| !known.contains(s.aperture_label.as_str()))
        {
            return Err(StoreError::UnknownLabel(unknown.aperture_label.clone()));
        }

        let path = self.root.join(FLUXES_FILE);
        let mut lines = Vec::new();
        for sample in samples {
            serde_json::to_writer(&mut lines, sample).map_err(json_error(&path))?;
            lines.push(b'\n');
        }

        let _guard = self.flux_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))?;
        file.write_all(&lines).map_err(io_error(&path))
    }

    fn light_curve(&self, label: &str) -> Result<Vec<FluxSample>, StoreError> {
        let path = self.root.join(FLUXES_FILE);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path)(e)),
        };

        let mut curve = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_error(&path))?;
            if line.trim().is_empty() {
                continue;
            }
            let sample: FluxSample = serde_json::from_str(&line).map_err(json_error(&path))?;
            if sample.aperture_label == label {
                curve.push(sample);
            }
        }
        sort_by_time(&mut curve);
        Ok(curve)
    }
}

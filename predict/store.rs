//! # Array Store
//!
//! A small container for named `f64` arrays with scalar attributes. It carries
//! the posterior samples into the engine and the per-scenario predictions out
//! of it.
//!
//! On disk: `MAGIC` (4 bytes), the format version (little-endian `u32`), then
//! a gzip stream holding the `bincode` encoding of the datasets.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ndarray::{Array2, ArrayD, Ix2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"LYAS";
const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read or write array store: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to encode or decode array store: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("'{0}' is not an array store (bad magic bytes).")]
    BadMagic(String),
    #[error(
        "Array store format version {found} is not supported (expected {expected}).",
        expected = FORMAT_VERSION
    )]
    UnsupportedVersion { found: u32 },
    #[error("Array store has no dataset named '{0}'.")]
    MissingDataset(String),
    #[error("Dataset '{name}' has {found} dimensions, expected {expected}.")]
    Dimensionality {
        name: String,
        found: usize,
        expected: usize,
    },
}

/// A scalar attribute attached to a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub values: ArrayD<f64>,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Dataset {
    pub fn new(values: ArrayD<f64>) -> Self {
        Self {
            values,
            attrs: BTreeMap::new(),
        }
    }
}

/// Named datasets, in name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayStore {
    pub datasets: BTreeMap<String, Dataset>,
}

impl ArrayStore {
    pub fn insert(&mut self, name: impl Into<String>, dataset: Dataset) {
        self.datasets.insert(name.into(), dataset);
    }

    pub fn get(&self, name: &str) -> Result<&Dataset, StoreError> {
        self.datasets
            .get(name)
            .ok_or_else(|| StoreError::MissingDataset(name.to_string()))
    }

    /// Removes the dataset `name` and returns it as a matrix.
    pub fn take_matrix(&mut self, name: &str) -> Result<Array2<f64>, StoreError> {
        let dataset = self
            .datasets
            .remove(name)
            .ok_or_else(|| StoreError::MissingDataset(name.to_string()))?;
        let found = dataset.values.ndim();
        dataset
            .values
            .into_dimensionality::<Ix2>()
            .map_err(|_| StoreError::Dimensionality {
                name: name.to_string(),
                found,
                expected: 2,
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        bincode::serialize_into(&mut encoder, self)?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut file = BufReader::new(File::open(path)?);
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(StoreError::BadMagic(path.display().to_string()));
        }
        let mut version = [0u8; 4];
        file.read_exact(&mut version)?;
        let found = u32::from_le_bytes(version);
        if found != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion { found });
        }
        let store = bincode::deserialize_from(GzDecoder::new(file))?;
        Ok(store)
    }
}

//! Bookkeeping for where each spectrum lives on disk and how its arrays are
//! encoded. A loaded image owns one [`Source`] per metadata/binary file pair,
//! and combining images concatenates their sources.

use std::fmt::Display;
use std::path::PathBuf;

use crate::error::EngineError;
use crate::params::{PropertyMap, PropertyMapExt};

/// Location of one external array inside the binary companion file,
/// addressed as a byte offset and an element count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArraySlice {
    pub offset: u64,
    pub length: u64,
}

impl ArraySlice {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn byte_len(&self, value_type: ValueType) -> u64 {
        self.length * value_type.bytes() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Per-spectrum entry of the catalog: grid position, world position and the
/// two array slices. Factors default to 1 and are filled in during
/// initialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumRecord {
    /// Zero-based grid index (x, y, z).
    pub index: [u32; 3],
    /// World position of the pixel center in millimeters.
    pub world: [f64; 3],
    pub mass: ArraySlice,
    pub intensity: ArraySlice,
    /// Normalization factor recorded in the source metadata, if any.
    pub infile_normalization: f64,
    /// Factor for the currently selected normalization strategy.
    pub normalization: f64,
}

impl Default for SpectrumRecord {
    fn default() -> Self {
        Self {
            index: [0; 3],
            world: [0.0; 3],
            mass: ArraySlice::default(),
            intensity: ArraySlice::default(),
            infile_normalization: 1.0,
            normalization: 1.0,
        }
    }
}

/// One metadata/binary file pair and the spectra it contributes. `offset`
/// shifts this source's grid indices into the merged image grid.
#[derive(Debug, Default, Clone)]
pub struct Source {
    pub imzml_path: PathBuf,
    pub ibd_path: PathBuf,
    pub records: Vec<SpectrumRecord>,
    pub offset: [u32; 3],
}

impl Source {
    pub fn spectrum_count(&self) -> usize {
        self.records.len()
    }
}

/// Numeric encoding of an external array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Float32,
    Float64,
    Int32,
    Int64,
}

impl ValueType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "32-bit float" => Some(Self::Float32),
            "64-bit float" => Some(Self::Float64),
            "32-bit integer" => Some(Self::Int32),
            "64-bit integer" => Some(Self::Int64),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Float32 => "32-bit float",
            Self::Float64 => "64-bit float",
            Self::Int32 => "32-bit integer",
            Self::Int64 => "64-bit integer",
        }
    }

    pub fn accession(&self) -> &'static str {
        match self {
            Self::Float32 => crate::params::accession::BIT32_FLOAT,
            Self::Float64 => crate::params::accession::BIT64_FLOAT,
            Self::Int32 => crate::params::accession::BIT32_INTEGER,
            Self::Int64 => crate::params::accession::BIT64_INTEGER,
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 | Self::Int64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage layout crossed with spectrum type. Continuous layouts share one
/// mass axis across all pixels, processed layouts store one per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectrumFormat {
    ContinuousProfile,
    ContinuousCentroid,
    ProcessedProfile,
    ProcessedCentroid,
}

impl SpectrumFormat {
    /// Derive the format from file-level properties collected during the
    /// metadata scan. Missing flags are recovered with a logged default
    /// (continuous storage; profile spectra, or centroid when the storage is
    /// processed), a contradictory storage layout is not.
    pub fn classify(properties: &PropertyMap) -> Result<Self, EngineError> {
        let continuous = properties.has("continuous");
        let processed = properties.has("processed");
        let layout_is_continuous = match (continuous, processed) {
            (true, false) => true,
            (false, true) => false,
            (true, true) => {
                return Err(EngineError::parse(
                    "metadata declares both continuous and processed storage",
                ))
            }
            (false, false) => {
                log::warn!(
                    "metadata declares neither continuous nor processed storage, assuming continuous"
                );
                true
            }
        };

        let profile = properties.has("profile spectrum");
        let centroid = properties.has("centroid spectrum");
        let is_profile = match (profile, centroid) {
            (true, false) => true,
            (false, true) => false,
            (true, true) => {
                log::warn!("metadata declares both profile and centroid spectra, assuming profile");
                true
            }
            (false, false) => {
                // processed storage is only readable as a peak list
                if layout_is_continuous {
                    log::warn!(
                        "metadata declares neither profile nor centroid spectra, assuming profile"
                    );
                } else {
                    log::warn!(
                        "metadata declares neither profile nor centroid spectra, assuming centroid"
                    );
                }
                layout_is_continuous
            }
        };

        Ok(match (layout_is_continuous, is_profile) {
            (true, true) => Self::ContinuousProfile,
            (true, false) => Self::ContinuousCentroid,
            (false, true) => Self::ProcessedProfile,
            (false, false) => Self::ProcessedCentroid,
        })
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::ContinuousProfile | Self::ContinuousCentroid)
    }

    pub fn is_profile(&self) -> bool {
        matches!(self, Self::ContinuousProfile | Self::ProcessedProfile)
    }

    pub fn is_centroid(&self) -> bool {
        !self.is_profile()
    }
}

impl Display for SpectrumFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::ContinuousProfile => "ContinuousProfile",
            Self::ContinuousCentroid => "ContinuousCentroid",
            Self::ProcessedProfile => "ProcessedProfile",
            Self::ProcessedCentroid => "ProcessedCentroid",
        };
        f.write_str(text)
    }
}

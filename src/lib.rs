//! A spectrum image engine for mass spectrometry imaging data stored as an
//! XML metadata document plus a binary array companion (the imzML layout).
//!
//! Loading a file pair scans the metadata, builds the mean/sum/skyline
//! overview spectra and the per-pixel normalization factors, and keeps the
//! binary file on disk; ion image queries then read only the requested mass
//! window. See [`image::SpectrumImage`] for the main entry point.

pub mod catalog;
pub mod config;
pub mod error;
pub(crate) mod exec;
pub mod image;
pub mod io;
pub mod params;
pub mod prelude;
pub mod raster;
pub mod signal;

pub use crate::catalog::{SpectrumFormat, ValueType};
pub use crate::config::EngineConfig;
pub use crate::error::EngineError;
pub use crate::image::{SpectrumImage, StackAxis};
pub use crate::io::{write_image, ExportOptions};
pub use crate::raster::ImageRaster;

pub use mzpeaks::Tolerance;

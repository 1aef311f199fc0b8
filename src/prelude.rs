//! A set of foundational traits and types used throughout the library.

pub use crate::catalog::{SpectrumFormat, ValueType};
pub use crate::config::EngineConfig;
pub use crate::error::EngineError;
pub use crate::image::{SpectrumImage, StackAxis};
pub use crate::io::{write_image, ExportOptions};
pub use crate::params::{PropertyMap, PropertyMapExt, PropertyValue};
pub use crate::raster::{ImageRaster, MaskSource, RasterTarget};
pub use crate::signal::{
    BaselineCorrection, IntensityTransform, NormalizationStrategy, RangePoolingStrategy,
    SmoothingStrategy,
};

pub use mzpeaks::Tolerance;

//! The spectrum image engine.
//!
//! A [`SpectrumImage`] is built from one or more metadata/binary file pairs
//! and holds everything needed to answer image queries: the spectrum catalog,
//! the shared or synthetic mass axis, the mean/sum/skyline overview spectra,
//! an index raster mapping pixels back to spectra, a validity mask and a
//! per-strategy cache of normalization factor rasters. Loading scans the
//! metadata and immediately runs the initialization pass; afterwards image
//! queries only touch the binary file for the requested mass window.
//!
//! ```no_run
//! use mzimage::image::SpectrumImage;
//! use mzimage::raster::ImageRaster;
//! use mzimage::Tolerance;
//!
//! # fn main() -> Result<(), mzimage::EngineError> {
//! let mut image = SpectrumImage::load("sample.imzML")?;
//! let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
//! image.get_image(885.55, Tolerance::PPM(75.0), &mut target)?;
//! # Ok(())
//! # }
//! ```

mod access;
mod dispatch;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use mzpeaks::Tolerance;
use uuid::Uuid;

use crate::catalog::{Source, SpectrumFormat, ValueType};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::io::ibd::IbdFile;
use crate::io::scan::scan_source;
use crate::params::{PropertyMap, PropertyMapExt, PropertyValue};
use crate::raster::{ImageRaster, MaskSource, RasterTarget};
use crate::signal::{
    BaselineCorrection, IntensityTransform, Interval, NormalizationStrategy,
    RangePoolingStrategy, SmoothingStrategy,
};

pub(crate) use access::{subrange, FormatAccess};

bitflags::bitflags! {
    /// Lifecycle state of a [`SpectrumImage`], mutated only from the thread
    /// orchestrating the engine.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ImageFlags: u8 {
        /// The mask raster was supplied by the caller and must survive the
        /// next initialization pass.
        const USE_EXTERNAL_MASK = 1 << 0;
        /// Normalization factors come from a caller-supplied raster instead
        /// of being computed.
        const USE_EXTERNAL_NORMALIZATION = 1 << 1;
        /// The overview spectra and caches reflect the current settings.
        const ACCESS_INITIALIZED = 1 << 2;
        /// An export is running, settings are locked.
        const SAVE_MODE = 1 << 3;
    }
}

/// Grid axis along which [`SpectrumImage::combine`] stacks two images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackAxis {
    X,
    Y,
    Z,
}

impl StackAxis {
    fn index(&self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

impl fmt::Display for StackAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
        };
        f.write_str(text)
    }
}

impl FromStr for StackAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Ok(Self::X),
            "y" => Ok(Self::Y),
            "z" => Ok(Self::Z),
            _ => Err(format!("unknown stack axis '{s}', expected x, y or z")),
        }
    }
}

/// Linear pixel position of a spectrum's grid index, with the owning
/// source's stacking offset applied.
pub(crate) fn linear_pixel(dims: [usize; 3], offset: [u32; 3], index: [u32; 3]) -> usize {
    let x = (index[0] + offset[0]) as usize;
    let y = (index[1] + offset[1]) as usize;
    let z = (index[2] + offset[2]) as usize;
    x + dims[0] * (y + dims[1] * z)
}

/// Shared state behind the engine facade. The access strategy borrows this
/// and the facade alone decides when passes run.
#[derive(Debug)]
pub(crate) struct ImageData {
    pub(crate) format: SpectrumFormat,
    pub(crate) mass_type: ValueType,
    pub(crate) intensity_type: ValueType,
    pub(crate) sources: Vec<Source>,
    pub(crate) properties: PropertyMap,
    pub(crate) config: EngineConfig,
    pub(crate) dims: [usize; 3],
    pub(crate) spacing: [f64; 3],
    pub(crate) origin: [f64; 3],
    pub(crate) flags: ImageFlags,
    pub(crate) mass_axis: Vec<f64>,
    pub(crate) mean_spectrum: Vec<f64>,
    pub(crate) sum_spectrum: Vec<f64>,
    pub(crate) skyline_spectrum: Vec<f64>,
    pub(crate) intervals: Vec<Interval>,
    pub(crate) index_image: ImageRaster<u32>,
    pub(crate) mask_image: ImageRaster<u8>,
    pub(crate) external_normalization: Option<ImageRaster<f64>>,
    pub(crate) normalization_images: IndexMap<NormalizationStrategy, ImageRaster<f64>>,
    pub(crate) normalization_builds: u32,
}

fn value_type_property(properties: &PropertyMap, group: &str) -> Result<ValueType, EngineError> {
    let key = format!("{group} value type");
    let name = properties
        .get_str(&key)
        .ok_or_else(|| EngineError::parse(format!("no value type declared for the {group}")))?;
    ValueType::from_name(name)
        .ok_or_else(|| EngineError::parse(format!("unrecognized {group} value type '{name}'")))
}

impl ImageData {
    pub(crate) fn new(
        sources: Vec<Source>,
        properties: PropertyMap,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let format = SpectrumFormat::classify(&properties)?;
        let mass_group = properties.get_str("mzGroupName").unwrap_or("m/z array").to_string();
        let intensity_group = properties
            .get_str("intensityGroupName")
            .unwrap_or("intensity array")
            .to_string();
        let mass_type = value_type_property(&properties, &mass_group)?;
        let intensity_type = value_type_property(&properties, &intensity_group)?;

        let x = properties
            .get_u32("max count of pixels x")
            .ok_or_else(|| EngineError::parse("the metadata declares no x pixel count"))?
            as usize;
        let y = properties
            .get_u32("max count of pixels y")
            .ok_or_else(|| EngineError::parse("the metadata declares no y pixel count"))?
            as usize;
        let z = properties.get_u32("max count of pixels z").unwrap_or(1).max(1) as usize;
        if x == 0 || y == 0 {
            return Err(EngineError::parse("the metadata declares an empty pixel grid"));
        }
        let dims = [x, y, z];
        let spacing = [
            properties
                .get_f64("pixel size x")
                .ok_or_else(|| EngineError::parse("the metadata declares no x pixel size"))?,
            properties
                .get_f64("pixel size y")
                .ok_or_else(|| EngineError::parse("the metadata declares no y pixel size"))?,
            properties.get_f64("pixel size z").unwrap_or(0.01),
        ];
        let origin = [
            properties.get_f64("absolute position offset x").unwrap_or(0.0),
            properties.get_f64("absolute position offset y").unwrap_or(0.0),
            properties.get_f64("absolute position offset z").unwrap_or(0.0),
        ];

        Ok(Self {
            format,
            mass_type,
            intensity_type,
            sources,
            properties,
            config,
            dims,
            spacing,
            origin,
            flags: ImageFlags::default(),
            mass_axis: Vec::new(),
            mean_spectrum: Vec::new(),
            sum_spectrum: Vec::new(),
            skyline_spectrum: Vec::new(),
            intervals: Vec::new(),
            index_image: ImageRaster::with_geometry(dims, spacing, origin),
            mask_image: ImageRaster::with_geometry(dims, spacing, origin),
            external_normalization: None,
            normalization_images: IndexMap::new(),
            normalization_builds: 0,
        })
    }

    pub(crate) fn spectrum_count(&self) -> usize {
        self.sources.iter().map(|s| s.records.len()).sum()
    }

    pub(crate) fn pixel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }
}

/// A loaded spectrum image: the catalog plus its typed access strategy.
pub struct SpectrumImage {
    data: ImageData,
    access: Box<dyn FormatAccess>,
}

impl fmt::Debug for SpectrumImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumImage")
            .field("format", &self.data.format)
            .field("dims", &self.data.dims)
            .field("spectra", &self.data.spectrum_count())
            .field("flags", &self.data.flags)
            .finish_non_exhaustive()
    }
}

impl SpectrumImage {
    /// Load the metadata/binary pair at `path` (the `.ibd` companion is
    /// located next to it) and run the initialization pass with default
    /// settings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        Self::load_with_config(path, EngineConfig::default())
    }

    /// Like [`SpectrumImage::load`] with explicit settings. Fails up front
    /// on invalid settings, unreadable metadata, a missing binary companion
    /// or a storage layout without a processing path.
    pub fn load_with_config<P: AsRef<Path>>(
        path: P,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let imzml_path = path.as_ref().to_path_buf();
        let ibd_path = imzml_path.with_extension("ibd");
        let mut source = Source {
            imzml_path,
            ibd_path,
            ..Source::default()
        };
        let mut properties = PropertyMap::default();
        scan_source(&mut source, &mut properties)?;
        let data = ImageData::new(vec![source], properties, config)?;
        let mut image = Self::from_data(data)?;
        image.verify_ibd_identifier()?;
        image.initialize()?;
        Ok(image)
    }

    pub(crate) fn from_data(data: ImageData) -> Result<Self, EngineError> {
        let access = dispatch::build_access(data.format, data.mass_type, data.intensity_type)?;
        Ok(Self { data, access })
    }

    /// Cross-check the unique identifier stored in the binary header against
    /// the one declared in the metadata. A mismatch is logged, not fatal;
    /// a missing binary file is.
    fn verify_ibd_identifier(&self) -> Result<(), EngineError> {
        let Some(source) = self.data.sources.first() else {
            return Ok(());
        };
        let mut ibd = IbdFile::open(&source.ibd_path)?;
        let stored = ibd.read_uuid()?;
        if let Some(declared) = self.data.properties.get_str("universally unique identifier") {
            let trimmed = declared.trim_matches(|c| c == '{' || c == '}');
            match Uuid::parse_str(trimmed) {
                Ok(expected) if expected == stored => {}
                Ok(expected) => log::warn!(
                    "unique identifier mismatch: metadata declares {expected}, binary file stores {stored}"
                ),
                Err(_) => log::warn!("the metadata declares an unparseable unique identifier: {declared}"),
            }
        }
        Ok(())
    }

    /// Run the format-specific overview pass plus the common epilogue:
    /// rebuild the index raster and (unless externally supplied) the mask,
    /// record the valid pixel count and consume the one-shot external flags.
    /// A no-op while the image is already initialized.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.data.flags.contains(ImageFlags::ACCESS_INITIALIZED) {
            return Ok(());
        }
        self.data.config.validate()?;
        self.access.initialize(&mut self.data)?;
        self.rebuild_index_and_mask();
        let total = self.data.spectrum_count() as u32;
        self.data.properties.set("number of valid pixels", total);
        self.data
            .flags
            .remove(ImageFlags::USE_EXTERNAL_MASK | ImageFlags::USE_EXTERNAL_NORMALIZATION);
        self.data.flags.insert(ImageFlags::ACCESS_INITIALIZED);
        Ok(())
    }

    fn rebuild_index_and_mask(&mut self) {
        let ImageData {
            sources,
            dims,
            spacing,
            origin,
            flags,
            index_image,
            mask_image,
            ..
        } = &mut self.data;
        let external_mask = flags.contains(ImageFlags::USE_EXTERNAL_MASK);
        *index_image = ImageRaster::with_geometry(*dims, *spacing, *origin);
        if !external_mask {
            *mask_image = ImageRaster::with_geometry(*dims, *spacing, *origin);
        }
        let mut skipped = 0usize;
        for source in sources.iter() {
            for (position, record) in source.records.iter().enumerate() {
                let linear = linear_pixel(*dims, source.offset, record.index);
                match index_image.as_mut_slice().get_mut(linear) {
                    Some(cell) => *cell = position as u32,
                    None => {
                        skipped += 1;
                        continue;
                    }
                }
                if !external_mask {
                    mask_image.as_mut_slice()[linear] = 1;
                }
            }
        }
        if skipped > 0 {
            log::warn!("{skipped} spectra fall outside the image grid and were not indexed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.data.flags.contains(ImageFlags::ACCESS_INITIALIZED)
    }

    pub fn format(&self) -> SpectrumFormat {
        self.data.format
    }

    pub fn mass_value_type(&self) -> ValueType {
        self.data.mass_type
    }

    pub fn intensity_value_type(&self) -> ValueType {
        self.data.intensity_type
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.data.properties
    }

    pub fn config(&self) -> &EngineConfig {
        &self.data.config
    }

    pub fn dims(&self) -> [usize; 3] {
        self.data.dims
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.data.spacing
    }

    pub fn origin(&self) -> [f64; 3] {
        self.data.origin
    }

    pub fn sources(&self) -> &[Source] {
        &self.data.sources
    }

    pub fn spectrum_count(&self) -> usize {
        self.data.spectrum_count()
    }

    /// The shared mass axis of continuous data, or the synthetic binned axis
    /// of processed centroid data. Empty before initialization.
    pub fn mass_axis(&self) -> &[f64] {
        &self.data.mass_axis
    }

    pub fn mean_spectrum(&self) -> &[f64] {
        &self.data.mean_spectrum
    }

    pub fn sum_spectrum(&self) -> &[f64] {
        &self.data.sum_spectrum
    }

    pub fn skyline_spectrum(&self) -> &[f64] {
        &self.data.skyline_spectrum
    }

    /// Per-axis-entry accumulators of centroid data, the export basis for
    /// centroid images. Empty for profile data.
    pub fn intervals(&self) -> &[Interval] {
        &self.data.intervals
    }

    /// Raster mapping every populated pixel to its spectrum's position in
    /// the owning source's record array.
    pub fn index_image(&self) -> &ImageRaster<u32> {
        &self.data.index_image
    }

    pub fn mask_image(&self) -> &ImageRaster<u8> {
        &self.data.mask_image
    }

    pub(crate) fn data(&self) -> &ImageData {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut ImageData {
        &mut self.data
    }

    pub(crate) fn format_access(&self) -> &dyn FormatAccess {
        self.access.as_ref()
    }

    /// Render the pooled ion image for the window `tolerance` around
    /// `center` into `target`, using the image's own validity mask.
    pub fn get_image(
        &mut self,
        center: f64,
        tolerance: Tolerance,
        target: &mut dyn RasterTarget,
    ) -> Result<(), EngineError> {
        self.get_image_inner(center, tolerance, None, target)
    }

    /// Like [`SpectrumImage::get_image`] with a caller-supplied validity
    /// mask overriding the image's own.
    pub fn get_image_masked(
        &mut self,
        center: f64,
        tolerance: Tolerance,
        mask: &dyn MaskSource,
        target: &mut dyn RasterTarget,
    ) -> Result<(), EngineError> {
        self.get_image_inner(center, tolerance, Some(mask), target)
    }

    fn get_image_inner(
        &mut self,
        center: f64,
        tolerance: Tolerance,
        mask: Option<&dyn MaskSource>,
        target: &mut dyn RasterTarget,
    ) -> Result<(), EngineError> {
        self.initialize()?;
        self.ensure_normalization_built(self.data.config.normalization)?;
        let expected = self.data.pixel_count();
        if target.pixel_count() != expected {
            return Err(EngineError::configuration(format!(
                "the target raster holds {} pixels, the image grid holds {expected}",
                target.pixel_count()
            )));
        }
        let (lower, upper) = tolerance.bounds(center);
        let half_width = (upper - lower) * 0.5;
        target.clear();
        self.data.properties.set("x_range_center", center);
        self.data.properties.set("x_range_tol", half_width);
        let mask: &dyn MaskSource = match mask {
            Some(mask) => mask,
            None => &self.data.mask_image,
        };
        self.access.ion_image(&self.data, center, half_width, mask, target)?;
        target.annotate("x_range_center", PropertyValue::Double(center));
        target.annotate("x_range_tol", PropertyValue::Double(half_width));
        Ok(())
    }

    /// Factor raster for `strategy`, built on first request and cached. The
    /// external strategy hands back the installed raster untouched.
    pub fn get_or_build_normalization_image(
        &mut self,
        strategy: NormalizationStrategy,
    ) -> Result<&ImageRaster<f64>, EngineError> {
        self.initialize()?;
        self.ensure_normalization_built(strategy)?;
        self.data.normalization_images.get(&strategy).ok_or_else(|| {
            EngineError::configuration(format!("no {strategy} normalization image has been built"))
        })
    }

    fn ensure_normalization_built(
        &mut self,
        strategy: NormalizationStrategy,
    ) -> Result<(), EngineError> {
        if self.data.normalization_images.contains_key(&strategy) {
            return Ok(());
        }
        let raster = if strategy == NormalizationStrategy::External {
            self.data.external_normalization.clone().ok_or_else(|| {
                EngineError::configuration(
                    "external normalization requested but no factor image is installed",
                )
            })?
        } else {
            self.access.build_normalization(&mut self.data, strategy)?
        };
        self.data.normalization_images.insert(strategy, raster);
        self.data.normalization_builds += 1;
        Ok(())
    }

    /// Install a caller-supplied validity mask, kept across the next
    /// initialization pass.
    pub fn set_external_mask(&mut self, mask: ImageRaster<u8>) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        if mask.dims() != self.data.dims {
            return Err(EngineError::configuration(format!(
                "mask dimensions {:?} do not match the image grid {:?}",
                mask.dims(),
                self.data.dims
            )));
        }
        self.data.mask_image = mask;
        self.data.flags.insert(ImageFlags::USE_EXTERNAL_MASK);
        self.data.flags.remove(ImageFlags::ACCESS_INITIALIZED);
        Ok(())
    }

    /// Install a caller-supplied normalization factor raster. It is consulted
    /// by the next initialization pass and backs the external strategy.
    pub fn set_external_normalization(
        &mut self,
        factors: ImageRaster<f64>,
    ) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        if factors.dims() != self.data.dims {
            return Err(EngineError::configuration(format!(
                "factor image dimensions {:?} do not match the image grid {:?}",
                factors.dims(),
                self.data.dims
            )));
        }
        self.data.external_normalization = Some(factors);
        self.data
            .normalization_images
            .shift_remove(&NormalizationStrategy::External);
        self.data.flags.insert(ImageFlags::USE_EXTERNAL_NORMALIZATION);
        self.data.flags.remove(ImageFlags::ACCESS_INITIALIZED);
        Ok(())
    }

    pub fn set_normalization(&mut self, strategy: NormalizationStrategy) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        if self.data.config.normalization != strategy {
            self.data.config.normalization = strategy;
            self.data.flags.remove(ImageFlags::ACCESS_INITIALIZED);
        }
        Ok(())
    }

    pub fn set_smoothing(
        &mut self,
        strategy: SmoothingStrategy,
        half_window: usize,
    ) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        if self.data.config.smoothing != strategy
            || self.data.config.smoothing_half_window != half_window
        {
            self.data.config.smoothing = strategy;
            self.data.config.smoothing_half_window = half_window;
            self.data.flags.remove(ImageFlags::ACCESS_INITIALIZED);
        }
        Ok(())
    }

    pub fn set_baseline(
        &mut self,
        strategy: BaselineCorrection,
        half_window: usize,
    ) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        if self.data.config.baseline != strategy
            || self.data.config.baseline_half_window != half_window
        {
            self.data.config.baseline = strategy;
            self.data.config.baseline_half_window = half_window;
            self.data.flags.remove(ImageFlags::ACCESS_INITIALIZED);
        }
        Ok(())
    }

    pub fn set_transform(&mut self, transform: IntensityTransform) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        if self.data.config.transform != transform {
            self.data.config.transform = transform;
            self.data.flags.remove(ImageFlags::ACCESS_INITIALIZED);
        }
        Ok(())
    }

    /// Pooling applies at query time only, no caches are invalidated.
    pub fn set_pooling(&mut self, pooling: RangePoolingStrategy) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        self.data.config.pooling = pooling;
        Ok(())
    }

    /// The query window width, applied at query time only.
    pub fn set_tolerance(&mut self, tolerance: Tolerance) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        if tolerance.tol() <= 0.0 {
            return Err(EngineError::configuration(format!(
                "tolerance must be positive, got {tolerance}"
            )));
        }
        self.data.config.tolerance = tolerance;
        Ok(())
    }

    pub fn set_threads(&mut self, threads: usize) -> Result<(), EngineError> {
        self.guard_save_mode()?;
        if threads == 0 {
            return Err(EngineError::configuration("thread count must be non-zero"));
        }
        self.data.config.threads = threads;
        Ok(())
    }

    fn guard_save_mode(&self) -> Result<(), EngineError> {
        if self.data.flags.contains(ImageFlags::SAVE_MODE) {
            return Err(EngineError::configuration(
                "the image is being exported, settings are locked",
            ));
        }
        Ok(())
    }

    pub(crate) fn begin_save(&mut self) -> Result<(), EngineError> {
        if self.data.flags.contains(ImageFlags::SAVE_MODE) {
            return Err(EngineError::configuration(
                "an export of this image is already running",
            ));
        }
        self.data.flags.insert(ImageFlags::SAVE_MODE);
        Ok(())
    }

    pub(crate) fn end_save(&mut self) {
        self.data.flags.remove(ImageFlags::SAVE_MODE);
    }

    fn locate(&self, index: usize) -> Result<(usize, usize), EngineError> {
        let mut remaining = index;
        for (position, source) in self.data.sources.iter().enumerate() {
            if remaining < source.records.len() {
                return Ok((position, remaining));
            }
            remaining -= source.records.len();
        }
        Err(EngineError::configuration(format!(
            "spectrum index {index} out of range, the image holds {} spectra",
            self.data.spectrum_count()
        )))
    }

    /// One spectrum exactly as stored: its mass positions and raw
    /// intensities.
    pub fn spectrum(&self, index: usize) -> Result<(Vec<f64>, Vec<f64>), EngineError> {
        let (source, local) = self.locate(index)?;
        let masses = self.access.spectrum_mass_axis(&self.data, source, local)?;
        let intensities = self.access.raw_intensities(&self.data, source, local)?;
        Ok((masses, intensities))
    }

    /// One spectrum's intensities after the configured pipeline stages:
    /// normalize, smooth, baseline-correct, transform.
    pub fn intensities(&self, index: usize) -> Result<Vec<f64>, EngineError> {
        let (source, local) = self.locate(index)?;
        self.access.processed_intensities(&self.data, source, local)
    }

    /// One spectrum's mass positions.
    pub fn spectrum_mass_axis(&self, index: usize) -> Result<Vec<f64>, EngineError> {
        let (source, local) = self.locate(index)?;
        self.access.spectrum_mass_axis(&self.data, source, local)
    }

    /// Recompute the binary companion's whole-file SHA-1 and compare it to
    /// the checksum declared in the metadata. A file declaring no checksum
    /// validates trivially.
    pub fn validate_checksum(&self) -> Result<bool, EngineError> {
        let Some(source) = self.data.sources.first() else {
            return Ok(true);
        };
        let Some(declared) = self.data.properties.get_str("ibd SHA-1") else {
            log::debug!("the metadata declares no checksum, skipping validation");
            return Ok(true);
        };
        let declared = declared.to_ascii_lowercase();
        let mut ibd = IbdFile::open(&source.ibd_path)?;
        let actual = ibd.checksum()?;
        if actual != declared {
            log::warn!("checksum mismatch: metadata declares {declared}, binary file hashes to {actual}");
        }
        Ok(actual == declared)
    }

    /// Stack two initialized continuous images along `axis` into one image
    /// whose sources address the original binary files. The stacked
    /// dimension is the sum of the inputs', the others their maximum; the
    /// second image's pixels are offset by the first's extent. Inputs must
    /// agree on element types, mass axis and pixel spacing.
    pub fn combine(
        first: &SpectrumImage,
        second: &SpectrumImage,
        axis: StackAxis,
    ) -> Result<SpectrumImage, EngineError> {
        if !first.is_initialized() || !second.is_initialized() {
            return Err(EngineError::configuration(
                "combining requires both images to be initialized",
            ));
        }
        if !first.data.format.is_continuous() || !second.data.format.is_continuous() {
            return Err(EngineError::unsupported(
                "only continuous images can be combined",
            ));
        }
        if first.data.mass_type != second.data.mass_type
            || first.data.intensity_type != second.data.intensity_type
        {
            return Err(EngineError::unsupported(format!(
                "cannot combine images with different value types ({}/{} vs {}/{})",
                first.data.mass_type,
                first.data.intensity_type,
                second.data.mass_type,
                second.data.intensity_type
            )));
        }
        if first.data.mass_axis != second.data.mass_axis {
            return Err(EngineError::unsupported(
                "cannot combine images with different mass axes",
            ));
        }
        let tolerance = 1e-4;
        if first
            .data
            .spacing
            .iter()
            .zip(&second.data.spacing)
            .any(|(a, b)| (a - b).abs() > tolerance)
        {
            return Err(EngineError::unsupported(
                "cannot combine images with different pixel sizes",
            ));
        }

        let stacked = axis.index();
        let mut dims = [0usize; 3];
        for (position, extent) in dims.iter_mut().enumerate() {
            *extent = if position == stacked {
                first.data.dims[position] + second.data.dims[position]
            } else {
                first.data.dims[position].max(second.data.dims[position])
            };
        }

        let mut sources = first.data.sources.clone();
        let shift = first.data.dims[stacked] as u32;
        for source in &second.data.sources {
            let mut source = source.clone();
            source.offset[stacked] += shift;
            sources.push(source);
        }
        let total: usize = sources.iter().map(|s| s.records.len()).sum();

        let mut properties = first.data.properties.clone();
        properties.set("max count of pixels x", dims[0] as u32);
        properties.set("max count of pixels y", dims[1] as u32);
        properties.set("max count of pixels z", dims[2] as u32);
        properties.set("absolute position offset x", 0.0);
        properties.set("absolute position offset y", 0.0);
        properties.set("absolute position offset z", 0.0);
        properties.set("number of measurements", total as u32);
        properties.shift_remove("processed");
        properties.set("continuous", true);

        let data = ImageData::new(sources, properties, first.data.config)?;
        let mut image = SpectrumImage::from_data(data)?;
        image.initialize()?;
        Ok(image)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    const UUID_TEXT: &str = "{11111111-2222-3333-4444-555555555555}";
    const UUID_BYTES: [u8; 16] = [
        0x11, 0x11, 0x11, 0x11, 0x22, 0x22, 0x33, 0x33, 0x44, 0x44, 0x55, 0x55, 0x55, 0x55,
        0x55, 0x55,
    ];

    struct Fixture {
        _dir: tempfile::TempDir,
        path: PathBuf,
    }

    impl Fixture {
        fn ibd_path(&self) -> PathBuf {
            self.path.with_extension("ibd")
        }
    }

    fn image_document(
        dims: [u32; 2],
        continuous: bool,
        centroid: bool,
        checksum: &str,
        spectra: &[String],
    ) -> String {
        let layout_param = if continuous {
            r#"<cvParam cvRef="IMS" accession="IMS:1000030" name="continuous" value=""/>"#
        } else {
            r#"<cvParam cvRef="IMS" accession="IMS:1000031" name="processed" value=""/>"#
        };
        let type_param = if centroid {
            r#"<cvParam cvRef="MS" accession="MS:1000127" name="centroid spectrum" value=""/>"#
        } else {
            r#"<cvParam cvRef="MS" accession="MS:1000128" name="profile spectrum" value=""/>"#
        };
        let mut body = format!(
            r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<mzML xmlns="http://psi.hupo.org/ms/mzml" version="1.1">
  <fileDescription>
    <fileContent>
      {layout_param}
      {type_param}
      <cvParam cvRef="IMS" accession="IMS:1000080" name="universally unique identifier" value="{uuid}"/>
      <cvParam cvRef="IMS" accession="IMS:1000091" name="ibd SHA-1" value="{checksum}"/>
    </fileContent>
  </fileDescription>
  <referenceableParamGroupList count="2">
    <referenceableParamGroup id="mzArray">
      <cvParam cvRef="MS" accession="MS:1000514" name="m/z array" value=""/>
      <cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>
    </referenceableParamGroup>
    <referenceableParamGroup id="intensityArray">
      <cvParam cvRef="MS" accession="MS:1000515" name="intensity array" value=""/>
      <cvParam cvRef="MS" accession="MS:1000521" name="32-bit float" value=""/>
    </referenceableParamGroup>
  </referenceableParamGroupList>
  <scanSettingsList count="1">
    <scanSettings id="scanSettings0">
      <cvParam cvRef="IMS" accession="IMS:1000042" name="max count of pixels x" value="{nx}"/>
      <cvParam cvRef="IMS" accession="IMS:1000043" name="max count of pixels y" value="{ny}"/>
      <cvParam cvRef="IMS" accession="IMS:1000046" name="pixel size x" value="2500"/>
    </scanSettings>
  </scanSettingsList>
  <run id="run0">
    <spectrumList count="{count}">
"#,
            uuid = UUID_TEXT,
            nx = dims[0],
            ny = dims[1],
            count = spectra.len(),
        );
        for entry in spectra {
            body.push_str(entry);
        }
        body.push_str("    </spectrumList>\n  </run>\n</mzML>\n");
        body
    }

    fn spectrum_xml(
        index: usize,
        x: u32,
        y: u32,
        tic: f64,
        mass: (u64, u64),
        intensity: (u64, u64),
    ) -> String {
        format!(
            r#"      <spectrum index="{index}" id="spectrum={index}" defaultArrayLength="{len}">
        <cvParam cvRef="MS" accession="MS:1000285" name="total ion current" value="{tic}"/>
        <scanList count="1">
          <scan>
            <cvParam cvRef="IMS" accession="IMS:1000050" name="position x" value="{x}"/>
            <cvParam cvRef="IMS" accession="IMS:1000051" name="position y" value="{y}"/>
          </scan>
        </scanList>
        <binaryDataArrayList count="2">
          <binaryDataArray encodedLength="{mass_bytes}">
            <referenceableParamGroupRef ref="mzArray"/>
            <cvParam cvRef="IMS" accession="IMS:1000102" name="external offset" value="{mass_offset}"/>
            <cvParam cvRef="IMS" accession="IMS:1000103" name="external array length" value="{mass_len}"/>
            <binary/>
          </binaryDataArray>
          <binaryDataArray encodedLength="{int_bytes}">
            <referenceableParamGroupRef ref="intensityArray"/>
            <cvParam cvRef="IMS" accession="IMS:1000102" name="external offset" value="{int_offset}"/>
            <cvParam cvRef="IMS" accession="IMS:1000103" name="external array length" value="{int_len}"/>
            <binary/>
          </binaryDataArray>
        </binaryDataArrayList>
      </spectrum>
"#,
            len = mass.1,
            mass_offset = mass.0,
            mass_len = mass.1,
            mass_bytes = mass.1 * 8,
            int_offset = intensity.0,
            int_len = intensity.1,
            int_bytes = intensity.1 * 4,
        )
    }

    fn write_fixture(
        dims: [u32; 2],
        continuous: bool,
        centroid: bool,
        ibd: &[u8],
        spectra: &[String],
    ) -> Fixture {
        let checksum = {
            use sha1::{Digest, Sha1};
            let mut hasher = Sha1::new();
            hasher.update(ibd);
            base16ct::lower::encode_string(&hasher.finalize())
        };
        let document = image_document(dims, continuous, centroid, &checksum, spectra);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.imzML");
        std::fs::write(&path, document).unwrap();
        std::fs::write(dir.path().join("image.ibd"), ibd).unwrap();
        Fixture { _dir: dir, path }
    }

    fn continuous_fixture(
        dims: [u32; 2],
        centroid: bool,
        axis: &[f64],
        spectra: &[(u32, u32, f64, Vec<f32>)],
    ) -> Fixture {
        let mut ibd = UUID_BYTES.to_vec();
        for mass in axis {
            ibd.extend_from_slice(&mass.to_le_bytes());
        }
        for (_, _, _, intensities) in spectra {
            assert_eq!(intensities.len(), axis.len());
            for value in intensities {
                ibd.extend_from_slice(&value.to_le_bytes());
            }
        }
        let mass_bytes = (axis.len() * 8) as u64;
        let entries: Vec<String> = spectra
            .iter()
            .enumerate()
            .map(|(index, (x, y, tic, intensities))| {
                let int_offset = 16 + mass_bytes + (index * intensities.len() * 4) as u64;
                spectrum_xml(
                    index,
                    *x,
                    *y,
                    *tic,
                    (16, axis.len() as u64),
                    (int_offset, intensities.len() as u64),
                )
            })
            .collect();
        write_fixture(dims, true, centroid, &ibd, &entries)
    }

    fn processed_fixture(
        dims: [u32; 2],
        centroid: bool,
        spectra: &[(u32, u32, Vec<f64>, Vec<f32>)],
    ) -> Fixture {
        let mut ibd = UUID_BYTES.to_vec();
        let mut entries = Vec::new();
        for (index, (x, y, masses, intensities)) in spectra.iter().enumerate() {
            assert_eq!(masses.len(), intensities.len());
            let mass_offset = ibd.len() as u64;
            for mass in masses {
                ibd.extend_from_slice(&mass.to_le_bytes());
            }
            let int_offset = ibd.len() as u64;
            for value in intensities {
                ibd.extend_from_slice(&value.to_le_bytes());
            }
            entries.push(spectrum_xml(
                index,
                *x,
                *y,
                1.0,
                (mass_offset, masses.len() as u64),
                (int_offset, intensities.len() as u64),
            ));
        }
        write_fixture(dims, false, centroid, &ibd, &entries)
    }

    fn grid_fixture() -> Fixture {
        continuous_fixture(
            [2, 2],
            false,
            &[100.0, 200.0, 300.0],
            &[
                (1, 1, 0.0, vec![1.0, 2.0, 3.0]),
                (2, 1, 0.0, vec![4.0, 5.0, 6.0]),
                (1, 2, 0.0, vec![7.0, 8.0, 9.0]),
                (2, 2, 0.0, vec![10.0, 11.0, 12.0]),
            ],
        )
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{a} != {e}");
        }
    }

    #[test_log::test]
    fn test_load_builds_profile_overviews() {
        let fixture = grid_fixture();
        let image = SpectrumImage::load(&fixture.path).unwrap();

        assert_eq!(image.format(), SpectrumFormat::ContinuousProfile);
        assert_eq!(image.mass_value_type(), ValueType::Float64);
        assert_eq!(image.intensity_value_type(), ValueType::Float32);
        assert_eq!(image.dims(), [2, 2, 1]);
        assert!((image.spacing()[0] - 0.05).abs() < 1e-12);
        assert_eq!(image.spectrum_count(), 4);
        assert!(image.is_initialized());

        assert_eq!(image.mass_axis(), &[100.0, 200.0, 300.0]);
        assert_eq!(image.sum_spectrum(), &[22.0, 26.0, 30.0]);
        assert_eq!(image.skyline_spectrum(), &[10.0, 11.0, 12.0]);
        assert_eq!(image.mean_spectrum(), &[5.5, 6.5, 7.5]);

        assert_eq!(image.properties().get_u32("number of valid pixels"), Some(4));
        assert_eq!(image.properties().get_u32("spectral depth"), Some(3));
        assert_eq!(image.properties().get_f64("x_min"), Some(100.0));
        assert_eq!(image.properties().get_f64("x_max"), Some(300.0));

        assert_eq!(image.index_image().as_slice(), &[0, 1, 2, 3]);
        assert_eq!(image.mask_image().as_slice(), &[1, 1, 1, 1]);
    }

    #[test_log::test]
    fn test_ion_image_window_and_annotations() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());

        image.get_image(200.0, Tolerance::Da(50.0), &mut target).unwrap();
        assert_eq!(target.as_slice(), &[2.0, 5.0, 8.0, 11.0]);
        assert_eq!(target.annotations().get_f64("x_range_center"), Some(200.0));
        assert_eq!(target.annotations().get_f64("x_range_tol"), Some(50.0));
        assert_eq!(image.properties().get_f64("x_range_center"), Some(200.0));
    }

    #[test_log::test]
    fn test_ion_image_sum_pooling_over_full_axis() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        image.set_pooling(RangePoolingStrategy::Sum).unwrap();
        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());

        image.get_image(200.0, Tolerance::Da(150.0), &mut target).unwrap();
        assert_eq!(target.as_slice(), &[6.0, 15.0, 24.0, 33.0]);
    }

    #[test_log::test]
    fn test_ion_image_respects_mask() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        let mut mask: ImageRaster<u8> = ImageRaster::new(image.dims());
        mask.as_mut_slice().copy_from_slice(&[0, 1, 1, 1]);
        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());

        image
            .get_image_masked(200.0, Tolerance::Da(50.0), &mask, &mut target)
            .unwrap();
        assert_eq!(target.as_slice(), &[0.0, 5.0, 8.0, 11.0]);
    }

    #[test_log::test]
    fn test_empty_window_yields_zero() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
        target.fill(9.0);

        image.get_image(1000.0, Tolerance::Da(1.0), &mut target).unwrap();
        assert_eq!(target.as_slice(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test_log::test]
    fn test_mismatched_target_raster_is_rejected() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        let mut target: ImageRaster<f64> = ImageRaster::new([3, 3, 1]);
        let result = image.get_image(200.0, Tolerance::Da(50.0), &mut target);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test_log::test]
    fn test_normalization_cache_idempotence() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        // the initialization pass stores the configured strategy's raster
        assert_eq!(image.data.normalization_builds, 1);

        let first = image
            .get_or_build_normalization_image(NormalizationStrategy::TotalIonCurrent)
            .unwrap()
            .clone();
        assert_eq!(image.data.normalization_builds, 2);
        let second = image
            .get_or_build_normalization_image(NormalizationStrategy::TotalIonCurrent)
            .unwrap()
            .clone();
        assert_eq!(image.data.normalization_builds, 2);
        assert_eq!(first, second);

        // trapezoid over the axis [100, 200, 300]
        assert_eq!(first.as_slice(), &[400.0, 1000.0, 1600.0, 2200.0]);
    }

    #[test_log::test]
    fn test_sum_normalization_scales_ion_image() {
        let fixture = grid_fixture();
        let config = EngineConfig {
            normalization: NormalizationStrategy::Sum,
            ..EngineConfig::default()
        };
        let mut image = SpectrumImage::load_with_config(&fixture.path, config).unwrap();

        let factors: Vec<f64> = image.sources()[0]
            .records
            .iter()
            .map(|r| r.normalization)
            .collect();
        assert_close(&factors, &[6.0, 15.0, 24.0, 33.0]);

        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
        image.get_image(200.0, Tolerance::Da(50.0), &mut target).unwrap();
        assert_close(target.as_slice(), &[2.0 / 6.0, 5.0 / 15.0, 8.0 / 24.0, 11.0 / 33.0]);
    }

    #[test_log::test]
    fn test_in_file_normalization_uses_declared_factors() {
        let fixture = continuous_fixture(
            [2, 1],
            false,
            &[100.0, 200.0],
            &[(1, 1, 4.0, vec![8.0, 12.0]), (2, 1, 2.0, vec![8.0, 12.0])],
        );
        let config = EngineConfig {
            normalization: NormalizationStrategy::InFile,
            ..EngineConfig::default()
        };
        let mut image = SpectrumImage::load_with_config(&fixture.path, config).unwrap();
        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
        image.get_image(100.0, Tolerance::Da(10.0), &mut target).unwrap();
        assert_close(target.as_slice(), &[2.0, 4.0]);
    }

    #[test_log::test]
    fn test_thread_counts_agree() {
        let fixture = continuous_fixture(
            [5, 1],
            false,
            &[100.0, 200.0, 300.0, 400.0],
            &[
                (1, 1, 0.0, vec![1.5, 0.25, 3.0, 7.0]),
                (2, 1, 0.0, vec![2.5, 1.25, 0.5, 6.0]),
                (3, 1, 0.0, vec![0.5, 9.25, 1.0, 5.0]),
                (4, 1, 0.0, vec![4.5, 2.25, 2.0, 4.0]),
                (5, 1, 0.0, vec![3.5, 4.25, 8.0, 3.0]),
            ],
        );
        let serial = SpectrumImage::load_with_config(
            &fixture.path,
            EngineConfig {
                threads: 1,
                ..EngineConfig::default()
            },
        )
        .unwrap();
        let parallel = SpectrumImage::load_with_config(
            &fixture.path,
            EngineConfig {
                threads: 4,
                ..EngineConfig::default()
            },
        )
        .unwrap();

        assert_close(serial.sum_spectrum(), parallel.sum_spectrum());
        assert_close(serial.mean_spectrum(), parallel.mean_spectrum());
        assert_close(serial.skyline_spectrum(), parallel.skyline_spectrum());
    }

    #[test_log::test]
    fn test_continuous_centroid_overview() {
        let fixture = continuous_fixture(
            [3, 1],
            true,
            &[100.0, 200.0, 300.0],
            &[
                (1, 1, 0.0, vec![10.0, 20.0, 30.0]),
                (2, 1, 0.0, vec![5.0, 15.0, 25.0]),
                (3, 1, 0.0, vec![0.0, 0.0, 0.0]),
            ],
        );
        let image = SpectrumImage::load(&fixture.path).unwrap();

        assert_eq!(image.format(), SpectrumFormat::ContinuousCentroid);
        assert_eq!(image.skyline_spectrum(), &[10.0, 20.0, 30.0]);
        assert_eq!(image.sum_spectrum(), &[15.0, 35.0, 55.0]);
        assert_close(image.mean_spectrum(), &[5.0, 35.0 / 3.0, 55.0 / 3.0]);
        assert_eq!(image.intervals().len(), 3);
        assert_eq!(image.intervals()[0].x.mean(), 100.0);
        assert_eq!(image.intervals()[1].y.count(), 3);
    }

    #[test_log::test]
    fn test_processed_centroid_binning() {
        let fixture = processed_fixture(
            [2, 1],
            true,
            &[
                (1, 1, vec![100.0, 150.0], vec![10.0, 6.0]),
                (2, 1, vec![100.0, 300.0], vec![4.0, 8.0]),
            ],
        );
        let config = EngineConfig {
            overview_bins: 2,
            ..EngineConfig::default()
        };
        let image = SpectrumImage::load_with_config(&fixture.path, config).unwrap();

        assert_eq!(image.format(), SpectrumFormat::ProcessedCentroid);
        assert_close(image.mass_axis(), &[350.0 / 3.0, 300.0]);
        assert_eq!(image.sum_spectrum(), &[20.0, 8.0]);
        assert_eq!(image.skyline_spectrum(), &[10.0, 8.0]);
        assert_close(image.mean_spectrum(), &[20.0 / 3.0, 8.0]);
        assert_eq!(image.properties().get_u32("spectral depth"), Some(2));

        // each spectrum keeps its own mass array
        let (masses, intensities) = image.spectrum(1).unwrap();
        assert_eq!(masses, vec![100.0, 300.0]);
        assert_eq!(intensities, vec![4.0, 8.0]);

        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
        let mut image = image;
        image.get_image(100.0, Tolerance::Da(10.0), &mut target).unwrap();
        assert_eq!(target.as_slice(), &[10.0, 4.0]);
    }

    #[test_log::test]
    fn test_processed_profile_is_rejected() {
        let fixture = processed_fixture(
            [1, 1],
            false,
            &[(1, 1, vec![100.0, 200.0], vec![1.0, 2.0])],
        );
        let result = SpectrumImage::load(&fixture.path);
        assert!(matches!(result, Err(EngineError::UnsupportedFormat(_))));
    }

    #[test_log::test]
    fn test_integer_intensities_are_rejected() {
        let fixture = grid_fixture();
        let body = std::fs::read_to_string(&fixture.path).unwrap().replace(
            r#"accession="MS:1000521" name="32-bit float""#,
            r#"accession="MS:1000519" name="32-bit integer""#,
        );
        std::fs::write(&fixture.path, body).unwrap();
        let result = SpectrumImage::load(&fixture.path);
        assert!(matches!(result, Err(EngineError::UnsupportedFormat(_))));
    }

    #[test_log::test]
    fn test_missing_binary_companion() {
        let fixture = grid_fixture();
        std::fs::remove_file(fixture.ibd_path()).unwrap();
        let result = SpectrumImage::load(&fixture.path);
        assert!(matches!(result, Err(EngineError::FileNotFound(_))));
    }

    #[test_log::test]
    fn test_checksum_validation() {
        let fixture = grid_fixture();
        let image = SpectrumImage::load(&fixture.path).unwrap();
        assert!(image.validate_checksum().unwrap());

        let mut bytes = std::fs::read(fixture.ibd_path()).unwrap();
        bytes.push(0);
        std::fs::write(fixture.ibd_path(), bytes).unwrap();
        assert!(!image.validate_checksum().unwrap());
    }

    #[test_log::test]
    fn test_external_normalization_raster() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        let mut factors: ImageRaster<f64> =
            ImageRaster::with_geometry(image.dims(), image.spacing(), image.origin());
        factors.fill(1.0);
        factors.as_mut_slice()[0] = 2.0;

        image.set_external_normalization(factors).unwrap();
        image.set_normalization(NormalizationStrategy::External).unwrap();
        assert!(!image.is_initialized());

        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
        image.get_image(200.0, Tolerance::Da(50.0), &mut target).unwrap();
        assert_eq!(target.as_slice(), &[1.0, 5.0, 8.0, 11.0]);
        assert!(image.is_initialized());
        assert!(!image.data.flags.contains(ImageFlags::USE_EXTERNAL_NORMALIZATION));
    }

    #[test_log::test]
    fn test_external_normalization_without_raster_fails() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        image.set_normalization(NormalizationStrategy::External).unwrap();
        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
        let result = image.get_image(200.0, Tolerance::Da(50.0), &mut target);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test_log::test]
    fn test_external_mask_survives_reinitialization() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        let mut mask: ImageRaster<u8> =
            ImageRaster::with_geometry(image.dims(), image.spacing(), image.origin());
        mask.as_mut_slice().copy_from_slice(&[1, 0, 1, 1]);

        image.set_external_mask(mask).unwrap();
        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
        image.get_image(200.0, Tolerance::Da(50.0), &mut target).unwrap();
        assert_eq!(image.mask_image().as_slice(), &[1, 0, 1, 1]);
        assert_eq!(target.as_slice(), &[2.0, 0.0, 8.0, 11.0]);
    }

    #[test_log::test]
    fn test_spectrum_access_pipeline() {
        let fixture = continuous_fixture(
            [1, 1],
            false,
            &[100.0, 200.0, 300.0],
            &[(1, 1, 0.0, vec![1.0, 4.0, 9.0])],
        );
        let config = EngineConfig {
            transform: IntensityTransform::SquareRoot,
            ..EngineConfig::default()
        };
        let image = SpectrumImage::load_with_config(&fixture.path, config).unwrap();
        let (masses, raw) = image.spectrum(0).unwrap();
        assert_eq!(masses, vec![100.0, 200.0, 300.0]);
        assert_eq!(raw, vec![1.0, 4.0, 9.0]);
        assert_eq!(image.intensities(0).unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(image.spectrum(1).is_err());
    }

    #[test_log::test]
    fn test_setters_invalidate_and_requery_reinitializes() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        assert!(image.is_initialized());

        image.set_normalization(NormalizationStrategy::Sum).unwrap();
        assert!(!image.is_initialized());

        let mut target: ImageRaster<f64> = ImageRaster::new(image.dims());
        image.get_image(200.0, Tolerance::Da(50.0), &mut target).unwrap();
        assert!(image.is_initialized());
        let factors: Vec<f64> = image.sources()[0]
            .records
            .iter()
            .map(|r| r.normalization)
            .collect();
        assert_close(&factors, &[6.0, 15.0, 24.0, 33.0]);
    }

    #[test_log::test]
    fn test_save_mode_locks_settings() {
        let fixture = grid_fixture();
        let mut image = SpectrumImage::load(&fixture.path).unwrap();
        image.begin_save().unwrap();
        assert!(matches!(
            image.set_transform(IntensityTransform::Log2),
            Err(EngineError::Configuration(_))
        ));
        assert!(image.begin_save().is_err());
        image.end_save();
        image.set_transform(IntensityTransform::Log2).unwrap();
    }

    #[test_log::test]
    fn test_combine_along_x() {
        let axis = [100.0, 200.0, 300.0];
        let first_fixture = continuous_fixture(
            [2, 1],
            true,
            &axis,
            &[
                (1, 1, 0.0, vec![1.0, 2.0, 3.0]),
                (2, 1, 0.0, vec![4.0, 5.0, 6.0]),
            ],
        );
        let second_fixture =
            continuous_fixture([1, 1], true, &axis, &[(1, 1, 0.0, vec![7.0, 8.0, 9.0])]);
        let first = SpectrumImage::load(&first_fixture.path).unwrap();
        let second = SpectrumImage::load(&second_fixture.path).unwrap();

        let mut combined = SpectrumImage::combine(&first, &second, StackAxis::X).unwrap();
        assert_eq!(combined.dims(), [3, 1, 1]);
        assert_eq!(combined.spectrum_count(), 3);
        assert_eq!(combined.format(), SpectrumFormat::ContinuousCentroid);
        assert_eq!(combined.sources()[1].offset, [2, 0, 0]);
        assert_eq!(combined.sum_spectrum(), &[12.0, 15.0, 18.0]);
        assert_eq!(combined.properties().get_u32("number of measurements"), Some(3));
        assert!(combined.properties().has("continuous"));
        assert!(!combined.properties().has("processed"));

        let mut target: ImageRaster<f64> = ImageRaster::new(combined.dims());
        combined.get_image(200.0, Tolerance::Da(50.0), &mut target).unwrap();
        assert_eq!(target.as_slice(), &[2.0, 5.0, 8.0]);
    }

    #[test_log::test]
    fn test_combine_rejects_mismatched_axes() {
        let first_fixture = continuous_fixture(
            [1, 1],
            true,
            &[100.0, 200.0, 300.0],
            &[(1, 1, 0.0, vec![1.0, 2.0, 3.0])],
        );
        let second_fixture = continuous_fixture(
            [1, 1],
            true,
            &[100.0, 200.0, 301.0],
            &[(1, 1, 0.0, vec![1.0, 2.0, 3.0])],
        );
        let first = SpectrumImage::load(&first_fixture.path).unwrap();
        let second = SpectrumImage::load(&second_fixture.path).unwrap();
        let result = SpectrumImage::combine(&first, &second, StackAxis::X);
        assert!(matches!(result, Err(EngineError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_stack_axis_parsing() {
        assert_eq!("x".parse::<StackAxis>().unwrap(), StackAxis::X);
        assert_eq!("Z".parse::<StackAxis>().unwrap(), StackAxis::Z);
        assert!("w".parse::<StackAxis>().is_err());
        assert_eq!(StackAxis::Y.to_string(), "y");
    }

    #[test]
    fn test_linear_pixel_applies_offsets() {
        let dims = [4, 3, 2];
        assert_eq!(linear_pixel(dims, [0, 0, 0], [1, 2, 1]), 1 + 4 * (2 + 3));
        assert_eq!(linear_pixel(dims, [2, 0, 0], [1, 0, 0]), 3);
    }
}

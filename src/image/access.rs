//! Format-dispatched data paths behind the engine facade.
//!
//! [`TypedAccess`] is instantiated once per image with the concrete binary
//! element types of the mass and intensity arrays, so the hot loops read
//! straight into typed buffers without per-sample dispatch. Each worker
//! thread opens its own binary file handle and accumulates into private
//! buffers, the joins fold thread states single-threaded.

use std::marker::PhantomData;

use crate::catalog::{ArraySlice, Source, SpectrumRecord};
use crate::error::EngineError;
use crate::exec;
use crate::image::{linear_pixel, ImageData, ImageFlags};
use crate::io::ibd::{IbdFile, IntensityValue, MassValue};
use crate::params::PropertyMapExt;
use crate::raster::{ImageRaster, MaskSource, RasterTarget};
use crate::signal::{self, BaselineCorrection, Interval, NormalizationStrategy};

/// `(first, count)` of the positions in sorted `values` falling inside the
/// closed window `[lower, upper]`.
pub(crate) fn subrange(values: &[f64], lower: f64, upper: f64) -> (usize, usize) {
    let first = values.partition_point(|&m| m < lower);
    let count = values[first..].partition_point(|&m| m <= upper);
    (first, count)
}

/// Per-spectrum normalization factor for the active strategy. An installed
/// external raster takes precedence, the in-file channel reads the value
/// recorded in the metadata, everything else is computed from the spectrum
/// itself. The result is sanitized so division stays finite.
fn resolve_factor(
    strategy: NormalizationStrategy,
    record: &SpectrumRecord,
    external: Option<&ImageRaster<f64>>,
    use_external: bool,
    linear: usize,
    mzs: &[f64],
    intensities: &[f64],
    centroided: bool,
) -> f64 {
    let factor = if use_external || strategy == NormalizationStrategy::External {
        external
            .and_then(|raster| raster.as_slice().get(linear).copied())
            .unwrap_or(1.0)
    } else if strategy == NormalizationStrategy::InFile {
        record.infile_normalization
    } else {
        strategy.factor(mzs, intensities, centroided)
    };
    signal::non_zero_factor(factor)
}

/// Scatter the per-record factors into a pixel raster. Pixels no spectrum
/// maps to keep a factor of 1 so lookups never divide by zero.
fn normalization_raster(data: &ImageData) -> ImageRaster<f64> {
    let mut raster = ImageRaster::with_geometry(data.dims, data.spacing, data.origin);
    raster.fill(1.0);
    let mut skipped = 0usize;
    for source in &data.sources {
        for record in &source.records {
            let linear = linear_pixel(data.dims, source.offset, record.index);
            match raster.as_mut_slice().get_mut(linear) {
                Some(cell) => *cell = record.normalization,
                None => skipped += 1,
            }
        }
    }
    if skipped > 0 {
        log::warn!("{skipped} spectra fall outside the image grid, their factors were dropped");
    }
    raster
}

/// Record the raster built from the current per-record factors in the
/// per-strategy cache.
fn store_normalization_raster(data: &mut ImageData) {
    let raster = normalization_raster(data);
    let strategy = data.config.normalization;
    data.normalization_images.insert(strategy, raster);
    data.normalization_builds += 1;
}

fn external_raster_required(data: &ImageData) -> Result<(), EngineError> {
    let wanted = data.flags.contains(ImageFlags::USE_EXTERNAL_NORMALIZATION)
        || data.config.normalization == NormalizationStrategy::External;
    if wanted && data.external_normalization.is_none() {
        return Err(EngineError::configuration(
            "external normalization requested but no factor image is installed",
        ));
    }
    Ok(())
}

fn source_record<'a>(
    data: &'a ImageData,
    source: usize,
    index: usize,
) -> Result<(&'a Source, &'a SpectrumRecord), EngineError> {
    let src = data
        .sources
        .get(source)
        .ok_or_else(|| EngineError::configuration(format!("no source {source} in this image")))?;
    let record = src.records.get(index).ok_or_else(|| {
        EngineError::configuration(format!("no spectrum {index} in source {source}"))
    })?;
    Ok((src, record))
}

/// Everything the engine facade needs from a concrete storage layout.
///
/// One implementation exists per `(mass type, intensity type)` pair, chosen
/// at load time by [`super::dispatch::build_access`]. All methods are safe to
/// call from the facade only, which guards ordering (initialization before
/// image queries) and cache state.
pub(crate) trait FormatAccess: Send + Sync {
    /// Read every spectrum once: establish the shared mass axis, compute the
    /// per-spectrum normalization factors for the configured strategy and
    /// fold up the mean, sum and skyline overview spectra.
    fn initialize(&self, data: &mut ImageData) -> Result<(), EngineError>;

    /// Recompute the per-record factors for `strategy` and return them as a
    /// pixel raster. The caller owns cache insertion.
    fn build_normalization(
        &self,
        data: &mut ImageData,
        strategy: NormalizationStrategy,
    ) -> Result<ImageRaster<f64>, EngineError>;

    /// Render the pooled intensity image for the window
    /// `[center - half_width, center + half_width)` into `target`.
    fn ion_image(
        &self,
        data: &ImageData,
        center: f64,
        half_width: f64,
        mask: &dyn MaskSource,
        target: &mut dyn RasterTarget,
    ) -> Result<(), EngineError>;

    /// Mass positions of one spectrum. Continuous layouts share one axis,
    /// processed layouts read the record's own array.
    fn spectrum_mass_axis(
        &self,
        data: &ImageData,
        source: usize,
        index: usize,
    ) -> Result<Vec<f64>, EngineError>;

    /// Intensities of one spectrum exactly as stored.
    fn raw_intensities(
        &self,
        data: &ImageData,
        source: usize,
        index: usize,
    ) -> Result<Vec<f64>, EngineError>;

    /// Intensities of one spectrum after the configured pipeline stages:
    /// normalize, smooth, baseline-correct, transform.
    fn processed_intensities(
        &self,
        data: &ImageData,
        source: usize,
        index: usize,
    ) -> Result<Vec<f64>, EngineError>;
}

/// [`FormatAccess`] for binary data stored as `M` mass values and `I`
/// intensity values.
pub(crate) struct TypedAccess<M, I> {
    marker: PhantomData<fn(M, I)>,
}

impl<M, I> TypedAccess<M, I> {
    pub(crate) fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<M: MassValue, I: IntensityValue> TypedAccess<M, I> {
    /// Mass axis shared by every spectrum of a continuous image, read from
    /// the first record.
    fn shared_axis(&self, data: &ImageData) -> Result<Vec<f64>, EngineError> {
        let source = data
            .sources
            .first()
            .ok_or_else(|| EngineError::parse("the image holds no sources"))?;
        let record = source
            .records
            .first()
            .ok_or_else(|| EngineError::parse("the image holds no spectra"))?;
        let mut ibd = IbdFile::open(&source.ibd_path)?;
        let raw: Vec<M> = ibd.read_slice(record.mass)?;
        Ok(raw.iter().map(|&v| v.to_f64()).collect())
    }

    fn initialize_continuous_profile(&self, data: &mut ImageData) -> Result<(), EngineError> {
        external_raster_required(data)?;
        let axis = self.shared_axis(data)?;
        let config = data.config;
        let dims = data.dims;
        let use_external = data.flags.contains(ImageFlags::USE_EXTERNAL_NORMALIZATION);
        let external = data.external_normalization.clone();

        let mut sum = vec![0.0f64; axis.len()];
        let mut skyline = vec![0.0f64; axis.len()];
        let mut total = 0usize;
        for source in data.sources.iter_mut() {
            total += source.records.len();
            let path = source.ibd_path.clone();
            let offset = source.offset;
            let partials =
                exec::map_partitions_mut_collect(&mut source.records, config.threads, |_, _, chunk| {
                    let mut ibd = IbdFile::open(&path)?;
                    let mut raw: Vec<I> = Vec::new();
                    let mut buffer: Vec<f64> = Vec::new();
                    let mut sum_t = vec![0.0f64; axis.len()];
                    let mut skyline_t = vec![0.0f64; axis.len()];
                    for record in chunk.iter_mut() {
                        ibd.read_slice_into(record.intensity, &mut raw)?;
                        buffer.clear();
                        buffer.extend(raw.iter().map(|&v| v.to_f64()));
                        let linear = linear_pixel(dims, offset, record.index);
                        record.normalization = resolve_factor(
                            config.normalization,
                            record,
                            external.as_ref(),
                            use_external,
                            linear,
                            &axis,
                            &buffer,
                            false,
                        );
                        signal::normalize(&mut buffer, record.normalization);
                        config.smoothing.apply(&mut buffer, config.smoothing_half_window);
                        config.baseline.apply(&mut buffer, config.baseline_half_window);
                        config.transform.apply(&mut buffer);
                        for ((s, k), v) in sum_t.iter_mut().zip(skyline_t.iter_mut()).zip(&buffer) {
                            *s += *v;
                            *k = k.max(*v);
                        }
                    }
                    Ok((sum_t, skyline_t))
                })?;
            for (sum_t, skyline_t) in partials {
                for (acc, v) in sum.iter_mut().zip(&sum_t) {
                    *acc += *v;
                }
                for (acc, v) in skyline.iter_mut().zip(&skyline_t) {
                    *acc = acc.max(*v);
                }
            }
        }

        let count = total.max(1) as f64;
        data.mean_spectrum = sum.iter().map(|v| v / count).collect();
        data.sum_spectrum = sum;
        data.skyline_spectrum = skyline;
        data.intervals.clear();
        set_axis_properties(data, &axis);
        data.mass_axis = axis;
        store_normalization_raster(data);
        Ok(())
    }

    fn initialize_continuous_centroid(&self, data: &mut ImageData) -> Result<(), EngineError> {
        external_raster_required(data)?;
        let axis = self.shared_axis(data)?;
        let config = data.config;
        let dims = data.dims;
        let use_external = data.flags.contains(ImageFlags::USE_EXTERNAL_NORMALIZATION);
        let external = data.external_normalization.clone();

        let mut intervals = vec![Interval::default(); axis.len()];
        for source in data.sources.iter_mut() {
            let path = source.ibd_path.clone();
            let offset = source.offset;
            let partials =
                exec::map_partitions_mut_collect(&mut source.records, config.threads, |_, _, chunk| {
                    let mut ibd = IbdFile::open(&path)?;
                    let mut raw: Vec<I> = Vec::new();
                    let mut buffer: Vec<f64> = Vec::new();
                    let mut intervals_t = vec![Interval::default(); axis.len()];
                    for record in chunk.iter_mut() {
                        ibd.read_slice_into(record.intensity, &mut raw)?;
                        buffer.clear();
                        buffer.extend(raw.iter().map(|&v| v.to_f64()));
                        let linear = linear_pixel(dims, offset, record.index);
                        record.normalization = resolve_factor(
                            config.normalization,
                            record,
                            external.as_ref(),
                            use_external,
                            linear,
                            &axis,
                            &buffer,
                            true,
                        );
                        signal::normalize(&mut buffer, record.normalization);
                        for (interval, (x, y)) in
                            intervals_t.iter_mut().zip(axis.iter().zip(&buffer))
                        {
                            interval.add(*x, *y);
                        }
                    }
                    Ok(intervals_t)
                })?;
            for intervals_t in partials {
                for (merged, partial) in intervals.iter_mut().zip(&intervals_t) {
                    merged.merge(partial);
                }
            }
        }

        data.sum_spectrum = intervals.iter().map(|iv| iv.y.sum()).collect();
        data.mean_spectrum = intervals.iter().map(|iv| iv.y.mean()).collect();
        data.skyline_spectrum = intervals
            .iter()
            .map(|iv| if iv.y.is_empty() { 0.0 } else { iv.y.max() })
            .collect();
        data.intervals = intervals;
        set_axis_properties(data, &axis);
        data.mass_axis = axis;
        store_normalization_raster(data);
        Ok(())
    }

    /// Two rounds over the file: the first finds the global mass range from
    /// each record's first and last position, the second resolves factors
    /// and accumulates every centroid into its bin on an equidistant grid.
    /// Bins no centroid landed in are dropped, so the resulting axis is the
    /// per-bin mean of the contributing masses.
    fn initialize_processed_centroid(&self, data: &mut ImageData) -> Result<(), EngineError> {
        external_raster_required(data)?;
        let config = data.config;
        let dims = data.dims;
        let use_external = data.flags.contains(ImageFlags::USE_EXTERNAL_NORMALIZATION);
        let external = data.external_normalization.clone();

        let mut global_min = f64::INFINITY;
        let mut global_max = f64::NEG_INFINITY;
        for source in &data.sources {
            let records = &source.records;
            let path = source.ibd_path.clone();
            let partials =
                exec::map_partitions_collect(records.len(), config.threads, |_, range| {
                    let mut ibd = IbdFile::open(&path)?;
                    let mut raw: Vec<M> = Vec::new();
                    let mut low = f64::INFINITY;
                    let mut high = f64::NEG_INFINITY;
                    for record in &records[range] {
                        if record.mass.is_empty() {
                            continue;
                        }
                        ibd.read_slice_into(record.mass, &mut raw)?;
                        if let (Some(&first), Some(&last)) = (raw.first(), raw.last()) {
                            low = low.min(first.to_f64());
                            high = high.max(last.to_f64());
                        }
                    }
                    Ok((low, high))
                })?;
            for (low, high) in partials {
                global_min = global_min.min(low);
                global_max = global_max.max(high);
            }
        }
        if !global_min.is_finite() || !global_max.is_finite() {
            return Err(EngineError::parse("the image holds no mass values to bin"));
        }

        let bin_count = config.overview_bins;
        let bin_size = (global_max - global_min) / bin_count as f64;

        let mut bins = vec![Interval::default(); bin_count];
        for source in data.sources.iter_mut() {
            let path = source.ibd_path.clone();
            let offset = source.offset;
            let partials =
                exec::map_partitions_mut_collect(&mut source.records, config.threads, |_, _, chunk| {
                    let mut ibd = IbdFile::open(&path)?;
                    let mut mass_raw: Vec<M> = Vec::new();
                    let mut intensity_raw: Vec<I> = Vec::new();
                    let mut masses: Vec<f64> = Vec::new();
                    let mut buffer: Vec<f64> = Vec::new();
                    let mut bins_t = vec![Interval::default(); bin_count];
                    for record in chunk.iter_mut() {
                        ibd.read_slice_into(record.mass, &mut mass_raw)?;
                        ibd.read_slice_into(record.intensity, &mut intensity_raw)?;
                        masses.clear();
                        masses.extend(mass_raw.iter().map(|&v| v.to_f64()));
                        buffer.clear();
                        buffer.extend(intensity_raw.iter().map(|&v| v.to_f64()));
                        let linear = linear_pixel(dims, offset, record.index);
                        record.normalization = resolve_factor(
                            config.normalization,
                            record,
                            external.as_ref(),
                            use_external,
                            linear,
                            &masses,
                            &buffer,
                            true,
                        );
                        signal::normalize(&mut buffer, record.normalization);
                        for (x, y) in masses.iter().zip(&buffer) {
                            let bin = (((x - global_min) / bin_size) as i64)
                                .clamp(0, bin_count as i64 - 1)
                                as usize;
                            // near-zero samples still count a hit but add no weight
                            let y = if *y < 10e-256 { 0.0 } else { *y };
                            bins_t[bin].add(*x, y);
                        }
                    }
                    Ok(bins_t)
                })?;
            for bins_t in partials {
                for (merged, partial) in bins.iter_mut().zip(&bins_t) {
                    merged.merge(partial);
                }
            }
        }

        let populated = bins.iter().filter(|b| !b.x.is_empty()).count();
        let mut axis = Vec::with_capacity(populated);
        let mut sum = Vec::with_capacity(populated);
        let mut mean = Vec::with_capacity(populated);
        let mut skyline = Vec::with_capacity(populated);
        let mut intervals = Vec::with_capacity(populated);
        for bin in bins {
            if bin.x.is_empty() {
                continue;
            }
            axis.push(bin.x.mean());
            sum.push(bin.y.sum());
            mean.push(bin.y.mean());
            skyline.push(bin.y.max());
            intervals.push(bin);
        }

        data.sum_spectrum = sum;
        data.mean_spectrum = mean;
        data.skyline_spectrum = skyline;
        data.intervals = intervals;
        set_axis_properties(data, &axis);
        data.mass_axis = axis;
        store_normalization_raster(data);
        Ok(())
    }

    /// Continuous layouts slice the shared axis once and read a contiguous
    /// window from every record's intensity array, widened by up to a
    /// baseline half-window on each side so edge samples of the query window
    /// see a usable baseline estimate.
    fn ion_image_continuous(
        &self,
        data: &ImageData,
        lower: f64,
        upper: f64,
        mask: &dyn MaskSource,
        target: &mut dyn RasterTarget,
    ) -> Result<usize, EngineError> {
        let axis = &data.mass_axis;
        let (first, count) = subrange(axis, lower, upper);
        if count == 0 {
            return Ok(0);
        }
        let config = data.config;
        let dims = data.dims;
        let normalization = normalization_lookup(data)?;

        let correct_baseline = config.baseline != BaselineCorrection::None;
        let margin_left = first;
        let margin_right = axis.len() - (first + count);
        let pad_left = if correct_baseline {
            config.baseline_half_window.min(margin_left)
        } else {
            0
        };
        let pad_right = if correct_baseline {
            config.baseline_half_window.min(margin_right)
        } else {
            0
        };
        let window_len = count + pad_left + pad_right;
        let byte_shift = ((first - pad_left) * std::mem::size_of::<I>()) as u64;

        let mut skipped = 0usize;
        for source in &data.sources {
            let records = &source.records;
            let offset = source.offset;
            let mut values = vec![0.0f64; records.len()];
            exec::map_partitions_mut(&mut values, config.threads, |_, base, chunk| {
                let mut ibd = IbdFile::open(&source.ibd_path)?;
                let mut raw: Vec<I> = Vec::new();
                let mut buffer: Vec<f64> = Vec::new();
                for (i, slot) in chunk.iter_mut().enumerate() {
                    let record = &records[base + i];
                    let linear = linear_pixel(dims, offset, record.index);
                    if !mask.is_valid(linear) {
                        *slot = 0.0;
                        continue;
                    }
                    let window =
                        ArraySlice::new(record.intensity.offset + byte_shift, window_len as u64);
                    ibd.read_slice_into(window, &mut raw)?;
                    buffer.clear();
                    buffer.extend(raw.iter().map(|&v| v.to_f64()));
                    if config.normalization != NormalizationStrategy::None {
                        let factor = normalization
                            .and_then(|raster| raster.as_slice().get(linear).copied())
                            .unwrap_or(1.0);
                        signal::normalize(&mut buffer, signal::non_zero_factor(factor));
                    }
                    config.smoothing.apply(&mut buffer, config.smoothing_half_window);
                    config.baseline.apply(&mut buffer, config.baseline_half_window);
                    config.transform.apply(&mut buffer);
                    *slot = config.pooling.pool(&buffer[pad_left..window_len - pad_right]);
                }
                Ok(())
            })?;
            skipped += scatter_values(records, offset, dims, &values, target);
        }
        Ok(skipped)
    }

    /// Processed layouts locate the window in every record's own mass array
    /// and pool the matching centroids, no smoothing or baseline pass runs.
    fn ion_image_processed(
        &self,
        data: &ImageData,
        lower: f64,
        upper: f64,
        mask: &dyn MaskSource,
        target: &mut dyn RasterTarget,
    ) -> Result<usize, EngineError> {
        let config = data.config;
        let dims = data.dims;
        let normalization = normalization_lookup(data)?;

        let mut skipped = 0usize;
        for source in &data.sources {
            let records = &source.records;
            let offset = source.offset;
            let mut values = vec![0.0f64; records.len()];
            exec::map_partitions_mut(&mut values, config.threads, |_, base, chunk| {
                let mut ibd = IbdFile::open(&source.ibd_path)?;
                let mut mass_raw: Vec<M> = Vec::new();
                let mut intensity_raw: Vec<I> = Vec::new();
                let mut masses: Vec<f64> = Vec::new();
                let mut buffer: Vec<f64> = Vec::new();
                for (i, slot) in chunk.iter_mut().enumerate() {
                    let record = &records[base + i];
                    let linear = linear_pixel(dims, offset, record.index);
                    if !mask.is_valid(linear) {
                        *slot = 0.0;
                        continue;
                    }
                    ibd.read_slice_into(record.mass, &mut mass_raw)?;
                    masses.clear();
                    masses.extend(mass_raw.iter().map(|&v| v.to_f64()));
                    let (first, count) = subrange(&masses, lower, upper);
                    if count == 0 {
                        *slot = 0.0;
                        continue;
                    }
                    let window = ArraySlice::new(
                        record.intensity.offset + (first * std::mem::size_of::<I>()) as u64,
                        count as u64,
                    );
                    ibd.read_slice_into(window, &mut intensity_raw)?;
                    buffer.clear();
                    buffer.extend(intensity_raw.iter().map(|&v| v.to_f64()));
                    if config.normalization != NormalizationStrategy::None {
                        let factor = normalization
                            .and_then(|raster| raster.as_slice().get(linear).copied())
                            .unwrap_or(1.0);
                        signal::normalize(&mut buffer, signal::non_zero_factor(factor));
                    }
                    *slot = config.pooling.pool(&buffer);
                }
                Ok(())
            })?;
            skipped += scatter_values(records, offset, dims, &values, target);
        }
        Ok(skipped)
    }
}

fn set_axis_properties(data: &mut ImageData, axis: &[f64]) {
    data.properties.set("spectral depth", axis.len() as u32);
    if let (Some(first), Some(last)) = (axis.first(), axis.last()) {
        data.properties.set("x_min", *first);
        data.properties.set("x_max", *last);
    }
}

fn normalization_lookup(
    data: &ImageData,
) -> Result<Option<&ImageRaster<f64>>, EngineError> {
    if data.config.normalization == NormalizationStrategy::None {
        return Ok(None);
    }
    data.normalization_images
        .get(&data.config.normalization)
        .map(Some)
        .ok_or_else(|| {
            EngineError::configuration(format!(
                "no {} normalization image has been built",
                data.config.normalization
            ))
        })
}

fn scatter_values(
    records: &[SpectrumRecord],
    offset: [u32; 3],
    dims: [usize; 3],
    values: &[f64],
    target: &mut dyn RasterTarget,
) -> usize {
    let mut skipped = 0usize;
    for (record, value) in records.iter().zip(values) {
        let linear = linear_pixel(dims, offset, record.index);
        if linear < target.pixel_count() {
            target.put(linear, *value);
        } else {
            skipped += 1;
        }
    }
    skipped
}

impl<M: MassValue, I: IntensityValue> FormatAccess for TypedAccess<M, I> {
    fn initialize(&self, data: &mut ImageData) -> Result<(), EngineError> {
        if data.format.is_continuous() {
            if data.format.is_profile() {
                self.initialize_continuous_profile(data)
            } else {
                self.initialize_continuous_centroid(data)
            }
        } else {
            self.initialize_processed_centroid(data)
        }
    }

    fn build_normalization(
        &self,
        data: &mut ImageData,
        strategy: NormalizationStrategy,
    ) -> Result<ImageRaster<f64>, EngineError> {
        let centroided = data.format.is_centroid();
        match strategy {
            NormalizationStrategy::None | NormalizationStrategy::External => {
                for source in data.sources.iter_mut() {
                    for record in source.records.iter_mut() {
                        record.normalization = 1.0;
                    }
                }
            }
            NormalizationStrategy::InFile => {
                for source in data.sources.iter_mut() {
                    for record in source.records.iter_mut() {
                        record.normalization =
                            signal::non_zero_factor(record.infile_normalization);
                    }
                }
            }
            _ => {
                // only the trapezoidal factor of profile data integrates
                // over mass positions, everything else reads intensities
                let needs_axis = strategy == NormalizationStrategy::TotalIonCurrent
                    && data.format.is_profile();
                let axis: Vec<f64> = if !needs_axis {
                    Vec::new()
                } else if data.mass_axis.is_empty() {
                    self.shared_axis(data)?
                } else {
                    data.mass_axis.clone()
                };
                let threads = data.config.threads;
                for source in data.sources.iter_mut() {
                    let path = source.ibd_path.clone();
                    exec::map_partitions_mut(&mut source.records, threads, |_, _, chunk| {
                        let mut ibd = IbdFile::open(&path)?;
                        let mut raw: Vec<I> = Vec::new();
                        let mut buffer: Vec<f64> = Vec::new();
                        for record in chunk.iter_mut() {
                            ibd.read_slice_into(record.intensity, &mut raw)?;
                            buffer.clear();
                            buffer.extend(raw.iter().map(|&v| v.to_f64()));
                            record.normalization = signal::non_zero_factor(
                                strategy.factor(&axis, &buffer, centroided),
                            );
                        }
                        Ok(())
                    })?;
                }
            }
        }
        Ok(normalization_raster(data))
    }

    fn ion_image(
        &self,
        data: &ImageData,
        center: f64,
        half_width: f64,
        mask: &dyn MaskSource,
        target: &mut dyn RasterTarget,
    ) -> Result<(), EngineError> {
        let lower = center - half_width;
        let upper = center + half_width;
        let skipped = if data.format.is_continuous() && data.format.is_profile() {
            self.ion_image_continuous(data, lower, upper, mask, target)?
        } else {
            self.ion_image_processed(data, lower, upper, mask, target)?
        };
        if skipped > 0 {
            log::warn!("{skipped} spectra fall outside the image grid and were not rendered");
        }
        Ok(())
    }

    fn spectrum_mass_axis(
        &self,
        data: &ImageData,
        source: usize,
        index: usize,
    ) -> Result<Vec<f64>, EngineError> {
        if data.format.is_continuous() && !data.mass_axis.is_empty() {
            return Ok(data.mass_axis.clone());
        }
        let (src, record) = source_record(data, source, index)?;
        let mut ibd = IbdFile::open(&src.ibd_path)?;
        let raw: Vec<M> = ibd.read_slice(record.mass)?;
        Ok(raw.iter().map(|&v| v.to_f64()).collect())
    }

    fn raw_intensities(
        &self,
        data: &ImageData,
        source: usize,
        index: usize,
    ) -> Result<Vec<f64>, EngineError> {
        let (src, record) = source_record(data, source, index)?;
        let mut ibd = IbdFile::open(&src.ibd_path)?;
        let raw: Vec<I> = ibd.read_slice(record.intensity)?;
        Ok(raw.iter().map(|&v| v.to_f64()).collect())
    }

    fn processed_intensities(
        &self,
        data: &ImageData,
        source: usize,
        index: usize,
    ) -> Result<Vec<f64>, EngineError> {
        let config = data.config;
        let normalization = normalization_lookup(data)?;
        let (src, record) = source_record(data, source, index)?;
        let mut ibd = IbdFile::open(&src.ibd_path)?;
        let raw: Vec<I> = ibd.read_slice(record.intensity)?;
        let mut buffer: Vec<f64> = raw.iter().map(|&v| v.to_f64()).collect();
        if config.normalization != NormalizationStrategy::None {
            let linear = linear_pixel(data.dims, src.offset, record.index);
            let factor = normalization
                .and_then(|raster| raster.as_slice().get(linear).copied())
                .unwrap_or(1.0);
            signal::normalize(&mut buffer, signal::non_zero_factor(factor));
        }
        config.smoothing.apply(&mut buffer, config.smoothing_half_window);
        config.baseline.apply(&mut buffer, config.baseline_half_window);
        config.transform.apply(&mut buffer);
        Ok(buffer)
    }
}

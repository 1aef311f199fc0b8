//! Export of a loaded image back to a metadata/binary file pair.
//!
//! The binary companion is written first through a hashing stream so its
//! checksum is known by the time the metadata document is rendered. Spectra
//! go out with the configured signal pipeline applied, so the written file
//! reproduces what the engine currently answers, not the raw input. While an
//! export runs the image is locked against settings changes.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::catalog::{SpectrumFormat, ValueType};
use crate::error::EngineError;
use crate::image::{subrange, SpectrumImage};
use crate::io::ibd::IbdValue;
use crate::io::template::{
    text_to_code, TemplateContext, TemplateRenderer, IMZML_SPECTRUM_TEMPLATE, IMZML_TEMPLATE_END,
    IMZML_TEMPLATE_START,
};
use crate::io::utils::Sha1HashingStream;
use crate::params::PropertyMapExt;
use crate::signal::Interval;

/// How the exported pair is encoded.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Element type of the written mass axis, the source's type when unset.
    pub mass_type: Option<ValueType>,
    /// Element type of the written intensities, the source's type when unset.
    pub intensity_type: Option<ValueType>,
    /// Restrict the written axis to this closed mass window; intensities are
    /// sub-ranged identically. The whole axis when unset.
    pub mass_range: Option<(f64, f64)>,
    /// Collapse the image onto these centroids instead of writing the full
    /// axis. Each centroid is pooled over the configured tolerance window.
    pub centroids: Option<Vec<Interval>>,
}

/// Written layout of one spectrum, collected while the binary file streams
/// out and replayed into the metadata document afterwards.
struct SpectrumLayout {
    index: [u32; 3],
    factor: f64,
    mass_offset: u64,
    mass_length: u64,
    intensity_offset: u64,
    intensity_length: u64,
}

/// Write `image` as the metadata document `path` plus its `.ibd` companion
/// next to it. Fails for processed storage, which has no shared axis to
/// write; collapse it onto centroids first.
pub fn write_image<P: AsRef<Path>>(
    image: &mut SpectrumImage,
    path: P,
    options: &ExportOptions,
) -> Result<(), EngineError> {
    image.initialize()?;
    image.begin_save()?;
    let result = write_image_inner(image, path.as_ref(), options);
    image.end_save();
    result
}

fn write_image_inner(
    image: &SpectrumImage,
    path: &Path,
    options: &ExportOptions,
) -> Result<(), EngineError> {
    let mass_type = options.mass_type.unwrap_or_else(|| image.mass_value_type());
    let intensity_type = options
        .intensity_type
        .unwrap_or_else(|| image.intensity_value_type());
    for value_type in [mass_type, intensity_type] {
        if !value_type.is_float() {
            return Err(EngineError::unsupported(format!(
                "arrays cannot be written as {value_type} values"
            )));
        }
    }
    let format = output_format(image, options)?;

    let ibd_path = path.with_extension("ibd");
    let uuid = Uuid::new_v4();
    let handle = File::create(&ibd_path)?;
    let mut stream = Sha1HashingStream::new(BufWriter::new(handle));
    stream.write_all(uuid.as_bytes())?;

    let axis = image.mass_axis();
    let range = match options.mass_range {
        Some((lower, upper)) => {
            let (first, count) = subrange(axis, lower, upper);
            if count == 0 {
                return Err(EngineError::configuration(format!(
                    "the requested mass range {lower} - {upper} holds no axis positions"
                )));
            }
            (first, count)
        }
        None => (0, axis.len()),
    };
    let centers: Vec<f64> = match &options.centroids {
        Some(intervals) => intervals.iter().map(|iv| iv.x.mean()).collect(),
        None => axis[range.0..range.0 + range.1].to_vec(),
    };
    let mut cursor = 16u64;
    let mass_offset = cursor;
    cursor += write_values(&mut stream, &centers, mass_type)?;

    let mut layouts = Vec::with_capacity(image.spectrum_count());
    let mut flat = 0usize;
    for source in image.sources() {
        for record in &source.records {
            let buffer = spectrum_values(image, flat, format, range, &centers)?;
            let offset = cursor;
            cursor += write_values(&mut stream, &buffer, intensity_type)?;
            layouts.push(SpectrumLayout {
                index: [
                    record.index[0] + source.offset[0],
                    record.index[1] + source.offset[1],
                    record.index[2] + source.offset[2],
                ],
                factor: record.normalization,
                mass_offset,
                mass_length: centers.len() as u64,
                intensity_offset: offset,
                intensity_length: buffer.len() as u64,
            });
            flat += 1;
        }
    }
    stream.flush()?;
    let sha1sum = stream.compute();

    let document = File::create(path)?;
    let mut document = BufWriter::new(document);
    let renderer = TemplateRenderer::new();
    let context = header_context(image, path, format, mass_type, intensity_type, uuid, &sha1sum);
    document.write_all(renderer.render(IMZML_TEMPLATE_START, &context).as_bytes())?;
    let three_dimensional = image.dims()[2] > 1;
    for (position, layout) in layouts.iter().enumerate() {
        let context = spectrum_context(
            position,
            layout,
            mass_type,
            intensity_type,
            three_dimensional,
        );
        document.write_all(renderer.render(IMZML_SPECTRUM_TEMPLATE, &context).as_bytes())?;
    }
    document.write_all(IMZML_TEMPLATE_END.as_bytes())?;
    document.flush()?;
    Ok(())
}

fn output_format(
    image: &SpectrumImage,
    options: &ExportOptions,
) -> Result<SpectrumFormat, EngineError> {
    if !image.format().is_continuous() {
        return Err(EngineError::unsupported(
            "processed storage cannot be written back, collapse it onto a shared axis first",
        ));
    }
    if options.centroids.is_some() || image.format().is_centroid() {
        Ok(SpectrumFormat::ContinuousCentroid)
    } else {
        Ok(SpectrumFormat::ContinuousProfile)
    }
}

/// Intensities of one spectrum as they go out: the processed signal cut to
/// the written axis range for profile output, one pooled tolerance window per
/// center for centroid output.
fn spectrum_values(
    image: &SpectrumImage,
    flat: usize,
    format: SpectrumFormat,
    range: (usize, usize),
    centers: &[f64],
) -> Result<Vec<f64>, EngineError> {
    let processed = image.intensities(flat)?;
    if format.is_profile() {
        return Ok(processed[range.0..range.0 + range.1].to_vec());
    }
    let axis = image.mass_axis();
    let config = image.config();
    let mut pooled = Vec::with_capacity(centers.len());
    for center in centers {
        let (lower, upper) = config.tolerance.bounds(*center);
        let (first, count) = subrange(axis, lower, upper);
        if count == 0 {
            pooled.push(0.0);
        } else {
            pooled.push(config.pooling.pool(&processed[first..first + count]));
        }
    }
    Ok(pooled)
}

fn write_values<W: Write>(
    stream: &mut W,
    values: &[f64],
    value_type: ValueType,
) -> Result<u64, EngineError> {
    match value_type {
        ValueType::Float32 => write_typed::<f32, W>(stream, values),
        ValueType::Float64 => write_typed::<f64, W>(stream, values),
        ValueType::Int32 => write_typed::<i32, W>(stream, values),
        ValueType::Int64 => write_typed::<i64, W>(stream, values),
    }
}

fn write_typed<T: IbdValue, W: Write>(
    stream: &mut W,
    values: &[f64],
) -> Result<u64, EngineError> {
    let raw: Vec<T> = values.iter().map(|v| T::from_f64(*v)).collect();
    let bytes: &[u8] = bytemuck::cast_slice(&raw);
    stream.write_all(bytes)?;
    Ok(bytes.len() as u64)
}

fn trimmed(value: f64) -> String {
    format!("{value}")
}

fn header_context(
    image: &SpectrumImage,
    path: &Path,
    format: SpectrumFormat,
    mass_type: ValueType,
    intensity_type: ValueType,
    uuid: Uuid,
    sha1sum: &str,
) -> TemplateContext {
    let mut context = TemplateContext::new();
    let spectrum_type = if format.is_profile() {
        "profile spectrum"
    } else {
        "centroid spectrum"
    };
    context.insert("spectrumtype".into(), spectrum_type.into());
    context.insert(
        "spectrumtype_code".into(),
        text_to_code(spectrum_type).unwrap_or_default().into(),
    );
    context.insert("mode".into(), "continuous".into());
    context.insert(
        "mode_code".into(),
        text_to_code("continuous").unwrap_or_default().into(),
    );
    context.insert("uuid".into(), format!("{{{uuid}}}"));
    context.insert("sha1sum".into(), sha1sum.into());
    for polarity in ["positive scan", "negative scan"] {
        if image.properties().has(polarity) {
            context.insert("polarity".into(), polarity.into());
            context.insert(
                "polarity_code".into(),
                text_to_code(polarity).unwrap_or_default().into(),
            );
            break;
        }
    }
    context.insert("mz_data_type".into(), mass_type.name().into());
    context.insert(
        "mz_data_type_code".into(),
        text_to_code(mass_type.name()).unwrap_or_default().into(),
    );
    context.insert("int_data_type".into(), intensity_type.name().into());
    context.insert(
        "int_data_type_code".into(),
        text_to_code(intensity_type.name()).unwrap_or_default().into(),
    );
    for key in ["mz_compression", "int_compression"] {
        context.insert(key.into(), "no compression".into());
        context.insert(
            format!("{key}_code"),
            text_to_code("no compression").unwrap_or_default().into(),
        );
    }
    context.insert(
        "software_version".into(),
        env!("CARGO_PKG_VERSION").into(),
    );

    let dims = image.dims();
    let spacing = image.spacing();
    let origin = image.origin();
    context.insert("size_x".into(), dims[0].to_string());
    context.insert("size_y".into(), dims[1].to_string());
    // geometry goes out in micrometers, the unit the format declares
    context.insert(
        "max dimension x".into(),
        trimmed(dims[0] as f64 * spacing[0] * 1000.0),
    );
    context.insert(
        "max dimension y".into(),
        trimmed(dims[1] as f64 * spacing[1] * 1000.0),
    );
    context.insert("pixel size x".into(), trimmed(spacing[0] * 1000.0));
    context.insert("pixel size y".into(), trimmed(spacing[1] * 1000.0));
    if origin[0] != 0.0 {
        context.insert("origin x".into(), trimmed(origin[0] * 1000.0));
    }
    if origin[1] != 0.0 {
        context.insert("origin y".into(), trimmed(origin[1] * 1000.0));
    }

    let run_id = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    context.insert("run_id".into(), run_id);
    context.insert(
        "timestamp".into(),
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    );
    context.insert("num_spectra".into(), image.spectrum_count().to_string());
    context
}

fn spectrum_context(
    position: usize,
    layout: &SpectrumLayout,
    mass_type: ValueType,
    intensity_type: ValueType,
    three_dimensional: bool,
) -> TemplateContext {
    let mut context = TemplateContext::new();
    context.insert("index".into(), position.to_string());
    // grid positions are declared one-based
    context.insert("x".into(), (layout.index[0] + 1).to_string());
    context.insert("y".into(), (layout.index[1] + 1).to_string());
    if three_dimensional {
        context.insert("z".into(), (layout.index[2] + 1).to_string());
    }
    if layout.factor != 1.0 {
        context.insert("tic".into(), trimmed(layout.factor));
    }
    context.insert("mz_len".into(), layout.mass_length.to_string());
    context.insert(
        "mz_enc_len".into(),
        (layout.mass_length * mass_type.bytes() as u64).to_string(),
    );
    context.insert("mz_offset".into(), layout.mass_offset.to_string());
    context.insert("int_len".into(), layout.intensity_length.to_string());
    context.insert(
        "int_enc_len".into(),
        (layout.intensity_length * intensity_type.bytes() as u64).to_string(),
    );
    context.insert("int_offset".into(), layout.intensity_offset.to_string());
    context
}

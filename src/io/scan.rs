//! Line oriented scanner over the XML metadata document.
//!
//! The document is processed twice. The first pass collects file level
//! properties and stops at the start of the run section, the second pass
//! walks the per-spectrum entries and fills the source catalog. Both passes
//! classify each line as a closing tag, an empty element or an opening tag
//! and never build a DOM, so arbitrarily large documents stream through in
//! constant memory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::catalog::{Source, SpectrumRecord, ValueType};
use crate::error::EngineError;
use crate::params::{accession, PropertyMap, PropertyMapExt, PropertyValue};

pub(crate) fn micrometer_to_millimeter(value: f64) -> f64 {
    value * 0.001
}

/// Value of the first `key="..."` attribute found on the line. The key is
/// matched as a raw substring, quotes delimit the value.
pub(crate) fn attribute_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let at = line.find(key)?;
    let rest = &line[at + key.len()..];
    let open = rest.find('"')?;
    let rest = &rest[open + 1..];
    let close = rest.find('"')?;
    Some(&rest[..close])
}

/// Element name of an opening tag, the token between `<` and the first
/// space or `>`.
pub(crate) fn element_name(line: &str) -> &str {
    match line.find('<') {
        Some(at) => {
            let rest = &line[at + 1..];
            match rest.find([' ', '>']) {
                Some(end) => &rest[..end],
                None => rest,
            }
        }
        None => "",
    }
}

fn open_lines(path: &Path) -> Result<std::io::Lines<BufReader<File>>, EngineError> {
    if !path.exists() {
        return Err(EngineError::FileNotFound(path.to_path_buf()));
    }
    Ok(BufReader::new(File::open(path)?).lines())
}

/// Scan one metadata document into the shared property map and the source's
/// spectrum catalog.
pub fn scan_source(source: &mut Source, properties: &mut PropertyMap) -> Result<(), EngineError> {
    scan_file_metadata(&source.imzml_path, properties)?;
    scan_spectrum_metadata(source, properties)?;
    Ok(())
}

fn set_double_property(properties: &mut PropertyMap, line: &str, default_name: Option<&str>) {
    let Some(value) = attribute_value(line, "value") else {
        return;
    };
    let Ok(parsed) = value.parse::<f64>() else {
        log::info!("check this metadata line, possibly incorrect: {line}");
        return;
    };
    let key = default_name.or_else(|| attribute_value(line, "name")).unwrap_or_default();
    properties.set(key, PropertyValue::Double(parsed));
}

fn set_uint_property(properties: &mut PropertyMap, line: &str, default_name: Option<&str>) {
    let Some(value) = attribute_value(line, "value") else {
        return;
    };
    let Ok(parsed) = value.parse::<u32>() else {
        log::info!("check this metadata line, possibly incorrect: {line}");
        return;
    };
    let key = default_name.or_else(|| attribute_value(line, "name")).unwrap_or_default();
    properties.set(key, PropertyValue::UInt(parsed));
}

fn set_offset_property(properties: &mut PropertyMap, line: &str) {
    let Some(value) = attribute_value(line, "value") else {
        return;
    };
    let Ok(parsed) = value.parse::<f64>() else {
        log::info!("check this metadata line, possibly incorrect: {line}");
        return;
    };
    let key = attribute_value(line, "name").unwrap_or_default();
    properties.set(key, PropertyValue::Double(micrometer_to_millimeter(parsed)));
}

fn context_value_to_string_property(properties: &mut PropertyMap, line: &str, context: &str) {
    let name = attribute_value(line, "name").unwrap_or_default();
    let value = attribute_value(line, "value").unwrap_or_default();
    if context.is_empty() {
        properties.set(name, PropertyValue::String(value.to_string()));
    } else {
        properties.set(format!("{context}.{name}"), PropertyValue::String(value.to_string()));
    }
}

/// Consume the body of a referenceable parameter group. The group declares
/// which array it backs and in which numeric encoding, plus optional
/// spectrum type flags.
fn scan_param_group(
    lines: &mut std::io::Lines<BufReader<File>>,
    line: &str,
    properties: &mut PropertyMap,
) -> Result<(), EngineError> {
    let group_id = attribute_value(line, "id").unwrap_or_default().to_string();
    let mut value_type_name = "";
    let mut group_name = String::new();
    let mut target_key = "";

    for group_line in lines.by_ref() {
        let group_line = group_line?;
        if group_line.contains("</") {
            break;
        }
        if group_line.contains(accession::BIT32_FLOAT)
            || group_line.contains(accession::BIT64_FLOAT)
            || group_line.contains(accession::BIT32_INTEGER)
            || group_line.contains(accession::BIT64_INTEGER)
        {
            if let Some(name) = attribute_value(&group_line, "name") {
                value_type_name = ValueType::from_name(name).map(|v| v.name()).unwrap_or_default();
            }
        }
        if group_line.contains(accession::MZ_ARRAY) {
            group_name = attribute_value(&group_line, "name").unwrap_or_default().to_string();
            target_key = "mzGroupName";
        }
        if group_line.contains(accession::INTENSITY_ARRAY) {
            group_name = attribute_value(&group_line, "name").unwrap_or_default().to_string();
            target_key = "intensityGroupName";
        }
        if group_line.contains(accession::CENTROID_SPECTRUM)
            || group_line.contains(accession::PROFILE_SPECTRUM)
        {
            if let Some(spectrum_type) = attribute_value(&group_line, "name") {
                properties.set(spectrum_type, PropertyValue::Boolean(true));
            }
        }
    }

    if !target_key.is_empty() {
        let Some(value_type) = ValueType::from_name(value_type_name) else {
            return Err(EngineError::parse(format!(
                "parameter group '{group_id}' backing the {group_name} declares no recognized value type"
            )));
        };
        properties.set(target_key, PropertyValue::String(group_name.clone()));
        properties.set(&group_name, PropertyValue::String(group_id));
        properties.set(
            format!("{group_name} value type (bytes)"),
            PropertyValue::UInt(value_type.bytes() as u32),
        );
        properties.set(
            format!("{group_name} value type"),
            PropertyValue::String(value_type.name().to_string()),
        );
    }
    Ok(())
}

/// First pass: everything before the run section.
fn scan_file_metadata(path: &Path, properties: &mut PropertyMap) -> Result<(), EngineError> {
    let mut lines = open_lines(path)?;
    let mut context = String::new();

    properties.set("max count of pixels z", PropertyValue::UInt(1));
    properties.set("pixel size x", PropertyValue::Double(-1.0));
    properties.set("pixel size y", PropertyValue::Double(-1.0));
    properties.set("pixel size z", PropertyValue::Double(-1.0));
    properties.set("absolute position offset x", PropertyValue::Double(0.0));
    properties.set("absolute position offset y", PropertyValue::Double(0.0));
    properties.set("absolute position offset z", PropertyValue::Double(0.0));

    while let Some(line) = lines.next() {
        let line = line?;
        if line.contains("<run") {
            break;
        }
        if line.contains("</") {
            context.clear();
            continue;
        }
        if line.contains("/>") {
            let code = attribute_value(&line, "accession").unwrap_or_default();
            if code.is_empty() {
                continue;
            }
            match code {
                accession::MAX_COUNT_OF_PIXELS_X => {
                    set_uint_property(properties, &line, Some("max count of pixels x"))
                }
                accession::MAX_COUNT_OF_PIXELS_Y => {
                    set_uint_property(properties, &line, Some("max count of pixels y"))
                }
                accession::MAX_DIMENSION_X
                | accession::MAX_DIMENSION_Y
                | accession::PIXEL_SIZE_X
                | accession::PIXEL_SIZE_Y => set_double_property(properties, &line, None),
                accession::ABSOLUTE_POSITION_OFFSET_X | accession::ABSOLUTE_POSITION_OFFSET_Y => {
                    set_offset_property(properties, &line)
                }
                _ => context_value_to_string_property(properties, &line, &context),
            }
            continue;
        }
        match element_name(&line) {
            "referenceableParamGroup" => scan_param_group(&mut lines, &line, properties)?,
            "software" => {
                let id = attribute_value(&line, "id").unwrap_or_default();
                let version = attribute_value(&line, "version").unwrap_or_default();
                context = format!("{id} {version}");
            }
            "scanSettings" | "instrumentConfiguration" | "dataProcessing" => {
                context = attribute_value(&line, "id").unwrap_or_default().to_string();
            }
            "source" => context = "source".to_string(),
            "analyzer" => context = "analyzer".to_string(),
            "detector" => context = "detector".to_string(),
            "processingMethod" => {
                let order = attribute_value(&line, "order").unwrap_or_default();
                context = format!("{context}processingMethod ({order})");
            }
            _ => {}
        }
    }

    resolve_pixel_geometry(properties);
    Ok(())
}

/// Turn the raw pixel size declarations into millimeter spacings. A lone
/// x size is treated as a pixel area and both axes resolve to its square
/// root, missing sizes fall back to 50 micrometers in plane and 10 in z.
fn resolve_pixel_geometry(properties: &mut PropertyMap) {
    if let Some(area) = properties.get_f64("pixel size") {
        properties.set("pixel size x", PropertyValue::Double(area));
    }

    let x = properties.get_f64("pixel size x").unwrap_or(-1.0);
    let y = properties.get_f64("pixel size y").unwrap_or(-1.0);
    if y == -1.0 && x > 0.0 {
        let side = x.sqrt();
        properties.set("pixel size x", PropertyValue::Double(micrometer_to_millimeter(side)));
        properties.set("pixel size y", PropertyValue::Double(micrometer_to_millimeter(side)));
        properties.set("squared pixel size", PropertyValue::Double(x));
    } else if y > 0.0 && x > 0.0 {
        properties.set("pixel size x", PropertyValue::Double(micrometer_to_millimeter(x)));
        properties.set("pixel size y", PropertyValue::Double(micrometer_to_millimeter(y)));
    }

    let x = properties.get_f64("pixel size x").unwrap_or(-1.0);
    let y = properties.get_f64("pixel size y").unwrap_or(-1.0);
    if y <= 0.0 && x <= 0.0 {
        properties.set("pixel size x", PropertyValue::Double(micrometer_to_millimeter(50.0)));
        properties.set("pixel size y", PropertyValue::Double(micrometer_to_millimeter(50.0)));
        properties.set(
            "pixel size info",
            PropertyValue::String(
                "pixel size x and y are default values, the metadata declares neither".to_string(),
            ),
        );
        log::warn!("no pixel size found, set x and y spacing to 50 micrometers");
    }

    let z = properties.get_f64("pixel size z").unwrap_or(-1.0);
    if z < 0.0 {
        properties.set("pixel size z", PropertyValue::Double(micrometer_to_millimeter(10.0)));
        properties.set("max count of pixels z", PropertyValue::UInt(1));
    } else {
        properties.set("pixel size z", PropertyValue::Double(micrometer_to_millimeter(z)));
    }
}

/// Second pass: the per-spectrum entries of the run section.
fn scan_spectrum_metadata(
    source: &mut Source,
    properties: &mut PropertyMap,
) -> Result<(), EngineError> {
    let mz_group = properties
        .get_str("m/z array")
        .ok_or_else(|| EngineError::parse("no parameter group backing the m/z array declared"))?
        .to_string();
    let intensity_group = properties
        .get_str("intensity array")
        .ok_or_else(|| EngineError::parse("no parameter group backing the intensity array declared"))?
        .to_string();

    let lines = open_lines(&source.imzml_path)?;
    let records = &mut source.records;
    let mut current = 0usize;
    let mut context = String::new();
    let mut scils_z_used = false;

    for line in lines {
        let line = line?;
        if line.contains("</") {
            if line.contains("spectrum") {
                current += 1;
            }
            continue;
        }
        if line.contains("/>") {
            let code = attribute_value(&line, "accession").unwrap_or_default();
            if !code.is_empty() {
                if !context.is_empty() {
                    let slice = if context == mz_group {
                        records.get_mut(current).map(|r| &mut r.mass)
                    } else if context == intensity_group {
                        records.get_mut(current).map(|r| &mut r.intensity)
                    } else {
                        None
                    };
                    if let Some(slice) = slice {
                        match code {
                            accession::EXTERNAL_OFFSET => {
                                if let Some(v) = parse_u64(&line) {
                                    slice.offset = v;
                                    continue;
                                }
                            }
                            accession::EXTERNAL_ARRAY_LENGTH => {
                                if let Some(v) = parse_u64(&line) {
                                    slice.length = v;
                                    continue;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                let handled = match code {
                    accession::POSITION_X => set_index(records.get_mut(current), 0, &line),
                    accession::POSITION_Y => set_index(records.get_mut(current), 1, &line),
                    accession::POSITION_Z => set_index(records.get_mut(current), 2, &line),
                    accession::TOTAL_ION_CURRENT => {
                        if let (Some(record), Some(v)) = (records.get_mut(current), parse_f64(&line))
                        {
                            record.infile_normalization = v;
                        }
                        true
                    }
                    _ => false,
                };
                if handled {
                    continue;
                }
            } else if let Some(name) = attribute_value(&line, "name") {
                // foreign user tags carry world positions for 3D data
                let axis = match name {
                    "3DPositionX" => Some(0),
                    "3DPositionY" => Some(1),
                    "3DPositionZ" => {
                        scils_z_used = true;
                        Some(2)
                    }
                    _ => None,
                };
                if let (Some(axis), Some(record), Some(v)) =
                    (axis, records.get_mut(current), parse_f64(&line))
                {
                    record.world[axis] = v;
                    continue;
                }
            }
        }
        match element_name(&line) {
            "spectrumList" => {
                if let Some(count) = attribute_value(&line, "count").and_then(|v| v.parse::<u32>().ok())
                {
                    properties.set("number of measurements", PropertyValue::UInt(count));
                    records.resize(count as usize, SpectrumRecord::default());
                }
            }
            "spectrum" => {
                if let Some(record) = records.get_mut(current) {
                    record.index[2] = 0;
                }
            }
            "referenceableParamGroupRef" => {
                context = attribute_value(&line, "ref").unwrap_or_default().to_string();
            }
            _ => {}
        }
    }

    resolve_z_geometry(records, properties, scils_z_used);
    Ok(())
}

fn parse_u64(line: &str) -> Option<u64> {
    attribute_value(line, "value").and_then(|v| v.parse().ok())
}

fn parse_f64(line: &str) -> Option<f64> {
    attribute_value(line, "value").and_then(|v| v.parse().ok())
}

fn set_index(record: Option<&mut SpectrumRecord>, axis: usize, line: &str) -> bool {
    if let (Some(record), Some(position)) = (record, parse_u64(line)) {
        // grid positions are declared one-based
        record.index[axis] = position.saturating_sub(1) as u32;
    }
    true
}

/// Derive the z extent of the grid. Files using the foreign world position
/// tags get their z spacing estimated as the most frequent gap between the
/// sorted unique positions and their indices densely remapped, plain files
/// with more than one z index fall back to a 10 micrometer spacing.
fn resolve_z_geometry(
    records: &mut [SpectrumRecord],
    properties: &mut PropertyMap,
    scils_z_used: bool,
) {
    if scils_z_used {
        let uniques: BTreeSet<u64> = records.iter().map(|r| r.world[2] as u64).collect();
        if uniques.len() < 2 {
            return;
        }
        let ranks: BTreeMap<u64, u32> =
            uniques.iter().enumerate().map(|(rank, z)| (*z, rank as u32)).collect();

        let sorted: Vec<u64> = uniques.into_iter().collect();
        let mut gap_counts: BTreeMap<u64, usize> = BTreeMap::new();
        for pair in sorted.windows(2) {
            *gap_counts.entry(pair[1] - pair[0]).or_default() += 1;
        }
        let mut spacing = sorted[1] - sorted[0];
        let mut best = 0;
        for (gap, count) in gap_counts {
            if count > best {
                best = count;
                spacing = gap;
            }
        }

        for record in records.iter_mut() {
            if let Some(rank) = ranks.get(&(record.world[2] as u64)) {
                record.index[2] = *rank;
            }
        }
        properties.set("max count of pixels z", PropertyValue::UInt(ranks.len() as u32));
        properties.set(
            "pixel size z",
            PropertyValue::Double(micrometer_to_millimeter(spacing as f64)),
        );
    } else {
        let uniques: BTreeSet<u32> = records.iter().map(|r| r.index[2]).collect();
        if uniques.len() > 1 {
            properties.set("max count of pixels z", PropertyValue::UInt(uniques.len() as u32));
            properties.set(
                "pixel size z",
                PropertyValue::Double(micrometer_to_millimeter(10.0)),
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_document(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.imzML");
        let mut handle = File::create(&path).unwrap();
        handle.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    const HEADER: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<mzML xmlns="http://psi.hupo.org/ms/mzml" version="1.1">
  <fileDescription>
    <fileContent>
      <cvParam cvRef="IMS" accession="IMS:1000030" name="continuous" value=""/>
      <cvParam cvRef="MS" accession="MS:1000128" name="profile spectrum" value=""/>
      <cvParam cvRef="IMS" accession="IMS:1000080" name="universally unique identifier" value="{11111111-2222-3333-4444-555555555555}"/>
      <cvParam cvRef="IMS" accession="IMS:1000091" name="ibd SHA-1" value="da39a3ee5e6b4b0d3255bfef95601890afd80709"/>
    </fileContent>
  </fileDescription>
  <referenceableParamGroupList count="2">
    <referenceableParamGroup id="mzArray">
      <cvParam cvRef="MS" accession="MS:1000514" name="m/z array" value="" unitCvRef="MS" unitAccession="MS:1000040" unitName="m/z"/>
      <cvParam cvRef="MS" accession="MS:1000523" name="64-bit float" value=""/>
      <cvParam cvRef="IMS" accession="IMS:1000101" name="external data" value="true"/>
    </referenceableParamGroup>
    <referenceableParamGroup id="intensityArray">
      <cvParam cvRef="MS" accession="MS:1000515" name="intensity array" value=""/>
      <cvParam cvRef="MS" accession="MS:1000521" name="32-bit float" value=""/>
      <cvParam cvRef="IMS" accession="IMS:1000101" name="external data" value="true"/>
    </referenceableParamGroup>
  </referenceableParamGroupList>
  <softwareList count="1">
    <software id="acquire" version="3.4"/>
  </softwareList>
  <scanSettingsList count="1">
    <scanSettings id="scanSettings0">
      <cvParam cvRef="IMS" accession="IMS:1000042" name="max count of pixels x" value="2"/>
      <cvParam cvRef="IMS" accession="IMS:1000043" name="max count of pixels y" value="1"/>
      <cvParam cvRef="IMS" accession="IMS:1000046" name="pixel size x" value="2500"/>
    </scanSettings>
  </scanSettingsList>
"#;

    fn spectrum_entry(index: usize, x: u32, y: u32, tic: f64, extra: &str) -> String {
        let mz_offset = 16 + index * 24;
        let int_offset = 16 + 48 + index * 12;
        format!(
            r#"      <spectrum index="{index}" id="spectrum={index}" defaultArrayLength="3">
        <cvParam cvRef="MS" accession="MS:1000285" name="total ion current" value="{tic}"/>
{extra}        <scanList count="1">
          <scan>
            <cvParam cvRef="IMS" accession="IMS:1000050" name="position x" value="{x}"/>
            <cvParam cvRef="IMS" accession="IMS:1000051" name="position y" value="{y}"/>
          </scan>
        </scanList>
        <binaryDataArrayList count="2">
          <binaryDataArray encodedLength="24">
            <referenceableParamGroupRef ref="mzArray"/>
            <cvParam cvRef="IMS" accession="IMS:1000102" name="external offset" value="{mz_offset}"/>
            <cvParam cvRef="IMS" accession="IMS:1000103" name="external array length" value="3"/>
            <binary/>
          </binaryDataArray>
          <binaryDataArray encodedLength="12">
            <referenceableParamGroupRef ref="intensityArray"/>
            <cvParam cvRef="IMS" accession="IMS:1000102" name="external offset" value="{int_offset}"/>
            <cvParam cvRef="IMS" accession="IMS:1000103" name="external array length" value="3"/>
            <binary/>
          </binaryDataArray>
        </binaryDataArrayList>
      </spectrum>
"#
        )
    }

    fn document(spectra: &[String]) -> String {
        let mut body = String::from(HEADER);
        body.push_str("  <run id=\"run0\">\n");
        body.push_str(&format!("    <spectrumList count=\"{}\">\n", spectra.len()));
        for entry in spectra {
            body.push_str(entry);
        }
        body.push_str("    </spectrumList>\n  </run>\n</mzML>\n");
        body
    }

    #[test]
    fn test_attribute_and_element_helpers() {
        let line = r#"<cvParam cvRef="IMS" accession="IMS:1000042" name="max count of pixels x" value="3"/>"#;
        assert_eq!(attribute_value(line, "accession"), Some("IMS:1000042"));
        assert_eq!(attribute_value(line, "value"), Some("3"));
        assert_eq!(attribute_value(line, "missing"), None);
        assert_eq!(element_name(line), "cvParam");
        assert_eq!(element_name("  <spectrumList count=\"2\">"), "spectrumList");
    }

    #[test]
    fn test_scan_collects_properties_and_records() {
        let spectra = [
            spectrum_entry(0, 1, 1, 100.0, ""),
            spectrum_entry(1, 2, 1, 50.0, ""),
        ];
        let (_dir, path) = write_document(&document(&spectra));
        let mut source = Source {
            imzml_path: path,
            ..Source::default()
        };
        let mut properties = PropertyMap::default();
        scan_source(&mut source, &mut properties).unwrap();

        assert!(properties.has("continuous"));
        assert!(properties.has("profile spectrum"));
        assert_eq!(properties.get_u32("max count of pixels x"), Some(2));
        assert_eq!(properties.get_u32("max count of pixels y"), Some(1));
        assert_eq!(properties.get_u32("number of measurements"), Some(2));
        assert_eq!(properties.get_str("m/z array"), Some("mzArray"));
        assert_eq!(properties.get_str("m/z array value type"), Some("64-bit float"));
        assert_eq!(properties.get_u32("intensity array value type (bytes)"), Some(4));
        assert_eq!(
            properties.get_str("universally unique identifier"),
            Some("{11111111-2222-3333-4444-555555555555}")
        );

        assert_eq!(source.records.len(), 2);
        let first = &source.records[0];
        assert_eq!(first.index, [0, 0, 0]);
        assert_eq!(first.mass.offset, 16);
        assert_eq!(first.mass.length, 3);
        assert_eq!(first.intensity.offset, 64);
        assert_eq!(first.infile_normalization, 100.0);
        let second = &source.records[1];
        assert_eq!(second.index, [1, 0, 0]);
        assert_eq!(second.mass.offset, 40);
        assert_eq!(second.intensity.offset, 76);
    }

    #[test]
    fn test_lone_pixel_size_resolves_as_area() {
        let spectra = [spectrum_entry(0, 1, 1, 1.0, "")];
        let (_dir, path) = write_document(&document(&spectra));
        let mut source = Source {
            imzml_path: path,
            ..Source::default()
        };
        let mut properties = PropertyMap::default();
        scan_source(&mut source, &mut properties).unwrap();

        let x = properties.get_f64("pixel size x").unwrap();
        let y = properties.get_f64("pixel size y").unwrap();
        assert!((x - 0.05).abs() < 1e-12);
        assert!((y - 0.05).abs() < 1e-12);
        assert_eq!(properties.get_f64("squared pixel size"), Some(2500.0));
        assert!((properties.get_f64("pixel size z").unwrap() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_missing_pixel_size_defaults_with_notice() {
        let body = document(&[spectrum_entry(0, 1, 1, 1.0, "")])
            .replace(
                r#"      <cvParam cvRef="IMS" accession="IMS:1000046" name="pixel size x" value="2500"/>"#,
                "",
            );
        let (_dir, path) = write_document(&body);
        let mut source = Source {
            imzml_path: path,
            ..Source::default()
        };
        let mut properties = PropertyMap::default();
        scan_source(&mut source, &mut properties).unwrap();

        assert!((properties.get_f64("pixel size x").unwrap() - 0.05).abs() < 1e-12);
        assert!((properties.get_f64("pixel size y").unwrap() - 0.05).abs() < 1e-12);
        assert!(properties.has("pixel size info"));
    }

    #[test]
    fn test_separate_pixel_sizes_convert_without_square_root() {
        let body = document(&[spectrum_entry(0, 1, 1, 1.0, "")]).replace(
            r#"      <cvParam cvRef="IMS" accession="IMS:1000046" name="pixel size x" value="2500"/>"#,
            r#"      <cvParam cvRef="IMS" accession="IMS:1000046" name="pixel size x" value="20"/>
      <cvParam cvRef="IMS" accession="IMS:1000047" name="pixel size y" value="40"/>"#,
        );
        let (_dir, path) = write_document(&body);
        let mut source = Source {
            imzml_path: path,
            ..Source::default()
        };
        let mut properties = PropertyMap::default();
        scan_source(&mut source, &mut properties).unwrap();

        assert!((properties.get_f64("pixel size x").unwrap() - 0.02).abs() < 1e-12);
        assert!((properties.get_f64("pixel size y").unwrap() - 0.04).abs() < 1e-12);
        assert!(!properties.has("squared pixel size"));
    }

    #[test]
    fn test_world_z_positions_drive_dense_remap() {
        let layer = |z: u32| {
            format!(
                "        <userParam name=\"3DPositionX\" value=\"100\"/>\n        <userParam name=\"3DPositionY\" value=\"100\"/>\n        <userParam name=\"3DPositionZ\" value=\"{z}\"/>\n"
            )
        };
        let spectra = [
            spectrum_entry(0, 1, 1, 1.0, &layer(30)),
            spectrum_entry(1, 2, 1, 1.0, &layer(10)),
            spectrum_entry(2, 1, 1, 1.0, &layer(20)),
            spectrum_entry(3, 2, 1, 1.0, &layer(20)),
        ];
        let (_dir, path) = write_document(&document(&spectra));
        let mut source = Source {
            imzml_path: path,
            ..Source::default()
        };
        let mut properties = PropertyMap::default();
        scan_source(&mut source, &mut properties).unwrap();

        let z_indices: Vec<u32> = source.records.iter().map(|r| r.index[2]).collect();
        assert_eq!(z_indices, vec![2, 0, 1, 1]);
        assert_eq!(properties.get_u32("max count of pixels z"), Some(3));
        assert!((properties.get_f64("pixel size z").unwrap() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_missing_group_declarations_fail() {
        let body = document(&[spectrum_entry(0, 1, 1, 1.0, "")]).replace("MS:1000514", "MS:1099514");
        let (_dir, path) = write_document(&body);
        let mut source = Source {
            imzml_path: path,
            ..Source::default()
        };
        let mut properties = PropertyMap::default();
        let result = scan_source(&mut source, &mut properties);
        assert!(matches!(result, Err(EngineError::Parse(_))));
    }

    #[test]
    fn test_missing_document_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = Source {
            imzml_path: dir.path().join("absent.imzML"),
            ..Source::default()
        };
        let mut properties = PropertyMap::default();
        let result = scan_source(&mut source, &mut properties);
        assert!(matches!(result, Err(EngineError::FileNotFound(_))));
    }
}

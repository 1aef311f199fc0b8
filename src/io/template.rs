//! Fill-in templates for the exported metadata document.
//!
//! `{key}` placeholders are substituted from a context map, `{#key}` opens a
//! block that is emitted only when the context contains the key and `{/key}`
//! closes it. Blocks do not nest. Every tag sits on its own line so the
//! written document scans cleanly with the line oriented reader.

use indexmap::IndexMap;
use regex::Regex;

pub(crate) type TemplateContext = IndexMap<String, String>;

/// Accession code for a controlled vocabulary name used in the templates.
pub(crate) fn text_to_code(name: &str) -> Option<&'static str> {
    match name {
        "16-bit float" => Some("1000520"),
        "32-bit integer" => Some("1000519"),
        "32-bit float" => Some("1000521"),
        "64-bit integer" => Some("1000522"),
        "64-bit float" => Some("1000523"),
        "continuous" => Some("1000030"),
        "processed" => Some("1000031"),
        "zlib compression" => Some("1000574"),
        "no compression" => Some("1000576"),
        "positive scan" => Some("1000130"),
        "negative scan" => Some("1000129"),
        "centroid spectrum" => Some("1000127"),
        "profile spectrum" => Some("1000128"),
        _ => None,
    }
}

pub(crate) struct TemplateRenderer {
    placeholder: Regex,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{[^{}]*\}").unwrap(),
        }
    }

    pub fn render(&self, view: &str, context: &TemplateContext) -> String {
        let mut out = String::with_capacity(view.len());
        let mut cursor = 0;
        let mut skipping = false;
        for found in self.placeholder.find_iter(view) {
            let token = &view[found.start() + 1..found.end() - 1];
            if skipping {
                // drop everything up to the closing tag, its name is not checked
                if token.starts_with('/') {
                    skipping = false;
                    cursor = found.end();
                }
                continue;
            }
            out.push_str(&view[cursor..found.start()]);
            cursor = found.end();
            if let Some(key) = token.strip_prefix('#') {
                skipping = !context.contains_key(key);
            } else if !token.starts_with('/') {
                out.push_str(context.get(token).map(String::as_str).unwrap_or_default());
            }
        }
        out.push_str(&view[cursor..]);
        out
    }
}

pub(crate) const IMZML_TEMPLATE_START: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<mzML xmlns="http://psi.hupo.org/ms/mzml" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="http://psi.hupo.org/ms/mzml http://psidev.info/files/ms/mzML/xsd/mzML1.1.0_idx.xsd" version="1.1">
<cvList count="3">
<cv id="MS" fullName="Proteomics Standards Initiative Mass Spectrometry Ontology" version="1.3.1" URI="http://psidev.info/ms/mzML/psi-ms.obo"/>
<cv id="UO" fullName="Unit Ontology" version="1.15" URI="http://obo.cvs.sourceforge.net/obo/obo/ontology/phenotype/unit.obo"/>
<cv id="IMS" fullName="Imaging MS Ontology" version="0.9.1" URI="http://www.maldi-msi.org/download/imzml/imagingMS.obo"/>
</cvList>
<fileDescription>
<fileContent>
<cvParam cvRef="MS" accession="MS:1000294" name="mass spectrum" value=""/>
<cvParam cvRef="MS" accession="MS:{spectrumtype_code}" name="{spectrumtype}" value=""/>
<cvParam cvRef="IMS" accession="IMS:{mode_code}" name="{mode}" value=""/>
<cvParam cvRef="IMS" accession="IMS:1000080" name="universally unique identifier" value="{uuid}"/>
<cvParam cvRef="IMS" accession="IMS:1000091" name="ibd SHA-1" value="{sha1sum}"/>
</fileContent>
</fileDescription>
<referenceableParamGroupList count="3">
<referenceableParamGroup id="spectrum">
<cvParam cvRef="MS" accession="MS:1000294" name="mass spectrum" value=""/>
<cvParam cvRef="MS" accession="MS:{spectrumtype_code}" name="{spectrumtype}" value=""/>
{#polarity}<cvParam cvRef="MS" accession="MS:{polarity_code}" name="{polarity}" value=""/>
{/polarity}</referenceableParamGroup>
<referenceableParamGroup id="mzArray">
<cvParam cvRef="MS" accession="MS:1000514" name="m/z array" value=""/>
<cvParam cvRef="MS" accession="MS:{mz_data_type_code}" name="{mz_data_type}" value=""/>
<cvParam cvRef="MS" accession="MS:{mz_compression_code}" name="{mz_compression}" value=""/>
<cvParam cvRef="IMS" accession="IMS:1000101" name="external data" value="true"/>
</referenceableParamGroup>
<referenceableParamGroup id="intensityArray">
<cvParam cvRef="MS" accession="MS:1000515" name="intensity array" value=""/>
<cvParam cvRef="MS" accession="MS:{int_data_type_code}" name="{int_data_type}" value=""/>
<cvParam cvRef="MS" accession="MS:{int_compression_code}" name="{int_compression}" value=""/>
<cvParam cvRef="IMS" accession="IMS:1000101" name="external data" value="true"/>
</referenceableParamGroup>
</referenceableParamGroupList>
<softwareList count="1">
<software id="mzimage" version="{software_version}">
<cvParam cvRef="MS" accession="MS:1000799" name="custom unreleased software tool" value="mzimage"/>
</software>
</softwareList>
<scanSettingsList count="1">
<scanSettings id="scanSettings1">
<cvParam cvRef="IMS" accession="IMS:1000042" name="max count of pixels x" value="{size_x}"/>
<cvParam cvRef="IMS" accession="IMS:1000043" name="max count of pixels y" value="{size_y}"/>
<cvParam cvRef="IMS" accession="IMS:1000044" name="max dimension x" value="{max dimension x}" unitCvRef="UO" unitAccession="UO:0000017" unitName="micrometer"/>
<cvParam cvRef="IMS" accession="IMS:1000045" name="max dimension y" value="{max dimension y}" unitCvRef="UO" unitAccession="UO:0000017" unitName="micrometer"/>
<cvParam cvRef="IMS" accession="IMS:1000046" name="pixel size x" value="{pixel size x}" unitCvRef="UO" unitAccession="UO:0000017" unitName="micrometer"/>
<cvParam cvRef="IMS" accession="IMS:1000047" name="pixel size y" value="{pixel size y}" unitCvRef="UO" unitAccession="UO:0000017" unitName="micrometer"/>
{#origin x}<cvParam accession="IMS:1000053" cvRef="IMS" name="absolute position offset x" value="{origin x}" unitCvRef="UO" unitAccession="UO:0000017" unitName="micrometer"/>
{/origin x}{#origin y}<cvParam accession="IMS:1000054" cvRef="IMS" name="absolute position offset y" value="{origin y}" unitCvRef="UO" unitAccession="UO:0000017" unitName="micrometer"/>
{/origin y}</scanSettings>
</scanSettingsList>
<instrumentConfigurationList count="1">
<instrumentConfiguration id="IC1">
<cvParam cvRef="MS" accession="MS:1000031" name="instrument model" value=""/>
</instrumentConfiguration>
</instrumentConfigurationList>
<dataProcessingList count="1">
<dataProcessing id="mzimageProcessing">
<processingMethod order="1" softwareRef="mzimage">
<cvParam cvRef="MS" accession="MS:1000544" name="Conversion to mzML" value=""/>
</processingMethod>
</dataProcessing>
</dataProcessingList>
<run defaultInstrumentConfigurationRef="IC1" id="Experiment{run_id}" startTimeStamp="{timestamp}">
<spectrumList count="{num_spectra}" defaultDataProcessingRef="mzimageProcessing">
"#;

pub(crate) const IMZML_SPECTRUM_TEMPLATE: &str = r#"<spectrum defaultArrayLength="0" id="spectrum={index}" index="{index}">
<referenceableParamGroupRef ref="spectrum"/>
{#tic}<cvParam accession="MS:1000285" cvRef="MS" name="total ion current" value="{tic}"/>
{/tic}<scanList count="1">
<cvParam cvRef="MS" accession="MS:1000795" name="no combination" value=""/>
<scan instrumentConfigurationRef="IC1">
<cvParam accession="IMS:1000050" cvRef="IMS" name="position x" value="{x}"/>
<cvParam accession="IMS:1000051" cvRef="IMS" name="position y" value="{y}"/>
{#z}<cvParam accession="IMS:1000052" cvRef="IMS" name="position z" value="{z}"/>
{/z}</scan>
</scanList>
<binaryDataArrayList count="2">
<binaryDataArray encodedLength="0">
<referenceableParamGroupRef ref="mzArray"/>
<cvParam accession="IMS:1000103" cvRef="IMS" name="external array length" value="{mz_len}"/>
<cvParam accession="IMS:1000104" cvRef="IMS" name="external encoded length" value="{mz_enc_len}"/>
<cvParam accession="IMS:1000102" cvRef="IMS" name="external offset" value="{mz_offset}"/>
<binary/>
</binaryDataArray>
<binaryDataArray encodedLength="0">
<referenceableParamGroupRef ref="intensityArray"/>
<cvParam accession="IMS:1000103" cvRef="IMS" name="external array length" value="{int_len}"/>
<cvParam accession="IMS:1000104" cvRef="IMS" name="external encoded length" value="{int_enc_len}"/>
<cvParam accession="IMS:1000102" cvRef="IMS" name="external offset" value="{int_offset}"/>
<binary/>
</binaryDataArray>
</binaryDataArrayList>
</spectrum>
"#;

pub(crate) const IMZML_TEMPLATE_END: &str = "</spectrumList>\n</run>\n</mzML>\n";

#[cfg(test)]
mod test {
    use super::*;

    fn context_of(pairs: &[(&str, &str)]) -> TemplateContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_placeholder_substitution() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render(
            "value=\"{pixel size x}\" count=\"{n}\"",
            &context_of(&[("pixel size x", "50"), ("n", "3")]),
        );
        assert_eq!(out, "value=\"50\" count=\"3\"");
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render("a{missing}b", &context_of(&[]));
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_conditional_block_kept_when_key_present() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render(
            "start {#tic}tic=\"{tic}\" {/tic}end",
            &context_of(&[("tic", "42")]),
        );
        assert_eq!(out, "start tic=\"42\" end");
    }

    #[test]
    fn test_conditional_block_dropped_when_key_absent() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render("start {#tic}tic=\"{tic}\" {/tic}end", &context_of(&[]));
        assert_eq!(out, "start end");
    }

    #[test]
    fn test_spectrum_template_renders_positions() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render(
            IMZML_SPECTRUM_TEMPLATE,
            &context_of(&[
                ("index", "0"),
                ("x", "1"),
                ("y", "2"),
                ("z", "1"),
                ("mz_len", "3"),
                ("mz_enc_len", "24"),
                ("mz_offset", "16"),
                ("int_len", "3"),
                ("int_enc_len", "12"),
                ("int_offset", "40"),
            ]),
        );
        assert!(out.contains("name=\"position x\" value=\"1\""));
        assert!(out.contains("name=\"position y\" value=\"2\""));
        assert!(out.contains("name=\"position z\" value=\"1\""));
        assert!(!out.contains("total ion current"));
        assert!(!out.contains('{'));
    }

    #[test]
    fn test_code_table() {
        assert_eq!(text_to_code("64-bit float"), Some("1000523"));
        assert_eq!(text_to_code("no compression"), Some("1000576"));
        assert_eq!(text_to_code("madeup"), None);
    }
}

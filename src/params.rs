use std::borrow::Cow;
use std::fmt::Display;
use std::str::{self, FromStr};

use indexmap::IndexMap;

pub fn curie_to_num(curie: &str) -> (Option<ControlledVocabulary>, Option<u32>) {
    let mut parts = curie.split(':');
    let prefix = match parts.next() {
        Some(v) => ControlledVocabulary::from(v).as_option(),
        None => None,
    };
    if let Some(k) = parts.next() {
        match k.parse() {
            Ok(v) => (prefix, Some(v)),
            Err(_) => (prefix, None),
        }
    } else {
        (prefix, None)
    }
}

/// A single controlled-vocabulary or user-supplied parameter extracted from
/// the description file, the `accession`/`name`/`value` attribute triple.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: String,
    pub accession: Option<u32>,
    pub controlled_vocabulary: Option<ControlledVocabulary>,
    pub unit: Unit,
}

impl Param {
    pub fn new() -> Param {
        Param {
            ..Default::default()
        }
    }

    pub fn new_key_value(name: String, value: String) -> Param {
        let mut inst = Self::new();
        inst.name = name;
        inst.value = value;
        inst
    }

    pub fn coerce<T: str::FromStr>(&self) -> Result<T, T::Err> {
        self.value.parse::<T>()
    }

    pub fn is_controlled(&self) -> bool {
        self.accession.is_some()
    }

    pub fn curie(&self) -> Option<String> {
        match (self.controlled_vocabulary, self.accession) {
            (Some(cv), Some(acc)) => Some(format!("{}:{:07}", cv.prefix(), acc)),
            _ => None,
        }
    }

    pub fn with_unit<S: AsRef<str>, A: AsRef<str>>(mut self, accession: S, name: A) -> Param {
        self.unit = Unit::from_accession(accession.as_ref());
        if matches!(self.unit, Unit::Unknown) {
            self.unit = Unit::from_name(name.as_ref());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ControlledVocabulary {
    MS,
    IMS,
    UO,
    Unknown,
}

const MS_CV: &str = "MS";
const IMS_CV: &str = "IMS";
const UO_CV: &str = "UO";

impl ControlledVocabulary {
    pub fn prefix(&self) -> Cow<'static, str> {
        match &self {
            Self::MS => Cow::Borrowed(MS_CV),
            Self::IMS => Cow::Borrowed(IMS_CV),
            Self::UO => Cow::Borrowed(UO_CV),
            Self::Unknown => Cow::Borrowed(""),
        }
    }

    pub fn as_option(&self) -> Option<Self> {
        match self {
            Self::Unknown => None,
            _ => Some(*self),
        }
    }

    pub fn param<A: AsRef<str>, S: Into<String>>(&self, accession: A, name: S) -> Param {
        let mut param = Param::new();
        param.controlled_vocabulary = Some(*self);
        param.name = name.into();
        if let Some(nb) = accession.as_ref().split(':').nth(1) {
            param.accession = nb.parse().ok();
        }
        param
    }

    pub fn param_val<S: Into<String>, A: AsRef<str>, V: ToString>(
        &self,
        accession: A,
        name: S,
        value: V,
    ) -> Param {
        let mut param = self.param(accession, name);
        param.value = value.to_string();
        param
    }
}

impl From<&str> for ControlledVocabulary {
    fn from(s: &str) -> Self {
        match s {
            "MS" | "PSI-MS" => Self::MS,
            "IMS" => Self::IMS,
            "UO" => Self::UO,
            _ => Self::Unknown,
        }
    }
}

impl FromStr for ControlledVocabulary {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// The fixed accession vocabulary the scanner and exporter understand.
/// Codes outside this set are stored verbatim as string properties.
pub mod accession {
    pub const IBD_UUID: &str = "IMS:1000080";
    pub const IBD_SHA1: &str = "IMS:1000091";
    pub const CONTINUOUS: &str = "IMS:1000030";
    pub const PROCESSED: &str = "IMS:1000031";

    pub const MAX_COUNT_OF_PIXELS_X: &str = "IMS:1000042";
    pub const MAX_COUNT_OF_PIXELS_Y: &str = "IMS:1000043";
    pub const MAX_DIMENSION_X: &str = "IMS:1000044";
    pub const MAX_DIMENSION_Y: &str = "IMS:1000045";
    pub const PIXEL_SIZE_X: &str = "IMS:1000046";
    pub const PIXEL_SIZE_Y: &str = "IMS:1000047";
    pub const ABSOLUTE_POSITION_OFFSET_X: &str = "IMS:1000053";
    pub const ABSOLUTE_POSITION_OFFSET_Y: &str = "IMS:1000054";

    pub const POSITION_X: &str = "IMS:1000050";
    pub const POSITION_Y: &str = "IMS:1000051";
    pub const POSITION_Z: &str = "IMS:1000052";

    pub const EXTERNAL_OFFSET: &str = "IMS:1000102";
    pub const EXTERNAL_ARRAY_LENGTH: &str = "IMS:1000103";
    pub const EXTERNAL_ENCODED_LENGTH: &str = "IMS:1000104";

    pub const MZ_ARRAY: &str = "MS:1000514";
    pub const INTENSITY_ARRAY: &str = "MS:1000515";
    pub const BIT32_FLOAT: &str = "MS:1000521";
    pub const BIT64_FLOAT: &str = "MS:1000523";
    pub const BIT32_INTEGER: &str = "MS:1000519";
    pub const BIT64_INTEGER: &str = "MS:1000522";
    pub const CENTROID_SPECTRUM: &str = "MS:1000127";
    pub const PROFILE_SPECTRUM: &str = "MS:1000128";
    pub const TOTAL_ION_CURRENT: &str = "MS:1000285";
}

/// Units that a parameter's value might have. The geometry parameters of this
/// format are micrometer-valued in the file and millimeter-valued in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    MZ,
    Mass,
    PartsPerMillion,

    Micrometer,
    Millimeter,
    Nanometer,

    DetectorCounts,
    PercentBasePeak,

    Unknown,
}

impl Unit {
    pub fn for_param(&self) -> (&'static str, &'static str) {
        match self {
            Self::MZ => ("MS:1000040", "m/z"),
            Self::Mass => ("UO:0000221", "dalton"),
            Self::PartsPerMillion => ("UO:0000169", "parts per million"),

            Self::Micrometer => ("UO:0000017", "micrometer"),
            Self::Millimeter => ("UO:0000016", "millimeter"),
            Self::Nanometer => ("UO:0000018", "nanometer"),

            Self::DetectorCounts => ("MS:1000131", "number of detector counts"),
            Self::PercentBasePeak => ("MS:1000132", "percent of base peak"),

            _ => ("", ""),
        }
    }

    pub fn from_name(name: &str) -> Unit {
        match name {
            "m/z" => Self::MZ,
            "dalton" => Self::Mass,
            "parts per million" => Self::PartsPerMillion,

            "micrometer" => Self::Micrometer,
            "millimeter" => Self::Millimeter,
            "nanometer" => Self::Nanometer,

            "number of detector counts" => Self::DetectorCounts,
            "percent of base peak" => Self::PercentBasePeak,
            _ => Unit::Unknown,
        }
    }

    pub fn from_accession(acc: &str) -> Unit {
        match acc {
            "MS:1000040" => Self::MZ,
            "UO:0000221" => Self::Mass,
            "UO:0000169" => Self::PartsPerMillion,

            "UO:0000017" => Self::Micrometer,
            "UO:0000016" => Self::Millimeter,
            "UO:0000018" => Self::Nanometer,

            "MS:1000131" => Self::DetectorCounts,
            "MS:1000132" => Self::PercentBasePeak,
            _ => Unit::Unknown,
        }
    }

    pub fn from_param(param: &Param) -> Unit {
        param.unit
    }
}

impl Default for Unit {
    fn default() -> Self {
        Self::Unknown
    }
}

/// A value in the image's free-form property table. Values recorded by a
/// registered accession handler carry their native type; values stored by
/// the unknown-code fallback arrive as strings and are coerced on read.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Double(f64),
    UInt(u32),
    Boolean(bool),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::UInt(v) => Some(*v as f64),
            Self::String(s) => s.parse().ok(),
            Self::Boolean(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Double(v) if *v >= 0.0 => Some(*v as u32),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Double(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::UInt(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Insertion-ordered key/value table attached to an image. Keys written by
/// the scanner keep the parameter names used in the description file.
pub type PropertyMap = IndexMap<String, PropertyValue>;

pub trait PropertyMapExt {
    fn get_f64(&self, key: &str) -> Option<f64>;
    fn get_u32(&self, key: &str) -> Option<u32>;
    fn get_str(&self, key: &str) -> Option<&str>;
    fn set<K: Into<String>, V: Into<PropertyValue>>(&mut self, key: K, value: V);
    fn has(&self, key: &str) -> bool;
}

impl PropertyMapExt for PropertyMap {
    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(PropertyValue::as_f64)
    }

    fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(PropertyValue::as_u32)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    fn set<K: Into<String>, V: Into<PropertyValue>>(&mut self, key: K, value: V) {
        self.insert(key.into(), value.into());
    }

    fn has(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

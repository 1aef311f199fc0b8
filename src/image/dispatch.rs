//! One-time selection of the typed data path from the declared storage
//! layout and binary element types.

use crate::catalog::{SpectrumFormat, ValueType};
use crate::error::EngineError;
use crate::image::access::{FormatAccess, TypedAccess};

/// Build the access strategy for an image. Profile spectra in processed
/// memory order and integer intensity encodings are readable at the catalog
/// level but have no processing path, so they are rejected here before any
/// binary data is touched.
pub(crate) fn build_access(
    format: SpectrumFormat,
    mass_type: ValueType,
    intensity_type: ValueType,
) -> Result<Box<dyn FormatAccess>, EngineError> {
    if format == SpectrumFormat::ProcessedProfile {
        return Err(EngineError::unsupported(
            "profile spectra in processed memory order cannot be processed; \
             resample them onto a shared mass axis and store them as continuous",
        ));
    }
    match (mass_type, intensity_type) {
        (ValueType::Float32, ValueType::Float32) => Ok(Box::new(TypedAccess::<f32, f32>::new())),
        (ValueType::Float32, ValueType::Float64) => Ok(Box::new(TypedAccess::<f32, f64>::new())),
        (ValueType::Float64, ValueType::Float32) => Ok(Box::new(TypedAccess::<f64, f32>::new())),
        (ValueType::Float64, ValueType::Float64) => Ok(Box::new(TypedAccess::<f64, f64>::new())),
        (mass_type, intensity_type) => Err(EngineError::unsupported(format!(
            "no processing path for {mass_type} mass values with {intensity_type} intensities"
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_float_pairs_resolve() {
        for mass in [ValueType::Float32, ValueType::Float64] {
            for intensity in [ValueType::Float32, ValueType::Float64] {
                assert!(
                    build_access(SpectrumFormat::ContinuousProfile, mass, intensity).is_ok()
                );
            }
        }
    }

    #[test]
    fn test_integer_intensities_are_rejected() {
        let result = build_access(
            SpectrumFormat::ContinuousProfile,
            ValueType::Float64,
            ValueType::Int32,
        );
        assert!(matches!(result, Err(EngineError::UnsupportedFormat(_))));
        let result = build_access(
            SpectrumFormat::ContinuousCentroid,
            ValueType::Int64,
            ValueType::Float32,
        );
        assert!(matches!(result, Err(EngineError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_processed_profile_is_rejected() {
        let result = build_access(
            SpectrumFormat::ProcessedProfile,
            ValueType::Float64,
            ValueType::Float32,
        );
        assert!(matches!(result, Err(EngineError::UnsupportedFormat(_))));
    }
}

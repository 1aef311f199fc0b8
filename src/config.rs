use std::thread;

use mzpeaks::Tolerance;

use crate::error::EngineError;
use crate::signal::{
    BaselineCorrection, IntensityTransform, NormalizationStrategy, RangePoolingStrategy,
    SmoothingStrategy,
};

/// Processing settings applied whenever spectra are pulled through the signal
/// pipeline, both while building overview spectra and while rendering ion
/// images.
///
/// The pipeline order is fixed: normalize, smooth, correct the baseline,
/// transform intensities, pool the requested window. The settings here only
/// select what each stage does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub normalization: NormalizationStrategy,
    pub smoothing: SmoothingStrategy,
    /// Half-window of the smoothing kernel, in samples.
    pub smoothing_half_window: usize,
    pub baseline: BaselineCorrection,
    /// Half-window of the baseline estimator, in samples.
    pub baseline_half_window: usize,
    pub transform: IntensityTransform,
    pub pooling: RangePoolingStrategy,
    /// Mass window half-width used when querying ion images and when binning
    /// centroids onto a shared axis.
    pub tolerance: Tolerance,
    /// Worker threads used for initialization and image generation.
    pub threads: usize,
    /// Bin count of the shared mass axis built for processed centroid data.
    pub overview_bins: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            normalization: NormalizationStrategy::None,
            smoothing: SmoothingStrategy::None,
            smoothing_half_window: 2,
            baseline: BaselineCorrection::None,
            baseline_half_window: 50,
            transform: IntensityTransform::None,
            pooling: RangePoolingStrategy::Maximum,
            tolerance: Tolerance::PPM(75.0),
            threads: default_thread_count(),
            overview_bins: 1500,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tolerance.tol() <= 0.0 {
            return Err(EngineError::configuration(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.threads == 0 {
            return Err(EngineError::configuration("thread count must be non-zero"));
        }
        if self.overview_bins == 0 {
            return Err(EngineError::configuration("overview bin count must be non-zero"));
        }
        Ok(())
    }
}

pub fn default_thread_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pooling, RangePoolingStrategy::Maximum);
        assert_eq!(config.overview_bins, 1500);
        assert!(config.threads >= 1);
    }

    #[test]
    fn test_invalid_configurations_are_rejected() {
        let mut config = EngineConfig::default();
        config.threads = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.overview_bins = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.tolerance = Tolerance::PPM(0.0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.tolerance = Tolerance::Da(-0.5);
        assert!(config.validate().is_err());
    }
}

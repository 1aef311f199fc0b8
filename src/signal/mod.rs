//! The signal pipeline: normalize, smooth, baseline-subtract, transform,
//! range-pool. Every stage is a stateless pure function over an intensity
//! buffer so worker threads can run them concurrently on private buffers.

pub mod baseline;
pub mod interval;
pub mod normalization;
pub mod pooling;
pub mod smoothing;

pub use baseline::{BaselineCorrection, RunningMedian};
pub use interval::{Accumulator, Interval};
pub use normalization::NormalizationStrategy;
pub use pooling::RangePoolingStrategy;
pub use smoothing::SmoothingStrategy;

use std::fmt::Display;
use std::str::FromStr;

/// Monotone sample-wise intensity re-mapping, applied after baseline
/// subtraction. The functions are applied raw; zero or negative samples
/// produce the IEEE results.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntensityTransform {
    #[default]
    None,
    Log2,
    Log10,
    SquareRoot,
}

impl IntensityTransform {
    pub fn apply(&self, buffer: &mut [f64]) {
        match self {
            Self::None => {}
            Self::Log2 => buffer.iter_mut().for_each(|v| *v = v.log2()),
            Self::Log10 => buffer.iter_mut().for_each(|v| *v = v.log10()),
            Self::SquareRoot => buffer.iter_mut().for_each(|v| *v = v.sqrt()),
        }
    }
}

impl Display for IntensityTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::None => "None",
            Self::Log2 => "Log2",
            Self::Log10 => "Log10",
            Self::SquareRoot => "SquareRoot",
        };
        f.write_str(text)
    }
}

impl FromStr for IntensityTransform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(Self::None),
            "Log2" => Ok(Self::Log2),
            "Log10" => Ok(Self::Log10),
            "SquareRoot" => Ok(Self::SquareRoot),
            _ => Err(format!("unknown intensity transform '{s}'")),
        }
    }
}

/// Divide every sample by a per-pixel normalization factor. Factors are
/// sanitized against zero before they reach this point.
pub fn normalize(buffer: &mut [f64], factor: f64) {
    if factor != 1.0 {
        buffer.iter_mut().for_each(|v| *v /= factor);
    }
}

/// Replace a zero factor with 1.0 so downstream division stays finite.
pub fn non_zero_factor(factor: f64) -> f64 {
    if factor == 0.0 {
        1.0
    } else {
        factor
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_transform_log2() {
        let mut buf = vec![1.0, 2.0, 8.0];
        IntensityTransform::Log2.apply(&mut buf);
        assert_eq!(buf, vec![0.0, 1.0, 3.0]);
    }

    #[test]
    fn test_transform_sqrt() {
        let mut buf = vec![4.0, 9.0];
        IntensityTransform::SquareRoot.apply(&mut buf);
        assert_eq!(buf, vec![2.0, 3.0]);
    }

    #[test]
    fn test_transform_none_is_identity() {
        let mut buf = vec![-1.0, 0.5];
        IntensityTransform::None.apply(&mut buf);
        assert_eq!(buf, vec![-1.0, 0.5]);
    }

    #[test]
    fn test_normalize() {
        let mut buf = vec![2.0, 4.0, 6.0];
        normalize(&mut buf, 2.0);
        assert_eq!(buf, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_non_zero_factor() {
        assert_eq!(non_zero_factor(0.0), 1.0);
        assert_eq!(non_zero_factor(2.5), 2.5);
    }

    #[test]
    fn test_transform_round_trips_names() {
        for t in [
            IntensityTransform::None,
            IntensityTransform::Log2,
            IntensityTransform::Log10,
            IntensityTransform::SquareRoot,
        ] {
            assert_eq!(t.to_string().parse::<IntensityTransform>(), Ok(t));
        }
    }
}

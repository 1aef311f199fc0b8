use std::fmt::Display;
use std::str::FromStr;

use super::pooling::median;

/// How the per-spectrum scaling factor is obtained before any other signal
/// processing step runs.
///
/// [`NormalizationStrategy::InFile`] reuses the factor recorded in the source
/// metadata and [`NormalizationStrategy::External`] reads it from a caller
/// supplied image, so neither can be computed from the signal alone and both
/// are resolved by the engine rather than by [`NormalizationStrategy::factor`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizationStrategy {
    #[default]
    None,
    TotalIonCurrent,
    Sum,
    Mean,
    Maximum,
    RootMeanSquare,
    Median,
    InFile,
    External,
}

impl NormalizationStrategy {
    /// Compute the scaling factor from a spectrum. `centroided` selects the
    /// discrete form of the total ion current.
    pub fn factor(&self, mzs: &[f64], intensities: &[f64], centroided: bool) -> f64 {
        if intensities.is_empty() {
            return 1.0;
        }
        match self {
            Self::None | Self::InFile | Self::External => 1.0,
            Self::TotalIonCurrent => total_ion_current(mzs, intensities, centroided),
            Self::Sum => intensities.iter().sum(),
            Self::Mean => intensities.iter().sum::<f64>() / intensities.len() as f64,
            Self::Maximum => intensities.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::RootMeanSquare => {
                (intensities.iter().map(|x| x * x).sum::<f64>() / intensities.len() as f64).sqrt()
            }
            Self::Median => median(intensities),
        }
    }
}

impl Display for NormalizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::None => "None",
            Self::TotalIonCurrent => "TIC",
            Self::Sum => "Sum",
            Self::Mean => "Mean",
            Self::Maximum => "Maximum",
            Self::RootMeanSquare => "RMS",
            Self::Median => "Median",
            Self::InFile => "InFile",
            Self::External => "External",
        };
        f.write_str(text)
    }
}

impl FromStr for NormalizationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(Self::None),
            "TIC" | "TotalIonCurrent" => Ok(Self::TotalIonCurrent),
            "Sum" => Ok(Self::Sum),
            "Mean" => Ok(Self::Mean),
            "Max" | "Maximum" => Ok(Self::Maximum),
            "RMS" | "RootMeanSquare" => Ok(Self::RootMeanSquare),
            "Median" => Ok(Self::Median),
            "InFile" => Ok(Self::InFile),
            "External" => Ok(Self::External),
            _ => Err(format!("unknown normalization strategy '{s}'")),
        }
    }
}

/// Total ion current of a spectrum. Profile data is integrated with the
/// trapezoid rule over the mass axis, centroided data is a plain intensity
/// sum since peak spacing carries no meaning there.
pub fn total_ion_current(mzs: &[f64], intensities: &[f64], centroided: bool) -> f64 {
    if centroided || mzs.len() < 2 {
        return intensities.iter().sum();
    }
    let mut tic = 0.0;
    for i in 1..mzs.len() {
        tic += (mzs[i] - mzs[i - 1]) * (intensities[i] + intensities[i - 1]) * 0.5;
    }
    tic
}

use std::fmt::Display;
use std::str::FromStr;

/// Reduce a contiguous window of intensities to the one scalar shown at a
/// pixel. An empty window always pools to 0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangePoolingStrategy {
    Sum,
    Mean,
    #[default]
    Maximum,
    Median,
}

impl RangePoolingStrategy {
    pub fn pool(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Self::Sum => values.iter().sum(),
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Median => median(values),
        }
    }
}

impl Display for RangePoolingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Sum => "Sum",
            Self::Mean => "Mean",
            Self::Maximum => "Maximum",
            Self::Median => "Median",
        };
        f.write_str(text)
    }
}

impl FromStr for RangePoolingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Sum" => Ok(Self::Sum),
            "Mean" => Ok(Self::Mean),
            "Maximum" => Ok(Self::Maximum),
            "Median" => Ok(Self::Median),
            _ => Err(format!("unknown range pooling strategy '{s}'")),
        }
    }
}

/// Median by partial selection, averaging the two central order statistics
/// for even counts. The scratch slice is reordered.
pub fn median_of(scratch: &mut [f64]) -> f64 {
    let n = scratch.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        let (_, mid, _) = scratch.select_nth_unstable_by(n / 2, f64::total_cmp);
        *mid
    } else {
        let (left, upper, _) = scratch.select_nth_unstable_by(n / 2, f64::total_cmp);
        let upper = *upper;
        let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lower + upper) * 0.5
    }
}

pub fn median(values: &[f64]) -> f64 {
    let mut scratch = values.to_vec();
    median_of(&mut scratch)
}

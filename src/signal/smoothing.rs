use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmoothingStrategy {
    #[default]
    None,
    SavitzkyGolay,
    Gaussian,
}

impl SmoothingStrategy {
    /// Build the symmetric convolution kernel of size `2*half_window + 1`,
    /// or `None` when smoothing is disabled.
    pub fn kernel(&self, half_window: usize) -> Option<Vec<f64>> {
        match self {
            Self::None => None,
            Self::SavitzkyGolay => Some(savitzky_golay_kernel(half_window)),
            Self::Gaussian => Some(gaussian_kernel(half_window)),
        }
    }

    pub fn apply(&self, buffer: &mut [f64], half_window: usize) {
        if let Some(kernel) = self.kernel(half_window) {
            filter(buffer, &kernel);
        }
    }
}

impl Display for SmoothingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::None => "None",
            Self::SavitzkyGolay => "SavitzkyGolay",
            Self::Gaussian => "Gaussian",
        };
        f.write_str(text)
    }
}

impl FromStr for SmoothingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(Self::None),
            "SavitzkyGolay" => Ok(Self::SavitzkyGolay),
            "Gaussian" => Ok(Self::Gaussian),
            _ => Err(format!("unknown smoothing strategy '{s}'")),
        }
    }
}

/// Degree-3 Savitzky-Golay smoothing weights over a window of
/// `2*half_window + 1` equally spaced samples. The cubic least-squares fit
/// has the closed form
/// `w_i = (3*(3m^2 + 3m - 1) - 15*i^2) / ((2m-1)*(2m+1)*(2m+3))`
/// for offsets `i` in `[-m, m]`.
pub fn savitzky_golay_kernel(half_window: usize) -> Vec<f64> {
    let m = half_window as f64;
    let norm = (2.0 * m - 1.0) * (2.0 * m + 1.0) * (2.0 * m + 3.0);
    let a = 3.0 * (3.0 * m * m + 3.0 * m - 1.0);
    (0..2 * half_window + 1)
        .map(|j| {
            let i = j as f64 - m;
            (a - 15.0 * i * i) / norm
        })
        .collect()
}

/// Gaussian weights with `sigma = half_window / 4`, normalized to unit sum.
pub fn gaussian_kernel(half_window: usize) -> Vec<f64> {
    let sigma = half_window as f64 / 4.0;
    let mut kernel: Vec<f64> = (0..2 * half_window + 1)
        .map(|j| {
            let d = (j as f64 - half_window as f64) / sigma;
            (-0.5 * d * d).exp()
        })
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= total);
    kernel
}

/// Convolve `buffer` with `kernel` in place, replicating the edge samples so
/// every output position sees a full window.
pub fn filter(buffer: &mut [f64], kernel: &[f64]) {
    let n = buffer.len();
    if n == 0 || kernel.len() < 2 {
        return;
    }
    let half_window = kernel.len() / 2;
    let mut padded = Vec::with_capacity(n + 2 * half_window);
    padded.extend(std::iter::repeat(buffer[0]).take(half_window));
    padded.extend_from_slice(buffer);
    padded.extend(std::iter::repeat(buffer[n - 1]).take(half_window));

    for (i, out) in buffer.iter_mut().enumerate() {
        *out = kernel
            .iter()
            .zip(&padded[i..i + kernel.len()])
            .map(|(k, v)| k * v)
            .sum();
    }
}

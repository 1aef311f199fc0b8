use std::collections::VecDeque;
use std::fmt::Display;
use std::str::FromStr;

use super::pooling::median_of;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaselineCorrection {
    #[default]
    None,
    TopHat,
    Median,
}

impl BaselineCorrection {
    /// Estimate the baseline of `buffer` with the configured half-window.
    /// Returns `None` when correction is disabled.
    pub fn estimate(&self, buffer: &[f64], half_window: usize) -> Option<Vec<f64>> {
        match self {
            Self::None => None,
            Self::TopHat => Some(tophat_baseline(buffer, half_window)),
            Self::Median => Some(running_median_baseline(buffer, half_window)),
        }
    }

    /// Estimate and subtract the baseline in place.
    pub fn apply(&self, buffer: &mut [f64], half_window: usize) {
        if let Some(baseline) = self.estimate(buffer, half_window) {
            for (v, b) in buffer.iter_mut().zip(baseline) {
                *v -= b;
            }
        }
    }
}

impl Display for BaselineCorrection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::None => "None",
            Self::TopHat => "TopHat",
            Self::Median => "Median",
        };
        f.write_str(text)
    }
}

impl FromStr for BaselineCorrection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(Self::None),
            "TopHat" => Ok(Self::TopHat),
            "Median" => Ok(Self::Median),
            _ => Err(format!("unknown baseline correction '{s}'")),
        }
    }
}

/// One morphological pass (erosion with `min`, dilation with `max`) using
/// the van Herk sliding-window scheme: the input is padded with replicated
/// edge samples so every window is full, then cumulative extrema are taken
/// forward and backward over blocks of `2*half_window + 1` and each output
/// is the extremum of the two block scans covering its window. Runs in O(n)
/// independent of the window size.
fn morphological_pass(values: &[f64], half_window: usize, pick: fn(f64, f64) -> f64) -> Vec<f64> {
    let n = values.len();
    if n == 0 || half_window == 0 {
        return values.to_vec();
    }
    let k = 2 * half_window + 1;
    let mut padded = Vec::with_capacity(n + 2 * half_window);
    padded.extend(std::iter::repeat(values[0]).take(half_window));
    padded.extend_from_slice(values);
    padded.extend(std::iter::repeat(values[n - 1]).take(half_window));

    let padded_len = padded.len();
    let mut forward = vec![0.0; padded_len];
    let mut backward = vec![0.0; padded_len];

    let mut start = 0;
    while start < padded_len {
        let end = (start + k).min(padded_len);
        let mut acc = padded[start];
        for j in start..end {
            acc = if j == start { padded[j] } else { pick(acc, padded[j]) };
            forward[j] = acc;
        }
        let mut acc = padded[end - 1];
        for j in (start..end).rev() {
            acc = if j == end - 1 { padded[j] } else { pick(acc, padded[j]) };
            backward[j] = acc;
        }
        start = end;
    }

    (0..n)
        .map(|i| pick(forward[i + 2 * half_window], backward[i]))
        .collect()
}

pub fn erosion(values: &[f64], half_window: usize) -> Vec<f64> {
    morphological_pass(values, half_window, f64::min)
}

pub fn dilation(values: &[f64], half_window: usize) -> Vec<f64> {
    morphological_pass(values, half_window, f64::max)
}

/// Morphological opening: erosion followed by dilation with the same
/// structuring element. The result underestimates peaks and tracks the slow
/// varying floor of the signal.
pub fn tophat_baseline(values: &[f64], half_window: usize) -> Vec<f64> {
    dilation(&erosion(values, half_window), half_window)
}

/// Streaming median over a window of `2*half_window + 1` samples. The window
/// is preloaded with the first pushed value, so early outputs repeat it
/// until the window has seen enough real samples.
#[derive(Debug, Clone)]
pub struct RunningMedian {
    window: VecDeque<f64>,
    capacity: usize,
    scratch: Vec<f64>,
}

impl RunningMedian {
    pub fn new(half_window: usize) -> Self {
        let capacity = 2 * half_window + 1;
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            scratch: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) -> f64 {
        if self.window.is_empty() {
            self.window.extend(std::iter::repeat(value).take(self.capacity));
        } else {
            self.window.pop_front();
            self.window.push_back(value);
        }
        self.scratch.clear();
        self.scratch.extend(self.window.iter());
        median_of(&mut self.scratch)
    }
}

pub fn running_median_baseline(values: &[f64], half_window: usize) -> Vec<f64> {
    let mut rm = RunningMedian::new(half_window);
    values.iter().map(|v| rm.push(*v)).collect()
}

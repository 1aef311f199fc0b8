/// Streaming summary of a set of samples. Tracks enough state to answer
/// sum, mean, min and max without keeping the samples themselves, and merges
/// with the summaries built by other worker threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulator {
    sum: f64,
    min: f64,
    max: f64,
    count: u64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }

    pub fn merge(&mut self, other: &Self) {
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// One centroid bin on the shared mass axis: the `x` accumulator summarises
/// the mass positions that fell into the bin, `y` their intensities.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Interval {
    pub x: Accumulator,
    pub y: Accumulator,
}

impl Interval {
    pub fn add(&mut self, x: f64, y: f64) {
        self.x.add(x);
        self.y.add(y);
    }

    pub fn merge(&mut self, other: &Self) {
        self.x.merge(&other.x);
        self.y.merge(&other.y);
    }
}

//! Per-Session Anomaly Detection
//!
//! Online statistics over the observed traffic rate: an exponential moving
//! average for trend plus Welford accumulators for a numerically stable
//! running mean and variance. The score is the deviation of the newest
//! observation in standard deviations. No I/O, no clock reads.

/// Online traffic-rate detector
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    alpha: f64,
    ema: f64,
    count: u64,
    mean: f64,
    m2: f64,
}

impl AnomalyDetector {
    /// Create a detector with EMA smoothing factor `alpha`
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            ema: 0.0,
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Fold in one observation and return its deviation score
    ///
    /// Returns `0.0` until two observations exist or while the standard
    /// deviation is zero; otherwise `(value - mean) / stddev`.
    pub fn update(&mut self, value: f64) -> f64 {
        if self.count == 0 {
            self.ema = value;
        } else {
            self.ema = self.alpha * value + (1.0 - self.alpha) * self.ema;
        }

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);

        let stddev = self.stddev();
        if self.count < 2 || stddev == 0.0 {
            0.0
        } else {
            (value - self.mean) / stddev
        }
    }

    /// Sample standard deviation, `0.0` below two observations
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    pub fn ema(&self) -> f64 {
        self.ema
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};

/// Uniformly sampled time series. Missing samples are NaN values at their
/// expected positions, never absent rows, so the index stays regular.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Timestamp of sample 0, seconds
    pub t0: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn new(fs: f64, t0: f64, data: Vec<f64>) -> Self {
        Self { fs, t0, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }

    pub fn timestamp(&self, index: usize) -> f64 {
        self.t0 + index as f64 / self.fs
    }

    /// Nearest sample index for a timestamp (may fall outside the series).
    pub fn sample_index(&self, t: f64) -> isize {
        ((t - self.t0) * self.fs).round() as isize
    }

    /// Build a series from explicit timestamps, validating monotonicity.
    /// The sampling frequency is derived from the covered span.
    pub fn from_timestamps(timestamps: &[f64], values: Vec<f64>) -> Result<Self> {
        if timestamps.len() != values.len() {
            return Err(SignalError::LengthMismatch {
                left: timestamps.len(),
                right: values.len(),
            });
        }
        if timestamps.len() < 2 {
            return Err(SignalError::EmptySeries("TimeSeries::from_timestamps"));
        }
        for (row, pair) in timestamps.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(SignalError::NonMonotonic(row + 1));
            }
        }
        let span = timestamps[timestamps.len() - 1] - timestamps[0];
        let fs = (timestamps.len() - 1) as f64 / span;
        Ok(Self {
            fs,
            t0: timestamps[0],
            data: values,
        })
    }
}

/// Boolean quality mask aligned 1:1 with the signal it qualifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mask {
    pub fs: f64,
    pub t0: f64,
    pub data: Vec<bool>,
}

impl Mask {
    pub fn new(fs: f64, t0: f64, data: Vec<bool>) -> Self {
        Self { fs, t0, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn timestamp(&self, index: usize) -> f64 {
        self.t0 + index as f64 / self.fs
    }

    /// Map this mask onto another index by backward fill: each target position
    /// takes the value of the first source sample at or after it. Positions
    /// past the last source sample take `fill_value`.
    pub fn reindex_bfill(&self, fs: f64, t0: f64, len: usize, fill_value: bool) -> Mask {
        let mut out = Vec::with_capacity(len);
        let mut src = 0usize;
        for i in 0..len {
            let t = t0 + i as f64 / fs;
            // half-sample tolerance so nominally equal timestamps match
            let eps = 0.5 / self.fs.max(fs);
            while src < self.data.len() && self.timestamp(src) < t - eps {
                src += 1;
            }
            out.push(if src < self.data.len() {
                self.data[src]
            } else {
                fill_value
            });
        }
        Mask { fs, t0, data: out }
    }
}

/// Rolling window specification shared by every windowed computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Window {
    /// Window size in samples
    pub size: usize,
    /// Center the window on the output sample
    pub center: bool,
    /// Keep every `step`-th output row
    pub step: usize,
}

impl Window {
    pub fn new(size: usize, center: bool, step: usize) -> Result<Self> {
        if size < 1 {
            return Err(SignalError::InvalidWindow(size));
        }
        if step < 1 {
            return Err(SignalError::InvalidWindow(step));
        }
        Ok(Self { size, center, step })
    }

    pub fn trailing(size: usize) -> Result<Self> {
        Self::new(size, false, 1)
    }

    pub fn centered(size: usize) -> Result<Self> {
        Self::new(size, true, 1)
    }

    /// Centered windows always use an odd size so the center sample is well
    /// defined; even sizes are reduced by one.
    pub fn effective_size(&self) -> usize {
        if self.center && self.size % 2 == 0 {
            (self.size - 1).max(1)
        } else {
            self.size
        }
    }
}

/// One detected skin conductance response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScrPeak {
    /// Peak timestamp, seconds
    pub time_s: f64,
    /// Time from the left prominence base to the peak, seconds
    pub rise_time_s: f64,
    /// Time from the peak to the right prominence base, seconds
    pub recovery_time_s: f64,
    /// Phasic amplitude at the peak, microsiemens
    pub amplitude: f64,
    /// Phasic-to-noise ratio sampled at the peak
    pub phasic_noise_ratio: f64,
}

pub(crate) fn check_same_index(
    left_fs: f64,
    left_t0: f64,
    right_fs: f64,
    right_t0: f64,
) -> Result<()> {
    let fs_ok = (left_fs - right_fs).abs() <= 1e-9 * left_fs.abs().max(1.0);
    let t0_ok = (left_t0 - right_t0).abs() <= 0.5 / left_fs.max(right_fs);
    if fs_ok && t0_ok {
        Ok(())
    } else {
        Err(SignalError::IndexMismatch {
            left_fs,
            left_t0,
            right_fs,
            right_t0,
        })
    }
}

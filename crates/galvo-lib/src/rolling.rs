//! Rolling-window primitives over uniformly sampled series.
//!
//! Windows that extend past either end of the series, or that contain any
//! non-finite sample, produce NaN. Centered windows always use an odd
//! effective size. `step > 1` keeps every step-th row starting at row 0 and
//! scales the output sampling frequency accordingly.

use crate::error::{Result, SignalError};
use crate::signal::{check_same_index, Mask, TimeSeries, Window};

/// Inclusive window bounds for output position `i`, or None when the window
/// would extend past the series.
fn window_bounds(i: usize, n: usize, size: usize, center: bool) -> Option<(usize, usize)> {
    if center {
        let half = size / 2;
        if i < half || i + half >= n {
            return None;
        }
        Some((i - half, i + half))
    } else {
        if i + 1 < size {
            return None;
        }
        Some((i + 1 - size, i))
    }
}

fn rolling_apply<F>(ts: &TimeSeries, window: &Window, f: F) -> TimeSeries
where
    F: Fn(&[f64]) -> f64,
{
    let size = window.effective_size();
    let n = ts.len();
    let mut out = Vec::with_capacity(n / window.step + 1);
    let mut i = 0;
    while i < n {
        let value = match window_bounds(i, n, size, window.center) {
            Some((lo, hi)) => {
                let slice = &ts.data[lo..=hi];
                if slice.iter().all(|v| v.is_finite()) {
                    f(slice)
                } else {
                    f64::NAN
                }
            }
            None => f64::NAN,
        };
        out.push(value);
        i += window.step;
    }
    TimeSeries {
        fs: ts.fs / window.step as f64,
        t0: ts.t0,
        data: out,
    }
}

pub fn rolling_mean(ts: &TimeSeries, window: &Window) -> TimeSeries {
    rolling_apply(ts, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

pub fn rolling_sum(ts: &TimeSeries, window: &Window) -> TimeSeries {
    rolling_apply(ts, window, |w| w.iter().sum::<f64>())
}

pub fn rolling_min(ts: &TimeSeries, window: &Window) -> TimeSeries {
    rolling_apply(ts, window, |w| w.iter().copied().fold(f64::MAX, f64::min))
}

/// Sample variance (ddof = 1); windows of one sample yield NaN.
pub fn rolling_var(ts: &TimeSeries, window: &Window) -> TimeSeries {
    rolling_apply(ts, window, sample_var)
}

pub fn rolling_std(ts: &TimeSeries, window: &Window) -> TimeSeries {
    rolling_apply(ts, window, |w| sample_var(w).sqrt())
}

fn sample_var(w: &[f64]) -> f64 {
    if w.len() < 2 {
        return f64::NAN;
    }
    let mean = w.iter().sum::<f64>() / w.len() as f64;
    w.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (w.len() as f64 - 1.0)
}

/// Rolling quantile with linear interpolation between order statistics.
pub fn rolling_quantile(ts: &TimeSeries, window: &Window, q: f64) -> TimeSeries {
    let q = q.clamp(0.0, 1.0);
    rolling_apply(ts, window, move |w| {
        let mut sorted = w.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let h = (sorted.len() - 1) as f64 * q;
        let lo = h.floor() as usize;
        let frac = h - lo as f64;
        if lo + 1 < sorted.len() {
            sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
        } else {
            sorted[lo]
        }
    })
}

/// Count of `true` samples in each rolling window; None where the window
/// extends past the mask.
pub(crate) fn rolling_true_count(
    data: &[bool],
    size: usize,
    center: bool,
) -> Vec<Option<usize>> {
    let n = data.len();
    (0..n)
        .map(|i| {
            window_bounds(i, n, size, center)
                .map(|(lo, hi)| data[lo..=hi].iter().filter(|&&b| b).count())
        })
        .collect()
}

fn check_axes(axes: &[&TimeSeries], op: &'static str) -> Result<()> {
    let first = axes.first().ok_or(SignalError::EmptySeries(op))?;
    for other in &axes[1..] {
        if other.len() != first.len() {
            return Err(SignalError::LengthMismatch {
                left: first.len(),
                right: other.len(),
            });
        }
        check_same_index(first.fs, first.t0, other.fs, other.t0)?;
    }
    Ok(())
}

fn scaled(ts: &TimeSeries, scale: f64) -> TimeSeries {
    TimeSeries {
        fs: ts.fs,
        t0: ts.t0,
        data: ts.data.iter().map(|v| v / scale).collect(),
    }
}

/// Per-axis rolling standard deviation summed across axes, with edge NaNs
/// resolved by backward then forward fill. Input axes are divided by `scale`
/// first (e.g. 64 raw counts per g).
pub fn std_sum(axes: &[&TimeSeries], window: &Window, scale: f64) -> Result<TimeSeries> {
    check_axes(axes, "std_sum")?;
    let per_axis: Vec<TimeSeries> = axes
        .iter()
        .map(|ts| rolling_std(&scaled(ts, scale), window))
        .collect();
    let mut out = per_axis[0].clone();
    for axis in &per_axis[1..] {
        for (dst, src) in out.data.iter_mut().zip(&axis.data) {
            *dst += src;
        }
    }
    bfill(&mut out.data);
    ffill(&mut out.data);
    Ok(out)
}

/// Activity index: per-axis rolling variance minus the systematic noise
/// floor, averaged across axes, clipped at zero before the square root.
/// Negative variance after noise subtraction is physically invalid, not an
/// error, so it is clipped rather than surfaced.
pub fn activity_index(
    axes: &[&TimeSeries],
    window: &Window,
    scale: f64,
    sigma_noise: f64,
) -> Result<TimeSeries> {
    check_axes(axes, "activity_index")?;
    let per_axis: Vec<TimeSeries> = axes
        .iter()
        .map(|ts| rolling_var(&scaled(ts, scale), window))
        .collect();
    let n_axes = per_axis.len() as f64;
    let mut out = per_axis[0].clone();
    for i in 0..out.data.len() {
        let mean = per_axis
            .iter()
            .map(|axis| axis.data[i] - sigma_noise)
            .sum::<f64>()
            / n_axes;
        out.data[i] = mean.max(0.0).sqrt();
    }
    Ok(out)
}

/// Signal magnitude vector (Euclidean norm) across axes.
pub fn magnitude_vector(axes: &[&TimeSeries], scale: f64) -> Result<TimeSeries> {
    check_axes(axes, "magnitude_vector")?;
    let n = axes[0].len();
    let data = (0..n)
        .map(|i| {
            axes.iter()
                .map(|ts| (ts.data[i] / scale).powi(2))
                .sum::<f64>()
                .sqrt()
        })
        .collect();
    Ok(TimeSeries {
        fs: axes[0].fs,
        t0: axes[0].t0,
        data,
    })
}

/// Mean of each fixed-width bucket anchored at `t0` (left-labeled); buckets
/// with no finite sample yield NaN.
pub fn mean_resample(ts: &TimeSeries, bucket_s: f64) -> TimeSeries {
    let bucket_len = ((bucket_s * ts.fs).round() as usize).max(1);
    let mut data = Vec::with_capacity(ts.len() / bucket_len + 1);
    for bucket in ts.data.chunks(bucket_len) {
        let finite: Vec<f64> = bucket.iter().copied().filter(|v| v.is_finite()).collect();
        data.push(if finite.is_empty() {
            f64::NAN
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        });
    }
    TimeSeries {
        fs: 1.0 / bucket_s,
        t0: ts.t0,
        data,
    }
}

/// Fraction of `true` samples per fixed-width bucket anchored at `t0`.
pub fn mask_mean_resample(mask: &Mask, bucket_s: f64) -> TimeSeries {
    let bucket_len = ((bucket_s * mask.fs).round() as usize).max(1);
    let data = mask
        .data
        .chunks(bucket_len)
        .map(|bucket| bucket.iter().filter(|&&b| b).count() as f64 / bucket.len() as f64)
        .collect();
    TimeSeries {
        fs: 1.0 / bucket_s,
        t0: mask.t0,
        data,
    }
}

pub(crate) fn bfill(data: &mut [f64]) {
    let mut next = f64::NAN;
    for v in data.iter_mut().rev() {
        if v.is_finite() {
            next = *v;
        } else if next.is_finite() {
            *v = next;
        }
    }
}

pub(crate) fn ffill(data: &mut [f64]) {
    let mut prev = f64::NAN;
    for v in data.iter_mut() {
        if v.is_finite() {
            prev = *v;
        } else if prev.is_finite() {
            *v = prev;
        }
    }
}

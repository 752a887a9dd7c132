//! IIR filtering: Butterworth design via bilinear transform and zero-phase
//! forward-backward application with odd-extension padding.

use std::f64::consts::PI;

use crate::error::{Result, SignalError};
use crate::signal::TimeSeries;

#[derive(Debug, Clone, Copy)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    const ONE: Complex = Complex { re: 1.0, im: 0.0 };
    const ZERO: Complex = Complex { re: 0.0, im: 0.0 };

    fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    fn add(self, o: Complex) -> Complex {
        Complex::new(self.re + o.re, self.im + o.im)
    }

    fn sub(self, o: Complex) -> Complex {
        Complex::new(self.re - o.re, self.im - o.im)
    }

    fn mul(self, o: Complex) -> Complex {
        Complex::new(
            self.re * o.re - self.im * o.im,
            self.re * o.im + self.im * o.re,
        )
    }

    fn div(self, o: Complex) -> Complex {
        let denom = o.re * o.re + o.im * o.im;
        Complex::new(
            (self.re * o.re + self.im * o.im) / denom,
            (self.im * o.re - self.re * o.im) / denom,
        )
    }

    fn scale(self, k: f64) -> Complex {
        Complex::new(self.re * k, self.im * k)
    }
}

/// Monic polynomial coefficients (descending powers) from its roots.
fn poly(roots: &[Complex]) -> Vec<Complex> {
    let mut coeffs = vec![Complex::ONE];
    for r in roots {
        let mut next = vec![Complex::ZERO; coeffs.len() + 1];
        for (i, c) in coeffs.iter().enumerate() {
            next[i] = next[i].add(*c);
            next[i + 1] = next[i + 1].sub(c.mul(*r));
        }
        coeffs = next;
    }
    coeffs
}

fn eval_poly(coeffs: &[f64], z: f64) -> f64 {
    coeffs.iter().fold(0.0, |acc, c| acc * z + c)
}

/// Analog Butterworth prototype poles on the unit circle, left half plane.
fn butter_prototype(order: usize) -> Vec<Complex> {
    (0..order)
        .map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex::new(theta.cos(), theta.sin())
        })
        .collect()
}

fn check_design(order: usize, cutoff_hz: f64, fs: f64) -> Result<f64> {
    if order < 1 {
        return Err(SignalError::InvalidConfig(
            "filter order must be >= 1".into(),
        ));
    }
    let nyquist = fs / 2.0;
    if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
        return Err(SignalError::InvalidCutoff { cutoff_hz, fs });
    }
    // pre-warp the normalized cutoff for the bilinear transform
    Ok((PI * cutoff_hz / (2.0 * nyquist)).tan())
}

/// Digital Butterworth lowpass transfer function `(b, a)`, unity DC gain.
pub fn butter_lowpass(order: usize, cutoff_hz: f64, fs: f64) -> Result<(Vec<f64>, Vec<f64>)> {
    let warped = check_design(order, cutoff_hz, fs)?;
    let digital_poles: Vec<Complex> = butter_prototype(order)
        .into_iter()
        .map(|s| {
            let p = s.scale(warped);
            Complex::ONE.add(p).div(Complex::ONE.sub(p))
        })
        .collect();
    let a: Vec<f64> = poly(&digital_poles).iter().map(|c| c.re).collect();
    // zeros at z = -1
    let zeros = vec![Complex::new(-1.0, 0.0); order];
    let b_proto: Vec<f64> = poly(&zeros).iter().map(|c| c.re).collect();
    let gain = eval_poly(&a, 1.0) / eval_poly(&b_proto, 1.0);
    let b = b_proto.iter().map(|c| c * gain).collect();
    Ok((b, a))
}

/// Digital Butterworth highpass transfer function `(b, a)`, unity Nyquist gain.
pub fn butter_highpass(order: usize, cutoff_hz: f64, fs: f64) -> Result<(Vec<f64>, Vec<f64>)> {
    let warped = check_design(order, cutoff_hz, fs)?;
    let digital_poles: Vec<Complex> = butter_prototype(order)
        .into_iter()
        .map(|s| {
            let p = Complex::new(warped, 0.0).div(s);
            Complex::ONE.add(p).div(Complex::ONE.sub(p))
        })
        .collect();
    let a: Vec<f64> = poly(&digital_poles).iter().map(|c| c.re).collect();
    // zeros at z = 1
    let zeros = vec![Complex::ONE; order];
    let b_proto: Vec<f64> = poly(&zeros).iter().map(|c| c.re).collect();
    let gain = eval_poly(&a, -1.0) / eval_poly(&b_proto, -1.0);
    let b = b_proto.iter().map(|c| c * gain).collect();
    Ok((b, a))
}

/// Direct form II transposed filtering with explicit initial conditions.
fn lfilter(b: &[f64], a: &[f64], x: &[f64], zi: &[f64]) -> Vec<f64> {
    let n = b.len().max(a.len());
    let mut bp = b.to_vec();
    let mut ap = a.to_vec();
    bp.resize(n, 0.0);
    ap.resize(n, 0.0);
    let m = n - 1;
    let mut z = zi.to_vec();
    z.resize(m, 0.0);
    let mut y = Vec::with_capacity(x.len());
    for &xv in x {
        let yv = bp[0] * xv + z[0];
        for i in 0..m - 1 {
            z[i] = bp[i + 1] * xv + z[i + 1] - ap[i + 1] * yv;
        }
        z[m - 1] = bp[m] * xv - ap[m] * yv;
        y.push(yv);
    }
    y
}

/// Steady-state initial conditions for a unit step input, so filtfilt does
/// not introduce startup transients.
fn lfilter_zi(b: &[f64], a: &[f64]) -> Vec<f64> {
    let n = b.len().max(a.len());
    let mut bp = b.to_vec();
    let mut ap = a.to_vec();
    bp.resize(n, 0.0);
    ap.resize(n, 0.0);
    let m = n - 1;
    // solve (I - A^T) zi = B with A the companion matrix of `a`
    let mut mat = vec![vec![0.0; m]; m];
    for i in 0..m {
        mat[i][i] += 1.0;
        mat[i][0] += ap[i + 1];
        if i > 0 {
            mat[i - 1][i] -= 1.0;
        }
    }
    let rhs: Vec<f64> = (0..m).map(|i| bp[i + 1] - ap[i + 1] * bp[0]).collect();
    solve_linear(mat, rhs)
}

/// Gaussian elimination with partial pivoting.
fn solve_linear(mut mat: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Vec<f64> {
    let m = rhs.len();
    for col in 0..m {
        let pivot = (col..m)
            .max_by(|&i, &j| {
                mat[i][col]
                    .abs()
                    .partial_cmp(&mat[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        mat.swap(col, pivot);
        rhs.swap(col, pivot);
        let diag = mat[col][col];
        if diag.abs() < 1e-300 {
            continue;
        }
        for row in col + 1..m {
            let factor = mat[row][col] / diag;
            for k in col..m {
                mat[row][k] -= factor * mat[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    let mut out = vec![0.0; m];
    for row in (0..m).rev() {
        let mut acc = rhs[row];
        for k in row + 1..m {
            acc -= mat[row][k] * out[k];
        }
        out[row] = if mat[row][row].abs() < 1e-300 {
            0.0
        } else {
            acc / mat[row][row]
        };
    }
    out
}

/// Zero-phase forward-backward filtering with odd-extension padding of
/// `3 * max(len(a), len(b))` samples (clamped to the input length).
pub fn filtfilt(b: &[f64], a: &[f64], x: &[f64]) -> Vec<f64> {
    if x.len() <= 1 {
        return x.to_vec();
    }
    let ntaps = b.len().max(a.len());
    let padlen = (3 * ntaps).min(x.len() - 1);
    let n = x.len();
    let mut ext = Vec::with_capacity(n + 2 * padlen);
    for j in (1..=padlen).rev() {
        ext.push(2.0 * x[0] - x[j]);
    }
    ext.extend_from_slice(x);
    for j in 1..=padlen {
        ext.push(2.0 * x[n - 1] - x[n - 1 - j]);
    }
    let zi = lfilter_zi(b, a);
    let zi_fwd: Vec<f64> = zi.iter().map(|z| z * ext[0]).collect();
    let fwd = lfilter(b, a, &ext, &zi_fwd);
    let rev: Vec<f64> = fwd.into_iter().rev().collect();
    let zi_bwd: Vec<f64> = zi.iter().map(|z| z * rev[0]).collect();
    let bwd = lfilter(b, a, &rev, &zi_bwd);
    let mut out: Vec<f64> = bwd.into_iter().rev().collect();
    out.drain(..padlen);
    out.truncate(n);
    out
}

/// Zero-phase Butterworth lowpass over a NaN-free series.
pub fn low_pass_filter(ts: &TimeSeries, order: usize, cutoff_hz: f64) -> Result<TimeSeries> {
    if ts.is_empty() {
        return Err(SignalError::EmptySeries("low_pass_filter"));
    }
    if ts.data.iter().any(|v| !v.is_finite()) {
        return Err(SignalError::InvalidConfig(
            "low_pass_filter input must not contain NaN; use nan_padded_low_pass_filter".into(),
        ));
    }
    let (b, a) = butter_lowpass(order, cutoff_hz, ts.fs)?;
    Ok(TimeSeries {
        fs: ts.fs,
        t0: ts.t0,
        data: filtfilt(&b, &a, &ts.data),
    })
}

/// Zero-phase Butterworth highpass over a NaN-free series.
pub fn high_pass_filter(ts: &TimeSeries, order: usize, cutoff_hz: f64) -> Result<TimeSeries> {
    if ts.is_empty() {
        return Err(SignalError::EmptySeries("high_pass_filter"));
    }
    if ts.data.iter().any(|v| !v.is_finite()) {
        return Err(SignalError::InvalidConfig(
            "high_pass_filter input must not contain NaN".into(),
        ));
    }
    let (b, a) = butter_highpass(order, cutoff_hz, ts.fs)?;
    Ok(TimeSeries {
        fs: ts.fs,
        t0: ts.t0,
        data: filtfilt(&b, &a, &ts.data),
    })
}

/// Lowpass filtering of a gappy series: finite samples are compacted and
/// filtered together, scattered back, and the NaN mask is dilated outward by
/// `nan_pad_size_s` on each side so filter ringing near gap boundaries is
/// nulled as well.
pub fn nan_padded_low_pass_filter(
    ts: &TimeSeries,
    order: usize,
    cutoff_hz: f64,
    nan_pad_size_s: f64,
) -> Result<TimeSeries> {
    let (b, a) = butter_lowpass(order, cutoff_hz, ts.fs)?;
    let n = ts.len();
    let nan_mask: Vec<bool> = ts.data.iter().map(|v| !v.is_finite()).collect();
    let radius = (nan_pad_size_s * ts.fs).round() as usize;
    let expanded = dilate(&nan_mask, radius);

    let compact: Vec<f64> = ts.data.iter().copied().filter(|v| v.is_finite()).collect();
    let filtered = filtfilt(&b, &a, &compact);

    let mut data = vec![f64::NAN; n];
    let mut src = filtered.iter();
    for (i, missing) in nan_mask.iter().enumerate() {
        if !missing {
            data[i] = *src.next().unwrap_or(&f64::NAN);
        }
    }
    for (i, expanded_missing) in expanded.iter().enumerate() {
        if *expanded_missing {
            data[i] = f64::NAN;
        }
    }
    Ok(TimeSeries {
        fs: ts.fs,
        t0: ts.t0,
        data,
    })
}

fn dilate(mask: &[bool], radius: usize) -> Vec<bool> {
    let n = mask.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(n);
            mask[lo..hi].iter().any(|&b| b)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn lowpass_preserves_dc() {
        let ts = TimeSeries::new(100.0, 0.0, vec![2.5; 500]);
        let out = low_pass_filter(&ts, 5, 10.0).unwrap();
        for v in &out.data {
            assert!((v - 2.5).abs() < 1e-8);
        }
    }

    #[test]
    fn lowpass_attenuates_high_frequency() {
        let fs = 100.0;
        let n = 1000;
        let slow: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 0.5 * i as f64 / fs).sin())
            .collect();
        let mixed: Vec<f64> = slow
            .iter()
            .enumerate()
            .map(|(i, s)| s + 0.5 * (2.0 * PI * 40.0 * i as f64 / fs).sin())
            .collect();
        let out = low_pass_filter(&TimeSeries::new(fs, 0.0, mixed), 5, 2.0).unwrap();
        // interior samples should track the slow component closely
        for i in 100..n - 100 {
            assert!(
                (out.data[i] - slow[i]).abs() < 0.05,
                "sample {}: {} vs {}",
                i,
                out.data[i],
                slow[i]
            );
        }
    }

    #[test]
    fn highpass_removes_dc() {
        let fs = 100.0;
        let data: Vec<f64> = (0..800)
            .map(|i| 5.0 + (2.0 * PI * 20.0 * i as f64 / fs).sin())
            .collect();
        let out = high_pass_filter(&TimeSeries::new(fs, 0.0, data), 5, 5.0).unwrap();
        let mean = out.data[100..700].iter().sum::<f64>() / 600.0;
        assert!(mean.abs() < 0.05, "residual DC {}", mean);
    }

    #[test]
    fn cutoff_above_nyquist_is_rejected() {
        let err = butter_lowpass(5, 3.0, 4.0).unwrap_err();
        assert!(matches!(err, SignalError::InvalidCutoff { .. }));
    }

    #[test]
    fn lowpass_rejects_nan_input() {
        let ts = TimeSeries::new(4.0, 0.0, vec![1.0, f64::NAN, 1.0]);
        assert!(low_pass_filter(&ts, 5, 1.0).is_err());
    }

    #[test]
    fn nan_padded_filter_dilates_gap() {
        let fs = 4.0;
        let mut data = vec![1.0; 120];
        for v in data.iter_mut().take(70).skip(50) {
            *v = f64::NAN;
        }
        let ts = TimeSeries::new(fs, 0.0, data);
        let out = nan_padded_low_pass_filter(&ts, 5, 1.0, 1.0).unwrap();
        // gap plus one second of margin on each side is nulled
        for i in 46..74 {
            assert!(out.data[i].is_nan(), "index {} should be NaN", i);
        }
        assert!(out.data[45].is_finite());
        assert!(out.data[74].is_finite());
        // values away from the gap stay near the constant level
        assert!((out.data[10] - 1.0).abs() < 1e-6);
        assert!((out.data[110] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn filtfilt_is_zero_phase() {
        let fs = 50.0;
        let n = 500;
        let x: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 1.0 * i as f64 / fs).sin())
            .collect();
        let (b, a) = butter_lowpass(5, 5.0, fs).unwrap();
        let y = filtfilt(&b, &a, &x);
        // the 1 Hz component is in the passband; peaks must stay aligned
        let arg_max_x = (100..200)
            .max_by(|&i, &j| x[i].partial_cmp(&x[j]).unwrap())
            .unwrap();
        let arg_max_y = (100..200)
            .max_by(|&i, &j| y[i].partial_cmp(&y[j]).unwrap())
            .unwrap();
        assert!((arg_max_x as isize - arg_max_y as isize).abs() <= 1);
    }
}

//! Tonic/phasic decomposition of cleaned EDA and skin-conductance-response
//! (SCR) peak detection.
//!
//! The tonic level is a centered rolling low quantile smoothed by a rolling
//! mean and a slow lowpass; the phasic residual is clipped at zero and
//! searched for peaks by prominence. Detected peaks are screened against
//! rise time, recovery time, amplitude and the phasic-to-noise ratio.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};
use crate::filters::nan_padded_low_pass_filter;
use crate::quality::EdaQualityOutput;
use crate::rolling::{rolling_mean, rolling_quantile};
use crate::signal::{ScrPeak, TimeSeries, Window};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrConfig {
    /// Window of the tonic quantile/mean estimate, in seconds.
    pub tonic_window_s: f64,
    pub tonic_quantile: f64,
    /// Cutoff of the slow lowpass applied to the tonic estimate.
    pub tonic_cutoff_hz: f64,
    /// Weight of the noise term subtracted from the phasic residual.
    pub phasic_noise_factor: f64,
    /// Offset added to the tonic level in the noise term, in uS.
    pub phasic_offset_us: f64,
    pub phasic_baseline_window_s: f64,
    pub phasic_baseline_quantile: f64,
    pub phasic_baseline_cutoff_hz: f64,
    /// Window of the centered mean in the phasic-to-noise ratio.
    pub pnr_window_s: f64,
    pub pnr_noise_floor: f64,
    pub pnr_tonic_floor: f64,
    pub pnr_max: f64,
    /// Minimum spacing between detected peaks, in seconds.
    pub peak_distance_s: f64,
    pub peak_prominence: f64,
    /// Span limiting the prominence search around each peak, in seconds.
    pub peak_wlen_s: f64,
    pub min_rise_time_s: f64,
    pub max_rise_time_s: f64,
    pub min_recovery_time_s: f64,
    pub max_recovery_time_s: f64,
    pub min_amplitude: f64,
    pub min_phasic_noise_ratio: f64,
    pub filter_order: usize,
    pub nan_pad_size_s: f64,
}

impl Default for ScrConfig {
    fn default() -> Self {
        Self {
            tonic_window_s: 45.0,
            tonic_quantile: 0.025,
            tonic_cutoff_hz: 0.05,
            phasic_noise_factor: 0.0,
            phasic_offset_us: 0.3,
            phasic_baseline_window_s: 10.0,
            phasic_baseline_quantile: 0.05,
            phasic_baseline_cutoff_hz: 0.1,
            pnr_window_s: 5.0,
            pnr_noise_floor: 0.002,
            pnr_tonic_floor: 0.5,
            pnr_max: 20.0,
            peak_distance_s: 1.0,
            peak_prominence: 0.02,
            peak_wlen_s: 60.0,
            min_rise_time_s: 0.5,
            max_rise_time_s: 100.0,
            min_recovery_time_s: 0.5,
            max_recovery_time_s: 100.0,
            min_amplitude: 0.03,
            min_phasic_noise_ratio: 7.5,
            filter_order: 5,
            nan_pad_size_s: 1.0,
        }
    }
}

impl ScrConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_rise_time_s >= self.max_rise_time_s {
            return Err(SignalError::InvalidConfig(
                "min_rise_time_s must be below max_rise_time_s".into(),
            ));
        }
        if self.min_recovery_time_s >= self.max_recovery_time_s {
            return Err(SignalError::InvalidConfig(
                "min_recovery_time_s must be below max_recovery_time_s".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrOutput {
    /// Slow tonic component of the cleaned signal.
    pub tonic: TimeSeries,
    /// Fast, zero-clipped phasic residual.
    pub phasic: TimeSeries,
    /// Smoothed ratio of phasic activity to estimated noise.
    pub phasic_noise_ratio: TimeSeries,
    /// Peaks that survived the screening filters.
    pub peaks: Vec<ScrPeak>,
}

/// Low-quantile level estimate: a centered rolling quantile followed by a
/// centered rolling mean over the same odd window.
fn tonic_estimate(ts: &TimeSeries, window_s: f64, q: f64) -> Result<TimeSeries> {
    let mut w = ((ts.fs * window_s).round() as usize).max(1);
    if w % 2 == 0 {
        w -= 1;
    }
    let window = Window::new(w, true, 1)?;
    Ok(rolling_mean(&rolling_quantile(ts, &window, q), &window))
}

/// Decomposes the cleaned output of the quality pipeline into tonic and
/// phasic components and detects SCR peaks on the phasic residual.
pub fn decompose_eda(quality: &EdaQualityOutput, cfg: &ScrConfig) -> Result<ScrOutput> {
    cfg.validate()?;
    let eda = &quality.eda_cleaned_lowpass;
    let noise = &quality.noise_mean;
    if eda.is_empty() {
        return Err(SignalError::EmptySeries("decompose_eda"));
    }
    let fs = eda.fs;

    let tonic_raw = tonic_estimate(eda, cfg.tonic_window_s, cfg.tonic_quantile)?;
    let tonic = nan_padded_low_pass_filter(
        &tonic_raw,
        cfg.filter_order,
        cfg.tonic_cutoff_hz,
        cfg.nan_pad_size_s,
    )?;

    let phasic_data: Vec<f64> = (0..eda.len())
        .map(|i| {
            let v = eda.data[i]
                - tonic.data[i]
                - cfg.phasic_noise_factor * (cfg.phasic_offset_us + tonic.data[i]) * noise.data[i];
            if v.is_finite() {
                v.max(0.0)
            } else {
                f64::NAN
            }
        })
        .collect();
    let phasic = TimeSeries {
        fs,
        t0: eda.t0,
        data: phasic_data,
    };

    let baseline = tonic_estimate(
        &phasic,
        cfg.phasic_baseline_window_s,
        cfg.phasic_baseline_quantile,
    )?;
    let baseline_lf = nan_padded_low_pass_filter(
        &baseline,
        cfg.filter_order,
        cfg.phasic_baseline_cutoff_hz,
        cfg.nan_pad_size_s,
    )?;

    let pnr = phasic_noise_ratio(&phasic, &baseline_lf, noise, &tonic_raw, cfg);

    let distance = (cfg.peak_distance_s * fs).round().max(1.0) as usize;
    let wlen = (cfg.peak_wlen_s * fs).round() as usize;
    let candidates = find_peaks(&phasic.data, distance, cfg.peak_prominence, wlen);

    let peaks = candidates
        .into_iter()
        .filter_map(|c| {
            let rise = (c.index - c.left_base) as f64 / fs;
            let recovery = (c.right_base - c.index) as f64 / fs;
            let amplitude = phasic.data[c.index];
            let ratio = pnr.data[c.index];
            // NaN comparisons are false, so a peak with an undefined ratio
            // is kept
            if rise < cfg.min_rise_time_s
                || rise > cfg.max_rise_time_s
                || recovery < cfg.min_recovery_time_s
                || recovery > cfg.max_recovery_time_s
                || amplitude < cfg.min_amplitude
                || ratio < cfg.min_phasic_noise_ratio
            {
                return None;
            }
            Some(ScrPeak {
                time_s: phasic.timestamp(c.index),
                rise_time_s: rise,
                recovery_time_s: recovery,
                amplitude,
                phasic_noise_ratio: ratio,
            })
        })
        .collect();

    Ok(ScrOutput {
        tonic,
        phasic,
        phasic_noise_ratio: pnr,
        peaks,
    })
}

/// Smoothed phasic activity divided by the floored noise and tonic levels,
/// clipped to `[0, pnr_max]`. The denominator uses the tonic estimate
/// before its lowpass.
fn phasic_noise_ratio(
    phasic: &TimeSeries,
    baseline_lf: &TimeSeries,
    noise: &TimeSeries,
    tonic_raw: &TimeSeries,
    cfg: &ScrConfig,
) -> TimeSeries {
    let fs = phasic.fs;
    let residual: Vec<f64> = (0..phasic.len())
        .map(|i| {
            let v = phasic.data[i] - baseline_lf.data[i];
            if v.is_finite() {
                v
            } else {
                0.0
            }
        })
        .collect();
    let residual = TimeSeries {
        fs,
        t0: phasic.t0,
        data: residual,
    };
    let w = ((cfg.pnr_window_s * fs).round() as usize).max(1);
    let smoothed = match Window::new(w, true, 1) {
        Ok(window) => rolling_mean(&residual, &window),
        Err(_) => residual,
    };
    let data = (0..phasic.len())
        .map(|i| {
            let n = noise.data[i];
            let t = tonic_raw.data[i];
            if !n.is_finite() || !t.is_finite() {
                return f64::NAN;
            }
            let den = n.max(cfg.pnr_noise_floor) * t.max(cfg.pnr_tonic_floor);
            (smoothed.data[i] / den).clamp(0.0, cfg.pnr_max)
        })
        .collect();
    TimeSeries {
        fs,
        t0: phasic.t0,
        data,
    }
}

struct PeakCandidate {
    index: usize,
    left_base: usize,
    right_base: usize,
}

/// Prominence-based peak detection. Local maxima (plateau midpoints) are
/// thinned so no two peaks sit closer than `distance` samples, keeping the
/// higher one, then screened by prominence computed within `wlen` samples
/// around each peak. NaN regions yield no peaks.
fn find_peaks(x: &[f64], distance: usize, prominence: f64, wlen: usize) -> Vec<PeakCandidate> {
    let maxima = local_maxima(x);
    let kept = select_by_distance(&maxima, x, distance);
    kept.into_iter()
        .filter_map(|peak| {
            let (prom, left_base, right_base) = peak_prominence(x, peak, wlen);
            if prom >= prominence {
                Some(PeakCandidate {
                    index: peak,
                    left_base,
                    right_base,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Strict local maxima; a flat plateau reports its midpoint.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }
    let mut i = 1;
    let i_max = n - 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Keeps only peaks at least `distance` samples apart, giving higher peaks
/// priority.
fn select_by_distance(peaks: &[usize], x: &[f64], distance: usize) -> Vec<usize> {
    let m = peaks.len();
    let mut keep = vec![true; m];
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        x[peaks[a]]
            .partial_cmp(&x[peaks[b]])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 {
            k -= 1;
            if peaks[j] - peaks[k] >= distance {
                break;
            }
            keep[k] = false;
        }
        let mut k = j + 1;
        while k < m && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .iter()
        .zip(&keep)
        .filter_map(|(&p, &k)| if k { Some(p) } else { None })
        .collect()
}

/// Prominence of a peak and the indices of its left and right bases. The
/// search extends to the lowest point between the peak and the next
/// higher sample on each side, limited to `wlen / 2` samples.
fn peak_prominence(x: &[f64], peak: usize, wlen: usize) -> (f64, usize, usize) {
    let n = x.len();
    let (i_min, i_max) = if wlen >= 2 {
        (peak.saturating_sub(wlen / 2), (peak + wlen / 2).min(n - 1))
    } else {
        (0, n - 1)
    };

    let mut left_min = x[peak];
    let mut left_base = peak;
    let mut i = peak;
    loop {
        if !(x[i] <= x[peak]) {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
        if i == i_min {
            break;
        }
        i -= 1;
    }

    let mut right_min = x[peak];
    let mut right_base = peak;
    let mut i = peak;
    while i <= i_max && x[i] <= x[peak] {
        if x[i] < right_min {
            right_min = x[i];
            right_base = i;
        }
        i += 1;
    }

    (x[peak] - left_min.max(right_min), left_base, right_base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{process_eda_quality, EdaQualityConfig};

    #[test]
    fn plateau_reports_midpoint() {
        let x = vec![0.0, 1.0, 1.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![2]);
    }

    #[test]
    fn distance_keeps_higher_peak() {
        let x = vec![0.0, 1.0, 0.5, 2.0, 0.0];
        let peaks = local_maxima(&x);
        assert_eq!(peaks, vec![1, 3]);
        let kept = select_by_distance(&peaks, &x, 3);
        assert_eq!(kept, vec![3]);
    }

    #[test]
    fn prominence_finds_bases() {
        let x = vec![0.0, 0.1, 1.0, 0.2, 0.5, 0.2, 3.0, 0.0];
        let (prom, left, right) = peak_prominence(&x, 4, 0);
        assert!((prom - 0.3).abs() < 1e-12);
        assert_eq!(left, 3);
        assert_eq!(right, 5);
    }

    #[test]
    fn nan_region_yields_no_peaks() {
        let x = vec![0.0, f64::NAN, f64::NAN, 0.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![4]);
    }

    #[test]
    fn synthetic_scr_bumps_are_detected() {
        // 4 Hz baseline with five exponential-recovery bumps of 0.3 uS
        let fs = 4.0;
        let n = (fs * 600.0) as usize;
        let mut data: Vec<f64> = (0..n).map(|_| 2.0).collect();
        let bump_times = [100.0, 200.0, 300.0, 400.0, 500.0];
        for &t_b in &bump_times {
            for (i, v) in data.iter_mut().enumerate() {
                let t = i as f64 / fs;
                let dt = t - t_b;
                if (0.0..2.0).contains(&dt) {
                    *v += 0.3 * dt / 2.0;
                } else if (2.0..20.0).contains(&dt) {
                    *v += 0.3 * (-(dt - 2.0) / 5.0).exp();
                }
            }
        }
        let eda = TimeSeries::new(fs, 0.0, data);
        let quality = process_eda_quality(&eda, &EdaQualityConfig::default()).unwrap();
        let out = decompose_eda(&quality, &ScrConfig::default()).unwrap();
        assert_eq!(out.peaks.len(), bump_times.len(), "peaks: {:?}", out.peaks);
        for (peak, t_b) in out.peaks.iter().zip(&bump_times) {
            assert!(
                (peak.time_s - (t_b + 2.0)).abs() < 2.0,
                "peak at {} for bump at {}",
                peak.time_s,
                t_b
            );
            assert!(peak.amplitude > 0.1 && peak.amplitude < 0.5);
        }
    }

    #[test]
    fn tiny_bumps_are_screened_out() {
        let fs = 4.0;
        let n = (fs * 600.0) as usize;
        let mut data: Vec<f64> = (0..n).map(|_| 2.0).collect();
        // 0.01 uS wiggle, below both prominence and amplitude cutoffs
        for (i, v) in data.iter_mut().enumerate() {
            let t = i as f64 / fs;
            *v += 0.005 * (2.0 * std::f64::consts::PI * 0.05 * t).sin();
        }
        let eda = TimeSeries::new(fs, 0.0, data);
        let quality = process_eda_quality(&eda, &EdaQualityConfig::default()).unwrap();
        let out = decompose_eda(&quality, &ScrConfig::default()).unwrap();
        assert!(out.peaks.is_empty());
    }

    #[test]
    fn swapped_rise_bounds_are_rejected() {
        let cfg = ScrConfig {
            min_rise_time_s: 10.0,
            max_rise_time_s: 1.0,
            ..ScrConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}

//! EDA signal-quality pipeline: lowpass smoothing, noise estimation, four
//! quality indices, mask smoothing, gap interpolation and duration
//! filtering.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filters::nan_padded_low_pass_filter;
use crate::metrics::{lost_sqi, sqi_and, sqi_smoothen, threshold_sqi};
use crate::rolling::rolling_mean;
use crate::signal::{Mask, TimeSeries, Window};

/// Parameters of the quality pipeline. Defaults are tuned for 4 Hz
/// wrist-worn EDA in microsiemens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdaQualityConfig {
    /// Butterworth order for all lowpass stages.
    pub filter_order: usize,
    /// Cutoff of the smoothing lowpass in Hz.
    pub filter_cutoff_hz: f64,
    /// Largest tolerated sample-to-sample ratio increase on the filtered
    /// signal.
    pub slope_max_increase: f64,
    pub slope_max_decrease: f64,
    /// Added to the filtered signal before dividing, so near-zero levels do
    /// not blow up the normalized noise.
    pub noise_precision: f64,
    /// Window of the centered rolling mean over |noise|, in seconds.
    pub noise_window_s: f64,
    /// Upper bound on the mean normalized noise.
    pub noise_max: f64,
    pub lost_window_s: f64,
    /// Signal below this level (uS) counts as lost skin contact.
    pub lost_min_sig_threshold: f64,
    pub lost_min_ok_ratio: f64,
    /// Mean-noise level above which delta bounds are not relaxed.
    pub delta_noise_threshold: f64,
    /// Floor for the per-sample delta bounds in uS.
    pub delta_min_threshold: f64,
    /// Fraction the signal may rise per second relative to its local level.
    pub delta_max_increase: f64,
    pub delta_max_decrease: f64,
    /// Window of the local-level estimate, in seconds.
    pub delta_level_window_s: f64,
    pub smoothen_window_s: f64,
    pub smoothen_min_ok_ratio: f64,
    /// Invalid gaps up to this long are bridged by linear interpolation.
    pub max_interpolate_s: f64,
    /// Valid segments shorter than this are discarded entirely.
    pub min_valid_len_s: f64,
    /// Margin nulled around gaps by the NaN-aware lowpass, in seconds.
    pub nan_pad_size_s: f64,
}

impl Default for EdaQualityConfig {
    fn default() -> Self {
        Self {
            filter_order: 5,
            filter_cutoff_hz: 1.0,
            slope_max_increase: 0.25,
            slope_max_decrease: 0.12,
            noise_precision: 0.03,
            noise_window_s: 5.0,
            noise_max: 0.02,
            lost_window_s: 5.0,
            lost_min_sig_threshold: 0.05,
            lost_min_ok_ratio: 0.9,
            delta_noise_threshold: 0.3,
            delta_min_threshold: 0.04,
            delta_max_increase: 0.25,
            delta_max_decrease: 0.1,
            delta_level_window_s: 1.0,
            smoothen_window_s: 5.0,
            smoothen_min_ok_ratio: 0.6,
            max_interpolate_s: 5.0,
            min_valid_len_s: 60.0,
            nan_pad_size_s: 1.0,
        }
    }
}

/// Intermediate and final products of the quality pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdaQualityOutput {
    /// Raw signal after the smoothing lowpass.
    pub eda_lowpass: TimeSeries,
    /// Centered rolling mean of the absolute normalized noise.
    pub noise_mean: TimeSeries,
    pub lost_sqi: Mask,
    pub noise_sqi: Mask,
    pub delta_sqi: Mask,
    pub slope_sqi: Mask,
    /// Conjunction of the four indices after smoothing.
    pub sqi: Mask,
    /// Raw signal with bad samples nulled, short gaps interpolated and
    /// short valid segments discarded.
    pub eda_cleaned: TimeSeries,
    /// `eda_cleaned` after the NaN-aware lowpass.
    pub eda_cleaned_lowpass: TimeSeries,
}

/// Runs the full quality pipeline over a raw EDA series.
pub fn process_eda_quality(eda: &TimeSeries, cfg: &EdaQualityConfig) -> Result<EdaQualityOutput> {
    let eda_lowpass = nan_padded_low_pass_filter(
        eda,
        cfg.filter_order,
        cfg.filter_cutoff_hz,
        cfg.nan_pad_size_s,
    )?;

    let noise_mean = noise_mean(eda, &eda_lowpass, cfg);
    let slope = slope_sqi(&eda_lowpass, cfg.slope_max_increase, cfg.slope_max_decrease);
    let noise = threshold_sqi(&noise_mean, None, Some(cfg.noise_max));
    let lost = lost_sqi(
        eda,
        cfg.lost_window_s,
        cfg.lost_min_sig_threshold,
        cfg.lost_min_ok_ratio,
    )?;
    let delta = delta_sqi(eda, &noise_mean, cfg)?;

    let combined = sqi_and(&[&lost, &delta, &noise, &slope])?;
    let sqi = sqi_smoothen(
        &combined,
        cfg.smoothen_window_s,
        cfg.smoothen_min_ok_ratio,
        false,
        true,
    )?;

    let interp_limit = (cfg.max_interpolate_s * eda.fs).round() as usize;
    let mut eda_cleaned = interpolate_gaps(eda, &sqi, interp_limit);
    filter_short_runs(&mut eda_cleaned.data, eda.fs * cfg.min_valid_len_s);
    let eda_cleaned_lowpass = nan_padded_low_pass_filter(
        &eda_cleaned,
        cfg.filter_order,
        cfg.filter_cutoff_hz,
        cfg.nan_pad_size_s,
    )?;

    Ok(EdaQualityOutput {
        eda_lowpass,
        noise_mean,
        lost_sqi: lost,
        noise_sqi: noise,
        delta_sqi: delta,
        slope_sqi: slope,
        sqi,
        eda_cleaned,
        eda_cleaned_lowpass,
    })
}

/// Normalized deviation of the raw signal from its lowpass, absolute value
/// averaged over a centered window.
fn noise_mean(eda: &TimeSeries, eda_lowpass: &TimeSeries, cfg: &EdaQualityConfig) -> TimeSeries {
    let abs_noise: Vec<f64> = eda
        .data
        .iter()
        .zip(&eda_lowpass.data)
        .map(|(raw, filt)| ((raw - filt) / (filt + cfg.noise_precision)).abs())
        .collect();
    let abs_noise = TimeSeries {
        fs: eda.fs,
        t0: eda.t0,
        data: abs_noise,
    };
    let w = ((cfg.noise_window_s * eda.fs).round() as usize).max(1);
    // Window reduces even centered sizes to odd internally
    match Window::new(w, true, 1) {
        Ok(window) => rolling_mean(&abs_noise, &window),
        Err(_) => abs_noise,
    }
}

/// Flags samples whose relative step to the next sample on the filtered
/// signal is outside the tolerated band. The last sample has no successor
/// and is flagged bad.
fn slope_sqi(filtered: &TimeSeries, max_increase: f64, max_decrease: f64) -> Mask {
    let n = filtered.len();
    let data = (0..n)
        .map(|i| {
            if i + 1 >= n {
                return false;
            }
            let ratio = filtered.data[i + 1] / filtered.data[i];
            ratio.is_finite() && ratio >= 1.0 - max_decrease && ratio <= 1.0 + max_increase
        })
        .collect();
    Mask {
        fs: filtered.fs,
        t0: filtered.t0,
        data,
    }
}

/// Flags implausible sample-to-sample jumps. The tolerated step scales with
/// the local signal level; decreases get a tighter bound than increases,
/// and bounds are relaxed inside sustained-decrease regions when the noise
/// level is low.
fn delta_sqi(eda: &TimeSeries, noise_mean: &TimeSeries, cfg: &EdaQualityConfig) -> Result<Mask> {
    let n = eda.len();
    let fs = eda.fs;
    let k = fs.round() as isize;

    let w_level = ((cfg.delta_level_window_s * fs).round() as usize).max(1);
    let level = rolling_mean(eda, &Window::new(w_level, true, 1)?);

    let delta: Vec<f64> = (0..n)
        .map(|i| {
            if i == 0 {
                f64::NAN
            } else {
                eda.data[i] - eda.data[i - 1]
            }
        })
        .collect();

    let low_noise_cut = cfg.delta_noise_threshold / 2.0;
    let valid_decrease: Vec<bool> = (0..n)
        .map(|i| {
            let dec = -f64::max(cfg.delta_min_threshold, level.data[i] * cfg.delta_max_decrease / fs);
            let low_noise = noise_mean.data[i] <= low_noise_cut;
            delta[i] >= dec || (delta[i] >= 2.0 * dec && low_noise)
        })
        .collect();

    // A sample sits in a sustained-decrease region when every sample in the
    // surrounding window is a valid decrease; windows spilling past the
    // edges count as sustained.
    let decrease_mask: Vec<bool> = (0..n)
        .map(|i| {
            let lo = i as isize - 3 * k + 3;
            let hi = i as isize + 3 * k + 1;
            if lo < 0 || hi >= n as isize {
                true
            } else {
                valid_decrease[lo as usize..=hi as usize].iter().all(|&b| b)
            }
        })
        .collect();

    let data = (0..n)
        .map(|i| {
            let inc = f64::max(cfg.delta_min_threshold, level.data[i] * cfg.delta_max_increase / fs);
            let low_noise = noise_mean.data[i] <= low_noise_cut;
            let dm = decrease_mask[i];
            let valid_increase = (delta[i] <= 0.5 * inc && !dm)
                || (delta[i] <= inc && dm)
                || (delta[i] <= 2.0 * inc && dm && low_noise);
            valid_increase && valid_decrease[i]
        })
        .collect();
    Ok(Mask {
        fs,
        t0: eda.t0,
        data,
    })
}

/// Nulls invalid samples, then linearly bridges interior invalid gaps of at
/// most `limit` samples between two valid anchors. Edge gaps and longer
/// gaps stay NaN.
fn interpolate_gaps(eda: &TimeSeries, valid: &Mask, limit: usize) -> TimeSeries {
    let n = eda.len();
    let mut data: Vec<f64> = (0..n)
        .map(|i| if valid.data[i] { eda.data[i] } else { f64::NAN })
        .collect();
    let mut i = 0;
    while i < n {
        if valid.data[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && !valid.data[i] {
            i += 1;
        }
        let end = i; // exclusive
        let gap = end - start;
        if start == 0 || end == n || gap > limit {
            continue;
        }
        let left = data[start - 1];
        let right = data[end];
        if !left.is_finite() || !right.is_finite() {
            continue;
        }
        let span = (gap + 1) as f64;
        for (j, slot) in data[start..end].iter_mut().enumerate() {
            let frac = (j + 1) as f64 / span;
            *slot = left + frac * (right - left);
        }
    }
    TimeSeries {
        fs: eda.fs,
        t0: eda.t0,
        data,
    }
}

/// Nulls every finite run shorter than `min_samples`.
pub(crate) fn filter_short_runs(data: &mut [f64], min_samples: f64) {
    let n = data.len();
    let mut i = 0;
    while i < n {
        if !data[i].is_finite() {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && data[i].is_finite() {
            i += 1;
        }
        if ((i - start) as f64) < min_samples {
            for v in data[start..i].iter_mut() {
                *v = f64::NAN;
            }
        }
    }
}

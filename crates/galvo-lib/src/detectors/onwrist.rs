//! On-wrist (wear) detection for wrist-worn biosensors.
//!
//! A device counts as worn when any modality says so: electrodermal
//! activity above a contact threshold, skin temperature in a plausible
//! range, or enough movement in the accelerometer. Temperature and
//! movement masks are reindexed onto the EDA grid before combining.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};
use crate::metrics::{sqi_or, sqi_smoothen};
use crate::rolling::{mask_mean_resample, rolling_std, std_sum};
use crate::signal::{Mask, TimeSeries, Window};

/// How the movement activity index is derived from the accelerometer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum AiMethod {
    /// Rolling standard deviation of a single axis, strided by `step`.
    SingleAxisStd { window: usize, step: usize },
    /// Sum of per-axis rolling standard deviations over all given axes.
    StdSumTriAxial { window: usize, step: usize },
}

/// How the per-sample wear mask is turned into the final verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Aggregation {
    /// Smooth the combined mask twice: first pruning isolated wear
    /// stretches, then filling isolated non-wear dips.
    TwoPassSmoothing {
        window_s: f64,
        first_min_ok_ratio: f64,
        second_min_ok_ratio: f64,
    },
    /// Resample each modality mask to fixed buckets and call a bucket worn
    /// when any modality exceeds `on_body_ratio` of it.
    PerMinute { bucket_s: f64, on_body_ratio: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnWristConfig {
    pub ai_method: AiMethod,
    /// Raw accelerometer counts per g.
    pub acc_scale: f64,
    pub ai_threshold: f64,
    pub eda_threshold_us: f64,
    pub tmp_min_c: Option<f64>,
    pub tmp_max_c: Option<f64>,
    pub aggregation: Aggregation,
}

impl Default for OnWristConfig {
    fn default() -> Self {
        Self {
            ai_method: AiMethod::SingleAxisStd {
                window: 32,
                step: 10,
            },
            acc_scale: 64.0,
            ai_threshold: 0.1,
            eda_threshold_us: 0.03,
            tmp_min_c: Some(32.0),
            tmp_max_c: None,
            aggregation: Aggregation::TwoPassSmoothing {
                window_s: 60.0,
                first_min_ok_ratio: 0.55,
                second_min_ok_ratio: 0.5,
            },
        }
    }
}

impl OnWristConfig {
    /// The per-minute variant of Bottcher et al. with a tri-axial activity
    /// index over 10 s windows.
    pub fn bottcher() -> Self {
        Self {
            ai_method: AiMethod::StdSumTriAxial {
                window: 320,
                step: 1,
            },
            acc_scale: 64.0,
            ai_threshold: 0.2,
            eda_threshold_us: 0.05,
            tmp_min_c: Some(25.0),
            tmp_max_c: Some(40.0),
            aggregation: Aggregation::PerMinute {
                bucket_s: 60.0,
                on_body_ratio: 0.01,
            },
        }
    }

    /// Defaults for devices that stream the accelerometer already scaled to
    /// g at 64 Hz.
    pub fn embrace_plus() -> Self {
        Self {
            ai_method: AiMethod::SingleAxisStd {
                window: 64,
                step: 20,
            },
            acc_scale: 1.0,
            ..Self::default()
        }
    }
}

/// Movement activity index per the configured method.
fn activity_index(acc: &[&TimeSeries], cfg: &OnWristConfig) -> Result<TimeSeries> {
    match cfg.ai_method {
        AiMethod::SingleAxisStd { window, step } => {
            let axis = acc
                .first()
                .ok_or(SignalError::EmptySeries("detect_on_wrist acc"))?;
            let scaled = TimeSeries {
                fs: axis.fs,
                t0: axis.t0,
                data: axis.data.iter().map(|v| v / cfg.acc_scale).collect(),
            };
            Ok(rolling_std(&scaled, &Window::new(window, true, step)?))
        }
        AiMethod::StdSumTriAxial { window, step } => {
            std_sum(acc, &Window::new(window, true, step)?, cfg.acc_scale)
        }
    }
}

fn above(ts: &TimeSeries, threshold: f64) -> Mask {
    Mask {
        fs: ts.fs,
        t0: ts.t0,
        data: ts
            .data
            .iter()
            .map(|&v| v.is_finite() && v > threshold)
            .collect(),
    }
}

fn in_range(ts: &TimeSeries, min: Option<f64>, max: Option<f64>) -> Mask {
    Mask {
        fs: ts.fs,
        t0: ts.t0,
        data: ts
            .data
            .iter()
            .map(|&v| {
                v.is_finite()
                    && min.map_or(true, |lo| v > lo)
                    && max.map_or(true, |hi| v < hi)
            })
            .collect(),
    }
}

/// Wear detection over accelerometer axes, EDA and skin temperature. The
/// output mask lives on the EDA grid, or on the bucket grid for the
/// per-minute aggregation.
pub fn detect_on_wrist(
    acc: &[&TimeSeries],
    eda: &TimeSeries,
    tmp: &TimeSeries,
    cfg: &OnWristConfig,
) -> Result<Mask> {
    let ai = activity_index(acc, cfg)?;
    let ai_sqi = above(&ai, cfg.ai_threshold);
    let eda_sqi = above(eda, cfg.eda_threshold_us);
    let tmp_sqi = in_range(tmp, cfg.tmp_min_c, cfg.tmp_max_c);

    // samples before the first TMP/AI sample count as worn
    let tmp_sqi = tmp_sqi.reindex_bfill(eda.fs, eda.t0, eda.len(), true);
    let ai_sqi = ai_sqi.reindex_bfill(eda.fs, eda.t0, eda.len(), true);

    match cfg.aggregation {
        Aggregation::PerMinute {
            bucket_s,
            on_body_ratio,
        } => {
            let buckets = [
                mask_mean_resample(&eda_sqi, bucket_s),
                mask_mean_resample(&tmp_sqi, bucket_s),
                mask_mean_resample(&ai_sqi, bucket_s),
            ];
            let binarized: Vec<Mask> = buckets
                .iter()
                .map(|ts| above(ts, on_body_ratio))
                .collect();
            sqi_or(&binarized.iter().collect::<Vec<_>>())
        }
        Aggregation::TwoPassSmoothing {
            window_s,
            first_min_ok_ratio,
            second_min_ok_ratio,
        } => {
            let combined = sqi_or(&[&eda_sqi, &tmp_sqi, &ai_sqi])?;
            let pass1 = sqi_smoothen(&combined, window_s, first_min_ok_ratio, false, true)?;
            sqi_smoothen(&pass1, window_s, second_min_ok_ratio, true, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(fs: f64, dur_s: f64, value: f64) -> TimeSeries {
        TimeSeries::new(fs, 0.0, vec![value; (fs * dur_s) as usize])
    }

    #[test]
    fn per_minute_follows_eda_contact() {
        // first minute on wrist via EDA, second minute nothing
        let mut eda = constant(4.0, 120.0, 1.0);
        for v in eda.data[240..].iter_mut() {
            *v = 0.0;
        }
        let tmp = constant(4.0, 120.0, 20.0); // outside 25..40
        let acc = constant(32.0, 120.0, 10.0); // motionless
        let out = detect_on_wrist(&[&acc, &acc, &acc], &eda, &tmp, &OnWristConfig::bottcher())
            .unwrap();
        assert_eq!(out.data.len(), 2);
        assert!(out.data[0]);
        assert!(!out.data[1]);
    }

    #[test]
    fn smoothing_variant_keeps_worn_center() {
        // on wrist for the first two minutes, then removed
        let mut eda = constant(4.0, 240.0, 1.0);
        for v in eda.data[480..].iter_mut() {
            *v = 0.0;
        }
        let tmp = constant(4.0, 240.0, 25.0); // below the 32 C bound
        let acc = constant(32.0, 240.0, 0.0);
        let out =
            detect_on_wrist(&[&acc], &eda, &tmp, &OnWristConfig::default()).unwrap();
        let i_on = (4.0 * 60.0) as usize;
        let i_off = (4.0 * 180.0) as usize;
        assert!(out.data[i_on], "worn period center must survive smoothing");
        assert!(!out.data[i_off], "removed period must stay off");
    }

    #[test]
    fn movement_alone_marks_worn() {
        let eda = constant(4.0, 120.0, 0.0);
        let tmp = constant(4.0, 120.0, 20.0);
        // strong alternating acceleration, std well above threshold
        let acc = TimeSeries::new(
            32.0,
            0.0,
            (0..(32 * 120)).map(|i| if i % 2 == 0 { 64.0 } else { -64.0 }).collect(),
        );
        let out = detect_on_wrist(&[&acc, &acc, &acc], &eda, &tmp, &OnWristConfig::bottcher())
            .unwrap();
        assert!(out.data.iter().all(|&b| b));
    }

    #[test]
    fn smoothed_mask_follows_movement_blocks() {
        // movement for two minutes, then the sensor sits still
        let eda = constant(4.0, 240.0, 0.0);
        let tmp = constant(4.0, 240.0, 20.0);
        let n = (32.0 * 240.0) as usize;
        let acc = TimeSeries::new(
            32.0,
            0.0,
            (0..n)
                .map(|i| {
                    if i < n / 2 {
                        if i % 2 == 0 { 32.0 } else { -32.0 }
                    } else {
                        0.0
                    }
                })
                .collect(),
        );
        let out =
            detect_on_wrist(&[&acc], &eda, &tmp, &OnWristConfig::default()).unwrap();
        assert!(out.data[(4.0 * 60.0) as usize], "movement block center");
        assert!(!out.data[(4.0 * 180.0) as usize], "still block center");
        // the worn-to-off transition lands within one smoothing window
        // of the 120 s block boundary
        let boundary = (4.0 * 120.0) as usize;
        let window = (4.0 * 60.0) as usize;
        let cross = (boundary - window..boundary + window)
            .find(|&i| !out.data[i])
            .expect("transition must fall inside the tolerance band");
        assert!(out.data[boundary - window..cross].iter().all(|&b| b));
        assert!(out.data[cross..boundary + window].iter().all(|&b| !b));
    }

    #[test]
    fn missing_accelerometer_is_an_error() {
        let eda = constant(4.0, 60.0, 1.0);
        let tmp = constant(4.0, 60.0, 33.0);
        assert!(detect_on_wrist(&[], &eda, &tmp, &OnWristConfig::default()).is_err());
    }
}

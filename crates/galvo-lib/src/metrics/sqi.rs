//! Boolean quality masks over sampled signals.
//!
//! A mask is `true` where the signal is considered usable. Combinators
//! require operands on the same sampling grid.

use crate::error::{Result, SignalError};
use crate::rolling::rolling_true_count;
use crate::signal::{check_same_index, Mask, TimeSeries};

fn combine(masks: &[&Mask], op: fn(bool, bool) -> bool, name: &'static str) -> Result<Mask> {
    let first = masks.first().ok_or(SignalError::EmptySeries(name))?;
    let mut data = first.data.clone();
    for m in &masks[1..] {
        if m.data.len() != data.len() {
            return Err(SignalError::LengthMismatch {
                left: data.len(),
                right: m.data.len(),
            });
        }
        check_same_index(first.fs, first.t0, m.fs, m.t0)?;
        for (d, v) in data.iter_mut().zip(&m.data) {
            *d = op(*d, *v);
        }
    }
    Ok(Mask {
        fs: first.fs,
        t0: first.t0,
        data,
    })
}

/// Elementwise conjunction of quality masks.
pub fn sqi_and(masks: &[&Mask]) -> Result<Mask> {
    combine(masks, |a, b| a && b, "sqi_and")
}

/// Elementwise disjunction of quality masks.
pub fn sqi_or(masks: &[&Mask]) -> Result<Mask> {
    combine(masks, |a, b| a || b, "sqi_or")
}

/// Thresholding mask. Non-finite samples never pass; bounds are inclusive.
pub fn threshold_sqi(ts: &TimeSeries, min_thresh: Option<f64>, max_thresh: Option<f64>) -> Mask {
    let data = ts
        .data
        .iter()
        .map(|&v| {
            v.is_finite()
                && min_thresh.map_or(true, |lo| v >= lo)
                && max_thresh.map_or(true, |hi| v <= hi)
        })
        .collect();
    Mask {
        fs: ts.fs,
        t0: ts.t0,
        data,
    }
}

/// Flags windows where the sensor has lost skin contact: a sample is good
/// when at least `min_ok_ratio` of its centered window sits at or above
/// `min_sig_threshold`. Windows spilling over the edges are marked bad.
pub fn lost_sqi(
    ts: &TimeSeries,
    window_s: f64,
    min_sig_threshold: f64,
    min_ok_ratio: f64,
) -> Result<Mask> {
    if !(0.0..=1.0).contains(&min_ok_ratio) {
        return Err(SignalError::InvalidRatio(min_ok_ratio));
    }
    let mut w = (window_s * ts.fs).round() as usize;
    if w == 0 {
        return Err(SignalError::InvalidWindow(w));
    }
    if w % 2 == 0 {
        w -= 1;
    }
    let ok: Vec<bool> = ts
        .data
        .iter()
        .map(|&v| v.is_finite() && v >= min_sig_threshold)
        .collect();
    let counts = rolling_true_count(&ok, w, true);
    let needed = w as f64 * min_ok_ratio;
    let data = counts
        .iter()
        .map(|c| c.map_or(false, |n| n as f64 >= needed))
        .collect();
    Ok(Mask {
        fs: ts.fs,
        t0: ts.t0,
        data,
    })
}

/// Removes isolated flips from a mask: a sample stays `true` only if the
/// fraction of `true` samples in its surrounding window reaches
/// `min_ok_ratio`. With `flip` set the mask is inverted before and after,
/// which prunes isolated `false` islands instead. An even centered window
/// is widened by one sample to stay symmetric.
pub fn sqi_smoothen(
    mask: &Mask,
    window_s: f64,
    min_ok_ratio: f64,
    flip: bool,
    center: bool,
) -> Result<Mask> {
    if !(0.0..=1.0).contains(&min_ok_ratio) {
        return Err(SignalError::InvalidRatio(min_ok_ratio));
    }
    let w_nominal = (window_s * mask.fs).round() as usize;
    if w_nominal == 0 {
        return Err(SignalError::InvalidWindow(w_nominal));
    }
    let w_eff = if center && w_nominal % 2 == 0 {
        w_nominal + 1
    } else {
        w_nominal
    };
    let work: Vec<bool> = if flip {
        mask.data.iter().map(|b| !b).collect()
    } else {
        mask.data.clone()
    };
    let counts = rolling_true_count(&work, w_eff, center);
    let needed = w_eff as f64 * min_ok_ratio;
    let mut out: Vec<bool> = work
        .iter()
        .zip(&counts)
        .map(|(&v, c)| v && c.map_or(false, |n| n as f64 >= needed))
        .collect();
    if flip {
        for b in out.iter_mut() {
            *b = !*b;
        }
    }
    Ok(Mask {
        fs: mask.fs,
        t0: mask.t0,
        data: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(fs: f64, data: Vec<bool>) -> Mask {
        Mask { fs, t0: 0.0, data }
    }

    #[test]
    fn and_or_are_elementwise() {
        let a = mask(4.0, vec![true, true, false, false]);
        let b = mask(4.0, vec![true, false, true, false]);
        let and = sqi_and(&[&a, &b]).unwrap();
        let or = sqi_or(&[&a, &b]).unwrap();
        assert_eq!(and.data, vec![true, false, false, false]);
        assert_eq!(or.data, vec![true, true, true, false]);
    }

    #[test]
    fn combinators_reject_length_mismatch() {
        let a = mask(4.0, vec![true, true]);
        let b = mask(4.0, vec![true]);
        assert!(matches!(
            sqi_and(&[&a, &b]),
            Err(SignalError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn combinators_reject_index_mismatch() {
        let a = mask(4.0, vec![true, true]);
        let b = Mask {
            fs: 8.0,
            t0: 0.0,
            data: vec![true, true],
        };
        assert!(matches!(
            sqi_or(&[&a, &b]),
            Err(SignalError::IndexMismatch { .. })
        ));
    }

    #[test]
    fn threshold_rejects_nan_and_bounds() {
        let ts = TimeSeries::new(4.0, 0.0, vec![0.01, 0.5, f64::NAN, 2.0]);
        let m = threshold_sqi(&ts, Some(0.05), Some(1.0));
        assert_eq!(m.data, vec![false, true, false, false]);
    }

    #[test]
    fn lost_sqi_flags_flat_dropout() {
        let fs = 4.0;
        let mut data = vec![1.0; 120];
        for v in data.iter_mut().skip(40).take(40) {
            *v = 0.0;
        }
        let m = lost_sqi(&TimeSeries::new(fs, 0.0, data), 5.0, 0.05, 0.9).unwrap();
        assert!(!m.data[60], "center of dropout must be flagged");
        assert!(m.data[20], "clean region must pass");
        assert!(!m.data[0], "edge windows are incomplete and must fail");
    }

    #[test]
    fn smoothen_window_one_is_identity() {
        let m = mask(1.0, vec![true, false, true, true, false]);
        let out = sqi_smoothen(&m, 1.0, 1.0, false, true).unwrap();
        assert_eq!(out.data, m.data);
        let out_flipped = sqi_smoothen(&m, 1.0, 1.0, true, true).unwrap();
        assert_eq!(out_flipped.data, m.data);
    }

    #[test]
    fn smoothen_prunes_isolated_true() {
        let mut data = vec![false; 20];
        data[10] = true;
        let m = mask(1.0, data);
        let out = sqi_smoothen(&m, 5.0, 0.6, false, true).unwrap();
        assert!(out.data.iter().all(|b| !b));
    }

    #[test]
    fn smoothen_flip_fills_isolated_false() {
        let mut data = vec![true; 20];
        data[10] = false;
        let m = mask(1.0, data);
        let out = sqi_smoothen(&m, 5.0, 0.6, true, true).unwrap();
        // a single bad sample surrounded by good ones is recovered
        assert!(out.data[10]);
    }

    #[test]
    fn empty_operand_list_is_rejected() {
        assert!(matches!(
            sqi_and(&[]),
            Err(SignalError::EmptySeries("sqi_and"))
        ));
    }
}

//! Chunked execution of the quality and SCR pipelines over long recordings.
//!
//! A recording is split into its maximal gap-free stretches; stretches
//! shorter than a minimum duration are discarded and the survivors are
//! padded with a margin so filter transients fall outside the kept samples.
//! Chunks can be processed by a small worker pool; merging is
//! first-write-wins per sample, so results are identical regardless of the
//! worker count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::detectors::{decompose_eda, ScrConfig, ScrOutput};
use crate::error::{Result, SignalError};
use crate::quality::{process_eda_quality, EdaQualityConfig, EdaQualityOutput};
use crate::signal::{Mask, ScrPeak, TimeSeries};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Gap-free stretches shorter than this are dropped, in seconds.
    pub min_chunk_dur_s: f64,
    /// Padding added on each side of a kept stretch, in seconds.
    pub margin_s: f64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_chunk_dur_s: 300.0,
            margin_s: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub quality: EdaQualityConfig,
    pub scr: ScrConfig,
    pub chunk: ChunkConfig,
    pub run_scr: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality: EdaQualityConfig::default(),
            scr: ScrConfig::default(),
            chunk: ChunkConfig::default(),
            run_scr: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Sample range of one chunk after padding; `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: usize,
    pub end: usize,
}

/// Maximal finite runs of at least `min_chunk_dur_s`, padded by `margin_s`
/// on each side and clamped to the series. Padded ranges of neighboring
/// chunks may overlap.
pub fn split_chunks(eda: &TimeSeries, cfg: &ChunkConfig) -> Vec<ChunkRange> {
    let n = eda.len();
    let margin = (cfg.margin_s * eda.fs).round() as usize;
    let mut chunks = Vec::new();
    let mut i = 0;
    while i < n {
        if !eda.data[i].is_finite() {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && eda.data[i].is_finite() {
            i += 1;
        }
        if ((i - start) as f64) / eda.fs < cfg.min_chunk_dur_s {
            continue;
        }
        chunks.push(ChunkRange {
            start: start.saturating_sub(margin),
            end: (i + margin).min(n),
        });
    }
    chunks
}

/// Merged per-sample products of the chunked run. Samples outside every
/// chunk are NaN (`false` for the quality mask).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkedOutput {
    pub eda_cleaned: TimeSeries,
    pub eda_cleaned_lowpass: TimeSeries,
    pub sqi: Mask,
    pub noise_mean: TimeSeries,
    pub tonic: TimeSeries,
    pub phasic: TimeSeries,
    pub phasic_noise_ratio: TimeSeries,
    pub peaks: Vec<ScrPeak>,
}

struct ChunkProducts {
    quality: EdaQualityOutput,
    scr: Option<ScrOutput>,
}

fn process_chunk(eda: &TimeSeries, range: ChunkRange, cfg: &PipelineConfig) -> Result<ChunkProducts> {
    let slice = TimeSeries {
        fs: eda.fs,
        t0: eda.timestamp(range.start),
        data: eda.data[range.start..range.end].to_vec(),
    };
    let quality = process_eda_quality(&slice, &cfg.quality)?;
    let scr = if cfg.run_scr {
        Some(decompose_eda(&quality, &cfg.scr)?)
    } else {
        None
    };
    Ok(ChunkProducts { quality, scr })
}

/// Runs the pipelines chunk by chunk and merges the results back onto the
/// input grid. `n_jobs` workers process chunks concurrently; a failing
/// chunk aborts the whole run.
pub fn run_chunked(eda: &TimeSeries, cfg: &PipelineConfig, n_jobs: usize) -> Result<ChunkedOutput> {
    let chunks = split_chunks(eda, &cfg.chunk);
    debug!("split {} samples into {} chunk(s)", eda.len(), chunks.len());
    let n_jobs = n_jobs.max(1).min(chunks.len().max(1));

    let results: Vec<Option<Result<ChunkProducts>>> = if n_jobs <= 1 {
        chunks
            .iter()
            .map(|&range| Some(process_chunk(eda, range, cfg)))
            .collect()
    } else {
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<Result<ChunkProducts>>>> =
            Mutex::new((0..chunks.len()).map(|_| None).collect());
        std::thread::scope(|scope| {
            for _ in 0..n_jobs {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= chunks.len() {
                        break;
                    }
                    let result = process_chunk(eda, chunks[i], cfg);
                    let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
                    guard[i] = Some(result);
                });
            }
        });
        slots.into_inner().unwrap_or_else(|e| e.into_inner())
    };

    merge(eda, &chunks, results)
}

fn merge(
    eda: &TimeSeries,
    chunks: &[ChunkRange],
    results: Vec<Option<Result<ChunkProducts>>>,
) -> Result<ChunkedOutput> {
    let n = eda.len();
    let series = || TimeSeries {
        fs: eda.fs,
        t0: eda.t0,
        data: vec![f64::NAN; n],
    };
    let mut out = ChunkedOutput {
        eda_cleaned: series(),
        eda_cleaned_lowpass: series(),
        sqi: Mask {
            fs: eda.fs,
            t0: eda.t0,
            data: vec![false; n],
        },
        noise_mean: series(),
        tonic: series(),
        phasic: series(),
        phasic_noise_ratio: series(),
        peaks: Vec::new(),
    };

    let mut claimed = vec![false; n];
    for (index, (range, slot)) in chunks.iter().zip(results).enumerate() {
        let wrap = |source: SignalError| SignalError::ChunkFailed {
            index,
            source: Box::new(source),
        };
        let products = slot
            .ok_or(SignalError::EmptySeries("chunk result"))
            .map_err(wrap)?
            .map_err(wrap)?;

        // overlapping margins of earlier chunks win; each chunk therefore
        // owns a contiguous tail of its range
        let mut owned_from = range.end;
        for local in 0..range.end - range.start {
            let g = range.start + local;
            if claimed[g] {
                continue;
            }
            claimed[g] = true;
            if g < owned_from {
                owned_from = g;
            }
            let q = &products.quality;
            out.eda_cleaned.data[g] = q.eda_cleaned.data[local];
            out.eda_cleaned_lowpass.data[g] = q.eda_cleaned_lowpass.data[local];
            out.sqi.data[g] = q.sqi.data[local];
            out.noise_mean.data[g] = q.noise_mean.data[local];
            if let Some(scr) = &products.scr {
                out.tonic.data[g] = scr.tonic.data[local];
                out.phasic.data[g] = scr.phasic.data[local];
                out.phasic_noise_ratio.data[g] = scr.phasic_noise_ratio.data[local];
            }
        }
        if let Some(scr) = products.scr {
            for peak in scr.peaks {
                let g = ((peak.time_s - eda.t0) * eda.fs).round() as isize;
                if g >= owned_from as isize && (g as usize) < range.end {
                    out.peaks.push(peak);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn slow_signal(fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 2.0 + 0.1 * (2.0 * PI * 0.01 * i as f64 / fs).sin())
            .collect()
    }

    fn approx_same(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
    }

    #[test]
    fn short_runs_are_dropped() {
        let fs = 4.0;
        let mut data = slow_signal(fs, 2800);
        // 200 s run, gap, 400 s run
        for v in data[800..1200].iter_mut() {
            *v = f64::NAN;
        }
        let eda = TimeSeries::new(fs, 0.0, data);
        let chunks = split_chunks(&eda, &ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        // padded 10 s before the second run
        assert_eq!(chunks[0].start, 1200 - 40);
        assert_eq!(chunks[0].end, 2800);
    }

    #[test]
    fn margins_clamp_at_series_bounds() {
        let eda = TimeSeries::new(4.0, 0.0, slow_signal(4.0, 1600));
        let chunks = split_chunks(&eda, &ChunkConfig::default());
        assert_eq!(chunks, vec![ChunkRange { start: 0, end: 1600 }]);
    }

    #[test]
    fn parallel_matches_sequential() {
        let fs = 4.0;
        let mut data = slow_signal(fs, 4000);
        // two qualifying runs separated by a minute of signal loss
        for v in data[1800..2040].iter_mut() {
            *v = f64::NAN;
        }
        let eda = TimeSeries::new(fs, 0.0, data);
        let cfg = PipelineConfig::new();
        let seq = run_chunked(&eda, &cfg, 1).unwrap();
        let par = run_chunked(&eda, &cfg, 2).unwrap();
        assert!(approx_same(&seq.eda_cleaned.data, &par.eda_cleaned.data));
        assert!(approx_same(&seq.tonic.data, &par.tonic.data));
        assert_eq!(seq.sqi.data, par.sqi.data);
        assert_eq!(seq.peaks.len(), par.peaks.len());
        for (a, b) in seq.peaks.iter().zip(&par.peaks) {
            assert_eq!(a.time_s, b.time_s);
        }
    }

    #[test]
    fn no_qualifying_chunk_yields_empty_output() {
        let eda = TimeSeries::new(4.0, 0.0, slow_signal(4.0, 400));
        let out = run_chunked(&eda, &PipelineConfig::new(), 1).unwrap();
        assert!(out.eda_cleaned.data.iter().all(|v| v.is_nan()));
        assert!(out.peaks.is_empty());
    }

    #[test]
    fn samples_outside_chunks_stay_nan() {
        let fs = 4.0;
        let mut data = slow_signal(fs, 2800);
        for v in data[0..1200].iter_mut() {
            *v = f64::NAN;
        }
        let eda = TimeSeries::new(fs, 0.0, data);
        let out = run_chunked(&eda, &PipelineConfig::new(), 1).unwrap();
        // well before the padded chunk start
        assert!(out.eda_cleaned.data[600].is_nan());
        assert!(!out.sqi.data[600]);
    }
}

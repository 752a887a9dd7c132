use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use galvo_lib::{
    chunk::{run_chunked, ChunkedOutput, PipelineConfig},
    detectors::{decompose_eda, detect_on_wrist, OnWristConfig, ScrConfig},
    io::{csv as csv_io, text as text_io},
    quality::{process_eda_quality, EdaQualityConfig},
    signal::TimeSeries,
};
use log::info;
use serde::Serialize;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "galvo",
    version,
    about = "Galvo: wearable EDA quality and SCR processing tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum WristVariant {
    /// Smoothing-based detector for raw-count accelerometers
    Refined,
    /// Per-minute detector of Bottcher et al.
    Bottcher,
    /// Smoothing-based detector for g-scaled 64 Hz accelerometers
    #[value(name = "embrace-plus")]
    EmbracePlus,
}

impl WristVariant {
    fn config(&self) -> OnWristConfig {
        match self {
            WristVariant::Refined => OnWristConfig::default(),
            WristVariant::Bottcher => OnWristConfig::bottcher(),
            WristVariant::EmbracePlus => OnWristConfig::embrace_plus(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect on-wrist periods from accelerometer, EDA and temperature files
    OnWrist {
        #[arg(long)]
        eda: PathBuf,
        #[arg(long)]
        tmp: PathBuf,
        #[arg(long)]
        acc_x: PathBuf,
        #[arg(long)]
        acc_y: Option<PathBuf>,
        #[arg(long)]
        acc_z: Option<PathBuf>,
        #[arg(long, default_value_t = 4.0)]
        eda_fs: f64,
        #[arg(long, default_value_t = 4.0)]
        tmp_fs: f64,
        #[arg(long, default_value_t = 32.0)]
        acc_fs: f64,
        #[arg(long, default_value = "refined")]
        variant: WristVariant,
    },
    /// Run the EDA quality pipeline on newline-delimited samples
    EdaQuality {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 4.0)]
        fs: f64,
        #[arg(long)]
        min_valid_len_s: Option<f64>,
        #[arg(long)]
        max_interpolate_s: Option<f64>,
    },
    /// Quality pipeline followed by tonic/phasic decomposition and SCR peaks
    Decompose {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 4.0)]
        fs: f64,
        #[arg(long)]
        min_amplitude: Option<f64>,
        #[arg(long)]
        peak_prominence: Option<f64>,
    },
    /// Chunked end-to-end run over a long recording
    Run {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Delimited file with timestamp and value columns instead of --input
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value = "time_s")]
        time_col: String,
        #[arg(long, default_value = "eda")]
        value_col: String,
        #[arg(long, default_value_t = 4.0)]
        fs: f64,
        #[arg(long, default_value_t = 1)]
        n_jobs: usize,
        #[arg(long)]
        no_scr: bool,
        #[arg(long)]
        min_chunk_dur_s: Option<f64>,
        #[arg(long)]
        margin_s: Option<f64>,
        /// Write the merged per-sample table here
        #[arg(long)]
        out_tsv: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::OnWrist {
            eda,
            tmp,
            acc_x,
            acc_y,
            acc_z,
            eda_fs,
            tmp_fs,
            acc_fs,
            variant,
        } => cmd_on_wrist(
            &eda,
            &tmp,
            &acc_x,
            acc_y.as_deref(),
            acc_z.as_deref(),
            eda_fs,
            tmp_fs,
            acc_fs,
            variant,
        )?,
        Commands::EdaQuality {
            input,
            fs,
            min_valid_len_s,
            max_interpolate_s,
        } => cmd_eda_quality(input.as_deref(), fs, min_valid_len_s, max_interpolate_s)?,
        Commands::Decompose {
            input,
            fs,
            min_amplitude,
            peak_prominence,
        } => cmd_decompose(input.as_deref(), fs, min_amplitude, peak_prominence)?,
        Commands::Run {
            input,
            csv,
            time_col,
            value_col,
            fs,
            n_jobs,
            no_scr,
            min_chunk_dur_s,
            margin_s,
            out_tsv,
        } => cmd_run(
            input.as_deref(),
            csv.as_deref(),
            &time_col,
            &value_col,
            fs,
            n_jobs,
            no_scr,
            min_chunk_dur_s,
            margin_s,
            out_tsv.as_deref(),
        )?,
    }
    Ok(())
}

fn read_samples(input: Option<&Path>) -> Result<Vec<f64>> {
    match input {
        Some(path) => text_io::read_f64_series(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_f64_series(&buf)
        }
    }
}

fn series_from_input(input: Option<&Path>, fs: f64) -> Result<TimeSeries> {
    Ok(TimeSeries::new(fs, 0.0, read_samples(input)?))
}

#[allow(clippy::too_many_arguments)]
fn cmd_on_wrist(
    eda: &Path,
    tmp: &Path,
    acc_x: &Path,
    acc_y: Option<&Path>,
    acc_z: Option<&Path>,
    eda_fs: f64,
    tmp_fs: f64,
    acc_fs: f64,
    variant: WristVariant,
) -> Result<()> {
    let eda = TimeSeries::new(eda_fs, 0.0, text_io::read_f64_series(eda)?);
    let tmp = TimeSeries::new(tmp_fs, 0.0, text_io::read_f64_series(tmp)?);
    let mut axes = vec![TimeSeries::new(acc_fs, 0.0, text_io::read_f64_series(acc_x)?)];
    for path in [acc_y, acc_z].into_iter().flatten() {
        axes.push(TimeSeries::new(acc_fs, 0.0, text_io::read_f64_series(path)?));
    }
    let cfg = variant.config();
    if matches!(variant, WristVariant::Bottcher) && axes.len() != 3 {
        return Err(anyhow!("the bottcher variant needs all three acc axes"));
    }
    let refs: Vec<&TimeSeries> = axes.iter().collect();
    let mask = detect_on_wrist(&refs, &eda, &tmp, &cfg)?;
    println!("{}", serde_json::to_string(&mask)?);
    Ok(())
}

fn cmd_eda_quality(
    input: Option<&Path>,
    fs: f64,
    min_valid_len_s: Option<f64>,
    max_interpolate_s: Option<f64>,
) -> Result<()> {
    let eda = series_from_input(input, fs)?;
    let mut cfg = EdaQualityConfig::default();
    if let Some(v) = min_valid_len_s {
        cfg.min_valid_len_s = v;
    }
    if let Some(v) = max_interpolate_s {
        cfg.max_interpolate_s = v;
    }
    let out = process_eda_quality(&eda, &cfg)?;
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn cmd_decompose(
    input: Option<&Path>,
    fs: f64,
    min_amplitude: Option<f64>,
    peak_prominence: Option<f64>,
) -> Result<()> {
    let eda = series_from_input(input, fs)?;
    let quality = process_eda_quality(&eda, &EdaQualityConfig::default())?;
    let mut cfg = ScrConfig::default();
    if let Some(v) = min_amplitude {
        cfg.min_amplitude = v;
    }
    if let Some(v) = peak_prominence {
        cfg.peak_prominence = v;
    }
    let out = decompose_eda(&quality, &cfg)?;
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

#[derive(Serialize)]
struct RunSummary<'a> {
    n_samples: usize,
    n_valid: usize,
    valid_fraction: f64,
    peaks: &'a [galvo_lib::signal::ScrPeak],
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    input: Option<&Path>,
    csv: Option<&Path>,
    time_col: &str,
    value_col: &str,
    fs: f64,
    n_jobs: usize,
    no_scr: bool,
    min_chunk_dur_s: Option<f64>,
    margin_s: Option<f64>,
    out_tsv: Option<&Path>,
) -> Result<()> {
    let eda = match csv {
        Some(path) => csv_io::read_timeseries_csv(path, time_col, value_col, b',')?,
        None => series_from_input(input, fs)?,
    };
    let mut cfg = PipelineConfig::new();
    cfg.run_scr = !no_scr;
    if let Some(v) = min_chunk_dur_s {
        cfg.chunk.min_chunk_dur_s = v;
    }
    if let Some(v) = margin_s {
        cfg.chunk.margin_s = v;
    }
    info!(
        "processing {} samples at {} Hz with {} worker(s)",
        eda.len(),
        eda.fs,
        n_jobs.max(1)
    );
    let out = run_chunked(&eda, &cfg, n_jobs)?;
    if let Some(path) = out_tsv {
        csv_io::write_chunked_tsv(path, &out)?;
    }
    print_run_summary(&out);
    Ok(())
}

fn print_run_summary(out: &ChunkedOutput) {
    let n_samples = out.eda_cleaned.len();
    let n_valid = out.sqi.data.iter().filter(|&&b| b).count();
    let summary = RunSummary {
        n_samples,
        n_valid,
        valid_fraction: if n_samples == 0 {
            0.0
        } else {
            n_valid as f64 / n_samples as f64
        },
        peaks: &out.peaks,
    };
    match serde_json::to_string(&summary) {
        Ok(js) => println!("{js}"),
        Err(err) => eprintln!("failed to serialize summary: {err}"),
    }
}

use anyhow::{Context, Result};
use std::path::Path;

use crate::chunk::ChunkedOutput;
use crate::signal::TimeSeries;

/// Read a timestamped series from a delimited file. The sampling frequency
/// is derived from the timestamp column, which must be uniform and
/// monotonic. Empty or `nan` cells become missing samples.
pub fn read_timeseries_csv(
    path: &Path,
    time_col: &str,
    value_col: &str,
    delimiter: u8,
) -> Result<TimeSeries> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader.headers().context("missing header row")?.clone();
    let t_idx = headers
        .iter()
        .position(|h| h == time_col)
        .with_context(|| format!("no column named {time_col:?}"))?;
    let v_idx = headers
        .iter()
        .position(|h| h == value_col)
        .with_context(|| format!("no column named {value_col:?}"))?;

    let mut timestamps = Vec::new();
    let mut values = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("bad record at row {}", row + 2))?;
        let t: f64 = record
            .get(t_idx)
            .unwrap_or("")
            .trim()
            .parse()
            .with_context(|| format!("bad timestamp at row {}", row + 2))?;
        timestamps.push(t);
        values.push(parse_cell(record.get(v_idx).unwrap_or("")));
    }
    TimeSeries::from_timestamps(&timestamps, values)
        .with_context(|| format!("non-uniform timestamps in {}", path.display()))
}

fn parse_cell(cell: &str) -> f64 {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return f64::NAN;
    }
    cell.parse().unwrap_or(f64::NAN)
}

/// Write the merged chunked products as a tab-separated table, one row per
/// input sample.
pub fn write_chunked_tsv(path: &Path, out: &ChunkedOutput) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record([
        "time_s",
        "eda_cleaned",
        "eda_cleaned_lowpass",
        "sqi",
        "noise_mean",
        "tonic",
        "phasic",
        "phasic_noise_ratio",
    ])?;
    for i in 0..out.eda_cleaned.len() {
        writer.write_record([
            format_value(out.eda_cleaned.timestamp(i)),
            format_value(out.eda_cleaned.data[i]),
            format_value(out.eda_cleaned_lowpass.data[i]),
            (if out.sqi.data[i] { "1" } else { "0" }).to_string(),
            format_value(out.noise_mean.data[i]),
            format_value(out.tonic.data[i]),
            format_value(out.phasic.data[i]),
            format_value(out.phasic_noise_ratio.data[i]),
        ])?;
    }
    writer.flush().context("failed to flush output")?;
    Ok(())
}

fn format_value(v: f64) -> String {
    if v.is_finite() {
        format!("{v}")
    } else {
        "NaN".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_timestamped_column() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "t,eda\n0.0,1.0\n0.25,1.1\n0.5,nan\n0.75,1.3").unwrap();
        let ts = read_timeseries_csv(file.path(), "t", "eda", b',').unwrap();
        assert_eq!(ts.len(), 4);
        assert!((ts.fs - 4.0).abs() < 1e-9);
        assert!(ts.data[2].is_nan());
    }

    #[test]
    fn unknown_column_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "t,eda\n0.0,1.0").unwrap();
        assert!(read_timeseries_csv(file.path(), "t", "missing", b',').is_err());
    }
}

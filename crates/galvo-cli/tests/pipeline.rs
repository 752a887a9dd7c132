use assert_cmd::Command;
use galvo_lib::signal::Mask;
use serde::Deserialize;
use std::{error::Error, f64::consts::PI, fs, io::Write};

#[derive(Deserialize)]
struct QualityOutput {
    sqi: Mask,
}

fn write_series(dir: &std::path::Path, name: &str, data: &[f64]) -> Result<String, Box<dyn Error>> {
    let path = dir.join(name);
    let mut file = fs::File::create(&path)?;
    for v in data {
        if v.is_finite() {
            writeln!(file, "{v}")?;
        } else {
            writeln!(file, "nan")?;
        }
    }
    Ok(path.to_str().expect("utf8 path").to_string())
}

fn slow_signal(fs: f64, dur_s: f64) -> Vec<f64> {
    (0..(fs * dur_s) as usize)
        .map(|i| 2.0 + 0.1 * (2.0 * PI * 0.01 * i as f64 / fs).sin())
        .collect()
}

#[test]
fn eda_quality_flags_dropout() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let mut data = slow_signal(4.0, 600.0);
    for v in data[960..1080].iter_mut() {
        *v = 0.0; // 30 s of lost contact
    }
    let input = write_series(dir.path(), "eda.txt", &data)?;

    let mut cmd = Command::cargo_bin("galvo")?;
    cmd.args(["eda-quality", "--fs", "4", "--input", &input]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let actual: QualityOutput = serde_json::from_slice(&output)?;

    assert!(actual.sqi.data[400], "clean region must be valid");
    assert!(!actual.sqi.data[1020], "dropout must be flagged");
    Ok(())
}

#[test]
fn run_output_is_independent_of_worker_count() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let mut data = slow_signal(4.0, 1000.0);
    for v in data[1800..2040].iter_mut() {
        *v = f64::NAN; // a minute of missing samples splits the recording
    }
    let input = write_series(dir.path(), "eda.txt", &data)?;

    let mut seq = Command::cargo_bin("galvo")?;
    seq.args(["run", "--fs", "4", "--n-jobs", "1", "--input", &input]);
    let seq_out = seq.assert().success().get_output().stdout.clone();

    let mut par = Command::cargo_bin("galvo")?;
    par.args(["run", "--fs", "4", "--n-jobs", "4", "--input", &input]);
    let par_out = par.assert().success().get_output().stdout.clone();

    assert_eq!(seq_out, par_out);
    Ok(())
}

#[test]
fn run_writes_sample_table() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let data = slow_signal(4.0, 400.0);
    let input = write_series(dir.path(), "eda.txt", &data)?;
    let table = dir.path().join("out.tsv");

    let mut cmd = Command::cargo_bin("galvo")?;
    cmd.args([
        "run",
        "--fs",
        "4",
        "--input",
        &input,
        "--out-tsv",
        table.to_str().expect("utf8 path"),
    ]);
    cmd.assert().success();

    let text = fs::read_to_string(&table)?;
    let mut lines = text.lines();
    let header = lines.next().expect("header row");
    assert!(header.starts_with("time_s\teda_cleaned"));
    assert_eq!(lines.count(), data.len());
    Ok(())
}

#[test]
fn on_wrist_tracks_eda_contact() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let fs_eda = 4.0;
    let mut eda = vec![1.0; (fs_eda * 240.0) as usize];
    for v in eda[480..].iter_mut() {
        *v = 0.0; // device taken off halfway
    }
    let tmp = vec![25.0; 960]; // below the skin-temperature bound
    let acc = vec![0.0; 32 * 240];
    let eda_path = write_series(dir.path(), "eda.txt", &eda)?;
    let tmp_path = write_series(dir.path(), "tmp.txt", &tmp)?;
    let acc_path = write_series(dir.path(), "acc_x.txt", &acc)?;

    let mut cmd = Command::cargo_bin("galvo")?;
    cmd.args([
        "on-wrist",
        "--eda",
        &eda_path,
        "--tmp",
        &tmp_path,
        "--acc-x",
        &acc_path,
        "--variant",
        "refined",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let mask: Mask = serde_json::from_slice(&output)?;

    assert_eq!(mask.data.len(), eda.len());
    assert!(mask.data[240], "worn period must be detected");
    assert!(!mask.data[720], "off-wrist period must be detected");
    Ok(())
}

#[test]
fn decompose_reports_scr_peaks() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let fs = 4.0;
    let mut data: Vec<f64> = vec![2.0; (fs * 600.0) as usize];
    for &t_b in &[100.0, 200.0, 300.0, 400.0, 500.0] {
        for (i, v) in data.iter_mut().enumerate() {
            let dt = i as f64 / fs - t_b;
            if (0.0..2.0).contains(&dt) {
                *v += 0.3 * dt / 2.0;
            } else if (2.0..20.0).contains(&dt) {
                *v += 0.3 * (-(dt - 2.0) / 5.0).exp();
            }
        }
    }
    let input = write_series(dir.path(), "eda.txt", &data)?;

    #[derive(Deserialize)]
    struct Peak {
        time_s: f64,
    }
    #[derive(Deserialize)]
    struct ScrOut {
        peaks: Vec<Peak>,
    }

    let mut cmd = Command::cargo_bin("galvo")?;
    cmd.args(["decompose", "--fs", "4", "--input", &input]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let actual: ScrOut = serde_json::from_slice(&output)?;

    assert_eq!(actual.peaks.len(), 5);
    assert!((actual.peaks[0].time_s - 102.0).abs() < 2.0);
    Ok(())
}

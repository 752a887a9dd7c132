use anyhow::{Context, Result};
use std::path::Path;

/// Parse a newline-delimited floating point series, ignoring blank and
/// comment lines. `nan` (any case) and empty-marker `-` stand for missing
/// samples.
pub fn parse_f64_series(text: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed == "-" || trimmed.eq_ignore_ascii_case("nan") {
            out.push(f64::NAN);
            continue;
        }
        let val: f64 = trimmed
            .parse()
            .with_context(|| format!("line {} is not f64: {}", idx + 1, trimmed))?;
        out.push(val);
    }
    if out.is_empty() {
        anyhow::bail!("no numeric samples found");
    }
    Ok(out)
}

/// Read a newline-delimited floating point series from disk.
pub fn read_f64_series(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_f64_series(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_values_comments_and_gaps() {
        let text = "# raw EDA\n1.5\n\nnan\n-\n2.0\n";
        let out = parse_f64_series(text).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 1.5);
        assert!(out[1].is_nan());
        assert!(out[2].is_nan());
        assert_eq!(out[3], 2.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_f64_series("1.0\nabc\n").is_err());
        assert!(parse_f64_series("# only comments\n").is_err());
    }
}

use thiserror::Error;

/// Errors raised by the core processing primitives.
///
/// Input contract violations fail fast with one of these variants; numerically
/// invalid intermediate states (negative variance after noise subtraction,
/// short filter inputs) are recovered locally and never surface here.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("mask length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("mask index mismatch: fs {left_fs} Hz @ t0 {left_t0} vs fs {right_fs} Hz @ t0 {right_t0}")]
    IndexMismatch {
        left_fs: f64,
        left_t0: f64,
        right_fs: f64,
        right_t0: f64,
    },

    #[error("window size must be >= 1, got {0}")]
    InvalidWindow(usize),

    #[error("min_ok_ratio must lie in [0, 1], got {0}")]
    InvalidRatio(f64),

    #[error("cutoff {cutoff_hz} Hz must lie in (0, Nyquist) for fs {fs} Hz")]
    InvalidCutoff { cutoff_hz: f64, fs: f64 },

    #[error("timestamps must be strictly increasing (violation at row {0})")]
    NonMonotonic(usize),

    #[error("{0} requires a non-empty input")]
    EmptySeries(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("chunk {index} failed")]
    ChunkFailed {
        index: usize,
        #[source]
        source: Box<SignalError>,
    },
}

pub type Result<T> = std::result::Result<T, SignalError>;

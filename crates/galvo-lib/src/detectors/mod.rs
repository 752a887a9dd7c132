//! Event and state detectors built on the rolling and SQI primitives.

pub mod onwrist;
pub mod scr;

pub use onwrist::{detect_on_wrist, Aggregation, AiMethod, OnWristConfig};
pub use scr::{decompose_eda, ScrConfig, ScrOutput};

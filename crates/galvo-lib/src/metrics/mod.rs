//! Signal quality indices and mask combinators.

pub mod sqi;

pub use sqi::{lost_sqi, sqi_and, sqi_or, sqi_smoothen, threshold_sqi};

pub mod chunk;
pub mod detectors;
pub mod error;
pub mod filters;
pub mod io;
pub mod metrics;
pub mod quality;
pub mod rolling;
pub mod signal;

pub use chunk::*;
pub use detectors::*;
pub use error::*;
pub use filters::*;
pub use metrics::*;
pub use quality::*;
pub use rolling::*;
pub use signal::*;

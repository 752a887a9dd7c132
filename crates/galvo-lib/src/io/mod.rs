//! Reading raw sensor exports and writing pipeline products.

pub mod csv;
pub mod text;

//! CLI command implementations

pub mod forecasts;
pub mod models;
pub mod runs;
pub mod status;

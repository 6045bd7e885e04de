//! Pipeline configuration loading

use anyhow::Result;
use forecast_lib::{PipelineConfig, PipelineError};
use std::path::Path;

/// Prefix of environment overrides, e.g. `FORECAST__HORIZON_STEPS=24`
const ENV_PREFIX: &str = "FORECAST";

/// Layer an optional file under `FORECAST__*` environment variables.
///
/// Without an explicit path, `forecast.{toml,yaml,json}` in the working
/// directory is used when present.
pub fn load(path: Option<&Path>) -> Result<PipelineConfig> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name("forecast").required(false),
    };

    let config = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("metrics"),
        )
        .build()
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    let config: PipelineConfig = config
        .try_deserialize()
        .map_err(|e| PipelineError::Config(e.to_string()))?;
    Ok(config)
}

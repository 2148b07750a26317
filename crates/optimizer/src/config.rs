//! Configuration loading

use anyhow::{Context, Result};
use optimizer_lib::config::OptimizerConfig;

/// Environment variable naming the optional configuration file
const CONFIG_PATH_VAR: &str = "OPTIMIZER_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "optimizer.toml";

/// Load configuration from an optional file overlaid with `OPTIMIZER__*` variables
pub fn load() -> Result<OptimizerConfig> {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = config::Config::builder()
        .add_source(config::File::with_name(&path).required(false))
        .add_source(
            config::Environment::with_prefix("OPTIMIZER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to read configuration from {path}"))?;

    let config: OptimizerConfig = config
        .try_deserialize()
        .context("invalid optimizer configuration")?;
    config.validate().context("optimizer configuration rejected")?;
    Ok(config)
}

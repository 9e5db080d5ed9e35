use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::{de::DeserializeOwned, Deserialize};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        load_layered("configuration", "APP")
    }
}

/// Load a typed configuration from `.env`, an optional `<file_stem>.{yaml,toml,json}`
/// file and `<PREFIX>__SECTION__KEY` environment variables, in that order of precedence.
pub fn load_layered<T: DeserializeOwned>(file_stem: &str, env_prefix: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

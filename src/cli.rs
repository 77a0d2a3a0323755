use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_ASSETS_DIR: &str = "assets";

pub const USAGE: &str = "usage: labelsort [ASSETS_DIR] [--config=PATH] [--no-wait]";

#[derive(Debug, PartialEq, Eq)]
pub struct CliConfig {
    pub assets: PathBuf,
    /// Settings file; defaults to `config.txt` inside the assets directory.
    pub config: Option<PathBuf>,
    pub wait_for_key: bool,
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum CliError {
    #[error("{USAGE}")]
    Help,
    #[error("unrecognized argument: {0}")]
    InvalidFlag(String),
}

impl CliConfig {
    pub fn from_env() -> Result<Self, CliError> {
        Self::from_iter(env::args().skip(1))
    }

    pub fn from_iter<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut assets: Option<PathBuf> = None;
        let mut config: Option<PathBuf> = None;
        let mut wait_for_key = true;

        for arg in args {
            if arg.starts_with("--") {
                if arg == "--help" {
                    return Err(CliError::Help);
                }
                if arg == "--no-wait" {
                    wait_for_key = false;
                    continue;
                }
                if let Some(value) = arg.strip_prefix("--config=") {
                    config = Some(PathBuf::from(value));
                    continue;
                }
                if let Some(value) = arg.strip_prefix("--assets=") {
                    assets = Some(PathBuf::from(value));
                    continue;
                }
                return Err(CliError::InvalidFlag(arg));
            }

            if assets.is_none() {
                assets = Some(PathBuf::from(&arg));
                continue;
            }

            return Err(CliError::InvalidFlag(arg));
        }

        Ok(Self {
            assets: assets.unwrap_or_else(|| PathBuf::from(DEFAULT_ASSETS_DIR)),
            config,
            wait_for_key,
        })
    }
}

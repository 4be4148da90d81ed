//! Configuration for the assetdump CLI
//!
//! Settings come from, in order of precedence: command-line flags,
//! environment variables, `assetdump.toml` in the working directory, and
//! built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::Cli;

pub const CONFIG_FILE: &str = "assetdump.toml";
pub const DEFAULT_CLASSDATA: &str = "classdata.tpk";
pub const DEFAULT_OUTPUT: &str = "assetPathsDump.html";

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub classdata: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

impl Config {
    /// Load a config file, or defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Effective paths for one run
#[derive(Debug, PartialEq)]
pub struct Settings {
    pub classdata: PathBuf,
    pub output: PathBuf,
    pub json: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: Config) -> Self {
        Self {
            classdata: cli
                .classdata
                .clone()
                .or(config.classdata)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASSDATA)),
            output: cli
                .output
                .clone()
                .or(config.output)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            json: cli.json.clone().or(config.json),
        }
    }
}

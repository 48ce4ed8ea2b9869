//! Run configuration, read from a TOML file.
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checker::CheckOptions;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    /// Accept time signatures of equal measure length as unchanged
    #[serde(default)]
    pub time_equivalence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepairConfig {
    #[serde(default = "default_true")]
    pub duplicate_declarations: bool,
    #[serde(default = "default_true")]
    pub neighbor_propagation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_report")]
    pub report: PathBuf,
    /// Corrected copies go under this directory, never over the inputs
    #[serde(default = "default_corrections")]
    pub corrections: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_report() -> PathBuf {
    PathBuf::from("report.json")
}

fn default_corrections() -> PathBuf {
    PathBuf::from("corrected")
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            duplicate_declarations: true,
            neighbor_propagation: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report: default_report(),
            corrections: default_corrections(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn check_options(&self) -> CheckOptions {
        CheckOptions {
            time_equivalence: self.check.time_equivalence,
        }
    }

    pub fn repairs_enabled(&self) -> bool {
        self.repair.duplicate_declarations || self.repair.neighbor_propagation
    }
}

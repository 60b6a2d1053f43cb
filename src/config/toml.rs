//! TOML configuration file parsing
//!
//! A configuration file may carry any of three tables; every key is
//! optional and anything given on the command line overrides it.
//!
//! ```toml
//! # shared by both tools
//! cores = "0-3"
//! dir = "/mnt/test"
//! seed = 42
//!
//! [perf]
//! size_mb = 1024
//! block_size = 131072
//! ioengine = "libaio"
//! qdepth = 32
//! random = true
//! direct = true
//! write = true
//! runtime = 30
//!
//! [regression]
//! test_type = 2
//! buffered = false
//!
//! [logging]
//! level = "info"
//! ```

use super::cli::{PerfCli, RegressionCli};
use super::{EngineKind, PerfConfig, RegressionConfig, TestType};
use crate::error::HarnessError;
use crate::worker::affinity::parse_cpu_list;
use crate::Result;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub perf: PerfSection,
    #[serde(default)]
    pub regression: RegressionSection,
    #[serde(default)]
    pub logging: LoggingSection,
    pub cores: Option<String>,
    pub dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub json: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerfSection {
    pub size_mb: Option<u64>,
    pub block_size: Option<usize>,
    pub ioengine: Option<EngineKind>,
    pub qdepth: Option<usize>,
    pub random: Option<bool>,
    pub direct: Option<bool>,
    pub write: Option<bool>,
    pub runtime: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionSection {
    pub test_type: Option<u8>,
    pub buffered: Option<bool>,
    pub ioengine: Option<EngineKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
}

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<FileConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<FileConfig> {
    let config: FileConfig = ::toml::from_str(contents).context("Failed to parse TOML configuration")?;
    Ok(config)
}

fn require<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| HarnessError::argument(format!("missing required value: {}", what)).into())
}

fn cores(cli: Option<&String>, file: Option<&String>) -> Result<Option<Vec<usize>>> {
    match cli.or(file) {
        Some(list) => parse_cpu_list(list)
            .map(Some)
            .map_err(|e| HarnessError::argument(format!("--cores: {:#}", e)).into()),
        None => Ok(None),
    }
}

/// Merge CLI arguments with the file (CLI takes precedence)
///
/// File size, block size, engine and queue depth must come from one of the
/// two; a missing one is an argument error.
pub fn merge_perf(cli: &PerfCli, file: &FileConfig) -> Result<PerfConfig> {
    let defaults = PerfConfig::default();
    let perf = &file.perf;

    Ok(PerfConfig {
        file_size_mb: require(cli.file_size_mb.or(perf.size_mb), "-S <file size in MB>")?,
        block_size: require(cli.block_size.or(perf.block_size), "-B <block size in bytes>")?,
        engine: require(cli.engine.map(EngineKind::from).or(perf.ioengine), "-E <libaio|sync>")?,
        queue_depth: require(cli.queue_depth.or(perf.qdepth), "-Q <queue depth>")?,
        random: cli.random || perf.random.unwrap_or(false),
        direct: cli.direct || perf.direct.unwrap_or(false),
        write: cli.write || perf.write.unwrap_or(false),
        runtime_secs: cli.runtime_secs.or(perf.runtime),
        cores: cores(cli.cores.as_ref(), file.cores.as_ref())?.unwrap_or(defaults.cores),
        dir: cli.dir.clone().or_else(|| file.dir.clone()).unwrap_or(defaults.dir),
        seed: cli.seed.or(file.seed),
        json: cli.json.clone().or_else(|| file.json.clone()),
        log_level: cli
            .log_level
            .clone()
            .or_else(|| file.logging.level.clone())
            .unwrap_or(defaults.log_level),
    })
}

/// Merge CLI arguments with the file (CLI takes precedence)
pub fn merge_regression(cli: &RegressionCli, file: &FileConfig) -> Result<RegressionConfig> {
    let defaults = RegressionConfig::default();
    let section = &file.regression;

    let test_type = match cli.test_type.or(section.test_type) {
        Some(raw) => TestType::try_from(raw).map_err(HarnessError::argument)?,
        None => defaults.test_type,
    };
    let buffered = cli.buffered || section.buffered.unwrap_or(false);

    Ok(RegressionConfig {
        test_type,
        cores: cores(cli.cores.as_ref(), file.cores.as_ref())?.unwrap_or(defaults.cores),
        dir: cli.dir.clone().or_else(|| file.dir.clone()).unwrap_or(defaults.dir),
        direct: !buffered,
        engine: cli
            .engine
            .map(EngineKind::from)
            .or(section.ioengine)
            .unwrap_or(defaults.engine),
        seed: cli.seed.or(file.seed),
        json: cli.json.clone().or_else(|| file.json.clone()),
        log_level: cli
            .log_level
            .clone()
            .or_else(|| file.logging.level.clone())
            .unwrap_or(defaults.log_level),
    })
}

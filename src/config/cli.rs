//! CLI argument parsing using clap

use super::toml::{merge_perf, merge_regression, parse_toml_file, FileConfig};
use super::validator::{validate_perf, validate_regression};
use super::{EngineKind, PerfConfig, RegressionConfig};
use crate::error::HarnessError;
use crate::Result;
use clap::{CommandFactory, Parser, ValueEnum};
use std::path::PathBuf;

/// I/O engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineArg {
    /// Linux native AIO
    Libaio,
    /// Blocking pread/pwrite
    Sync,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Libaio => EngineKind::Libaio,
            EngineArg::Sync => EngineKind::Sync,
        }
    }
}

/// fsperf - queue depth bounded file I/O benchmark
#[derive(Parser, Debug)]
#[command(name = "fsperf")]
#[command(version, about, long_about = None)]
pub struct PerfCli {
    /// File size in MB
    #[arg(short = 'S', long = "size", value_name = "MB")]
    pub file_size_mb: Option<u64>,

    /// Block size in bytes (multiple of 4096)
    #[arg(short = 'B', long, value_name = "BYTES")]
    pub block_size: Option<usize>,

    /// I/O engine
    #[arg(short = 'E', long = "ioengine", value_enum)]
    pub engine: Option<EngineArg>,

    /// Queue depth
    #[arg(short = 'Q', long = "qdepth")]
    pub queue_depth: Option<usize>,

    /// Random offsets instead of sequential
    #[arg(short = 'R', long)]
    pub random: bool,

    /// Direct I/O (O_DIRECT)
    #[arg(short = 'D', long)]
    pub direct: bool,

    /// Write workload instead of read
    #[arg(short = 'W', long)]
    pub write: bool,

    /// Stop submitting after this many seconds
    #[arg(short = 'T', long = "runtime", value_name = "SECONDS")]
    pub runtime_secs: Option<u64>,

    // === Ambient options ===
    /// CPUs to run on, one worker each (e.g. 0,2-4)
    #[arg(long, value_name = "LIST")]
    pub cores: Option<String>,

    /// Directory to create test files in
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write a JSON report to this file
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Seed for random offsets
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "FSPERF_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// fsperf-regress - storage regression suite
#[derive(Parser, Debug)]
#[command(name = "fsperf-regress")]
#[command(version, about, long_about = None)]
pub struct RegressionCli {
    /// Test type (1: max test, 2: quick test, 3: million test)
    #[arg(short = 'T', long = "test-type", value_name = "TYPE")]
    pub test_type: Option<u8>,

    /// Buffered I/O for the AIO cases instead of O_DIRECT
    #[arg(long)]
    pub buffered: bool,

    /// I/O engine for the AIO cases
    #[arg(short = 'E', long = "ioengine", value_enum)]
    pub engine: Option<EngineArg>,

    /// CPUs to run on, one worker each (e.g. 0,2-4)
    #[arg(long, value_name = "LIST")]
    pub cores: Option<String>,

    /// Directory to run the suite in
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write a JSON report to this file
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Seed for random offsets
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "FSPERF_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Read the `--config` file, if any; an unreadable file is an argument error
fn load_file(path: Option<&PathBuf>) -> Result<FileConfig> {
    match path {
        Some(path) => parse_toml_file(path).map_err(|e| HarnessError::argument(format!("{:#}", e)).into()),
        None => Ok(FileConfig::default()),
    }
}

impl PerfCli {
    /// Merged and validated configuration
    pub fn resolve(&self) -> Result<PerfConfig> {
        let file = load_file(self.config.as_ref())?;
        let config = merge_perf(self, &file)?;
        validate_perf(&config)?;
        Ok(config)
    }

    /// Usage text, printed after argument errors
    pub fn usage() -> String {
        Self::command().render_help().to_string()
    }
}

impl RegressionCli {
    pub fn resolve(&self) -> Result<RegressionConfig> {
        let file = load_file(self.config.as_ref())?;
        let config = merge_regression(self, &file)?;
        validate_regression(&config)?;
        Ok(config)
    }

    pub fn usage() -> String {
        Self::command().render_help().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestType;
    use crate::error::ErrorClass;

    #[test]
    fn test_cli_definitions_are_consistent() {
        PerfCli::command().debug_assert();
        RegressionCli::command().debug_assert();
    }

    #[test]
    fn test_perf_short_flags() {
        let cli = PerfCli::try_parse_from([
            "fsperf", "-S", "100", "-B", "4096", "-E", "libaio", "-Q", "32", "-R", "-D", "-W", "-T", "5",
        ])
        .unwrap();

        let config = cli.resolve().unwrap();
        assert_eq!(config.file_size_mb, 100);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.engine, EngineKind::Libaio);
        assert_eq!(config.queue_depth, 32);
        assert!(config.random && config.direct && config.write);
        assert_eq!(config.runtime_secs, Some(5));
    }

    #[test]
    fn test_perf_misaligned_block_size_is_argument_error() {
        let cli = PerfCli::try_parse_from(["fsperf", "-S", "1", "-B", "1000", "-E", "sync", "-Q", "1"]).unwrap();
        let err = cli.resolve().unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Argument);
    }

    #[test]
    fn test_perf_missing_required_value() {
        let cli = PerfCli::try_parse_from(["fsperf", "-B", "4096", "-E", "sync", "-Q", "1"]).unwrap();
        let err = cli.resolve().unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Argument);
    }

    #[test]
    fn test_perf_unknown_engine_rejected_by_parser() {
        assert!(PerfCli::try_parse_from(["fsperf", "-E", "io_uring"]).is_err());
    }

    #[test]
    fn test_missing_config_file_is_argument_error() {
        let cli = PerfCli::try_parse_from(["fsperf", "--config", "/nonexistent/fsperf.toml"]).unwrap();
        let err = cli.resolve().unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Argument);
    }

    #[test]
    fn test_regression_defaults_to_quick() {
        let cli = RegressionCli::try_parse_from(["fsperf-regress"]).unwrap();
        let config = cli.resolve().unwrap();
        assert_eq!(config.test_type, TestType::Quick);
        assert!(config.direct);
    }

    #[test]
    fn test_regression_test_type_and_buffered() {
        let cli = RegressionCli::try_parse_from(["fsperf-regress", "-T", "3", "--buffered", "--cores", "0-1"]).unwrap();
        let config = cli.resolve().unwrap();
        assert_eq!(config.test_type, TestType::Mill);
        assert!(!config.direct);
        assert_eq!(config.cores, vec![0, 1]);
    }

    #[test]
    fn test_regression_invalid_test_type() {
        let cli = RegressionCli::try_parse_from(["fsperf-regress", "-T", "7"]).unwrap();
        let err = cli.resolve().unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Argument);
    }

    #[test]
    fn test_usage_mentions_flags() {
        assert!(PerfCli::usage().contains("--qdepth"));
        assert!(RegressionCli::usage().contains("--test-type"));
    }
}

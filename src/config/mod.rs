//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! Both tools end up with one explicit configuration value, built once in
//! `main` and passed by reference from there on:
//!
//! - [`PerfConfig`] for the `fsperf` benchmark
//! - [`RegressionConfig`] for the `fsperf-regress` suite
//!
//! Values come from the command line ([`cli`]) and, optionally, a TOML file
//! ([`toml`]); the command line wins. [`validator`] checks the merged result.

pub mod cli;
pub mod toml;
pub mod validator;

pub use crate::engine::EngineKind;

use crate::engine::OperationType;
use crate::error::HarnessError;
use crate::stats::CLUSTER_SIZE;
use crate::util::time::MB;
use crate::worker::controller::IoJob;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Benchmark configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfConfig {
    /// File size in MiB (`-S`)
    pub file_size_mb: u64,
    /// Request size in bytes (`-B`), a multiple of the cluster size
    pub block_size: usize,
    /// I/O engine (`-E`)
    pub engine: EngineKind,
    /// Queue depth (`-Q`)
    pub queue_depth: usize,
    /// Random offsets (`-R`)
    pub random: bool,
    /// O_DIRECT (`-D`)
    pub direct: bool,
    /// Write workload (`-W`); reads otherwise
    pub write: bool,
    /// Time budget in seconds (`-T`)
    pub runtime_secs: Option<u64>,
    /// CPUs to run on, one worker each
    pub cores: Vec<usize>,
    /// Directory the test files are created in
    pub dir: PathBuf,
    /// Seed for random offsets
    pub seed: Option<u64>,
    /// Also write a JSON report here
    pub json: Option<PathBuf>,
    pub log_level: String,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            file_size_mb: 0,
            block_size: CLUSTER_SIZE as usize,
            engine: EngineKind::Libaio,
            queue_depth: 1,
            random: false,
            direct: false,
            write: false,
            runtime_secs: None,
            cores: vec![0],
            dir: PathBuf::from("."),
            seed: None,
            json: None,
            log_level: default_log_level(),
        }
    }
}

impl PerfConfig {
    /// `None` when `-S` does not fit in a byte count
    pub fn file_size_bytes(&self) -> Option<u64> {
        self.file_size_mb.checked_mul(MB)
    }

    pub fn direction(&self) -> OperationType {
        if self.write {
            OperationType::Write
        } else {
            OperationType::Read
        }
    }

    pub fn runtime(&self) -> Option<Duration> {
        self.runtime_secs.map(Duration::from_secs)
    }

    /// The test case every core runs
    pub fn job(&self) -> Result<IoJob> {
        let file_size = self
            .file_size_bytes()
            .ok_or_else(|| HarnessError::argument(format!("file size (-S) {}MB is too large", self.file_size_mb)))?;

        Ok(IoJob {
            file_name: PathBuf::from("perf_test_file"),
            file_size,
            io_size: self.block_size,
            qdepth: self.queue_depth,
            direction: self.direction(),
            random: self.random,
            direct: self.direct,
            runtime: self.runtime(),
            engine: self.engine,
            seed: self.seed,
        })
    }
}

impl fmt::Display for PerfConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size {}MB, block {}B, engine {}, qdepth {}, {} {}{}",
            self.file_size_mb,
            self.block_size,
            self.engine,
            self.queue_depth,
            if self.random { "random" } else { "sequential" },
            self.direction(),
            if self.direct { ", direct" } else { "" }
        )?;
        if let Some(secs) = self.runtime_secs {
            write!(f, ", runtime {}s", secs)?;
        }
        Ok(())
    }
}

/// Regression sizing profile (`-T`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TestType {
    /// Everything the file system has room for
    Max,
    /// About 100 items or 100 MiB per case
    #[default]
    Quick,
    /// Up to a million items or a large capped extent
    Mill,
}

impl TryFrom<u8> for TestType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(TestType::Max),
            2 => Ok(TestType::Quick),
            3 => Ok(TestType::Mill),
            other => Err(format!(
                "invalid test type {} (1: max test, 2: quick test, 3: million test)",
                other
            )),
        }
    }
}

impl From<TestType> for u8 {
    fn from(value: TestType) -> Self {
        match value {
            TestType::Max => 1,
            TestType::Quick => 2,
            TestType::Mill => 3,
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestType::Max => write!(f, "MAX_TEST"),
            TestType::Quick => write!(f, "QUICK_TEST"),
            TestType::Mill => write!(f, "MILL_TEST"),
        }
    }
}

/// Regression suite configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionConfig {
    pub test_type: TestType,
    pub cores: Vec<usize>,
    pub dir: PathBuf,
    /// O_DIRECT for the AIO cases
    pub direct: bool,
    pub engine: EngineKind,
    pub seed: Option<u64>,
    pub json: Option<PathBuf>,
    pub log_level: String,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            test_type: TestType::Quick,
            cores: vec![0],
            dir: PathBuf::from("."),
            direct: true,
            engine: EngineKind::Libaio,
            seed: None,
            json: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

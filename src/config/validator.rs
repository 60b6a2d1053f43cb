//! Configuration validation
//!
//! Every violation is an argument error: the binaries print it with the usage
//! text and exit without running anything.

use super::{PerfConfig, RegressionConfig};
use crate::error::HarnessError;
use crate::stats::CLUSTER_SIZE;
use crate::Result;

/// Largest queue depth accepted
pub const MAX_QUEUE_DEPTH: usize = 1024;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

fn invalid(msg: String) -> anyhow::Error {
    HarnessError::argument(msg).into()
}

/// Validate benchmark configuration
pub fn validate_perf(config: &PerfConfig) -> Result<()> {
    if config.file_size_mb == 0 {
        return Err(invalid("file size (-S) must be greater than 0".to_string()));
    }
    if config.file_size_bytes().is_none() {
        return Err(invalid(format!("file size (-S) {}MB is too large", config.file_size_mb)));
    }

    validate_block_size(config.block_size)?;

    if config.queue_depth == 0 || config.queue_depth > MAX_QUEUE_DEPTH {
        return Err(invalid(format!(
            "qdepth (-Q) must be between 1 and {}, got {}",
            MAX_QUEUE_DEPTH, config.queue_depth
        )));
    }

    if config.runtime_secs == Some(0) {
        return Err(invalid("runtime (-T) must be greater than 0".to_string()));
    }

    validate_cores(&config.cores)?;
    validate_log_level(&config.log_level)?;
    Ok(())
}

/// Validate regression configuration
pub fn validate_regression(config: &RegressionConfig) -> Result<()> {
    validate_cores(&config.cores)?;
    validate_log_level(&config.log_level)?;
    Ok(())
}

/// Block size must be a positive multiple of the cluster size
pub fn validate_block_size(block_size: usize) -> Result<()> {
    let cluster = CLUSTER_SIZE as usize;
    if block_size < cluster || block_size % cluster != 0 {
        return Err(invalid(format!(
            "block size (-B) {} is not aligned with {} bytes",
            block_size, cluster
        )));
    }
    Ok(())
}

fn validate_cores(cores: &[usize]) -> Result<()> {
    if cores.is_empty() {
        return Err(invalid("core list cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_log_level(level: &str) -> Result<()> {
    // Anything with a directive (`fsperf=debug`) is left to the filter parser
    if level.contains('=') || LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(invalid(format!(
            "unknown log level '{}' (expected one of {})",
            level,
            LOG_LEVELS.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    fn valid() -> PerfConfig {
        PerfConfig {
            file_size_mb: 100,
            block_size: 4096,
            queue_depth: 32,
            ..Default::default()
        }
    }

    fn is_argument_error(result: Result<()>) -> bool {
        matches!(result, Err(e) if HarnessError::classify(&e) == ErrorClass::Argument)
    }

    #[test]
    fn test_valid_perf_config() {
        assert!(validate_perf(&valid()).is_ok());
    }

    #[test]
    fn test_block_size_alignment() {
        assert!(validate_block_size(4096).is_ok());
        assert!(validate_block_size(131072).is_ok());
        assert!(is_argument_error(validate_block_size(0)));
        assert!(is_argument_error(validate_block_size(512)));
        assert!(is_argument_error(validate_block_size(6144)));
    }

    #[test]
    fn test_queue_depth_bounds() {
        let mut config = valid();
        config.queue_depth = 0;
        assert!(is_argument_error(validate_perf(&config)));
        config.queue_depth = MAX_QUEUE_DEPTH + 1;
        assert!(is_argument_error(validate_perf(&config)));
        config.queue_depth = MAX_QUEUE_DEPTH;
        assert!(validate_perf(&config).is_ok());
    }

    #[test]
    fn test_zero_runtime_and_size_rejected() {
        let mut config = valid();
        config.runtime_secs = Some(0);
        assert!(is_argument_error(validate_perf(&config)));

        let mut config = valid();
        config.file_size_mb = 0;
        assert!(is_argument_error(validate_perf(&config)));
    }

    #[test]
    fn test_oversized_file_rejected() {
        let mut config = valid();
        config.file_size_mb = u64::MAX;
        assert!(is_argument_error(validate_perf(&config)));
        assert!(config.job().is_err());

        config.file_size_mb = u64::MAX / (1024 * 1024);
        assert!(validate_perf(&config).is_ok());
        assert!(config.job().is_ok());
    }

    #[test]
    fn test_cores_and_log_level() {
        let mut config = valid();
        config.cores.clear();
        assert!(is_argument_error(validate_perf(&config)));

        let mut config = valid();
        config.log_level = "loud".to_string();
        assert!(is_argument_error(validate_perf(&config)));
        config.log_level = "fsperf=debug".to_string();
        assert!(validate_perf(&config).is_ok());

        assert!(validate_regression(&RegressionConfig::default()).is_ok());
    }
}

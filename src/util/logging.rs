//! Diagnostic logging setup
//!
//! Both binaries log through `tracing` to stderr. `RUST_LOG` takes precedence
//! over the level given on the command line or in the config file, so a
//! single module can be turned up without touching the others.

use tracing_subscriber::EnvFilter;

use crate::Result;

/// Install the global fmt subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // The first call may already have happened in another test thread
        let _ = init_logging("warn");
        assert!(init_logging("debug").is_err());
    }
}

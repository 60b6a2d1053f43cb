//! fsperf - queue-depth bounded I/O benchmark and regression harness
//!
//! fsperf drives a storage engine through its file API from one pinned
//! worker thread per configured core, keeps a bounded number of asynchronous
//! requests in flight, and reports per-core and group throughput, latency and
//! CPU usage.
//!
//! # Architecture
//!
//! - **Engines**: libaio and sync backends behind one queue interface, with
//!   a bounded queue engine that keeps the in-flight count at or below the
//!   configured depth
//! - **Storage**: everything the harness does to the storage goes through the
//!   `StorageApi` trait (a POSIX directory in production, an in-memory
//!   namespace in tests)
//! - **Workers**: request generation, the per-test-case run controller and
//!   progress reporting
//! - **Stats**: per-category bounded channels from the workers to a single
//!   aggregator
//! - **Regression**: an ordered, fail-fast table of storage test cases
//!
//! Two binaries sit on top: `fsperf` (benchmark) and `fsperf-regress`
//! (regression suite).

pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod output;
pub mod regression;
pub mod stats;
pub mod storage;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::{PerfConfig, RegressionConfig};
pub use engine::IOEngine;
pub use error::{ErrorClass, HarnessError};
pub use storage::StorageApi;

/// Result type used throughout fsperf
pub type Result<T> = anyhow::Result<T>;

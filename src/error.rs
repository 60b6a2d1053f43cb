//! Error taxonomy
//!
//! Most functions return `crate::Result` (an `anyhow::Result`) and attach
//! context as errors travel upward. The variants here mark the failures the
//! binaries must tell apart: argument errors print usage, resource and queue
//! errors abort the current test case, and a regression failure halts the
//! remaining cases.
//!
//! Typed errors are recovered from an `anyhow::Error` with
//! [`HarnessError::classify`], which looks through any added context.

use std::path::PathBuf;

/// Failure classes of the harness
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Invalid or missing command-line / configuration value
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A storage collaborator call failed (open, preallocate, stat, ...)
    #[error("{op} failed for {}", path.display())]
    Resource {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Queue initialization, submission or completion failed
    #[error("queue {op} failed: {detail}")]
    Queue { op: &'static str, detail: String },

    /// A regression case returned something other than its pass criteria
    #[error("regression test {index} ({name}) failed with return code {code}")]
    RegressionFailed {
        index: usize,
        name: &'static str,
        code: i32,
    },
}

/// Coarse error class, used to pick exit behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Argument,
    Resource,
    Queue,
    Regression,
    Other,
}

impl HarnessError {
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn resource(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Resource {
            op,
            path: path.into(),
            source,
        }
    }

    /// Build a queue error, keeping the full context chain of the cause
    pub fn queue(op: &'static str, cause: &anyhow::Error) -> Self {
        Self::Queue {
            op,
            detail: format!("{:#}", cause),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Argument(_) => ErrorClass::Argument,
            Self::Resource { .. } => ErrorClass::Resource,
            Self::Queue { .. } => ErrorClass::Queue,
            Self::RegressionFailed { .. } => ErrorClass::Regression,
        }
    }

    /// Classify an arbitrary error chain
    pub fn classify(err: &anyhow::Error) -> ErrorClass {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<HarnessError>())
            .map(HarnessError::class)
            .unwrap_or(ErrorClass::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_classify_through_context() {
        let err = anyhow::Error::new(HarnessError::argument("qdepth must be > 0"))
            .context("parsing command line");
        assert_eq!(HarnessError::classify(&err), ErrorClass::Argument);
    }

    #[test]
    fn test_classify_resource_from_result() {
        let res: crate::Result<()> = Err(HarnessError::resource(
            "open",
            "/nonexistent/file",
            std::io::Error::from_raw_os_error(libc::ENOENT),
        )
        .into());
        let err = res.context("test case 3").unwrap_err();
        assert_eq!(HarnessError::classify(&err), ErrorClass::Resource);
        assert!(format!("{:#}", err).contains("open failed for /nonexistent/file"));
    }

    #[test]
    fn test_classify_plain_error() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(HarnessError::classify(&err), ErrorClass::Other);
    }

    #[test]
    fn test_queue_error_keeps_cause_chain() {
        let cause = anyhow::anyhow!("EAGAIN").context("io_submit");
        let err = HarnessError::queue("submit", &cause);
        assert_eq!(err.to_string(), "queue submit failed: io_submit: EAGAIN");
    }
}

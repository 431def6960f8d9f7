//! Execution error types.

use cinnabar_core::{AllocError, KernelError};
use thiserror::Error;

/// Failure of one partition execution.
///
/// Handle-count checks run before any kernel, so a `HandleCountMismatch`
/// guarantees no output buffer was touched.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("expected {expected} {role} handles, got {actual}")]
    HandleCountMismatch {
        role: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("scratchpad holds {actual} bytes, plan needs {required}")]
    ScratchpadTooSmall { required: usize, actual: usize },

    #[error("kernel {index} ('{name}') failed: {source}")]
    Kernel {
        index: usize,
        name: String,
        source: KernelError,
    },

    #[error(transparent)]
    Allocation(#[from] AllocError),

    #[error(transparent)]
    Resource(#[from] cinnabar_core::Error),
}

/// Result type for execution.
pub type Result<T> = std::result::Result<T, ExecError>;

//! Compilation error types.

use cinnabar_core::{DataType, OpKind};
use thiserror::Error;

/// Failure inside a single pipeline pass.
///
/// Passes report what went wrong; the pipeline wraps this with the pass name
/// and partition id before surfacing it as a [`CompileError`].
#[derive(Debug, Error)]
pub enum PassError {
    #[error("shape inference contradiction: {0}")]
    ShapeContradiction(String),

    #[error("type inference contradiction: {0}")]
    TypeContradiction(String),

    #[error("no kernel for {kind} with element type {dtype:?}")]
    Unsupported { kind: OpKind, dtype: DataType },

    #[error("memory planning failed: {0}")]
    Plan(String),

    #[error(transparent)]
    Graph(#[from] cinnabar_core::Error),
}

/// Failure of a whole partition compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("pass '{pass}' failed for partition {partition}: {source}")]
    Pass {
        pass: String,
        partition: u64,
        source: PassError,
    },

    #[error("partition {partition} contains unsupported operator {kind} ({dtype:?})")]
    UnsupportedOperator {
        partition: u64,
        kind: OpKind,
        dtype: DataType,
    },

    #[error("engine kind '{0}' has no registered kernels")]
    UnsupportedEngine(String),

    #[error("external declaration mismatch: {0}")]
    ExternalMismatch(String),

    #[error("invalid partition: {0}")]
    InvalidPartition(#[source] cinnabar_core::Error),
}

/// Result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

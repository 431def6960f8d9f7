//! Core IR, compiled-partition artifacts, and collaborator traits for Cinnabar.
//!
//! This crate provides the foundational abstractions the compiler and runtime
//! crates build on:
//! - Mutable subgraph IR rewritten by the pass pipeline (`SubgraphIr`, `OpNode`)
//! - Logical tensor model (`LogicalTensor`, shapes, layouts, roles)
//! - Broadcast rules shared by canonicalization and shape inference
//! - Immutable compiled artifacts (`CompiledPartition`, `MemoryPlan`,
//!   `KernelInvocation`) and the mutable per-thread `ExecutionArgsSet`
//! - The process-wide execution resource cache
//! - Collaborator traits at the seams: `ExecutableKernel`, `Engine`,
//!   `Stream`, `Allocator`

pub mod broadcast;
pub mod cache;
pub mod handle;
pub mod ir;
pub mod op;
pub mod plan;
pub mod tensor;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use broadcast::{align_rank, broadcast_shape};
pub use cache::ResourceCache;
pub use handle::MemoryHandle;
pub use ir::{OpNode, OpNodeId, SubgraphIr};
pub use op::{AttrMap, AttrValue, OpKind, PostOp};
pub use plan::{
    ArgSlot, CompiledPartition, ExecutionArgsSet, KernelInvocation, MemoryPlan, PartitionId,
    SLOT_ALIGNMENT,
};
pub use tensor::{LogicalTensor, TensorData, TensorId, TensorRole};
pub use traits::{AllocError, Allocator, Engine, ExecutableKernel, KernelError, RawBuffer, Stream};
pub use types::{DataType, Layout, TensorShape};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cinnabar-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("memory plan error: {0}")]
    Plan(String),

    #[error(transparent)]
    Allocation(#[from] traits::AllocError),
}

//! Kernel resolution and the reference CPU kernel set.
//!
//! Kernels are resolved once at compile time from a registry keyed by
//! operator kind and element type. The reference set covers f32 elementwise
//! compute with fused post-ops, plus broadcast materialization. Argument
//! convention for every kernel: sources in node input order, destination
//! last.

mod binary;
mod broadcast;
mod unary;

pub use binary::BinaryKernel;
pub use broadcast::BroadcastKernel;
pub use unary::UnaryKernel;

use crate::error::PassError;
use cinnabar_core::{
    ArgSlot, DataType, Engine, ExecutableKernel, KernelError, KernelInvocation, MemoryHandle,
    MemoryPlan, OpKind, OpNode, SubgraphIr,
};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Builds a kernel for one resolved (operator, element type) combination.
pub trait KernelBuilder: Send + Sync {
    fn build(
        &self,
        node: &OpNode,
        ir: &SubgraphIr,
    ) -> Result<Arc<dyn ExecutableKernel>, PassError>;
}

/// Kernel registry for one engine kind.
pub struct KernelRegistry {
    builders: HashMap<(OpKind, DataType), Arc<dyn KernelBuilder>>,
}

impl KernelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// The reference CPU registry: every primitive elementwise operator and
    /// broadcast materialization, f32 only.
    pub fn cpu() -> Self {
        let mut registry = Self::new();
        for kind in [
            OpKind::Add,
            OpKind::Sub,
            OpKind::Mul,
            OpKind::Div,
            OpKind::Max,
            OpKind::Min,
        ] {
            registry.register(kind, DataType::F32, Arc::new(binary::BinaryBuilder));
        }
        for kind in [OpKind::Reciprocal, OpKind::Sigmoid, OpKind::Relu, OpKind::Swish] {
            registry.register(kind, DataType::F32, Arc::new(unary::UnaryBuilder));
        }
        registry.register(
            OpKind::Broadcast,
            DataType::F32,
            Arc::new(broadcast::BroadcastBuilder),
        );
        registry
    }

    /// Registry for the given engine, if its kind has kernels.
    pub fn for_engine(engine: &dyn Engine) -> Option<Self> {
        match engine.kind() {
            "cpu" => Some(Self::cpu()),
            _ => None,
        }
    }

    /// Register a builder for an (operator, element type) combination.
    pub fn register(&mut self, kind: OpKind, dtype: DataType, builder: Arc<dyn KernelBuilder>) {
        self.builders.insert((kind, dtype), builder);
    }

    /// Build the kernel for a node, or fail with the unsupported combination.
    pub fn build(
        &self,
        node: &OpNode,
        ir: &SubgraphIr,
    ) -> Result<Arc<dyn ExecutableKernel>, PassError> {
        let dtype = ir.tensor(node.outputs[0])?.dtype;
        let builder = self
            .builders
            .get(&(node.kind, dtype))
            .ok_or(PassError::Unsupported {
                kind: node.kind,
                dtype,
            })?;
        builder.build(node, ir)
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve every scheduled node to a bound kernel invocation.
///
/// Bindings follow the kernel argument convention: one slot per node input
/// in order, then the output slot.
pub fn compile_invocations(
    ir: &SubgraphIr,
    plan: &MemoryPlan,
    registry: &KernelRegistry,
) -> Result<Vec<KernelInvocation>, PassError> {
    let mut invocations = Vec::new();

    for node_id in ir.topological_order() {
        let node = ir.node(node_id)?;
        let kernel = registry.build(node, ir)?;

        let mut bindings: Vec<ArgSlot> = Vec::with_capacity(node.inputs.len() + 1);
        for &input in &node.inputs {
            bindings.push(plan.slot(input)?);
        }
        bindings.push(plan.slot(node.outputs[0])?);

        trace!(
            kernel = kernel.name(),
            args = bindings.len(),
            "resolved invocation"
        );
        invocations.push(KernelInvocation {
            kernel,
            bindings,
            name: node.name.clone(),
        });
    }

    Ok(invocations)
}

// ──────────────────────────── Scalar semantics ───────────────────────────

pub(crate) fn apply_binary(kind: OpKind, a: f32, b: f32) -> f32 {
    match kind {
        OpKind::Add => a + b,
        OpKind::Sub => a - b,
        OpKind::Mul => a * b,
        OpKind::Div => a / b,
        OpKind::Max => a.max(b),
        OpKind::Min => a.min(b),
        _ => f32::NAN,
    }
}

pub(crate) fn apply_unary(kind: OpKind, x: f32) -> f32 {
    match kind {
        OpKind::Reciprocal => 1.0 / x,
        OpKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        OpKind::Relu => x.max(0.0),
        OpKind::Swish => x / (1.0 + (-x).exp()),
        _ => f32::NAN,
    }
}

/// Check a handle and view it as `len` f32 elements.
///
/// Returns a raw pointer rather than a slice: src0 may legally alias dst for
/// in-place invocations, and overlapping Rust references would be unsound.
pub(crate) fn f32_elements(
    handle: &MemoryHandle,
    len: usize,
    kernel: &str,
) -> Result<*mut f32, KernelError> {
    if handle.is_null() {
        return Err(KernelError::new(kernel, "argument handle is unbound"));
    }
    if handle.len() < len * std::mem::size_of::<f32>() {
        return Err(KernelError::new(
            kernel,
            format!(
                "argument holds {} bytes, kernel needs {}",
                handle.len(),
                len * std::mem::size_of::<f32>()
            ),
        ));
    }
    if handle.as_ptr() as usize % std::mem::align_of::<f32>() != 0 {
        return Err(KernelError::new(kernel, "argument is not 4-byte aligned"));
    }
    Ok(handle.as_ptr().cast::<f32>())
}
